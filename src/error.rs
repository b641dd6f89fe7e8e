use failure::{Backtrace, Context, Fail};
use std::fmt;

#[derive(Debug)]
pub struct Error {
    inner: Context<ErrorKind>,
}

#[derive(Clone, Debug, PartialEq, Fail)]
pub enum ErrorKind {
    #[fail(display = "parse error: {}", _0)]
    Parse(String),
    #[fail(display = "unknown variable name '{}'", _0)]
    UnknownVariable(String),
    #[fail(display = "unknown function referenced '{}'", _0)]
    UnknownFunction(String),
    #[fail(
        display = "incorrect number of arguments passed to '{}': expected {}, found {}",
        name, expected, found
    )]
    ArityMismatch {
        name: String,
        expected: usize,
        found: usize,
    },
    #[fail(display = "invalid binary operator '{}'", _0)]
    InvalidOperator(char),
    #[fail(display = "function '{}' cannot be redefined", _0)]
    DuplicateDefinition(String),
    #[fail(display = "function '{}' has a prototype but no backend declaration", _0)]
    FunctionNotFound(String),
    #[fail(display = "symbol '{}' is declared but never defined", _0)]
    UnresolvedSymbol(String),
    #[fail(display = "call depth exceeded {} levels", _0)]
    RecursionLimit(usize),
    /// The driver handed the backend inconsistent IR, or a freshly loaded
    /// unit did not expose its own entry point. Never caused by user input.
    #[fail(display = "internal error: {}", _0)]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Fail for Error {
    fn cause(&self) -> Option<&dyn Fail> {
        self.inner.cause()
    }

    fn backtrace(&self) -> Option<&Backtrace> {
        self.inner.backtrace()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.inner, f)
    }
}

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        self.inner.get_context()
    }

    pub(crate) fn parse(message: impl Into<String>) -> Self {
        Error::from(ErrorKind::Parse(message.into()))
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Error {
        Error {
            inner: Context::new(kind),
        }
    }
}

impl From<Context<ErrorKind>> for Error {
    fn from(inner: Context<ErrorKind>) -> Error {
        Error { inner }
    }
}
