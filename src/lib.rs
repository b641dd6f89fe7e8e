//! Interactive front end for the Kaleidoscope toy language.
//!
//! Text goes through `lexer` and `parser` into `ast` units; `codegen` lowers
//! each unit onto a `backend`, and `toplevel` sequences units, running
//! top-level expressions once and keeping definitions resident.

pub mod ast;
pub mod backend;
pub mod builtins;
pub mod codegen;
pub mod config;
pub mod error;
pub mod lexer;
pub mod logger;
pub mod parser;
pub mod token;
pub mod toplevel;

pub use error::{Error, ErrorKind, Result};
pub use toplevel::{main_loop, Outcome, Session};
