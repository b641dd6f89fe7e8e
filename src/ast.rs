#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Variable(String),
    Binary(char, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
    If(Box<Expr>, Box<Expr>, Box<Expr>),
    /// `for var = start, end[, step] in body`
    For(String, Box<Expr>, Box<Expr>, Option<Box<Expr>>, Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Prototype(pub String, pub Vec<String>);

impl Prototype {
    pub fn name(&self) -> &str {
        &self.0
    }

    pub fn params(&self) -> &[String] {
        &self.1
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function(pub Prototype, pub Expr);

impl Function {
    pub fn prototype(&self) -> &Prototype {
        &self.0
    }

    pub fn body(&self) -> &Expr {
        &self.1
    }
}

/// Name given to the synthetic function wrapping a top-level expression.
/// Not a valid identifier, so user code can never collide with it.
pub const ANONYMOUS: &str = "__anon_expr";

/// One compilable unit handed out by the parser.
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Definition(Function),
    Extern(Prototype),
    TopLevel(Function),
}
