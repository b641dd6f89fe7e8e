#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Def,
    Extern,
    If,
    Then,
    Else,
    For,
    In,
    Ident(String),
    /// Raw lexeme of `[0-9.]+`; converted to a float by the parser.
    Number(String),
    Kwd(char),
    Eof,
}

impl Token {
    pub fn is_kwd(&self, c: char) -> bool {
        *self == Token::Kwd(c)
    }
}
