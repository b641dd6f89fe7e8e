use super::ast::{Expr, Function, Item, Prototype, ANONYMOUS};
use super::config::PrecedenceTable;
use super::error::{Error, Result};
use super::lexer::Lexer;
use super::token::Token;

/// Recursive-descent parser handing out one [`Item`] per call.
///
/// Binary expressions are parsed by precedence climbing against the table
/// given at construction. The parser keeps exactly one token of lookahead.
pub struct Parser<'a> {
    lexer: Lexer<'a>,
    current: Token,
    precedence: PrecedenceTable,
}

impl<'a> Parser<'a> {
    pub fn new(input: &'a str, precedence: PrecedenceTable) -> Self {
        let mut lexer = Lexer::new(input);
        let current = lexer.next_token();
        Parser {
            lexer,
            current,
            precedence,
        }
    }

    fn advance(&mut self) -> Token {
        let next = self.lexer.next_token();
        std::mem::replace(&mut self.current, next)
    }

    fn skip_separators(&mut self) {
        while self.current.is_kwd(';') {
            self.advance();
        }
    }

    /// Parses the next unit, or returns `Ok(None)` once the input is used up.
    pub fn parse_item(&mut self) -> Result<Option<Item>> {
        self.skip_separators();
        let item = match self.current {
            Token::Eof => return Ok(None),
            Token::Def => Item::Definition(self.parse_definition()?),
            Token::Extern => Item::Extern(self.parse_extern()?),
            _ => Item::TopLevel(self.parse_toplevel()?),
        };
        self.skip_separators();
        Ok(Some(item))
    }

    /// The operator under the cursor and its precedence, if it is one.
    fn current_operator(&self) -> Option<(char, i32)> {
        match self.current {
            Token::Kwd(op) => self.precedence.get(op).map(|p| (op, p)),
            _ => None,
        }
    }

    fn token_precedence(&self) -> i32 {
        self.current_operator().map_or(-1, |(_, p)| p)
    }

    fn parse_number(&mut self, lexeme: String) -> Result<Expr> {
        self.advance();
        lexeme
            .parse::<f64>()
            .map(Expr::Number)
            .map_err(|_| Error::parse(format!("invalid number literal '{}'", lexeme)))
    }

    fn parse_paren(&mut self) -> Result<Expr> {
        self.advance(); // '('
        let e = self.parse_expr()?;
        if !self.current.is_kwd(')') {
            return Err(Error::parse("expected ')'"));
        }
        self.advance();
        Ok(e)
    }

    fn parse_identifier(&mut self, name: String) -> Result<Expr> {
        self.advance();
        if !self.current.is_kwd('(') {
            return Ok(Expr::Variable(name));
        }

        self.advance(); // '('
        let mut args = Vec::new();
        if !self.current.is_kwd(')') {
            loop {
                args.push(self.parse_expr()?);
                if self.current.is_kwd(')') {
                    break;
                }
                if !self.current.is_kwd(',') {
                    return Err(Error::parse("expected ')' or ',' in argument list"));
                }
                self.advance();
            }
        }
        self.advance(); // ')'
        Ok(Expr::Call(name, args))
    }

    fn parse_if(&mut self) -> Result<Expr> {
        self.advance(); // 'if'
        let cond = self.parse_expr()?;

        if self.current != Token::Then {
            return Err(Error::parse("expected 'then'"));
        }
        self.advance();
        let then = self.parse_expr()?;

        if self.current != Token::Else {
            return Err(Error::parse("expected 'else'"));
        }
        self.advance();
        let els = self.parse_expr()?;

        Ok(Expr::If(Box::new(cond), Box::new(then), Box::new(els)))
    }

    fn parse_for(&mut self) -> Result<Expr> {
        self.advance(); // 'for'

        let id = match self.advance() {
            Token::Ident(id) => id,
            _ => return Err(Error::parse("expected identifier after for")),
        };

        if !self.current.is_kwd('=') {
            return Err(Error::parse("expected '=' after for"));
        }
        self.advance();
        let start = self.parse_expr()?;

        if !self.current.is_kwd(',') {
            return Err(Error::parse("expected ',' after for start value"));
        }
        self.advance();
        let end = self.parse_expr()?;

        let step = if self.current.is_kwd(',') {
            self.advance();
            Some(Box::new(self.parse_expr()?))
        } else {
            None
        };

        if self.current != Token::In {
            return Err(Error::parse("expected 'in' after for"));
        }
        self.advance();
        let body = self.parse_expr()?;

        Ok(Expr::For(
            id,
            Box::new(start),
            Box::new(end),
            step,
            Box::new(body),
        ))
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.current.clone() {
            Token::Ident(name) => self.parse_identifier(name),
            Token::Number(lexeme) => self.parse_number(lexeme),
            Token::Kwd('(') => self.parse_paren(),
            Token::If => self.parse_if(),
            Token::For => self.parse_for(),
            _ => Err(Error::parse("unknown token when expecting an expression")),
        }
    }

    fn parse_binary_rhs(&mut self, min_precedence: i32, mut lhs: Expr) -> Result<Expr> {
        loop {
            let (op, precedence) = match self.current_operator() {
                Some((op, p)) if p >= min_precedence => (op, p),
                _ => return Ok(lhs),
            };
            self.advance();

            let mut rhs = self.parse_primary()?;
            if precedence < self.token_precedence() {
                rhs = self.parse_binary_rhs(precedence + 1, rhs)?;
            }

            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn parse_expr(&mut self) -> Result<Expr> {
        let lhs = self.parse_primary()?;
        self.parse_binary_rhs(0, lhs)
    }

    fn parse_prototype(&mut self) -> Result<Prototype> {
        let name = match self.advance() {
            Token::Ident(name) => name,
            _ => return Err(Error::parse("expected function name in prototype")),
        };

        if !self.current.is_kwd('(') {
            return Err(Error::parse("expected '(' in prototype"));
        }
        self.advance();

        let mut params: Vec<String> = Vec::new();
        while let Token::Ident(param) = self.current.clone() {
            if params.contains(&param) {
                return Err(Error::parse(format!(
                    "duplicate parameter '{}' in prototype",
                    param
                )));
            }
            params.push(param);
            self.advance();
        }

        if !self.current.is_kwd(')') {
            return Err(Error::parse("expected ')' in prototype"));
        }
        self.advance();

        Ok(Prototype(name, params))
    }

    fn parse_definition(&mut self) -> Result<Function> {
        self.advance(); // 'def'
        let proto = self.parse_prototype()?;
        let body = self.parse_expr()?;
        Ok(Function(proto, body))
    }

    fn parse_extern(&mut self) -> Result<Prototype> {
        self.advance(); // 'extern'
        self.parse_prototype()
    }

    fn parse_toplevel(&mut self) -> Result<Function> {
        let body = self.parse_expr()?;
        Ok(Function(Prototype(ANONYMOUS.to_owned(), vec![]), body))
    }
}

#[cfg(test)]
mod test {
    use super::super::error::ErrorKind;
    use super::*;
    use proptest::prelude::*;

    fn parser(s: &str) -> Parser<'_> {
        Parser::new(s, PrecedenceTable::default())
    }

    fn num(n: f64) -> Box<Expr> {
        Box::new(Expr::Number(n))
    }

    fn var(s: &str) -> Box<Expr> {
        Box::new(Expr::Variable(s.to_owned()))
    }

    fn parse_error(s: &str) -> String {
        let mut p = parser(s);
        loop {
            match p.parse_item() {
                Ok(Some(_)) => continue,
                Ok(None) => panic!("'{}' parsed without error", s),
                Err(e) => match e.kind() {
                    ErrorKind::Parse(msg) => return msg.clone(),
                    k => panic!("unexpected error kind {:?}", k),
                },
            }
        }
    }

    #[test]
    fn test_primary() {
        assert_eq!(parser("1.0").parse_primary().unwrap(), Expr::Number(1.0));
        assert_eq!(parser("y").parse_primary().unwrap(), *var("y"));
    }

    #[test]
    fn test_expr() {
        assert_eq!(
            parser("1+2").parse_expr().unwrap(),
            Expr::Binary('+', num(1.0), num(2.0))
        );

        assert_eq!(
            parser("1+2*3").parse_expr().unwrap(),
            Expr::Binary('+', num(1.0), Box::new(Expr::Binary('*', num(2.0), num(3.0))))
        );

        assert_eq!(
            parser("(1+2)*3").parse_expr().unwrap(),
            Expr::Binary('*', Box::new(Expr::Binary('+', num(1.0), num(2.0))), num(3.0))
        );

        assert_eq!(
            parser("a < b + 1").parse_expr().unwrap(),
            Expr::Binary('<', var("a"), Box::new(Expr::Binary('+', var("b"), num(1.0))))
        );
    }

    #[test]
    fn test_left_associative() {
        assert_eq!(
            parser("1-2-3").parse_expr().unwrap(),
            Expr::Binary('-', Box::new(Expr::Binary('-', num(1.0), num(2.0))), num(3.0))
        );
    }

    #[test]
    fn test_mixed_precedence_chain() {
        // 1*2+3*4-5 => ((1*2)+(3*4))-5
        assert_eq!(
            parser("1*2+3*4-5").parse_expr().unwrap(),
            Expr::Binary(
                '-',
                Box::new(Expr::Binary(
                    '+',
                    Box::new(Expr::Binary('*', num(1.0), num(2.0))),
                    Box::new(Expr::Binary('*', num(3.0), num(4.0)))
                )),
                num(5.0)
            )
        );
    }

    #[test]
    fn test_custom_precedence() {
        let mut table = PrecedenceTable::default();
        table.set('+', 50);
        let mut p = Parser::new("1*2+3", table);
        assert_eq!(
            p.parse_expr().unwrap(),
            Expr::Binary('*', num(1.0), Box::new(Expr::Binary('+', num(2.0), num(3.0))))
        );
    }

    #[test]
    fn test_unknown_operator_ends_expression() {
        let mut p = parser("1 / 2");
        assert_eq!(p.parse_expr().unwrap(), Expr::Number(1.0));
        assert_eq!(p.current, Token::Kwd('/'));
    }

    #[test]
    fn test_prototype() {
        assert_eq!(
            parser("f()").parse_prototype().unwrap(),
            Prototype("f".to_owned(), vec![])
        );
        assert_eq!(
            parser("g(a b c)").parse_prototype().unwrap(),
            Prototype("g".to_owned(), vec!["a".to_owned(), "b".to_owned(), "c".to_owned()])
        );
    }

    #[test]
    fn test_call() {
        assert_eq!(
            parser("foo(y, 4.0)").parse_expr().unwrap(),
            Expr::Call("foo".to_owned(), vec![*var("y"), Expr::Number(4.0)])
        );
        assert_eq!(
            parser("bar()").parse_expr().unwrap(),
            Expr::Call("bar".to_owned(), vec![])
        );
    }

    #[test]
    fn test_if() {
        assert_eq!(
            parser("if x then 1 else 2").parse_expr().unwrap(),
            Expr::If(var("x"), num(1.0), num(2.0))
        );
    }

    #[test]
    fn test_for() {
        assert_eq!(
            parser("for i=1, 3 in 3").parse_expr().unwrap(),
            Expr::For("i".to_owned(), num(1.0), num(3.0), None, num(3.0))
        );

        assert_eq!(
            parser("for i=1, 3,2 in 3").parse_expr().unwrap(),
            Expr::For("i".to_owned(), num(1.0), num(3.0), Some(num(2.0)), num(3.0))
        );
    }

    #[test]
    fn test_items() {
        let mut p = parser("def f(x) x*2; extern sin(a);; f(3)\n");
        assert_eq!(
            p.parse_item().unwrap(),
            Some(Item::Definition(Function(
                Prototype("f".to_owned(), vec!["x".to_owned()]),
                Expr::Binary('*', var("x"), num(2.0))
            )))
        );
        assert_eq!(
            p.parse_item().unwrap(),
            Some(Item::Extern(Prototype("sin".to_owned(), vec!["a".to_owned()])))
        );
        assert_eq!(
            p.parse_item().unwrap(),
            Some(Item::TopLevel(Function(
                Prototype(ANONYMOUS.to_owned(), vec![]),
                Expr::Call("f".to_owned(), vec![Expr::Number(3.0)])
            )))
        );
        assert_eq!(p.parse_item().unwrap(), None);
        assert_eq!(p.parse_item().unwrap(), None);
    }

    #[test]
    fn test_leading_separators() {
        let mut p = parser(";; 4");
        assert_eq!(
            p.parse_item().unwrap(),
            Some(Item::TopLevel(Function(
                Prototype(ANONYMOUS.to_owned(), vec![]),
                Expr::Number(4.0)
            )))
        );
    }

    #[test]
    fn test_errors() {
        assert_eq!(parse_error("(1 + 2"), "expected ')'");
        assert_eq!(parse_error("if 1 2 else 3"), "expected 'then'");
        assert_eq!(parse_error("if 1 then 2 3"), "expected 'else'");
        assert_eq!(parse_error("for 1 = 2, 3 in 4"), "expected identifier after for");
        assert_eq!(parse_error("for i 2, 3 in 4"), "expected '=' after for");
        assert_eq!(parse_error("for i = 2 3 in 4"), "expected ',' after for start value");
        assert_eq!(parse_error("for i = 2, 3 4"), "expected 'in' after for");
        assert_eq!(parse_error("f(1 2)"), "expected ')' or ',' in argument list");
        assert_eq!(parse_error("def 1(x) x"), "expected function name in prototype");
        assert_eq!(parse_error("extern f x"), "expected '(' in prototype");
        assert_eq!(parse_error("extern f(x 1)"), "expected ')' in prototype");
        assert_eq!(parse_error("def f(x x) x"), "duplicate parameter 'x' in prototype");
        assert_eq!(parse_error(")"), "unknown token when expecting an expression");
        assert_eq!(parse_error("1.2.3"), "invalid number literal '1.2.3'");
    }

    proptest! {
        #[test]
        fn equal_precedence_associates_left(ns in prop::collection::vec(0u32..1000, 2..8)) {
            let src = ns.iter().map(|n| n.to_string()).collect::<Vec<_>>().join(" - ");
            let mut expected = Expr::Number(f64::from(ns[0]));
            for n in &ns[1..] {
                expected = Expr::Binary('-', Box::new(expected), Box::new(Expr::Number(f64::from(*n))));
            }
            prop_assert_eq!(parser(&src).parse_expr().unwrap(), expected);
        }
    }
}
