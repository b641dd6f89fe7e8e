use super::token::Token;
use combine::error::ParseError;
use combine::parser::char::space;
use combine::parser::choice::or;
use combine::parser::Parser;
use combine::stream::Stream;
use combine::{any, choice, eof, many, many1, satisfy, skip_many, token};

fn number<Input>() -> impl Parser<Input, Output = Token>
where
    Input: Stream<Token = char>,
    Input::Error: ParseError<Input::Token, Input::Range, Input::Position>,
{
    many1(satisfy(|c: char| c.is_ascii_digit() || c == '.')).map(|ns: String| Token::Number(ns))
}

fn ident<Input>() -> impl Parser<Input, Output = Token>
where
    Input: Stream<Token = char>,
    Input::Error: ParseError<Input::Token, Input::Range, Input::Position>,
{
    (
        satisfy(|c: char| c.is_ascii_alphabetic()),
        many(satisfy(|c: char| c.is_ascii_alphanumeric())),
    )
        .map(|(first, rest): (char, String)| {
            let mut s = String::with_capacity(rest.len() + 1);
            s.push(first);
            s.push_str(&rest);
            match s.as_ref() {
                "def" => Token::Def,
                "extern" => Token::Extern,
                "if" => Token::If,
                "then" => Token::Then,
                "else" => Token::Else,
                "for" => Token::For,
                "in" => Token::In,
                _ => Token::Ident(s),
            }
        })
}

fn comment<Input>() -> impl Parser<Input, Output = ()>
where
    Input: Stream<Token = char>,
    Input::Error: ParseError<Input::Token, Input::Range, Input::Position>,
{
    (
        token('#'),
        skip_many(satisfy(|c: char| c != '\n' && c != '\r')),
    )
        .map(|_| ())
}

fn lex<Input>() -> impl Parser<Input, Output = Token>
where
    Input: Stream<Token = char>,
    Input::Error: ParseError<Input::Token, Input::Range, Input::Position>,
{
    skip_many(or(space().map(|_| ()), comment())).with(choice((
        ident(),
        number(),
        eof().map(|_| Token::Eof),
        any().map(Token::Kwd),
    )))
}

/// Pulls tokens out of a source string one at a time.
///
/// Lexing never fails: characters that start no other token come back as
/// `Token::Kwd` and are left for the parser to judge. Once the input is
/// exhausted every call yields `Token::Eof`.
pub struct Lexer<'a> {
    rest: &'a str,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Lexer { rest: input }
    }

    pub fn next_token(&mut self) -> Token {
        match lex().parse(self.rest) {
            Ok((token, rest)) => {
                self.rest = rest;
                token
            }
            // `any` and `eof` together cover every input
            Err(_) => {
                self.rest = "";
                Token::Eof
            }
        }
    }
}

impl<'a> Iterator for Lexer<'a> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        match self.next_token() {
            Token::Eof => None,
            t => Some(t),
        }
    }
}

#[cfg(test)]
mod test {
    use super::super::token::Token::*;
    use super::*;
    use combine::EasyParser;
    use proptest::prelude::*;

    #[test]
    fn test_number() {
        assert_eq!(
            number().easy_parse("1.0").map(|x| x.0),
            Ok(Number("1.0".to_owned()))
        );
        assert_eq!(
            number().easy_parse("1.2.3").map(|x| x.0),
            Ok(Number("1.2.3".to_owned()))
        );
    }

    #[test]
    fn test_ident() {
        assert_eq!(
            ident().easy_parse("test").map(|x| x.0),
            Ok(Ident("test".to_owned()))
        );
        assert_eq!(ident().easy_parse("def").map(|x| x.0), Ok(Def));
        assert_eq!(ident().easy_parse("x1y2").map(|x| x.0), Ok(Ident("x1y2".to_owned())));
    }

    #[test]
    fn test_comment() {
        assert_eq!(comment().easy_parse("#hoge").map(|x| x.0), Ok(()));
    }

    #[test]
    fn test_lex() {
        let mut lexer = Lexer::new(
            r#"#comment
1.0
"#,
        );
        assert_eq!(lexer.next_token(), Number("1.0".to_owned()));
        assert_eq!(lexer.next_token(), Eof);
        assert_eq!(lexer.next_token(), Eof);
    }

    #[test]
    fn test_keywords_and_others() {
        let tokens: Vec<Token> = Lexer::new("def foo(a b) if a < b then 1 else 2; extern for in").collect();
        assert_eq!(
            tokens,
            vec![
                Def,
                Ident("foo".to_owned()),
                Kwd('('),
                Ident("a".to_owned()),
                Ident("b".to_owned()),
                Kwd(')'),
                If,
                Ident("a".to_owned()),
                Kwd('<'),
                Ident("b".to_owned()),
                Then,
                Number("1".to_owned()),
                Else,
                Number("2".to_owned()),
                Kwd(';'),
                Extern,
                For,
                In,
            ]
        );
    }

    #[test]
    fn test_comment_at_end_of_input() {
        let tokens: Vec<Token> = Lexer::new("x # trailing").collect();
        assert_eq!(tokens, vec![Ident("x".to_owned())]);
    }

    #[test]
    fn test_underscore_is_not_identifier() {
        let tokens: Vec<Token> = Lexer::new("_a").collect();
        assert_eq!(tokens, vec![Kwd('_'), Ident("a".to_owned())]);
    }

    proptest! {
        #[test]
        fn lexing_always_terminates(input in "\\PC{0,40}") {
            let count = Lexer::new(&input).count();
            prop_assert!(count <= input.chars().count());
        }
    }
}
