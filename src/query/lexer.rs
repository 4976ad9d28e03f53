//! Query tokenizer.
//!
//! Splits an XPath-dialect expression into tokens, each tagged with its
//! character offset so parse errors can point at the offending spot.

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Slash,
    At,
    Star,
    LeftBracket,
    RightBracket,
    LeftParen,
    RightParen,
    Comma,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Int(i64),
    Str(String),
    Name(String),
    Eof,
}

/// Tokenize the whole input up front; every token carries the offset of
/// its first character.
pub(crate) fn tokenize(input: &str) -> Result<Vec<(Token, usize)>> {
    let mut lexer = Lexer { input, pos: 0 };
    let mut tokens = Vec::new();
    loop {
        let (token, pos) = lexer.next_token()?;
        let done = token == Token::Eof;
        tokens.push((token, pos));
        if done {
            return Ok(tokens);
        }
    }
}

struct Lexer<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn bump(&mut self, c: char) {
        self.pos += c.len_utf8();
    }

    fn next_token(&mut self) -> Result<(Token, usize)> {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.bump(c);
            } else {
                break;
            }
        }

        let start = self.pos;
        let c = match self.peek() {
            Some(c) => c,
            None => return Ok((Token::Eof, start)),
        };

        let token = match c {
            '/' => {
                self.bump(c);
                Token::Slash
            }
            '@' => {
                self.bump(c);
                Token::At
            }
            '*' => {
                self.bump(c);
                Token::Star
            }
            '[' => {
                self.bump(c);
                Token::LeftBracket
            }
            ']' => {
                self.bump(c);
                Token::RightBracket
            }
            '(' => {
                self.bump(c);
                Token::LeftParen
            }
            ')' => {
                self.bump(c);
                Token::RightParen
            }
            ',' => {
                self.bump(c);
                Token::Comma
            }
            '=' => {
                self.bump(c);
                Token::Eq
            }
            '!' => {
                self.bump(c);
                if self.peek() == Some('=') {
                    self.bump('=');
                    Token::NotEq
                } else {
                    return Err(Error::unsupported(format!(
                        "unexpected character '!' at position {start}"
                    )));
                }
            }
            '<' => {
                self.bump(c);
                if self.peek() == Some('=') {
                    self.bump('=');
                    Token::LtEq
                } else {
                    Token::Lt
                }
            }
            '>' => {
                self.bump(c);
                if self.peek() == Some('=') {
                    self.bump('=');
                    Token::GtEq
                } else {
                    Token::Gt
                }
            }
            '"' | '\'' => self.read_string(c)?,
            '0'..='9' => self.read_int()?,
            _ if is_name_start(c) => self.read_name(),
            _ => {
                return Err(Error::unsupported(format!(
                    "unexpected character '{c}' at position {start}"
                )));
            }
        };

        Ok((token, start))
    }

    fn read_string(&mut self, quote: char) -> Result<Token> {
        let start = self.pos;
        self.bump(quote);
        let rest = &self.input[self.pos..];
        match rest.find(quote) {
            Some(end) => {
                let value = rest[..end].to_string();
                self.pos += end + quote.len_utf8();
                Ok(Token::Str(value))
            }
            None => Err(Error::unsupported(format!(
                "unterminated string literal at position {start}"
            ))),
        }
    }

    fn read_int(&mut self) -> Result<Token> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                self.bump(c);
            } else {
                break;
            }
        }
        let digits = &self.input[start..self.pos];
        digits
            .parse()
            .map(Token::Int)
            .map_err(|_| {
                Error::invalid_argument(format!(
                    "integer literal '{digits}' at position {start} out of range"
                ))
            })
    }

    fn read_name(&mut self) -> Token {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if is_name_char(c) {
                self.bump(c);
            } else {
                break;
            }
        }
        Token::Name(self.input[start..self.pos].to_string())
    }
}

fn is_name_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ':')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<Token> {
        tokenize(input)
            .unwrap()
            .into_iter()
            .map(|(t, _)| t)
            .collect()
    }

    #[test]
    fn simple_path() {
        assert_eq!(
            kinds("/root/child"),
            [
                Token::Slash,
                Token::Name("root".into()),
                Token::Slash,
                Token::Name("child".into()),
                Token::Eof
            ]
        );
    }

    #[test]
    fn predicate_with_attribute() {
        assert_eq!(
            kinds(r#"item[@id="x"]"#),
            [
                Token::Name("item".into()),
                Token::LeftBracket,
                Token::At,
                Token::Name("id".into()),
                Token::Eq,
                Token::Str("x".into()),
                Token::RightBracket,
                Token::Eof
            ]
        );
    }

    #[test]
    fn comparison_operators() {
        assert_eq!(
            kinds("a!=1 <= >= < >"),
            [
                Token::Name("a".into()),
                Token::NotEq,
                Token::Int(1),
                Token::LtEq,
                Token::GtEq,
                Token::Lt,
                Token::Gt,
                Token::Eof
            ]
        );
    }

    #[test]
    fn tokens_carry_positions() {
        let tokens = tokenize("foo[bar(]").unwrap();
        let positions: Vec<usize> = tokens.iter().map(|&(_, p)| p).collect();
        assert_eq!(positions, [0, 3, 4, 7, 8, 9]);
    }

    #[test]
    fn hyphenated_function_names_lex_as_one_name() {
        assert_eq!(
            kinds("starts-with(a, 'b')"),
            [
                Token::Name("starts-with".into()),
                Token::LeftParen,
                Token::Name("a".into()),
                Token::Comma,
                Token::Str("b".into()),
                Token::RightParen,
                Token::Eof
            ]
        );
    }

    #[test]
    fn unterminated_string_is_rejected() {
        let err = tokenize("a['oops]").unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Unsupported);
        assert!(err.to_string().contains("position 2"));
    }

    #[test]
    fn stray_bang_is_rejected() {
        assert!(tokenize("a!b").is_err());
    }
}
