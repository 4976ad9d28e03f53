//! Query compilation.
//!
//! Hand-written recursive-descent parser for the accepted XPath dialect:
//!
//! ```text
//! path      := '/'? step ( '/' step )*
//! step      := name_test predicate*
//! name_test := NAME | '*'
//! predicate := '[' expr ']'
//! expr      := or_expr
//! or_expr   := and_expr ( 'or' and_expr )*
//! and_expr  := cmp_expr ( 'and' cmp_expr )*
//! cmp_expr  := prim ( ('=' | '!=' | '<' | '>' | '<=' | '>=') prim )?
//! prim      := INT | STRING | '@' NAME | NAME | func_call | '(' expr ')'
//! func_call := NAME '(' ( expr (',' expr)* )? ')'
//! ```
//!
//! `and` and `or` are contextual keywords: they only act as operators in
//! operator position, so elements named `and` remain addressable. A bare
//! integer predicate `[N]` is rewritten to `[position()=N]` during
//! compilation. Function names and arities are checked here, against a
//! fixed table, so unknown functions fail at compile time with the
//! offset of the name token.

use phf::phf_map;
use smallvec::SmallVec;

use super::lexer::{tokenize, Token};
use crate::error::{Error, Result};

/// A compiled query: a sequence of steps, reusable across silos.
#[derive(Debug, Clone)]
pub struct Query {
    pub(crate) steps: Vec<Step>,
}

#[derive(Debug, Clone)]
pub(crate) struct Step {
    pub name: NameTest,
    pub predicates: SmallVec<[Expr; 2]>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum NameTest {
    Wildcard,
    Name(String),
}

impl NameTest {
    pub fn matches(&self, element: &str) -> bool {
        match self {
            NameTest::Wildcard => true,
            NameTest::Name(name) => name == element,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Int(i64),
    Str(String),
    /// `@name`: attribute value of the candidate node.
    Attr(String),
    /// Bare `name`: text of the candidate's first child of that name.
    Child(String),
    Call(Func, Vec<Expr>),
    Cmp(CmpOp, Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Func {
    Text,
    First,
    Last,
    Position,
    Contains,
    StartsWith,
    StringLength,
    Number,
}

/// The closed function set with arities.
static FUNCTIONS: phf::Map<&'static str, (Func, usize)> = phf_map! {
    "text" => (Func::Text, 0),
    "first" => (Func::First, 0),
    "last" => (Func::Last, 0),
    "position" => (Func::Position, 0),
    "contains" => (Func::Contains, 2),
    "starts-with" => (Func::StartsWith, 2),
    "string-length" => (Func::StringLength, 1),
    "number" => (Func::Number, 1),
};

impl Query {
    /// Compile an expression, or fail with the offset of the offending
    /// token.
    pub fn compile(xpath: &str) -> Result<Query> {
        if xpath.trim().is_empty() {
            return Err(Error::invalid_argument("empty query"));
        }
        let tokens = tokenize(xpath)?;
        let mut parser = Parser { tokens, pos: 0 };
        parser.parse_path()
    }
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos].0
    }

    fn peek_pos(&self) -> usize {
        self.tokens[self.pos].1
    }

    fn advance(&mut self) -> (Token, usize) {
        let entry = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        entry
    }

    fn expect(&mut self, token: Token, what: &str) -> Result<()> {
        if *self.peek() == token {
            self.advance();
            Ok(())
        } else {
            Err(Error::unsupported(format!(
                "expected {what} at position {}",
                self.peek_pos()
            )))
        }
    }

    fn parse_path(&mut self) -> Result<Query> {
        if *self.peek() == Token::Slash {
            self.advance();
        }

        let mut steps = vec![self.parse_step()?];
        while *self.peek() == Token::Slash {
            self.advance();
            steps.push(self.parse_step()?);
        }

        if *self.peek() != Token::Eof {
            return Err(Error::unsupported(format!(
                "unexpected trailing input at position {}",
                self.peek_pos()
            )));
        }
        Ok(Query { steps })
    }

    fn parse_step(&mut self) -> Result<Step> {
        let name = match self.peek().clone() {
            Token::Star => {
                self.advance();
                NameTest::Wildcard
            }
            Token::Name(name) => {
                self.advance();
                NameTest::Name(name)
            }
            _ => {
                return Err(Error::unsupported(format!(
                    "expected element name at position {}",
                    self.peek_pos()
                )));
            }
        };

        let mut predicates = SmallVec::new();
        while *self.peek() == Token::LeftBracket {
            self.advance();
            let expr = self.parse_expr()?;
            self.expect(Token::RightBracket, "']'")?;
            predicates.push(desugar_positional(expr));
        }

        Ok(Step { name, predicates })
    }

    fn parse_expr(&mut self) -> Result<Expr> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut expr = self.parse_and()?;
        while self.at_keyword("or") {
            self.advance();
            let rhs = self.parse_and()?;
            expr = Expr::Or(Box::new(expr), Box::new(rhs));
        }
        Ok(expr)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut expr = self.parse_cmp()?;
        while self.at_keyword("and") {
            self.advance();
            let rhs = self.parse_cmp()?;
            expr = Expr::And(Box::new(expr), Box::new(rhs));
        }
        Ok(expr)
    }

    fn parse_cmp(&mut self) -> Result<Expr> {
        let lhs = self.parse_prim()?;
        let op = match self.peek() {
            Token::Eq => CmpOp::Eq,
            Token::NotEq => CmpOp::Ne,
            Token::Lt => CmpOp::Lt,
            Token::LtEq => CmpOp::Le,
            Token::Gt => CmpOp::Gt,
            Token::GtEq => CmpOp::Ge,
            _ => return Ok(lhs),
        };
        self.advance();
        let rhs = self.parse_prim()?;
        Ok(Expr::Cmp(op, Box::new(lhs), Box::new(rhs)))
    }

    fn parse_prim(&mut self) -> Result<Expr> {
        match self.peek().clone() {
            Token::Int(value) => {
                self.advance();
                Ok(Expr::Int(value))
            }
            Token::Str(value) => {
                self.advance();
                Ok(Expr::Str(value))
            }
            Token::At => {
                self.advance();
                match self.advance() {
                    (Token::Name(name), _) => Ok(Expr::Attr(name)),
                    (_, pos) => Err(Error::unsupported(format!(
                        "expected attribute name at position {pos}"
                    ))),
                }
            }
            Token::LeftParen => {
                self.advance();
                let expr = self.parse_expr()?;
                self.expect(Token::RightParen, "')'")?;
                Ok(expr)
            }
            Token::Name(name) => {
                let name_pos = self.peek_pos();
                self.advance();
                if *self.peek() == Token::LeftParen {
                    self.parse_call(&name, name_pos)
                } else {
                    Ok(Expr::Child(name))
                }
            }
            _ => Err(Error::unsupported(format!(
                "unexpected token at position {}",
                self.peek_pos()
            ))),
        }
    }

    fn parse_call(&mut self, name: &str, name_pos: usize) -> Result<Expr> {
        let &(func, arity) = FUNCTIONS.get(name).ok_or_else(|| {
            Error::unsupported(format!(
                "unknown function '{name}' at position {name_pos}"
            ))
        })?;

        self.expect(Token::LeftParen, "'('")?;
        let mut args = Vec::new();
        if *self.peek() != Token::RightParen {
            args.push(self.parse_expr()?);
            while *self.peek() == Token::Comma {
                self.advance();
                args.push(self.parse_expr()?);
            }
        }
        self.expect(Token::RightParen, "')'")?;

        if args.len() != arity {
            return Err(Error::invalid_argument(format!(
                "function '{name}' at position {name_pos} expects {arity} argument(s), got {}",
                args.len()
            )));
        }
        Ok(Expr::Call(func, args))
    }

    /// `and`/`or` act as operators only in operator position.
    fn at_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Token::Name(name) if name == keyword)
    }
}

/// `[N]` is shorthand for `[position()=N]`.
fn desugar_positional(expr: Expr) -> Expr {
    match expr {
        Expr::Int(n) => Expr::Cmp(
            CmpOp::Eq,
            Box::new(Expr::Call(Func::Position, Vec::new())),
            Box::new(Expr::Int(n)),
        ),
        other => other,
    }
}
