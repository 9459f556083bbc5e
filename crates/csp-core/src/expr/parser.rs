//! Recursive descent parser for condition expressions.
//!
//! Precedence, lowest first: `?:`, `or`, `and`, comparison/`in`, additive,
//! multiplicative, unary, `^`, postfix (call, member, index).

use serde_json::Value;

use super::ast::{BinaryOp, Expr, UnaryOp};
use super::tokenizer::{SpannedToken, Token, Tokenizer};
use super::ParseError;

/// Parse an expression string into a syntax tree.
pub fn parse(source: &str) -> Result<Expr, ParseError> {
    let tokens = Tokenizer::new(source).tokenize()?;
    let mut parser = Parser {
        tokens,
        position: 0,
    };
    let expr = parser.parse_conditional()?;
    match parser.peek() {
        Token::Eof => Ok(expr),
        other => Err(parser.error(format!("unexpected token {other:?}"))),
    }
}

struct Parser {
    tokens: Vec<SpannedToken>,
    position: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        self.tokens
            .get(self.position)
            .map(|t| &t.token)
            .unwrap_or(&Token::Eof)
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.position < self.tokens.len() {
            self.position += 1;
        }
        token
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.position)
            .or_else(|| self.tokens.last())
            .map(|t| t.offset)
            .unwrap_or(0)
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError::new(message, self.offset())
    }

    fn expect(&mut self, expected: Token) -> Result<(), ParseError> {
        if *self.peek() == expected {
            self.advance();
            Ok(())
        } else {
            Err(self.error(format!("expected {expected:?}, found {:?}", self.peek())))
        }
    }

    fn parse_conditional(&mut self) -> Result<Expr, ParseError> {
        let cond = self.parse_or()?;
        if *self.peek() != Token::Question {
            return Ok(cond);
        }
        self.advance();
        let then = self.parse_conditional()?;
        self.expect(Token::Colon)?;
        let otherwise = self.parse_conditional()?;
        Ok(Expr::Conditional(
            Box::new(cond),
            Box::new(then),
            Box::new(otherwise),
        ))
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_and()?;
        while matches!(self.peek(), Token::Or | Token::OrOr) {
            self.advance();
            let rhs = self.parse_and()?;
            lhs = Expr::Binary(BinaryOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_comparison()?;
        while matches!(self.peek(), Token::And | Token::AndAnd) {
            self.advance();
            let rhs = self.parse_comparison()?;
            lhs = Expr::Binary(BinaryOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Token::EqEq => BinaryOp::Eq,
                Token::NotEq => BinaryOp::NotEq,
                Token::Lt => BinaryOp::Lt,
                Token::Le => BinaryOp::Le,
                Token::Gt => BinaryOp::Gt,
                Token::Ge => BinaryOp::Ge,
                Token::In => BinaryOp::In,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.parse_additive()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinaryOp::Add,
                Token::Minus => BinaryOp::Sub,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.parse_multiplicative()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinaryOp::Mul,
                Token::Slash => BinaryOp::Div,
                Token::Percent => BinaryOp::Rem,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        let op = match self.peek() {
            Token::Not | Token::Bang => UnaryOp::Not,
            Token::Minus => UnaryOp::Negate,
            Token::Plus => UnaryOp::Plus,
            _ => return self.parse_power(),
        };
        self.advance();
        let operand = self.parse_unary()?;
        Ok(Expr::Unary(op, Box::new(operand)))
    }

    fn parse_power(&mut self) -> Result<Expr, ParseError> {
        let base = self.parse_postfix()?;
        if *self.peek() != Token::Caret {
            return Ok(base);
        }
        self.advance();
        // Right associative, and binds tighter than a unary minus on its left.
        let exponent = self.parse_unary()?;
        Ok(Expr::Binary(BinaryOp::Pow, Box::new(base), Box::new(exponent)))
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek() {
                Token::Dot => {
                    self.advance();
                    match self.advance() {
                        Token::Identifier(name) => expr = Expr::Member(Box::new(expr), name),
                        // Keywords are valid member names: `configs.gen.in`.
                        Token::In => expr = Expr::Member(Box::new(expr), "in".into()),
                        other => {
                            return Err(self.error(format!(
                                "expected member name after '.', found {other:?}"
                            )))
                        }
                    }
                }
                Token::LBracket => {
                    self.advance();
                    let index = self.parse_conditional()?;
                    self.expect(Token::RBracket)?;
                    expr = Expr::Index(Box::new(expr), Box::new(index));
                }
                Token::LParen => {
                    let Expr::Variable(name) = expr else {
                        return Err(self.error("only named functions can be called"));
                    };
                    self.advance();
                    let args = self.parse_list(Token::RParen)?;
                    expr = Expr::Call(name, args);
                }
                _ => return Ok(expr),
            }
        }
    }

    fn parse_list(&mut self, close: Token) -> Result<Vec<Expr>, ParseError> {
        let mut items = Vec::new();
        if *self.peek() == close {
            self.advance();
            return Ok(items);
        }
        loop {
            items.push(self.parse_conditional()?);
            match self.advance() {
                Token::Comma => continue,
                t if t == close => return Ok(items),
                other => return Err(self.error(format!("expected ',' or {close:?}, found {other:?}"))),
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        match self.advance() {
            Token::Number(n) => Ok(Expr::Literal(number(n))),
            Token::Str(s) => Ok(Expr::Literal(Value::String(s))),
            Token::True => Ok(Expr::Literal(Value::Bool(true))),
            Token::False => Ok(Expr::Literal(Value::Bool(false))),
            Token::Null => Ok(Expr::Literal(Value::Null)),
            Token::Identifier(name) => Ok(Expr::Variable(name)),
            Token::LParen => {
                let inner = self.parse_conditional()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Token::LBracket => Ok(Expr::Array(self.parse_list(Token::RBracket)?)),
            Token::Eof => Err(self.error("unexpected end of expression")),
            other => Err(self.error(format!("unexpected token {other:?}"))),
        }
    }
}

/// Integral values stay integers so they compare and print like JSON ints.
pub fn number(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}
