//! Expression tokenizer.

use super::ParseError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Number(f64),
    Str(String),
    Identifier(String),

    // Keywords
    True,
    False,
    Null,
    And,
    Or,
    Not,
    In,

    // Punctuation
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
    Question,
    Colon,

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,
    Bang,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,

    Eof,
}

/// A token with the byte offset it started at.
#[derive(Debug, Clone, PartialEq)]
pub struct SpannedToken {
    pub token: Token,
    pub offset: usize,
}

pub struct Tokenizer<'a> {
    source: &'a str,
    chars: Vec<(usize, char)>,
    position: usize,
}

impl<'a> Tokenizer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.char_indices().collect(),
            position: 0,
        }
    }

    pub fn tokenize(&mut self) -> Result<Vec<SpannedToken>, ParseError> {
        let mut tokens = Vec::new();
        loop {
            self.skip_whitespace();
            let offset = self.offset();
            let Some(c) = self.peek() else {
                tokens.push(SpannedToken {
                    token: Token::Eof,
                    offset,
                });
                return Ok(tokens);
            };

            let token = match c {
                '0'..='9' => self.number()?,
                '.' if self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) => self.number()?,
                '\'' | '"' => self.string(c)?,
                c if is_identifier_start(c) => self.identifier(),
                _ => self.operator(c)?,
            };
            tokens.push(SpannedToken { token, offset });
        }
    }

    fn offset(&self) -> usize {
        self.chars
            .get(self.position)
            .map(|(i, _)| *i)
            .unwrap_or(self.source.len())
    }

    fn peek(&self) -> Option<char> {
        self.peek_at(0)
    }

    fn peek_at(&self, ahead: usize) -> Option<char> {
        self.chars.get(self.position + ahead).map(|(_, c)| *c)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.position += 1;
        }
        c
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.position += 1;
        }
    }

    fn number(&mut self) -> Result<Token, ParseError> {
        let start = self.offset();
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.position += 1;
        }
        if self.peek() == Some('.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            self.position += 1;
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.position += 1;
            }
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            let sign = usize::from(matches!(self.peek_at(1), Some('+' | '-')));
            if self.peek_at(1 + sign).is_some_and(|c| c.is_ascii_digit()) {
                self.position += 1 + sign;
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.position += 1;
                }
            }
        }
        let text = &self.source[start..self.offset()];
        text.parse::<f64>()
            .map(Token::Number)
            .map_err(|_| ParseError::new(format!("invalid number '{text}'"), start))
    }

    fn string(&mut self, quote: char) -> Result<Token, ParseError> {
        let start = self.offset();
        self.bump();
        let mut value = String::new();
        loop {
            match self.bump() {
                None => return Err(ParseError::new("unterminated string", start)),
                Some(c) if c == quote => return Ok(Token::Str(value)),
                Some('\\') => match self.bump() {
                    Some('n') => value.push('\n'),
                    Some('t') => value.push('\t'),
                    Some('r') => value.push('\r'),
                    Some(c) => value.push(c),
                    None => return Err(ParseError::new("unterminated string", start)),
                },
                Some(c) => value.push(c),
            }
        }
    }

    fn identifier(&mut self) -> Token {
        let start = self.offset();
        while self.peek().is_some_and(is_identifier_continue) {
            self.position += 1;
        }
        match &self.source[start..self.offset()] {
            "true" => Token::True,
            "false" => Token::False,
            "null" => Token::Null,
            "and" => Token::And,
            "or" => Token::Or,
            "not" => Token::Not,
            "in" => Token::In,
            name => Token::Identifier(name.to_string()),
        }
    }

    fn operator(&mut self, c: char) -> Result<Token, ParseError> {
        let offset = self.offset();
        self.bump();
        let next = self.peek();
        let (token, double) = match (c, next) {
            ('=', Some('=')) => (Token::EqEq, true),
            ('!', Some('=')) => (Token::NotEq, true),
            ('<', Some('=')) => (Token::Le, true),
            ('>', Some('=')) => (Token::Ge, true),
            ('&', Some('&')) => (Token::AndAnd, true),
            ('|', Some('|')) => (Token::OrOr, true),
            ('!', _) => (Token::Bang, false),
            ('<', _) => (Token::Lt, false),
            ('>', _) => (Token::Gt, false),
            ('(', _) => (Token::LParen, false),
            (')', _) => (Token::RParen, false),
            ('[', _) => (Token::LBracket, false),
            (']', _) => (Token::RBracket, false),
            (',', _) => (Token::Comma, false),
            ('.', _) => (Token::Dot, false),
            ('?', _) => (Token::Question, false),
            (':', _) => (Token::Colon, false),
            ('+', _) => (Token::Plus, false),
            ('-', _) => (Token::Minus, false),
            ('*', _) => (Token::Star, false),
            ('/', _) => (Token::Slash, false),
            ('%', _) => (Token::Percent, false),
            ('^', _) => (Token::Caret, false),
            _ => {
                return Err(ParseError::new(
                    format!("unexpected character '{c}'"),
                    offset,
                ))
            }
        };
        if double {
            self.bump();
        }
        Ok(token)
    }
}

fn is_identifier_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '$'
}

fn is_identifier_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        Tokenizer::new(source)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.token)
            .collect()
    }

    #[test]
    fn test_member_chain_and_comparison() {
        assert_eq!(
            kinds("configs.USART1.mode == 'sync'"),
            vec![
                Token::Identifier("configs".into()),
                Token::Dot,
                Token::Identifier("USART1".into()),
                Token::Dot,
                Token::Identifier("mode".into()),
                Token::EqEq,
                Token::Str("sync".into()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_numbers_and_keywords() {
        assert_eq!(
            kinds("1.5 and not x >= 2e3"),
            vec![
                Token::Number(1.5),
                Token::And,
                Token::Not,
                Token::Identifier("x".into()),
                Token::Ge,
                Token::Number(2000.0),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_offsets_are_byte_positions() {
        let tokens = Tokenizer::new("a  || b").tokenize().unwrap();
        assert_eq!(tokens[1].token, Token::OrOr);
        assert_eq!(tokens[1].offset, 3);
    }

    #[test]
    fn test_errors() {
        assert!(Tokenizer::new("'open").tokenize().is_err());
        assert!(Tokenizer::new("a # b").tokenize().is_err());
        assert!(Tokenizer::new("${IP_INSTANCE}").tokenize().is_err());
    }
}
