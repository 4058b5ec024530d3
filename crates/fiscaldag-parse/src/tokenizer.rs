use std::error::Error;
use std::fmt::{self, Display};

/// A custom error type for the tokenizer. Parser errors are raised at
/// template load, never per period (spec §4.A).
#[derive(Debug, Clone, PartialEq)]
pub struct TokenizerError {
    pub message: String,
    pub pos: usize,
}

impl Display for TokenizerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tokenizer error at {}: {}", self.pos, self.message)
    }
}

impl Error for TokenizerError {}

/// The kind of a token. Whitespace is dropped by the tokenizer and never
/// surfaces as a token (spec §4.A: "Whitespace is ignored between
/// tokens.").
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Eof,
}

impl Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Number(n) => write!(f, "{n}"),
            TokenKind::Ident(s) => write!(f, "{s}"),
            TokenKind::Plus => write!(f, "+"),
            TokenKind::Minus => write!(f, "-"),
            TokenKind::Star => write!(f, "*"),
            TokenKind::Slash => write!(f, "/"),
            TokenKind::Caret => write!(f, "^"),
            TokenKind::LParen => write!(f, "("),
            TokenKind::RParen => write!(f, ")"),
            TokenKind::LBracket => write!(f, "["),
            TokenKind::RBracket => write!(f, "]"),
            TokenKind::Comma => write!(f, ","),
            TokenKind::Eof => write!(f, "<eof>"),
        }
    }
}

/// A token in a formula, with its byte-offset span for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub start: usize,
    pub end: usize,
}

/// Identifier characters per spec §4.A grammar rule 9: `(letter | '_')
/// (letter | digit | '_' | ':')*`. Colons allow prefixed references like
/// `driver:REVENUE`.
fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == ':'
}

/// Splits a formula string into a flat token stream. One tokenizer
/// instance is consumed by exactly one parse.
pub struct Tokenizer<'a> {
    source: &'a str,
    chars: Vec<(usize, char)>,
    pos: usize,
}

impl<'a> Tokenizer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.char_indices().collect(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).map(|&(_, c)| c)
    }

    fn byte_offset(&self) -> usize {
        self.chars
            .get(self.pos)
            .map(|&(i, _)| i)
            .unwrap_or(self.source.len())
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn read_number(&mut self) -> Result<TokenKind, TokenizerError> {
        let start = self.byte_offset();
        let mut saw_dot = false;
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                text.push(c);
                self.pos += 1;
            } else if c == '.' && !saw_dot {
                saw_dot = true;
                text.push(c);
                self.pos += 1;
            } else {
                break;
            }
        }
        text.parse::<f64>().map(TokenKind::Number).map_err(|_| TokenizerError {
            message: format!("malformed number literal `{text}`"),
            pos: start,
        })
    }

    fn read_ident(&mut self) -> TokenKind {
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if is_ident_continue(c) {
                text.push(c);
                self.pos += 1;
            } else {
                break;
            }
        }
        TokenKind::Ident(text)
    }

    /// Tokenizes the full formula, always terminated by a single `Eof`
    /// token so the parser never needs to special-case end-of-input.
    pub fn tokenize(mut self) -> Result<Vec<Token>, TokenizerError> {
        let mut tokens = Vec::new();
        loop {
            self.skip_whitespace();
            let start = self.byte_offset();
            let Some(c) = self.peek() else {
                tokens.push(Token {
                    kind: TokenKind::Eof,
                    start,
                    end: start,
                });
                break;
            };

            let kind = match c {
                '+' => {
                    self.advance();
                    TokenKind::Plus
                }
                '-' => {
                    self.advance();
                    TokenKind::Minus
                }
                '*' => {
                    self.advance();
                    TokenKind::Star
                }
                '/' => {
                    self.advance();
                    TokenKind::Slash
                }
                '^' => {
                    self.advance();
                    TokenKind::Caret
                }
                '(' => {
                    self.advance();
                    TokenKind::LParen
                }
                ')' => {
                    self.advance();
                    TokenKind::RParen
                }
                '[' => {
                    self.advance();
                    TokenKind::LBracket
                }
                ']' => {
                    self.advance();
                    TokenKind::RBracket
                }
                ',' => {
                    self.advance();
                    TokenKind::Comma
                }
                c if c.is_ascii_digit() => self.read_number()?,
                c if is_ident_start(c) => self.read_ident(),
                other => {
                    return Err(TokenizerError {
                        message: format!("unexpected character '{other}'"),
                        pos: start,
                    });
                }
            };

            let end = self.byte_offset();
            tokens.push(Token { kind, start, end });
        }
        Ok(tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Tokenizer::new(src)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn tokenizes_arithmetic() {
        assert_eq!(
            kinds("1 + 2 * 3"),
            vec![
                TokenKind::Number(1.0),
                TokenKind::Plus,
                TokenKind::Number(2.0),
                TokenKind::Star,
                TokenKind::Number(3.0),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn tokenizes_prefixed_reference_and_time_ref() {
        assert_eq!(
            kinds("driver:REVENUE[t-1]"),
            vec![
                TokenKind::Ident("driver:REVENUE".into()),
                TokenKind::LBracket,
                TokenKind::Ident("t".into()),
                TokenKind::Minus,
                TokenKind::Number(1.0),
                TokenKind::RBracket,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn tokenizes_function_call() {
        assert_eq!(
            kinds("MAX(A, B)"),
            vec![
                TokenKind::Ident("MAX".into()),
                TokenKind::LParen,
                TokenKind::Ident("A".into()),
                TokenKind::Comma,
                TokenKind::Ident("B".into()),
                TokenKind::RParen,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn rejects_unexpected_character() {
        let err = Tokenizer::new("A & B").tokenize().unwrap_err();
        assert_eq!(err.pos, 2);
    }

    #[test]
    fn whitespace_is_ignored_between_tokens() {
        assert_eq!(kinds("1+2"), kinds(" 1  +   2 "));
    }
}
