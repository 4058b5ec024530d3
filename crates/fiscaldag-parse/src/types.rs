use std::fmt::{self, Display};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A built-in binary or unary operator (spec §4.A grammar).
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

impl Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Pow => "^",
        })
    }
}

/// Every node kind in the formula AST (spec §9 design note: "a sum type
/// with variants {Number, Reference(name, offset), Unary(op, child),
/// Binary(op, left, right), Call(name, args)}").
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Number(f64),
    /// `offset` is 0 for a bare `identifier` or `identifier[t]`, and
    /// negative for `identifier[t-k]`.
    Reference { name: String, offset: i32 },
    Negate(Box<Expr>),
    Binary { op: BinaryOp, left: Box<Expr>, right: Box<Expr> },
    Call { name: String, args: Vec<Expr> },
}

/// An AST node. `span` is the originating byte range in the source
/// formula, kept for diagnostics.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: (usize, usize),
}

impl Expr {
    pub fn new(kind: ExprKind, span: (usize, usize)) -> Self {
        Self { kind, span }
    }
}

impl Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ExprKind::Number(n) => write!(f, "{n}"),
            ExprKind::Reference { name, offset: 0 } => write!(f, "{name}"),
            ExprKind::Reference { name, offset } => write!(f, "{name}[t{offset}]"),
            ExprKind::Negate(e) => write!(f, "(-{e})"),
            ExprKind::Binary { op, left, right } => write!(f, "({left} {op} {right})"),
            ExprKind::Call { name, args } => {
                let rendered: Vec<String> = args.iter().map(|a| a.to_string()).collect();
                write!(f, "{name}({})", rendered.join(", "))
            }
        }
    }
}

/// A custom error type for the parser, carrying the byte position of the
/// offending token where available.
#[derive(Debug, Clone, PartialEq)]
pub struct ParserError {
    pub message: String,
    pub position: Option<usize>,
}

impl Display for ParserError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.position {
            Some(pos) => write!(f, "parser error at {pos}: {}", self.message),
            None => write!(f, "parser error: {}", self.message),
        }
    }
}

impl std::error::Error for ParserError {}

impl From<crate::tokenizer::TokenizerError> for ParserError {
    fn from(e: crate::tokenizer::TokenizerError) -> Self {
        ParserError {
            message: e.message,
            position: Some(e.pos),
        }
    }
}
