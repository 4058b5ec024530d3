pub mod parser;
pub mod tokenizer;
pub mod types;

pub use parser::parse;
pub use tokenizer::{Token, TokenKind, Tokenizer, TokenizerError};
pub use types::{BinaryOp, Expr, ExprKind, ParserError};
