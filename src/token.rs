//! The token stream consumed by the linker.
use std::fmt;

use smallvec::SmallVec;

use crate::{ops::Op, value::{Value, ValueType}};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TokenKind {
    Number,
    Keyword,
    Symbol,
    Path,
    String,
    Identifier,
}

/// Name and stack signature of a `proc` declaration.
///
/// Inputs and outputs are listed in push order, the last entry is the top of the stack.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProcSignature {
    pub name: String,
    pub inputs: SmallVec<[ValueType; 4]>,
    pub outputs: SmallVec<[ValueType; 4]>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Token {
    Number(i64),
    Text(String),
    Path(String),
    Op(Op),
    Proc(ProcSignature),
    Identifier(String),
}

impl Token {
    pub fn kind(&self) -> TokenKind {
        match self {
            Token::Number(_) => TokenKind::Number,
            Token::Text(_) => TokenKind::String,
            Token::Path(_) => TokenKind::Path,
            Token::Op(op) => op.kind(),
            Token::Proc(_) => TokenKind::Keyword,
            Token::Identifier(_) => TokenKind::Identifier,
        }
    }

    pub fn op(&self) -> Option<Op> {
        match self {
            Token::Op(op) => Some(*op),
            _ => None,
        }
    }

    pub fn is_op(&self, op: Op) -> bool {
        self.op() == Some(op)
    }

    /// The value pushed by a literal token.
    pub fn literal(&self) -> Option<Value> {
        match self {
            Token::Number(n) => Some(Value::Int(*n)),
            Token::Text(s) => Some(Value::Text(s.clone())),
            Token::Path(p) => Some(Value::Path(p.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for ProcSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "proc {}", self.name)?;
        for t in &self.inputs {
            write!(f, " {t}")?;
        }
        f.write_str(" in")?;
        for t in &self.outputs {
            write!(f, " {t}")?;
        }
        f.write_str(" do")
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Number(n) => write!(f, "{n}"),
            Token::Text(s) => write!(f, "{s:?}"),
            Token::Path(p) => write!(f, "'{p}'"),
            Token::Op(op) => write!(f, "{op}"),
            Token::Proc(sig) => write!(f, "{sig}"),
            Token::Identifier(name) => f.write_str(name),
        }
    }
}
