//! Resolves structured control words into jump targets.
use rustc_hash::FxHashMap as HashMap;
use thiserror::Error;

use crate::{ops::Op, token::{ProcSignature, Token}};

#[cfg(test)]
mod tests;

/// Which condition keeps a `while`/`until` loop running.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LoopKind {
    While,
    Until,
}

/// What an `end` closes.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EndKind {
    /// Closes an `if`/`unless`/`else` block, execution falls through.
    Block,
    /// Closes a loop body, execution jumps back to the loop header at the given index.
    Loop(usize),
    /// Closes a procedure body, execution returns to the caller.
    Proc,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Mode {
    Plain,
    /// A `do` closing a `while` (or `until`) header at the given index.
    Do(LoopKind, usize),
    End(EndKind),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Instruction {
    pub token: Token,
    /// Jump target, `None` until resolved.
    pub next: Option<usize>,
    pub mode: Mode,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Procedure {
    pub name: String,
    /// Index of the first instruction of the body.
    pub start: usize,
    /// Index of the `end` closing the body.
    pub end: usize,
    pub signature: ProcSignature,
}

/// A linked program: instructions with resolved jumps and the procedures declared in them.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Program {
    pub instructions: Vec<Instruction>,
    pub procedures: HashMap<String, Procedure>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LinkError {
    #[error("`{closer}` at index {index} does not close any block")]
    UnmatchedCloser { closer: Op, index: usize },
    #[error("`{closer}` at index {index} cannot close `{opener}` at index {opener_index}")]
    MismatchedOpener { closer: Op, index: usize, opener: String, opener_index: usize },
    #[error("`{opener}` at index {index} is never closed")]
    Unclosed { opener: String, index: usize },
    #[error("Procedure `{name}` at index {index} is declared inside another procedure")]
    NestedProc { name: String, index: usize },
    #[error("Procedure `{name}` at index {index} is already declared")]
    DuplicateProc { name: String, index: usize },
}

impl Instruction {
    pub fn new(token: Token) -> Self {
        Instruction { token, next: None, mode: Mode::Plain }
    }

    /// Whether this instruction starts a block that must be resolved by the linker.
    pub fn is_opener(&self) -> bool {
        matches!(self.token, Token::Proc(_))
            || matches!(self.token.op(), Some(Op::If | Op::Unless | Op::Else | Op::While | Op::Until | Op::Do))
    }
}

impl Program {
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn procedure(&self, name: &str) -> Option<&Procedure> {
        self.procedures.get(name)
    }
}

/// Links a token stream into a [`Program`].
///
/// Every opener gets `next` pointing one past its closer:
/// `if`/`unless` to just after their `else` (if any) or `end`, `while`/`until` to just after
/// their `do`, `else`/`do`/`proc` to just after their `end`. An `end` closing a loop
/// jumps back to the loop header.
pub fn link(tokens: Vec<Token>) -> Result<Program, LinkError> {
    let mut instructions: Vec<Instruction> = tokens.into_iter().map(Instruction::new).collect();
    let mut procedures = HashMap::default();
    let mut open: Vec<usize> = Vec::new();
    let mut open_proc: Option<usize> = None;

    let mismatched = |instructions: &[Instruction], closer: Op, index: usize, opener_index: usize| {
        LinkError::MismatchedOpener {
            closer,
            index,
            opener: instructions[opener_index].token.to_string(),
            opener_index,
        }
    };

    for index in 0..instructions.len() {
        match &instructions[index].token {
            Token::Proc(sig) => {
                if open_proc.is_some() {
                    return Err(LinkError::NestedProc { name: sig.name.clone(), index });
                }
                if procedures.contains_key(&sig.name) {
                    return Err(LinkError::DuplicateProc { name: sig.name.clone(), index });
                }
                open_proc = Some(index);
                open.push(index);
            }
            Token::Op(Op::If | Op::Unless | Op::While | Op::Until) => open.push(index),
            Token::Op(Op::Else) => {
                let opener = open.pop().ok_or(LinkError::UnmatchedCloser { closer: Op::Else, index })?;
                if !matches!(instructions[opener].token.op(), Some(Op::If | Op::Unless)) {
                    return Err(mismatched(&instructions, Op::Else, index, opener));
                }
                instructions[opener].next = Some(index + 1);
                open.push(index);
            }
            Token::Op(Op::Do) => {
                let opener = open.pop().ok_or(LinkError::UnmatchedCloser { closer: Op::Do, index })?;
                let kind = match instructions[opener].token.op() {
                    Some(Op::While) => LoopKind::While,
                    Some(Op::Until) => LoopKind::Until,
                    _ => return Err(mismatched(&instructions, Op::Do, index, opener)),
                };
                instructions[opener].next = Some(index + 1);
                instructions[index].mode = Mode::Do(kind, opener);
                open.push(index);
            }
            Token::Op(Op::End) => {
                let opener = open.pop().ok_or(LinkError::UnmatchedCloser { closer: Op::End, index })?;
                let (mode, next) = match (&instructions[opener].token, instructions[opener].mode) {
                    (Token::Op(Op::If | Op::Unless | Op::Else), _) => (EndKind::Block, None),
                    (Token::Op(Op::Do), Mode::Do(_, start)) => (EndKind::Loop(start), Some(start)),
                    (Token::Proc(sig), _) => {
                        procedures.insert(sig.name.clone(), Procedure {
                            name: sig.name.clone(),
                            start: opener + 1,
                            end: index,
                            signature: sig.clone(),
                        });
                        open_proc = None;
                        (EndKind::Proc, None)
                    }
                    _ => return Err(mismatched(&instructions, Op::End, index, opener)),
                };
                instructions[opener].next = Some(index + 1);
                instructions[index].mode = Mode::End(mode);
                instructions[index].next = next;
            }
            _ => {}
        }
    }

    if let Some(&index) = open.last() {
        return Err(LinkError::Unclosed { opener: instructions[index].token.to_string(), index });
    }

    Ok(Program { instructions, procedures })
}
