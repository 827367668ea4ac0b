//! Static stack-shape checking.
//!
//! The checker walks the linked program once, simulating every instruction on a stack of
//! [`ValueType`]s instead of values. Block openers save a snapshot of the type stack
//! (a [`Preview`]) and the matching closers compare the shapes of the paths that meet there.
//! A program that passes can not hit a kind mismatch at run time.
//!
//! Known restrictions that programs may rely on:
//! * memory is `int` only here (`store` takes `int string`, `load` yields `int`), while the
//!   machine itself can store any value;
//! * `dret` and `iret` need their counts written as integer literals right before them.
use thiserror::Error;
use tracing::debug;

use crate::{
    linker::{Procedure, Program},
    ops::Op,
    token::Token,
    value::{fmt_types, ValueType},
};


use ValueType::{Int, Path, String as Str};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TypeError {
    #[error("`{op}` at index {index} needs {required} values, the stack has {available}")]
    StackUnderflow { op: String, index: usize, required: usize, available: usize },
    #[error("`{op}` at index {index} expects {expected}, found {}", fmt_types(.found))]
    Mismatch { op: Op, index: usize, expected: &'static str, found: Vec<ValueType> },
    #[error("Call of `{name}` at index {index} expects {}, found {}", fmt_types(.expected), fmt_types(.found))]
    CallMismatch { name: String, index: usize, expected: Vec<ValueType>, found: Vec<ValueType> },
    #[error("`{op}` at index {index} leaves the stack as {}, but `{cause}` at index {cause_index} left it as {}", fmt_types(.found), fmt_types(.expected))]
    ShapeMismatch { op: Op, index: usize, cause: String, cause_index: usize, expected: Vec<ValueType>, found: Vec<ValueType> },
    #[error("`{op}` at index {index} cannot follow `{cause}` at index {cause_index}")]
    UnexpectedCause { op: Op, index: usize, cause: String, cause_index: usize },
    #[error("Joining the block opened by `{cause}` at index {cause_index} is not supported")]
    UnsupportedJoin { cause: String, cause_index: usize },
    #[error("`{op}` at index {index} does not close any block")]
    NoOpenBlock { op: Op, index: usize },
    #[error("`{cause}` at index {cause_index} is never closed")]
    UnclosedBlock { cause: String, cause_index: usize },
    #[error("`{op}` at index {index} has no resolved jump target")]
    UnresolvedJump { op: String, index: usize },
    #[error("Unknown word `{name}` at index {index}")]
    UnknownWord { name: String, index: usize },
    #[error("Procedure `{name}` at index {index} is declared inside another procedure")]
    NestedProc { name: String, index: usize },
    #[error("`{op}` at index {index} is outside of any procedure")]
    ReturnOutsideProc { op: Op, index: usize },
    #[error("`{op}` at index {index} needs its counts as non-negative integer literals right before it")]
    ReturnCountNotLiteral { op: Op, index: usize },
    #[error("Procedure `{name}` returns {} at index {index}, but is declared to return {}", fmt_types(.found), fmt_types(.expected))]
    SignatureMismatch { name: String, index: usize, expected: Vec<ValueType>, found: Vec<ValueType> },
}

/// A saved type stack together with the instruction that saved it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Preview {
    pub snapshot: Vec<ValueType>,
    pub cause: usize,
    /// The path that produced `snapshot` has already returned.
    pub diverged: bool,
}

struct Checker<'p> {
    program: &'p Program,
    stack: Vec<ValueType>,
    previews: Vec<Preview>,
    procedure: Option<&'p Procedure>,
    /// The current path has returned; everything until the next join is unreachable.
    diverged: bool,
}

fn pop_types(stack: &mut Vec<ValueType>, n: usize, op: impl ToString, index: usize) -> Result<Vec<ValueType>, TypeError> {
    if stack.len() < n {
        return Err(TypeError::StackUnderflow { op: op.to_string(), index, required: n, available: stack.len() });
    }
    Ok(stack.split_off(stack.len() - n))
}

/// Checks a linked program. Procedure bodies are checked against their declared signatures,
/// calls use the signatures without looking into the body.
pub fn check(program: &Program) -> Result<(), TypeError> {
    debug!(instructions = program.len(), procedures = program.procedures.len(), "type checking");
    let mut checker = Checker::new(program, Vec::new(), None);
    let mut index = 0;
    while index < program.len() {
        let instruction = &program.instructions[index];
        if let Token::Proc(sig) = &instruction.token {
            let procedure = program.procedure(&sig.name)
                .ok_or_else(|| TypeError::UnresolvedJump { op: sig.name.clone(), index })?;
            check_procedure(program, procedure)?;
            index = instruction.next.ok_or_else(|| TypeError::UnresolvedJump { op: sig.name.clone(), index })?;
        } else {
            checker.step(index)?;
            index += 1;
        }
    }
    checker.finish()
}

fn check_procedure(program: &Program, procedure: &Procedure) -> Result<(), TypeError> {
    debug!(name = %procedure.name, start = procedure.start, end = procedure.end, "checking procedure");
    let mut checker = Checker::new(program, procedure.signature.inputs.to_vec(), Some(procedure));
    for index in procedure.start..procedure.end {
        checker.step(index)?;
    }
    if !checker.diverged {
        checker.check_outputs(&checker.stack, procedure.end)?;
    }
    checker.finish()
}

impl<'p> Checker<'p> {
    fn new(program: &'p Program, stack: Vec<ValueType>, procedure: Option<&'p Procedure>) -> Self {
        Checker { program, stack, previews: Vec::new(), procedure, diverged: false }
    }

    fn finish(&self) -> Result<(), TypeError> {
        match self.previews.last() {
            Some(preview) => Err(TypeError::UnclosedBlock { cause: self.cause_name(preview.cause), cause_index: preview.cause }),
            None => Ok(()),
        }
    }

    fn cause_name(&self, index: usize) -> String {
        self.program.instructions[index].token.to_string()
    }

    fn cause_op(&self, index: usize) -> Option<Op> {
        self.program.instructions[index].token.op()
    }

    fn push(&mut self, t: ValueType) {
        self.stack.push(t);
    }

    fn args(&mut self, op: Op, index: usize, n: usize) -> Result<Vec<ValueType>, TypeError> {
        pop_types(&mut self.stack, n, op, index)
    }

    fn push_preview(&mut self, snapshot: Vec<ValueType>, cause: usize) {
        self.previews.push(Preview { snapshot, cause, diverged: self.diverged });
    }

    fn pop_preview(&mut self, op: Op, index: usize) -> Result<Preview, TypeError> {
        self.previews.pop().ok_or(TypeError::NoOpenBlock { op, index })
    }

    fn compare(&self, op: Op, index: usize, preview: &Preview) -> Result<(), TypeError> {
        if self.stack == preview.snapshot {
            Ok(())
        } else {
            Err(TypeError::ShapeMismatch {
                op,
                index,
                cause: self.cause_name(preview.cause),
                cause_index: preview.cause,
                expected: preview.snapshot.clone(),
                found: self.stack.clone(),
            })
        }
    }

    fn check_outputs(&self, stack: &[ValueType], index: usize) -> Result<(), TypeError> {
        let Some(procedure) = self.procedure else { return Ok(()) };
        if stack == procedure.signature.outputs.as_slice() {
            Ok(())
        } else {
            Err(TypeError::SignatureMismatch {
                name: procedure.name.clone(),
                index,
                expected: procedure.signature.outputs.to_vec(),
                found: stack.to_vec(),
            })
        }
    }

    /// Reads the integer literal at `index`, if it belongs to the current procedure body.
    fn literal_count(&self, index: Option<usize>) -> Option<usize> {
        let index = index?;
        let procedure = self.procedure?;
        if index < procedure.start {
            return None;
        }
        match self.program.instructions[index].token {
            Token::Number(n) => usize::try_from(n).ok(),
            _ => None,
        }
    }

    fn step(&mut self, index: usize) -> Result<(), TypeError> {
        let program = self.program;
        let instruction = &program.instructions[index];
        if instruction.is_opener() && instruction.next.is_none() {
            return Err(TypeError::UnresolvedJump { op: instruction.token.to_string(), index });
        }
        match &instruction.token {
            Token::Number(_) => self.push(Int),
            Token::Text(_) => self.push(Str),
            Token::Path(_) => self.push(Path),
            Token::Identifier(name) => {
                let procedure = program.procedure(name)
                    .ok_or_else(|| TypeError::UnknownWord { name: name.clone(), index })?;
                let inputs = &procedure.signature.inputs;
                let found = pop_types(&mut self.stack, inputs.len(), name, index)?;
                if found != inputs.as_slice() {
                    return Err(TypeError::CallMismatch { name: name.clone(), index, expected: inputs.to_vec(), found });
                }
                self.stack.extend(procedure.signature.outputs.iter().copied());
            }
            Token::Proc(sig) => return Err(TypeError::NestedProc { name: sig.name.clone(), index }),
            Token::Op(op) => self.op(*op, index)?,
        }
        Ok(())
    }

    fn op(&mut self, op: Op, index: usize) -> Result<(), TypeError> {
        macro_rules! mismatch {
            ($expected:expr, $found:expr) => {
                return Err(TypeError::Mismatch { op, index, expected: $expected, found: $found.to_vec() })
            };
        }

        match op {
            Op::Print => {
                self.args(op, index, 1)?;
            }

            Op::ToString => {
                self.args(op, index, 1)?;
                self.push(Str);
            }
            Op::ToPath => match self.args(op, index, 1)?.as_slice() {
                [Str] => self.push(Path),
                found => mismatch!("string", found),
            },
            Op::Absolute | Op::Relative => match self.args(op, index, 1)?.as_slice() {
                [Str | Path] => self.push(Path),
                found => mismatch!("string or path", found),
            },
            Op::Concat => match self.args(op, index, 2)?.as_slice() {
                [base @ (Str | Path), Str] => self.push(*base),
                found => mismatch!("string string or path string", found),
            },

            Op::Store => match self.args(op, index, 2)?.as_slice() {
                [Int, Str] => {}
                found => mismatch!("int string", found),
            },
            Op::Load => match self.args(op, index, 1)?.as_slice() {
                [Str] => self.push(Int),
                found => mismatch!("string", found),
            },

            Op::Add => match self.args(op, index, 2)?.as_slice() {
                [Str, Str] | [Str, Int] => self.push(Str),
                [Int, Int] => self.push(Int),
                found => mismatch!("string string, string int or int int", found),
            },
            Op::Subtract | Op::Multiply | Op::Divide | Op::Modulo
            | Op::BitAnd | Op::BitOr | Op::BitXor => match self.args(op, index, 2)?.as_slice() {
                [Int, Int] => self.push(Int),
                found => mismatch!("int int", found),
            },
            Op::Increment | Op::Decrement | Op::BitNot => match self.args(op, index, 1)?.as_slice() {
                [Int] => self.push(Int),
                found => mismatch!("int", found),
            },

            Op::Dup => {
                let a = self.args(op, index, 1)?;
                self.stack.extend([a[0], a[0]]);
            }
            Op::Drop => {
                self.args(op, index, 1)?;
            }
            Op::Swap => {
                let a = self.args(op, index, 2)?;
                self.stack.extend([a[1], a[0]]);
            }
            Op::Over => {
                let a = self.args(op, index, 2)?;
                self.stack.extend([a[0], a[1], a[0]]);
            }
            Op::Dup2 => {
                let a = self.args(op, index, 2)?;
                self.stack.extend([a[0], a[1], a[0], a[1]]);
            }
            Op::Swap2 => {
                let a = self.args(op, index, 4)?;
                self.stack.extend([a[2], a[3], a[0], a[1]]);
            }

            Op::Equal | Op::NotEqual | Op::Less | Op::Greater | Op::LessEqual | Op::GreaterEqual => {
                match self.args(op, index, 2)?.as_slice() {
                    [Int, Int] | [Str, Str] => self.push(Int),
                    found => mismatch!("int int or string string", found),
                }
            }

            Op::And | Op::Or => match self.args(op, index, 2)?.as_slice() {
                [Int | Str, Int | Str] => self.push(Int),
                found => mismatch!("two ints or strings", found),
            },
            Op::Not => match self.args(op, index, 1)?.as_slice() {
                [Int | Str] => self.push(Int),
                found => mismatch!("int or string", found),
            },

            Op::If | Op::Unless => {
                match self.args(op, index, 1)?.as_slice() {
                    [Int | Str] => {}
                    found => mismatch!("int or string", found),
                }
                self.push_preview(self.stack.clone(), index);
            }
            Op::While | Op::Until => {
                self.push_preview(self.stack.clone(), index);
            }
            Op::Do => {
                match self.args(op, index, 1)?.as_slice() {
                    [Int | Str] => {}
                    found => mismatch!("int or string", found),
                }
                let header = self.pop_preview(op, index)?;
                if !matches!(self.cause_op(header.cause), Some(Op::While | Op::Until)) {
                    return Err(TypeError::UnexpectedCause { op, index, cause: self.cause_name(header.cause), cause_index: header.cause });
                }
                // The loop header is reached both from before the loop and from its `end`.
                if !self.diverged {
                    self.compare(op, index, &header)?;
                }
                self.diverged = header.diverged;
                self.stack = header.snapshot;
                self.push_preview(self.stack.clone(), index);
            }
            Op::Else => {
                let branch = self.pop_preview(op, index)?;
                if !matches!(self.cause_op(branch.cause), Some(Op::If | Op::Unless)) {
                    return Err(TypeError::UnexpectedCause { op, index, cause: self.cause_name(branch.cause), cause_index: branch.cause });
                }
                let then_stack = std::mem::replace(&mut self.stack, branch.snapshot);
                self.push_preview(then_stack, index);
                self.diverged = branch.diverged;
            }
            Op::End => {
                let preview = self.pop_preview(op, index)?;
                match self.cause_op(preview.cause) {
                    Some(Op::If | Op::Unless | Op::Else | Op::Do) => {}
                    _ => return Err(TypeError::UnsupportedJoin { cause: self.cause_name(preview.cause), cause_index: preview.cause }),
                }
                match (self.diverged, preview.diverged) {
                    (false, false) => self.compare(op, index, &preview)?,
                    (true, _) => {
                        self.stack = preview.snapshot;
                        self.diverged = preview.diverged;
                    }
                    (false, true) => {}
                }
                // Leaving a loop happens at its `do`, with the shape saved there.
                if self.cause_op(preview.cause) == Some(Op::Do) {
                    self.diverged = false;
                }
            }
            Op::Ret => {
                if self.procedure.is_none() {
                    return Err(TypeError::ReturnOutsideProc { op, index });
                }
                self.check_outputs(&self.stack, index)?;
                self.diverged = true;
            }
            Op::DropRet | Op::KeepRet => {
                if self.procedure.is_none() {
                    return Err(TypeError::ReturnOutsideProc { op, index });
                }
                let mut after = self.stack.clone();
                if op == Op::DropRet {
                    let drop = self.literal_count(index.checked_sub(1))
                        .ok_or(TypeError::ReturnCountNotLiteral { op, index })?;
                    pop_types(&mut after, 1, op, index)?;
                    pop_types(&mut after, drop, op, index)?;
                } else {
                    let drop = self.literal_count(index.checked_sub(1));
                    let keep = self.literal_count(index.checked_sub(2));
                    let (Some(drop), Some(keep)) = (drop, keep) else {
                        return Err(TypeError::ReturnCountNotLiteral { op, index });
                    };
                    pop_types(&mut after, 2, op, index)?;
                    let kept = pop_types(&mut after, keep, op, index)?;
                    pop_types(&mut after, drop, op, index)?;
                    after.extend(kept);
                }
                self.check_outputs(&after, index)?;
                self.diverged = true;
            }
            Op::Exit => {}

            Op::Download => match self.args(op, index, 2)?.as_slice() {
                [Str, Path] => self.push(Int),
                found => mismatch!("string path", found),
            },
            Op::ReadFile => match self.args(op, index, 1)?.as_slice() {
                [Path] => self.stack.extend([Str, Int]),
                found => mismatch!("path", found),
            },
            Op::Move => match self.args(op, index, 2)?.as_slice() {
                [Path, Path] => self.push(Int),
                found => mismatch!("path path", found),
            },
            Op::Copy | Op::Unzip => match self.args(op, index, 2)?.as_slice() {
                [Path, Path] => self.stack.extend([Int, Int]),
                found => mismatch!("path path", found),
            },
            Op::Exist | Op::Touch | Op::Mkdir | Op::Rm | Op::Lsf | Op::Lsd => match self.args(op, index, 1)?.as_slice() {
                [Path] => self.push(Int),
                found => mismatch!("path", found),
            },
            Op::Getf | Op::Getd => match self.args(op, index, 2)?.as_slice() {
                [Int, Path] => self.push(Str),
                found => mismatch!("int path", found),
            },
        }
        Ok(())
    }
}
