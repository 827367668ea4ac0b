//! Functions for executing linked shovel programs.
use std::{io::Write, path::Path};

use thiserror::Error;
use tracing::{debug, trace};

use crate::{
    config::get_config,
    linker::{EndKind, Instruction, LoopKind, Mode, Program},
    ops::{Category, Op},
    token::Token,
    tools::{CopyOutcome, ToolError, Tools},
    value::{fmt_types, Value, ValueType},
};

pub mod memory;

use memory::Memory;

/// An implementation of [`Tracer`] that does not track anything.
///
/// This is the best choice if you do not need to look inside the machine while the
/// program is executed.
#[derive(Default, Debug, Clone, Copy)]
pub struct NoStats {}

impl Tracer for NoStats {
    #[inline(always)]
    fn push(&mut self, _: &Value) {}
    #[inline(always)]
    fn pop(&mut self, _: &Value) {}
    #[inline(always)]
    fn instruction(&mut self, _ip: usize, _: &Token, _: &Result<Effect, OperationError>) -> Result<(), RunError> { Ok(()) }
}

/// A [`Tracer`] forwarding every push, pop and executed instruction to `tracing` at `TRACE` level.
#[derive(Default, Debug, Clone, Copy)]
pub struct LogTracer {}

impl Tracer for LogTracer {
    fn push(&mut self, value: &Value) {
        trace!(%value, "push");
    }

    fn pop(&mut self, value: &Value) {
        trace!(%value, "pop");
    }

    fn instruction(&mut self, ip: usize, token: &Token, result: &Result<Effect, OperationError>) -> Result<(), RunError> {
        match result {
            Ok(effect) => trace!(ip, %token, ?effect, "step"),
            Err(error) => trace!(ip, %token, %error, "step failed"),
        }
        Ok(())
    }
}

/// A trait for observing the machine while it runs.
///
/// You can implement this trait to track any statistics you need.
pub trait Tracer {
    fn push(&mut self, value: &Value);
    fn pop(&mut self, value: &Value);
    /// Called after every instruction. Returning an error stops the run.
    fn instruction(&mut self, ip: usize, token: &Token, result: &Result<Effect, OperationError>) -> Result<(), RunError>;
}

/// An error that can occur during the execution of a single instruction.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OperationError {
    #[error("Removing from an empty stack")]
    PopFailed,
    #[error("Adding to a full stack")]
    PushFailed,
    #[error("`{op}` cannot be applied to {}", fmt_types(.found))]
    WrongKind { op: Op, found: Vec<ValueType> },
    #[error("Integer overflow")]
    IntegerOverflow,
    #[error("Unknown operator `{name}`")]
    UnknownOperator { name: String },
    #[error("Unknown variable `{name}`")]
    UnknownVariable { name: String },
    #[error("Returning with an empty call stack")]
    EmptyCallStack,
    #[error("Negative value used as a count: {value}")]
    NegativeCount { value: i64 },
    #[error("Jump target was never resolved")]
    UnresolvedJump,
    #[error("Tool failed: {message}")]
    ToolFailed { message: String },
    #[error("Failed to write output: {message}")]
    Output { message: String },
    #[error("Internal error in the runtime")]
    Unreachable,
}

/// What the run loop should do after an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    None,
    Jump(usize),
    /// Save the return address and jump to the procedure body.
    Call(usize),
    Exit,
}

/// Options for the shovel machine.
#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    /// The maximum size of the value stack (and of the call stack).
    pub max_stack_size: usize,
    /// The maximum number of instructions to run, if this is reached,
    /// the program will stop with an error.
    ///
    /// Set to [`u64::MAX`] to disable this limit.
    pub max_op_count: u64,
}

impl RunOptions {
    pub fn new(max_stack_size: usize, max_op_count: u64) -> Self {
        Self { max_stack_size, max_op_count }
    }
}

impl Default for RunOptions {
    /// Limits from the environment, see [`crate::config`].
    fn default() -> Self {
        let conf = get_config();
        Self { max_stack_size: conf.max_stack_size, max_op_count: conf.max_op_count }
    }
}

/// An error that happened while running a shovel program.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RunError {
    /// A specific instruction failed.
    #[error("Instruction {index} ({instruction}) failed (instruction counter {instruction_counter}): {error}")]
    InstructionFailed {
        /// The instruction which failed.
        instruction: Token,
        /// The 0-based index of this instruction in the program.
        index: usize,
        /// The number of instructions which have been run before this one.
        /// May differ from index in case of loops and calls.
        instruction_counter: u64,
        /// The specific error within the instruction.
        error: OperationError,
    },
    /// The program executed more instructions than the limit specified within [`RunOptions`].
    #[error("The program ran for too long ({instruction_counter} instructions had been run).")]
    RunTooLong {
        instruction_counter: u64,
    },
    /// Tracer interrupted the run with a message.
    #[error("Tracer interrupted program execution: {0}")]
    TracerInterrupt(String),
}

/// The successful result of running a shovel program.
#[derive(Debug, Clone)]
pub struct RunResult<T: Tracer> {
    /// The stack left behind by the program, bottom first.
    pub stack: Vec<Value>,
    /// The number of instructions which have been run.
    pub instruction_counter: u64,
    /// Return addresses still pending, non-empty only if `exit` was used inside a procedure.
    pub call_stack: Vec<usize>,
    pub memory: Memory,
    pub tracer: T,
}

/// The internal state of the machine.
struct Machine<'a, T: Tracer> {
    stack: Vec<Value>,
    max_stack_size: usize,
    program: &'a Program,
    memory: Memory,
    ip: usize,
    /// End of program, the run stops once `ip` reaches it.
    eop: usize,
    call_stack: Vec<usize>,
    tools: &'a mut dyn Tools,
    output: &'a mut dyn Write,
    tracer: T,
    instructions_run: u64,
    log_jumps: bool,
}

fn absolute(path: &str) -> String {
    let p = Path::new(path);
    if p.is_absolute() {
        return path.to_string();
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(p).to_string_lossy().into_owned(),
        Err(_) => path.to_string(),
    }
}

fn relative(path: &str) -> String {
    let Ok(cwd) = std::env::current_dir() else { return path.to_string() };
    match Path::new(path).strip_prefix(&cwd) {
        Ok(rel) if rel.as_os_str().is_empty() => ".".to_string(),
        Ok(rel) => rel.to_string_lossy().into_owned(),
        Err(_) => path.to_string(),
    }
}

fn entry_at(names: Vec<String>, index: i64, dir: &str) -> Result<String, ToolError> {
    let count = names.len();
    usize::try_from(index)
        .ok()
        .and_then(|i| names.into_iter().nth(i))
        .ok_or(ToolError::IndexOutOfRange { index, dir: dir.to_string(), count })
}

impl<'a, T: Tracer> Machine<'a, T> {
    fn new(program: &'a Program, tools: &'a mut dyn Tools, output: &'a mut dyn Write, max_stack_size: usize, tracer: T) -> Self {
        Machine {
            stack: Vec::new(),
            max_stack_size,
            program,
            memory: Memory::default(),
            ip: 0,
            eop: program.len(),
            call_stack: Vec::new(),
            tools,
            output,
            tracer,
            instructions_run: 0,
            log_jumps: get_config().should_log(2),
        }
    }

    fn pop(&mut self) -> Result<Value, OperationError> {
        let value = self.stack.pop().ok_or(OperationError::PopFailed)?;
        self.tracer.pop(&value);
        Ok(value)
    }

    fn push(&mut self, value: Value) -> Result<(), OperationError> {
        if self.stack.len() >= self.max_stack_size {
            return Err(OperationError::PushFailed);
        }

        self.tracer.push(&value);
        self.stack.push(value);
        Ok(())
    }

    fn peek_n(&self, n: usize) -> Result<Value, OperationError> {
        let len = self.stack.len();
        if n >= len {
            return Err(OperationError::PopFailed);
        }
        Ok(self.stack[len - 1 - n].clone())
    }

    fn pop_int(&mut self, op: Op) -> Result<i64, OperationError> {
        match self.pop()? {
            Value::Int(i) => Ok(i),
            other => Err(OperationError::WrongKind { op, found: vec![other.value_type()] }),
        }
    }

    /// Pops the top two values, both must be integers. Returns `(beneath, top)`.
    fn pop_ints(&mut self, op: Op) -> Result<(i64, i64), OperationError> {
        let top = self.pop()?;
        let beneath = self.pop()?;
        match (beneath, top) {
            (Value::Int(b), Value::Int(t)) => Ok((b, t)),
            (b, t) => Err(OperationError::WrongKind { op, found: vec![b.value_type(), t.value_type()] }),
        }
    }

    fn pop_count(&mut self, op: Op) -> Result<usize, OperationError> {
        let value = self.pop_int(op)?;
        usize::try_from(value).map_err(|_| OperationError::NegativeCount { value })
    }

    fn pop_text(&mut self, op: Op) -> Result<String, OperationError> {
        match self.pop()? {
            Value::Text(s) => Ok(s),
            other => Err(OperationError::WrongKind { op, found: vec![other.value_type()] }),
        }
    }

    fn pop_path(&mut self, op: Op) -> Result<String, OperationError> {
        match self.pop()? {
            Value::Path(s) => Ok(s),
            other => Err(OperationError::WrongKind { op, found: vec![other.value_type()] }),
        }
    }

    /// Pops a text or a path.
    fn pop_location(&mut self, op: Op) -> Result<String, OperationError> {
        match self.pop()? {
            Value::Text(s) | Value::Path(s) => Ok(s),
            other => Err(OperationError::WrongKind { op, found: vec![other.value_type()] }),
        }
    }

    fn pop_condition(&mut self, op: Op) -> Result<bool, OperationError> {
        let value = self.pop()?;
        value.truthy().ok_or(OperationError::WrongKind { op, found: vec![value.value_type()] })
    }

    fn push_bool(&mut self, b: bool) -> Result<(), OperationError> {
        self.push(Value::from_bool(b))
    }

    fn ret(&mut self) -> Result<Effect, OperationError> {
        self.call_stack.pop().map(Effect::Jump).ok_or(OperationError::EmptyCallStack)
    }

    fn next(instruction: &Instruction) -> Result<usize, OperationError> {
        instruction.next.ok_or(OperationError::UnresolvedJump)
    }

    fn apply(&mut self, instruction: &Instruction) -> Result<Effect, OperationError> {
        if let Some(value) = instruction.token.literal() {
            self.push(value)?;
            return Ok(Effect::None);
        }
        match &instruction.token {
            Token::Op(op) => match op.category() {
                Category::Print => self.print(),
                Category::Conversion => self.convert(*op),
                Category::Memory => self.memory_op(*op),
                Category::Arithmetic => self.arithmetic(*op),
                Category::Stack => self.shuffle(*op),
                Category::Branch => self.branch(*op, instruction),
                Category::Logical => self.compare(*op),
                Category::Bitwise => self.bitwise(*op),
                Category::Boolean => self.boolean(*op),
                Category::Tool => self.tool(*op),
            },
            Token::Proc(_) => Ok(Effect::Jump(Self::next(instruction)?)),
            Token::Identifier(name) => match self.program.procedure(name) {
                Some(procedure) => Ok(Effect::Call(procedure.start)),
                None => Err(OperationError::UnknownOperator { name: name.clone() }),
            },
            Token::Number(_) | Token::Text(_) | Token::Path(_) => Err(OperationError::Unreachable),
        }
    }

    fn print(&mut self) -> Result<Effect, OperationError> {
        let value = self.pop()?;
        writeln!(self.output, "{value}").map_err(|e| OperationError::Output { message: e.to_string() })?;
        Ok(Effect::None)
    }

    fn convert(&mut self, op: Op) -> Result<Effect, OperationError> {
        let result = match op {
            Op::ToString => Value::Text(self.pop()?.to_string()),
            Op::ToPath => Value::Path(self.pop_text(op)?),
            Op::Absolute => Value::Path(absolute(&self.pop_location(op)?)),
            Op::Relative => Value::Path(relative(&self.pop_location(op)?)),
            Op::Concat => {
                let suffix = self.pop_text(op)?;
                match self.pop()? {
                    Value::Text(base) => Value::Text(base + &suffix),
                    Value::Path(base) => Value::Path(base + &suffix),
                    other => return Err(OperationError::WrongKind { op, found: vec![other.value_type(), ValueType::String] }),
                }
            }
            _ => return Err(OperationError::Unreachable),
        };
        self.push(result)?;
        Ok(Effect::None)
    }

    fn memory_op(&mut self, op: Op) -> Result<Effect, OperationError> {
        match op {
            Op::Store => {
                let name = self.pop_text(op)?;
                let value = self.pop()?;
                self.memory.store(name, value);
            }
            Op::Load => {
                let name = self.pop_text(op)?;
                let value = self.memory.load(&name).cloned().ok_or(OperationError::UnknownVariable { name })?;
                self.push(value)?;
            }
            _ => return Err(OperationError::Unreachable),
        }
        Ok(Effect::None)
    }

    fn arithmetic(&mut self, op: Op) -> Result<Effect, OperationError> {
        let result = match op {
            Op::Add => {
                let top = self.pop()?;
                let beneath = self.pop()?;
                match (beneath, top) {
                    (Value::Text(b), Value::Text(t)) => Value::Text(t + &b),
                    (Value::Text(b), Value::Int(t)) => Value::Text(format!("{t}{b}")),
                    (Value::Int(b), Value::Int(t)) => Value::Int(b.checked_add(t).ok_or(OperationError::IntegerOverflow)?),
                    (b, t) => return Err(OperationError::WrongKind { op, found: vec![b.value_type(), t.value_type()] }),
                }
            }
            Op::Subtract => {
                let (b, t) = self.pop_ints(op)?;
                Value::Int(b.checked_sub(t).ok_or(OperationError::IntegerOverflow)?)
            }
            Op::Multiply => {
                let (b, t) = self.pop_ints(op)?;
                Value::Int(b.checked_mul(t).ok_or(OperationError::IntegerOverflow)?)
            }
            Op::Divide | Op::Modulo => {
                let (b, t) = self.pop_ints(op)?;
                // A zero divisor yields zero.
                let r = match (t, op) {
                    (0, _) => Some(0),
                    (_, Op::Divide) => b.checked_div(t),
                    _ => b.checked_rem(t),
                };
                Value::Int(r.ok_or(OperationError::IntegerOverflow)?)
            }
            Op::Increment => Value::Int(self.pop_int(op)?.checked_add(1).ok_or(OperationError::IntegerOverflow)?),
            Op::Decrement => Value::Int(self.pop_int(op)?.checked_sub(1).ok_or(OperationError::IntegerOverflow)?),
            _ => return Err(OperationError::Unreachable),
        };
        self.push(result)?;
        Ok(Effect::None)
    }

    fn shuffle(&mut self, op: Op) -> Result<Effect, OperationError> {
        match op {
            Op::Dup => {
                let a = self.peek_n(0)?;
                self.push(a)?;
            }
            Op::Drop => {
                self.pop()?;
            }
            Op::Swap => {
                let a = self.pop()?;
                let b = self.pop()?;
                self.push(a)?;
                self.push(b)?;
            }
            Op::Over => {
                let a = self.peek_n(1)?;
                self.push(a)?;
            }
            Op::Dup2 => {
                let a = self.peek_n(1)?;
                let b = self.peek_n(0)?;
                self.push(a)?;
                self.push(b)?;
            }
            Op::Swap2 => {
                // (a b c d -- c d a b)
                let d = self.pop()?;
                let c = self.pop()?;
                let b = self.pop()?;
                let a = self.pop()?;
                self.push(c)?;
                self.push(d)?;
                self.push(a)?;
                self.push(b)?;
            }
            _ => return Err(OperationError::Unreachable),
        }
        Ok(Effect::None)
    }

    fn branch(&mut self, op: Op, instruction: &Instruction) -> Result<Effect, OperationError> {
        match op {
            Op::If | Op::Unless => {
                let truthy = self.pop_condition(op)?;
                if truthy == (op == Op::If) {
                    Ok(Effect::None)
                } else {
                    Ok(Effect::Jump(Self::next(instruction)?))
                }
            }
            Op::While | Op::Until => Ok(Effect::None),
            Op::Do => {
                let Mode::Do(kind, _) = instruction.mode else { return Err(OperationError::UnresolvedJump) };
                let truthy = self.pop_condition(op)?;
                if truthy == (kind == LoopKind::While) {
                    Ok(Effect::None)
                } else {
                    Ok(Effect::Jump(Self::next(instruction)?))
                }
            }
            Op::Else => Ok(Effect::Jump(Self::next(instruction)?)),
            Op::End => match instruction.mode {
                Mode::End(EndKind::Block) => Ok(Effect::None),
                Mode::End(EndKind::Loop(start)) => Ok(Effect::Jump(start)),
                Mode::End(EndKind::Proc) => self.ret(),
                _ => Err(OperationError::UnresolvedJump),
            },
            Op::Ret => self.ret(),
            Op::DropRet => {
                let n = self.pop_count(op)?;
                for _ in 0..n {
                    self.pop()?;
                }
                self.ret()
            }
            Op::KeepRet => {
                let drop_count = self.pop_count(op)?;
                let keep_count = self.pop_count(op)?;
                let mut kept = Vec::with_capacity(keep_count.min(self.stack.len()));
                for _ in 0..keep_count {
                    kept.push(self.pop()?);
                }
                for _ in 0..drop_count {
                    self.pop()?;
                }
                for value in kept.into_iter().rev() {
                    self.push(value)?;
                }
                self.ret()
            }
            Op::Exit => Ok(Effect::Exit),
            _ => Err(OperationError::Unreachable),
        }
    }

    fn compare(&mut self, op: Op) -> Result<Effect, OperationError> {
        let top = self.pop()?;
        let beneath = self.pop()?;
        let result = match op {
            // Values of different kinds are never equal.
            Op::Equal => beneath == top,
            Op::NotEqual => beneath != top,
            _ => {
                let ordering = match (&beneath, &top) {
                    (Value::Int(b), Value::Int(t)) => b.cmp(t),
                    (Value::Text(b), Value::Text(t)) => b.cmp(t),
                    _ => return Err(OperationError::WrongKind { op, found: vec![beneath.value_type(), top.value_type()] }),
                };
                match op {
                    Op::Less => ordering.is_lt(),
                    Op::Greater => ordering.is_gt(),
                    Op::LessEqual => ordering.is_le(),
                    Op::GreaterEqual => ordering.is_ge(),
                    _ => return Err(OperationError::Unreachable),
                }
            }
        };
        self.push_bool(result)?;
        Ok(Effect::None)
    }

    fn bitwise(&mut self, op: Op) -> Result<Effect, OperationError> {
        let result = match op {
            Op::BitNot => !self.pop_int(op)?,
            Op::BitAnd => { let (b, t) = self.pop_ints(op)?; b & t }
            Op::BitOr => { let (b, t) = self.pop_ints(op)?; b | t }
            Op::BitXor => { let (b, t) = self.pop_ints(op)?; b ^ t }
            _ => return Err(OperationError::Unreachable),
        };
        self.push(Value::Int(result))?;
        Ok(Effect::None)
    }

    fn boolean(&mut self, op: Op) -> Result<Effect, OperationError> {
        let result = match op {
            Op::Not => !self.pop_condition(op)?,
            Op::And | Op::Or => {
                let top = self.pop()?;
                let beneath = self.pop()?;
                let (Some(b), Some(t)) = (beneath.truthy(), top.truthy()) else {
                    return Err(OperationError::WrongKind { op, found: vec![beneath.value_type(), top.value_type()] });
                };
                if op == Op::And { b && t } else { b || t }
            }
            _ => return Err(OperationError::Unreachable),
        };
        self.push_bool(result)?;
        Ok(Effect::None)
    }

    /// Runs a tool call, turning a failure into `None`.
    fn attempt<R>(op: Op, result: Result<R, ToolError>) -> Option<R> {
        match result {
            Ok(r) => Some(r),
            Err(error) => {
                debug!(%op, %error, "tool failed");
                None
            }
        }
    }

    fn tool(&mut self, op: Op) -> Result<Effect, OperationError> {
        match op {
            Op::Download => {
                let dest = self.pop_path(op)?;
                let url = self.pop_text(op)?;
                let ok = Self::attempt(op, self.tools.download(&url, Path::new(&dest))).is_some();
                self.push_bool(ok)?;
            }
            Op::ReadFile => {
                let path = self.pop_path(op)?;
                match Self::attempt(op, self.tools.read_file(Path::new(&path))) {
                    Some(text) => {
                        self.push(Value::Text(text))?;
                        self.push_bool(true)?;
                    }
                    None => {
                        self.push(Value::Text(String::new()))?;
                        self.push_bool(false)?;
                    }
                }
            }
            Op::Move => {
                let dst = self.pop_path(op)?;
                let src = self.pop_path(op)?;
                let ok = Self::attempt(op, self.tools.move_path(Path::new(&src), Path::new(&dst))).is_some();
                self.push_bool(ok)?;
            }
            Op::Copy => {
                let dst = self.pop_path(op)?;
                let src = self.pop_path(op)?;
                let (ok, existed) = match Self::attempt(op, self.tools.copy(Path::new(&src), Path::new(&dst))) {
                    Some(CopyOutcome::Copied) => (true, false),
                    Some(CopyOutcome::DestinationExists) => (false, true),
                    None => (false, false),
                };
                self.push_bool(ok)?;
                self.push_bool(existed)?;
            }
            Op::Exist => {
                let path = self.pop_path(op)?;
                let exists = self.tools.exists(Path::new(&path));
                self.push_bool(exists)?;
            }
            Op::Touch | Op::Mkdir | Op::Rm => {
                let path = self.pop_path(op)?;
                let path = Path::new(&path);
                let result = match op {
                    Op::Touch => self.tools.touch(path),
                    Op::Mkdir => self.tools.mkdir(path),
                    _ => self.tools.remove(path),
                };
                let ok = Self::attempt(op, result).is_some();
                self.push_bool(ok)?;
            }
            Op::Unzip => {
                let dest = self.pop_path(op)?;
                let archive = self.pop_path(op)?;
                let (dirs, files) = Self::attempt(op, self.tools.unzip(Path::new(&archive), Path::new(&dest))).unwrap_or((-1, -1));
                self.push(Value::Int(dirs))?;
                self.push(Value::Int(files))?;
            }
            Op::Lsf | Op::Lsd => {
                let dir = self.pop_path(op)?;
                let dir = Path::new(&dir);
                let listing = if op == Op::Lsf { self.tools.list_files(dir) } else { self.tools.list_dirs(dir) };
                let count = Self::attempt(op, listing).map_or(0, |names| names.len());
                self.push(Value::Int(count as i64))?;
            }
            Op::Getf => {
                let dir = self.pop_path(op)?;
                let index = self.pop_int(op)?;
                let name = self.tools.list_files(Path::new(&dir)).and_then(|names| entry_at(names, index, &dir));
                let name = Self::attempt(op, name).unwrap_or_default();
                self.push(Value::Text(name))?;
            }
            Op::Getd => {
                // Unlike every other tool, a failed `getd` stops the program.
                let dir = self.pop_path(op)?;
                let index = self.pop_int(op)?;
                let name = self.tools.list_dirs(Path::new(&dir))
                    .and_then(|names| entry_at(names, index, &dir))
                    .map_err(|e| OperationError::ToolFailed { message: e.to_string() })?;
                self.push(Value::Text(name))?;
            }
            _ => return Err(OperationError::Unreachable),
        }
        Ok(Effect::None)
    }
}

/// Run a linked shovel program with the given options.
///
/// Output of `.` goes to `output`, file and network access goes through `tools`.
///
/// # Example
/// ```
/// use shovel::tools::HostTools;
/// use shovel::vm::{run, RunOptions};
///
/// let program = shovel::load("proc double int in int do dup + end 21 double").unwrap();
/// let mut output = Vec::new();
/// let result = run(&program, &mut HostTools::default(), &mut output, RunOptions::new(1000, u64::MAX)).unwrap();
/// assert_eq!(result.stack, vec![shovel::value::Value::Int(42)]);
/// ```
pub fn run(program: &Program, tools: &mut dyn Tools, output: &mut dyn Write, options: RunOptions) -> Result<RunResult<NoStats>, RunError> {
    run_with_stats(program, tools, output, options, NoStats::default())
}

/// Run a shovel program and observe it with a [`Tracer`].
/// If you do not need to observe the run, use the [`run`] function instead.
pub fn run_with_stats<T: Tracer>(
    program: &Program,
    tools: &mut dyn Tools,
    output: &mut dyn Write,
    options: RunOptions,
    tracer: T,
) -> Result<RunResult<T>, RunError> {
    debug!(instructions = program.len(), procedures = program.procedures.len(), "run");
    let mut s = Machine::new(program, tools, output, options.max_stack_size, tracer);
    run_state(&mut s, &options)?;
    debug!(instructions_run = s.instructions_run, stack = s.stack.len(), "finished");
    Ok(RunResult {
        stack: s.stack,
        instruction_counter: s.instructions_run,
        call_stack: s.call_stack,
        memory: s.memory,
        tracer: s.tracer,
    })
}

fn run_state<T: Tracer>(s: &mut Machine<'_, T>, options: &RunOptions) -> Result<(), RunError> {
    let program = s.program;
    while s.ip < s.eop {
        if s.instructions_run >= options.max_op_count {
            return Err(RunError::RunTooLong { instruction_counter: s.instructions_run });
        }

        let ip = s.ip;
        let instruction = &program.instructions[ip];
        let instruction_counter = s.instructions_run;
        let build_err = |error| RunError::InstructionFailed {
            instruction: instruction.token.clone(),
            index: ip,
            instruction_counter,
            error,
        };

        let result = s.apply(instruction);
        s.tracer.instruction(ip, &instruction.token, &result)?;

        s.ip = match result {
            Err(error) => return Err(build_err(error)),
            Ok(Effect::None) => ip + 1,
            Ok(Effect::Jump(target)) => {
                if s.log_jumps {
                    debug!(from = ip, to = target, "jump");
                }
                target
            }
            Ok(Effect::Call(target)) => {
                if s.call_stack.len() >= s.max_stack_size {
                    return Err(build_err(OperationError::PushFailed));
                }
                s.call_stack.push(ip + 1);
                target
            }
            Ok(Effect::Exit) => s.eop,
        };
        s.instructions_run += 1;
    }

    Ok(())
}
