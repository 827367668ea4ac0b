//! # shovel
//! A small concatenative scripting language for file chores: fetching archives,
//! unpacking them, shuffling files around.
//!
//! A program is a flat sequence of words. Literals push values, everything else pops its
//! operands from the stack and pushes its results:
//!
//! ```text
//! proc backup path in int do
//!     dup ".bak" concat copy drop
//! end
//!
//! 'notes.txt' backup .
//! ```
//!
//! Source text goes through three stages before anything runs:
//! [`parser::parse_program`] splits it into tokens, [`linker::link`] resolves every
//! block keyword into a jump target, and [`checker::check`] simulates the program on
//! types to make sure every branch and loop leaves the stack in the same shape.
//! [`load`] does all three. The linked [`linker::Program`] is then executed by
//! [`vm::run`].
use thiserror::Error;
use tracing::debug;

pub mod checker;
pub mod config;
pub mod linker;
pub mod ops;
pub mod parser;
pub mod token;
pub mod tools;
pub mod value;
pub mod vm;

/// Why a program could not be loaded.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LoadError {
    #[error("Parse error: {0}")]
    Parse(#[from] parser::ParserError),
    #[error("Link error: {0}")]
    Link(#[from] linker::LinkError),
    #[error("Type error: {0}")]
    Type(#[from] checker::TypeError),
}

/// Parses, links and type checks `source`.
pub fn load(source: &str) -> Result<linker::Program, LoadError> {
    let tokens = parser::parse_program(source)?;
    debug!(tokens = tokens.len(), "parsed");
    let program = linker::link(tokens)?;
    debug!(procedures = program.procedures.len(), "linked");
    checker::check(&program)?;
    debug!("checked");
    Ok(program)
}
