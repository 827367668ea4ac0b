//! Runs many generated programs: every program that links has all openers resolved, and
//! every program that loads runs without the faults the type checker rules out.
use arbitrary::Unstructured;

use shovel::{
    linker::link,
    load,
    parser::parse_program,
    tools::HostTools,
    vm::{run, OperationError, RunError, RunOptions},
};

const SEED: u64 = 0x5eed_f00d_1234_5678;
const CANDIDATES: usize = 20_000;

/// Words that never reach the filesystem or the network.
const ATOMS: &[&str] = &[
    "0", "1", "2", "-1", "3", "9223372036854775807",
    "\"\"", "\"a\"", "\"b\"", "'p'", "'/tmp'",
    "\"v\" store", "\"v\" load",
    ".", "tostring", "token", "absolute", "relative", "concat", "store", "load",
    "+", "-", "*", "/", "%", "++", "--",
    "dup", "drop", "swap", "over", "2dup", "2swap",
    "=", "!=", "<", ">", "<=", ">=",
    "~", "&", "|", "^", "&&", "||", "!",
    "exit",
];

const RETURNS: &[&str] = &["ret", "0 dret", "1 dret", "1 0 iret", "1 1 iret", "0 2 iret"];

const TYPES: &[&str] = &["int", "string", "path"];

fn xorshift_bytes(state: &mut u64, len: usize) -> Vec<u8> {
    (0..len)
        .map(|_| {
            *state ^= *state << 13;
            *state ^= *state >> 7;
            *state ^= *state << 17;
            (*state >> 24) as u8
        })
        .collect()
}

struct Generator<'a, 'b> {
    u: &'b mut Unstructured<'a>,
    procs: Vec<String>,
    out: String,
}

impl Generator<'_, '_> {
    fn word(&mut self, word: &str) {
        self.out.push_str(word);
        self.out.push(' ');
    }

    fn block(&mut self, depth: usize, in_proc: bool) -> arbitrary::Result<()> {
        for _ in 0..self.u.int_in_range(0..=4u8)? {
            self.item(depth, in_proc)?;
        }
        Ok(())
    }

    fn item(&mut self, depth: usize, in_proc: bool) -> arbitrary::Result<()> {
        let choice = self.u.int_in_range(0..=19u8)?;
        match choice {
            0 if depth < 3 => {
                let opener = *self.u.choose(&["if", "unless"])?;
                self.word(opener);
                self.block(depth + 1, in_proc)?;
                if self.u.ratio(1, 2)? {
                    self.word("else");
                    self.block(depth + 1, in_proc)?;
                }
                self.word("end");
            }
            1 if depth < 3 => {
                let opener = *self.u.choose(&["while", "until"])?;
                self.word(opener);
                self.block(depth + 1, in_proc)?;
                self.word("do");
                self.block(depth + 1, in_proc)?;
                self.word("end");
            }
            2 if in_proc => {
                let word = *self.u.choose(RETURNS)?;
                self.word(word);
            }
            3 if !self.procs.is_empty() => {
                let name = self.u.choose(&self.procs)?.clone();
                self.word(&name);
            }
            _ => {
                let word = *self.u.choose(ATOMS)?;
                self.word(word);
            }
        }
        Ok(())
    }

    fn signature(&mut self) -> arbitrary::Result<()> {
        for _ in 0..self.u.int_in_range(0..=2u8)? {
            let t = *self.u.choose(TYPES)?;
            self.word(t);
        }
        Ok(())
    }

    fn program(mut self) -> arbitrary::Result<String> {
        for i in 0..self.u.int_in_range(0..=2u8)? {
            let name = format!("p{i}");
            self.word("proc");
            self.word(&name);
            self.signature()?;
            self.word("in");
            self.signature()?;
            self.word("do");
            // Declared before the body so that recursion is possible.
            self.procs.push(name);
            self.block(1, true)?;
            self.word("end");
        }
        self.block(0, false)?;
        Ok(self.out)
    }
}

fn generate(state: &mut u64) -> String {
    let bytes = xorshift_bytes(state, 128);
    let mut u = Unstructured::new(&bytes);
    let generator = Generator { u: &mut u, procs: Vec::new(), out: String::new() };
    generator.program().unwrap_or_default()
}

fn checker_rules_out(error: &OperationError) -> bool {
    matches!(
        error,
        OperationError::WrongKind { .. }
            | OperationError::PopFailed
            | OperationError::EmptyCallStack
            | OperationError::UnresolvedJump
    )
}

#[test]
fn generated_programs_link_totally() {
    let mut state = SEED;
    let mut linked = 0;
    for _ in 0..CANDIDATES {
        let source = generate(&mut state);
        let Ok(program) = link(parse_program(&source).unwrap()) else {
            continue;
        };
        linked += 1;
        for (index, instruction) in program.instructions.iter().enumerate() {
            if instruction.is_opener() {
                assert!(instruction.next.is_some(), "opener {index} unresolved in `{source}`");
            }
        }
    }
    assert!(linked >= 100, "only {linked} programs linked");
}

#[test]
fn generated_well_typed_programs_never_fault() {
    let mut state = SEED;
    let mut loaded = 0;
    for _ in 0..CANDIDATES {
        let source = generate(&mut state);
        let Ok(program) = load(&source) else {
            continue;
        };
        loaded += 1;
        let mut output = Vec::new();
        let result = run(&program, &mut HostTools::default(), &mut output, RunOptions::new(1_000, 10_000));
        if let Err(RunError::InstructionFailed { error, index, .. }) = &result {
            assert!(!checker_rules_out(error), "`{source}` passed the checker but failed at {index}: {error}");
        }
    }
    assert!(loaded >= 100, "only {loaded} programs loaded");
}
