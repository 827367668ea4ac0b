use anyhow::Context;
use clap::Parser;
use shovel::tools::HostTools;
use shovel::vm::{self, LogTracer, RunOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Run a shovel program.
#[derive(Parser, Debug)]
#[command()]
struct Args {
    /// File containing a shovel program.
    #[arg()]
    file: PathBuf,
    /// Maximum stack size. Defaults to `SHOVEL_MAX_STACK_SIZE`.
    #[arg(long, short = 'm')]
    max_stack_size: Option<usize>,
    /// A limit for the number of executed operations.
    /// If the limit is reached, the program will be stopped with an error.
    #[arg(long, short = 'l')]
    op_limit: Option<u64>,
    /// Only load and type check the program, do not run it.
    #[arg(long, short = 'c')]
    check: bool,
    /// Print statistics after running the program.
    #[arg(long, short = 's')]
    stats: bool,
    /// Log every executed instruction and stack change.
    #[arg(long, short = 'v')]
    verbose: bool,
}

/// `--verbose` traces the interpreter only, not the HTTP and TLS stack under `download`.
const VERBOSE_FILTER: &str = "shovel=trace";

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new(VERBOSE_FILTER)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr).with_target(true).with_level(true))
        .with(filter)
        .init();
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let source = std::fs::read_to_string(&args.file)
        .with_context(|| format!("Cannot read {}", args.file.display()))?;
    let program = shovel::load(&source)
        .with_context(|| format!("Cannot load {}", args.file.display()))?;

    if args.check {
        eprintln!(
            "{}: ok ({} instructions, {} procedures)",
            args.file.display(),
            program.len(),
            program.procedures.len()
        );
        return Ok(());
    }

    let defaults = RunOptions::default();
    let options = RunOptions::new(
        args.max_stack_size.unwrap_or(defaults.max_stack_size),
        args.op_limit.unwrap_or(defaults.max_op_count),
    );

    let mut tools = HostTools::default();
    let mut out = io::stdout().lock();
    let start_time = Instant::now();
    let result = if args.verbose {
        vm::run_with_stats(&program, &mut tools, &mut out, options, LogTracer::default())
            .map(|r| (r.instruction_counter, r.stack.len()))
    } else {
        vm::run(&program, &mut tools, &mut out, options).map(|r| (r.instruction_counter, r.stack.len()))
    };
    let elapsed = start_time.elapsed();
    out.flush()?;
    let (instruction_counter, leftover) = result?;

    if args.stats {
        print_stats(instruction_counter, leftover, elapsed);
    }

    Ok(())
}

fn print_stats(instruction_counter: u64, leftover: usize, elapsed: Duration) {
    let instructions_per_second = instruction_counter as f64 / elapsed.as_secs_f64();
    eprintln!("Execution time: {:?}", elapsed);
    eprintln!(
        "Instructions executed: {} ({}/s)",
        instruction_counter,
        match instructions_per_second {
            n if n >= 1_000_000.0 => format!("{:.1}M", n / 1_000_000.0),
            n if n >= 1_000.0 => format!("{:.1}k", n / 1_000.0),
            n => format!("{:.1}", n),
        }
    );
    eprintln!("Values left on the stack: {}", leftover);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbose_filter_is_scoped() {
        assert_eq!(EnvFilter::new(VERBOSE_FILTER).to_string(), "shovel=trace");
    }
}
