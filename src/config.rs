//! Run settings read from the environment.
//!
//! | variable                | default        |
//! |-------------------------|----------------|
//! | `SHOVEL_MAX_STACK_SIZE` | 1 048 576      |
//! | `SHOVEL_MAX_OP_COUNT`   | no limit       |
//! | `SHOVEL_VERBOSITY`      | 0 (1 in debug) |
use std::{str::FromStr, sync::LazyLock};

use tracing::warn;

#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub verbosity: u8,
    pub max_stack_size: usize,
    pub max_op_count: u64,
}

impl RunConfig {
    #[inline]
    pub fn should_log(&self, level: u8) -> bool {
        self.verbosity >= level
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            verbosity: if cfg!(debug_assertions) { 1 } else { 0 },
            max_stack_size: 1 << 20,
            max_op_count: u64::MAX,
        }
    }
}

fn parse_env_opt<T>(key: &str) -> Option<T>
where
    T: FromStr, <T as FromStr>::Err: std::fmt::Display
{
    let val = std::env::var(key).ok()?;
    let val = val.trim();
    if val.is_empty() {
        return None;
    }
    // `_` separators are allowed, e.g. `SHOVEL_MAX_OP_COUNT=10_000_000`.
    match val.replace('_', "").parse::<T>() {
        Ok(v) => Some(v),
        Err(err) => {
            warn!("Ignoring env var {key} with value {val}: {err}");
            None
        }
    }
}

fn parse_env<T>(key: &str, default: T) -> T
where
    T: FromStr, <T as FromStr>::Err: std::fmt::Display
{
    parse_env_opt(key).unwrap_or(default)
}

fn create_config() -> RunConfig {
    let defaults = RunConfig::default();
    RunConfig {
        verbosity: parse_env("SHOVEL_VERBOSITY", defaults.verbosity),
        max_stack_size: parse_env("SHOVEL_MAX_STACK_SIZE", defaults.max_stack_size),
        max_op_count: parse_env("SHOVEL_MAX_OP_COUNT", defaults.max_op_count),
    }
}

static CELL: LazyLock<RunConfig> = LazyLock::new(create_config);

pub fn get_config() -> &'static RunConfig {
    &CELL
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env() {
        std::env::set_var("SHOVEL_TEST_NUMBER", "10_000");
        std::env::set_var("SHOVEL_TEST_GARBAGE", "ten");
        std::env::set_var("SHOVEL_TEST_EMPTY", "");
        assert_eq!(parse_env::<u64>("SHOVEL_TEST_NUMBER", 1), 10_000);
        assert_eq!(parse_env::<u64>("SHOVEL_TEST_GARBAGE", 1), 1);
        assert_eq!(parse_env::<u64>("SHOVEL_TEST_EMPTY", 1), 1);
        assert_eq!(parse_env::<u64>("SHOVEL_TEST_MISSING", 7), 7);
    }

    #[test]
    fn test_should_log() {
        let config = RunConfig { verbosity: 2, ..RunConfig::default() };
        assert!(config.should_log(2));
        assert!(!config.should_log(3));
    }
}
