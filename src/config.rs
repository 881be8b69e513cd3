//! Profiler settings read from the environment at attach time.

use std::{env, path::PathBuf, process};

use crate::{guard::GuardMode, state::DEFAULT_SAMPLING_PERIOD};

pub const ENV_SAMPLING_PERIOD: &str = "HEAPSTER_SAMPLING_PERIOD";
pub const ENV_GUARD: &str = "HEAPSTER_GUARD";
pub const ENV_START: &str = "HEAPSTER_START";
pub const ENV_DUMP_PATH: &str = "HEAPSTER_DUMP_PATH";
pub const ENV_DUMP_ON_EXIT: &str = "HEAPSTER_DUMP_ON_EXIT";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub sampling_period: u64,
    pub guard_mode: GuardMode,
    /// Start profiling as soon as the profiler is initialized.
    pub start: bool,
    pub dump_path: PathBuf,
    pub dump_on_exit: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            sampling_period: DEFAULT_SAMPLING_PERIOD,
            guard_mode: GuardMode::default(),
            start: false,
            dump_path: default_dump_path(),
            dump_on_exit: false,
        }
    }
}

impl Config {
    /// Build a config from `HEAPSTER_*` variables.  Unset or unparsable
    /// values fall back to the defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        let sampling_period = lookup(ENV_SAMPLING_PERIOD)
            .and_then(|value| value.trim().parse::<u64>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(defaults.sampling_period);
        let guard_mode = lookup(ENV_GUARD)
            .and_then(|value| parse_guard_mode(&value))
            .unwrap_or(defaults.guard_mode);
        let start = lookup(ENV_START)
            .map(|value| parse_bool(&value))
            .unwrap_or(defaults.start);
        let dump_path = lookup(ENV_DUMP_PATH)
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.dump_path);
        let dump_on_exit = lookup(ENV_DUMP_ON_EXIT)
            .map(|value| parse_bool(&value))
            .unwrap_or(defaults.dump_on_exit);

        Config {
            sampling_period,
            guard_mode,
            start,
            dump_path,
            dump_on_exit,
        }
    }
}

fn default_dump_path() -> PathBuf {
    PathBuf::from(format!("heapster.{}.yaml", process::id()))
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn parse_guard_mode(value: &str) -> Option<GuardMode> {
    match value.trim().to_ascii_lowercase().as_str() {
        "thread" | "per-thread" => Some(GuardMode::PerThread),
        "shared" | "global" => Some(GuardMode::Shared),
        _ => None,
    }
}
