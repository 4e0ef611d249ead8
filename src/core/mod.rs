//! Core infrastructure for redgreen.
//!
//! Configuration loading and shell command execution, shared by the
//! workflow engine and the CLI.

mod config;
mod executor;

pub use config::{CheckConfig, Config, GateConfig, GeneralConfig, CONFIG_ENV, STATE_DIR_ENV};
pub use executor::{ExecutionResult, Executor};
