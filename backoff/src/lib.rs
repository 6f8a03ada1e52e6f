pub mod backoff;
pub mod cli;
pub mod config;
pub mod output;
pub mod util;

pub use crate::backoff::{Backoff, BackoffBuilder, BackoffOption, SleepOutcome};
pub use crate::config::{BackoffConfig, ConfigError};
