//! Hallador CLI library
//!
//! Command-line front end for the hallar element locator: locate or verify
//! elements on the live desktop or a saved screenshot, inspect statistics
//! files and gate runs on the fallback admission policy.

#![warn(missing_docs)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

mod commands;
mod error;
pub mod handlers;
pub mod logging;
mod output;

pub use commands::{
    AnchorArg, ClickArg, Cli, Commands, ConfigArgs, ConfigSubcommand, HealthArgs, LocateArgs,
    SessionArgs, StatsArgs, StatsSubcommand, StrategyArg, TargetArgs, VerifyArgs,
};
pub use error::{CliError, CliResult};
pub use output::{render_stats, render_violations, Printer};
