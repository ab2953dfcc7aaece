// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `evsched`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "evsched",
    version,
    about = "Drive event-processing modules through their lifecycle transitions.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the job description (TOML).
    #[arg(long, value_name = "PATH", default_value = "evsched.toml")]
    pub config: String,

    /// Override `[process].streams`.
    #[arg(long, value_name = "N")]
    pub streams: Option<usize>,

    /// Override `[process].threads` (size of the worker pool).
    #[arg(long, value_name = "N")]
    pub threads: Option<usize>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `EVSCHED_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print module order and capabilities, run nothing.
    #[arg(long)]
    pub dry_run: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_are_optional() {
        let args = CliArgs::parse_from(["evsched"]);
        assert_eq!(args.config, "evsched.toml");
        assert!(args.streams.is_none());
        assert!(!args.dry_run);

        let args = CliArgs::parse_from(["evsched", "--streams", "4", "--log-level", "debug", "--dry-run"]);
        assert_eq!(args.streams, Some(4));
        assert!(matches!(args.log_level, Some(LogLevel::Debug)));
        assert!(args.dry_run);
    }
}
