//! Command-line arguments.

use clap::{Parser, ValueEnum};

/// Output format for structured logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum TracingFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "eduinsights", about = "Result-portal extraction engine")]
pub struct Args {
    /// Path to a TOML config file, merged under environment variables.
    #[arg(long, env = "CONFIG_PATH", default_value = "EduInsights.toml")]
    pub config: String,

    /// Log output format.
    #[arg(long, value_enum, default_value_t = TracingFormat::Pretty)]
    pub tracing: TracingFormat,
}
