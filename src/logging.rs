//! Structured logging utilities for Prescript
//!
//! All logs use structured fields for easy parsing and analysis.
//!
//! # Log Format Conventions
//!
//! - `operation`: The pipeline operation (e.g., "compile", "adapter.generate")
//! - `status`: The result status ("hit", "miss", "stale", "error")
//! - `script_id`: Id of the script being processed
//! - `class_name`: Compiled class name of one script phase
//! - `phase`: "preamble" or "body"
//!
//! # Examples
//!
//! ```rust
//! use tracing::info;
//!
//! info!(
//!     operation = "compile",
//!     status = "hit",
//!     script_id = "my.plugin",
//!     class_name = "precompiled_my_plugin",
//!     "reusing cached script phase"
//! );
//! ```

use std::{fmt as std_fmt, io};
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{
    fmt::{self, format::Writer},
    prelude::*,
    EnvFilter,
};

/// Formatter that shows "prescript" instead of the full module path
struct PrescriptFormatter {
    with_ansi: bool,
}

impl<S, N> FormatEvent<S, N> for PrescriptFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std_fmt::Result {
        let meta = event.metadata();

        write!(
            writer,
            "{} ",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.6fZ")
        )?;

        if self.with_ansi {
            let level_style = match *meta.level() {
                tracing::Level::ERROR => "\x1b[31m", // Red
                tracing::Level::WARN => "\x1b[33m",  // Yellow
                tracing::Level::INFO => "\x1b[32m",  // Green
                tracing::Level::DEBUG => "\x1b[34m", // Blue
                tracing::Level::TRACE => "\x1b[35m", // Magenta
            };
            write!(
                writer,
                "{}{:5}(prescript)\x1b[0m: ",
                level_style,
                meta.level()
            )?;
        } else {
            write!(writer, "{:5}(prescript): ", meta.level())?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

/// Log format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable format (default for development)
    Pretty,
    /// Compact format (for CI)
    Compact,
    /// JSON format (for log aggregation systems)
    Json,
}

impl LogFormat {
    /// Parse from environment variable (PRESCRIPT_LOG_FORMAT)
    pub fn from_env() -> Self {
        Self::parse(
            &std::env::var("PRESCRIPT_LOG_FORMAT").unwrap_or_default(),
            std::env::var("CI").is_ok(),
        )
    }

    fn parse(value: &str, in_ci: bool) -> Self {
        match value.to_lowercase().as_str() {
            "json" => Self::Json,
            "compact" => Self::Compact,
            "pretty" => Self::Pretty,
            _ if in_ci => Self::Compact,
            _ => Self::Pretty,
        }
    }
}

/// Initialize the global tracing subscriber
///
/// # Environment Variables
///
/// - `RUST_LOG`: Set log level (e.g., "debug", "info", "warn"), defaults to "info"
/// - `PRESCRIPT_LOG_FORMAT`: Set format ("pretty", "compact", "json")
/// - `CI`: If set, defaults to compact format
///
/// Logs go to stderr; stdout is reserved for command output. Calling this
/// twice is harmless.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let result = match LogFormat::from_env() {
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .event_format(PrescriptFormatter { with_ansi: true })
                    .with_writer(io::stderr),
            )
            .try_init(),
        LogFormat::Compact => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .event_format(PrescriptFormatter { with_ansi: false })
                    .with_writer(io::stderr),
            )
            .try_init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_file(false)
                    .with_line_number(false)
                    .with_ansi(false)
                    .with_writer(io::stderr)
                    .json(),
            )
            .try_init(),
    };

    if let Err(e) = result {
        tracing::debug!("tracing subscriber already initialized: {}", e);
    }
}

/// Standard field names for consistent logging
#[allow(dead_code)]
pub mod fields {
    /// Operation name (e.g., "compile", "apply")
    pub const OPERATION: &str = "operation";
    /// Status (e.g., "hit", "miss", "error")
    pub const STATUS: &str = "status";
    pub const SCRIPT_ID: &str = "script_id";
    pub const CLASS_NAME: &str = "class_name";
    pub const PHASE: &str = "phase";
    /// Scope path, root first
    pub const SCOPE: &str = "scope";
    pub const PLUGIN_ID: &str = "plugin_id";
    /// Number of scripts (for batch operations)
    pub const SCRIPT_COUNT: &str = "script_count";
    pub const SUCCESS_COUNT: &str = "success_count";
    pub const ERROR_COUNT: &str = "error_count";
}

/// Operation names for consistent logging
pub mod operations {
    pub const COMPILE: &str = "compile";
    pub const BATCH: &str = "batch";
    pub const PACKAGE: &str = "package";
    pub const ADAPTER_GENERATE: &str = "adapter.generate";
    pub const ADAPTER_APPLY: &str = "adapter.apply";
    pub const RUN: &str = "run";
    pub const PLUGIN_APPLY: &str = "plugin.apply";
}

/// Status values for consistent logging
#[allow(dead_code)]
pub mod status {
    pub const SUCCESS: &str = "success";
    pub const HIT: &str = "hit";
    pub const MISS: &str = "miss";
    pub const STALE: &str = "stale";
    pub const SKIPPED: &str = "skipped";
    pub const ERROR: &str = "error";
}
