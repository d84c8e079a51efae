//! Subscriber setup for the `sysdump` binary.
//!
//! The library only emits `tracing` events; installing a subscriber is left
//! to whoever embeds it.  Filtering follows `SYSDUMP_LOG` (an `EnvFilter`
//! directive such as `sysdump=debug`), falling back to `info`, or `debug`
//! with `--verbose`.  Output goes to stderr so report text on stdout stays
//! clean.

use std::io;

use clap::ValueEnum;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
    EnvFilter,
};

pub const LOG_ENV: &str = "SYSDUMP_LOG";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

fn filter(verbose: bool) -> EnvFilter {
    let fallback = if verbose { "debug" } else { "info" };
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(fallback))
}

/// Install the global subscriber.  Fails if one is already installed.
pub fn init_logging(verbose: bool, format: LogFormat) -> Result<(), TryInitError> {
    let registry = tracing_subscriber::registry().with(filter(verbose));
    match format {
        LogFormat::Compact => registry
            .with(
                fmt::layer()
                    .compact()
                    .with_writer(io::stderr)
                    .with_target(verbose)
                    .with_thread_names(verbose),
            )
            .try_init(),
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_writer(io::stderr)
                    .with_thread_names(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .flatten_event(true),
            )
            .try_init(),
    }
}
