// Observability Module
// Logging bootstrap and traced-operation helpers

use std::fmt::Display;
use std::future::Future;
use std::time::Instant;

use anyhow::Result;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

/// Default filter for a configured level: `level` for this crate, warnings
/// and errors for dependencies.
fn default_filter(level: &str) -> EnvFilter {
    let level = match level.to_ascii_lowercase().as_str() {
        // Accepted for compatibility with the LOG_LEVEL values of older deployments.
        "fatal" => "error".to_string(),
        other => other.to_string(),
    };
    EnvFilter::try_new(format!("shopmcp={level},tower_http={level},warn"))
        .unwrap_or_else(|_| EnvFilter::new("shopmcp=info,warn"))
}

/// Initialize logging with the configured level and CLI verbosity flags.
///
/// `--quiet` always wins and forces error-only output. Otherwise `RUST_LOG`
/// overrides both `--verbose` and the configured level.
pub fn init_logging_with_level(level: &str, verbose: bool, quiet: bool) -> Result<()> {
    let env_filter = if quiet {
        EnvFilter::new("error")
    } else if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(level))
    } else if verbose {
        default_filter("debug")
    } else {
        default_filter(level)
    };

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(!quiet)
        .with_thread_ids(!quiet)
        .with_line_number(!quiet)
        .with_file(!quiet);

    match tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
    {
        Ok(()) => {
            if !quiet {
                info!("shopmcp observability initialized");
            }
            Ok(())
        }
        // Already initialized, which is fine in test environments
        Err(_) => Ok(()),
    }
}

/// Run `f` under a fresh trace id, logging start, outcome and elapsed time.
pub async fn with_trace_id<F, T, E>(operation: &str, f: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: Display,
{
    let trace_id = Uuid::new_v4();
    info!(trace_id = %trace_id, operation, "operation started");

    let start = Instant::now();
    let result = f.await;
    let elapsed_ms = start.elapsed().as_millis() as u64;

    match &result {
        Ok(_) => info!(trace_id = %trace_id, operation, elapsed_ms, "operation completed"),
        Err(e) => error!(
            trace_id = %trace_id,
            operation,
            elapsed_ms,
            error = %e,
            "operation failed"
        ),
    }

    result
}
