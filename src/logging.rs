//! Tracing setup for the identification pipeline.
//!
//! Routes to the systemd journal when one is reachable, otherwise to a
//! daily-rolling file. Filtering comes from the `PINAX_LOG` environment
//! variable; without it, pipeline crates log at info while the model
//! runtime and HTTP client are kept at warn.

use std::path::PathBuf;
use std::sync::OnceLock;

use anyhow::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const FILTER_ENV: &str = "PINAX_LOG";
const DEFAULT_DIRECTIVES: &str = "info,ort=warn,ureq=warn";

// The non-blocking writer stops flushing once its guard drops, so the
// guard has to outlive init().
static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Initialize tracing for the whole process. Call once at startup.
///
/// `log_dir` overrides where the file fallback writes; when `None`, logs
/// land under the platform state directory (e.g. `~/.local/state/pinax`).
pub fn init(log_dir: Option<PathBuf>) -> Result<()> {
    let filter = EnvFilter::try_from_env(FILTER_ENV)
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES));

    #[cfg(target_os = "linux")]
    if let Ok(journal) = tracing_journald::layer() {
        tracing_subscriber::registry()
            .with(filter)
            .with(journal)
            .init();

        tracing::info!("Logging to the systemd journal");
        return Ok(());
    }

    let log_dir = log_dir.unwrap_or_else(default_log_dir);
    std::fs::create_dir_all(&log_dir)?;

    let appender = tracing_appender::rolling::daily(&log_dir, "pinax.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let _ = FILE_GUARD.set(guard);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(writer).with_ansi(false))
        .init();

    tracing::info!(dir = %log_dir.display(), "Logging to daily files");
    Ok(())
}

fn default_log_dir() -> PathBuf {
    dirs::state_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pinax")
        .join("logs")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives_parse() {
        assert!(EnvFilter::try_new(DEFAULT_DIRECTIVES).is_ok());
    }

    #[test]
    fn test_default_log_dir_ends_with_crate_path() {
        let dir = default_log_dir();
        assert!(dir.ends_with("pinax/logs"));
    }
}
