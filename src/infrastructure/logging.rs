//! Logging system configuration and initialization
//!
//! - Console output with local timestamps
//! - Optional daily-rolled log file through a non-blocking writer
//! - Optional JSON formatting for the file layer
//! - `RUST_LOG` overrides the configured level

use anyhow::{Result, anyhow};
use once_cell::sync::OnceCell;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    fmt::{self, time::ChronoLocal},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

pub use crate::infrastructure::config::LoggingConfig;

const LOG_FILE_NAME: &str = "scrape-pipeline.log";

// Keeps the file writer alive for the life of the process
static LOG_GUARD: OnceCell<Option<WorkerGuard>> = OnceCell::new();

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Build the env filter, quieting HTTP internals unless tracing everything
fn build_filter(level: &str) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    let mut filter = EnvFilter::try_new(level)
        .map_err(|e| anyhow!("Invalid log level '{}': {}", level, e))?;
    if !level.eq_ignore_ascii_case("trace") {
        for directive in ["reqwest=info", "hyper=warn", "hyper_util=warn", "h2=warn", "html5ever=warn", "selectors=warn"] {
            filter = filter.add_directive(directive.parse()?);
        }
    }
    Ok(filter)
}

/// Initialize the global subscriber.
///
/// Safe to call more than once; only the first call installs anything.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    if !config.console_output && !config.file_output {
        return Err(anyhow!("No logging output configured"));
    }
    if LOG_GUARD.get().is_some() {
        return Ok(());
    }

    let filter = build_filter(&config.level)?;
    let mut layers: Vec<BoxedLayer> = Vec::new();
    let mut guard = None;

    if config.console_output {
        layers.push(
            fmt::layer()
                .with_writer(std::io::stdout)
                .with_timer(ChronoLocal::rfc_3339())
                .with_target(false)
                .boxed(),
        );
    }

    if config.file_output {
        std::fs::create_dir_all(&config.log_dir).map_err(|e| {
            anyhow!("Failed to create log directory {:?}: {}", config.log_dir, e)
        })?;
        let (writer, file_guard) = non_blocking(rolling::daily(&config.log_dir, LOG_FILE_NAME));
        guard = Some(file_guard);

        let file_layer = fmt::layer()
            .with_writer(writer)
            .with_timer(ChronoLocal::rfc_3339())
            .with_ansi(false);
        layers.push(if config.json_format {
            file_layer
                .json()
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .boxed()
        } else {
            file_layer.with_target(false).boxed()
        });
    }

    // Another subscriber (a test harness, an embedding app) wins silently
    let installed = tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .is_ok();
    let _ = LOG_GUARD.set(guard);

    if installed {
        info!("📝 Logging initialized (level: {}, file: {}, json: {})",
            config.level, config.file_output, config.json_format);
        if config.file_output {
            info!("📁 Log directory: {:?}", config.log_dir);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_logging_config() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, "info");
        assert!(config.console_output);
        assert!(!config.file_output);
    }

    #[test]
    fn filter_rejects_garbage_level() {
        // RUST_LOG takes precedence over the configured level
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        assert!(build_filter("info").is_ok());
        assert!(build_filter("debug,scrape_pipeline=trace").is_ok());
        assert!(build_filter("scrape_pipeline=loud").is_err());
    }

    #[test]
    fn no_outputs_is_an_error() {
        let config = LoggingConfig {
            console_output: false,
            file_output: false,
            ..Default::default()
        };
        assert!(init_logging(&config).is_err());
    }

    #[test]
    fn repeated_init_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoggingConfig {
            console_output: false,
            file_output: true,
            log_dir: dir.path().join("logs"),
            ..Default::default()
        };
        assert!(init_logging(&config).is_ok());
        assert!(init_logging(&config).is_ok());
        assert!(LOG_GUARD.get().is_some());
    }
}
