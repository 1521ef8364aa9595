//! Subscriber setup for hosts and test binaries.

use tracing::Level;
use tracing_subscriber::{
    fmt::{self, writer::BoxMakeWriter, TestWriter},
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
    EnvFilter,
};

/// Log line layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-field lines with targets.
    #[default]
    Full,
    /// One short line per event.
    Compact,
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Level used when neither `filter` nor `RUST_LOG` is set.
    pub level: Level,
    pub format: LogFormat,
    /// Directives such as `offkit_sw=trace`; takes precedence over `RUST_LOG`.
    pub filter: Option<String>,
    /// Write through libtest's capture instead of stdout.
    pub test_writer: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Full,
            filter: None,
            test_writer: false,
        }
    }
}

impl LogConfig {
    /// Compact, captured output for test runs.
    pub fn test() -> Self {
        Self {
            level: Level::DEBUG,
            format: LogFormat::Compact,
            test_writer: true,
            ..Default::default()
        }
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    fn env_filter(&self) -> EnvFilter {
        let fallback = || EnvFilter::new(self.level.to_string());
        match self.filter {
            Some(ref custom) => EnvFilter::try_new(custom).unwrap_or_else(|_| fallback()),
            None => EnvFilter::try_from_default_env().unwrap_or_else(|_| fallback()),
        }
    }

    fn writer(&self) -> BoxMakeWriter {
        if self.test_writer {
            BoxMakeWriter::new(TestWriter::new())
        } else {
            BoxMakeWriter::new(std::io::stdout)
        }
    }
}

/// Install a global subscriber for the given configuration.
///
/// Fails if a global subscriber is already set, which lets test binaries
/// call this from every test and ignore the error.
pub fn init_logging(config: LogConfig) -> Result<(), TryInitError> {
    let layer = fmt::layer().with_target(true).with_writer(config.writer());
    let registry = tracing_subscriber::registry().with(config.env_filter());

    match config.format {
        LogFormat::Full => registry.with(layer).try_init(),
        LogFormat::Compact => registry.with(layer.compact()).try_init(),
    }
}
