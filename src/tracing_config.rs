//! Tracing subscriber setup for the server binary
//!
//! The library only emits events (`tracing` in the HTTP layer, `log` in the
//! inference pipeline). The binary installs the subscriber configured here,
//! which also receives `log` records.

use std::path::PathBuf;
use tracing_subscriber::layer::{Layered, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

/// Output format of log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TracingFormat {
    /// Human-readable output with colors (default)
    Console,
    /// Plain compact output for CI and containers
    Compact,
    /// JSON structured logging for production environments
    #[cfg(feature = "tracing-json")]
    Json,
}

impl std::str::FromStr for TracingFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "console" | "pretty" => Ok(Self::Console),
            "compact" | "plain" => Ok(Self::Compact),
            #[cfg(feature = "tracing-json")]
            "json" => Ok(Self::Json),
            other => Err(format!("Unsupported log format: {other}")),
        }
    }
}

/// Where log lines go
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TracingOutput {
    /// Standard output (default)
    Console,
    /// Daily-rotated file only
    #[cfg(feature = "tracing-files")]
    File(PathBuf),
    /// Console plus daily-rotated file
    #[cfg(feature = "tracing-files")]
    Both(PathBuf),
}

/// Keeps the background file writer alive; drop it on shutdown to flush
#[derive(Debug, Default)]
#[must_use = "dropping the guard stops file logging"]
pub struct TracingGuard {
    #[cfg(feature = "tracing-files")]
    _file_writer: Option<tracing_appender::non_blocking::WorkerGuard>,
}

/// Tracing configuration builder
#[derive(Debug)]
pub struct TracingConfig {
    /// Verbosity level (maps to log levels)
    pub verbosity: u8,
    pub format: TracingFormat,
    pub output: TracingOutput,
    /// Explicit filter directives (overrides verbosity if set)
    pub env_filter: Option<String>,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            verbosity: 0,
            format: TracingFormat::Console,
            output: TracingOutput::Console,
            env_filter: None,
        }
    }
}

type FilteredRegistry = Layered<EnvFilter, Registry>;
type BoxedLayer = Box<dyn Layer<FilteredRegistry> + Send + Sync>;

impl TracingConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    #[must_use]
    pub fn with_format(mut self, format: TracingFormat) -> Self {
        self.format = format;
        self
    }

    #[must_use]
    pub fn with_output(mut self, output: TracingOutput) -> Self {
        self.output = output;
        self
    }

    #[must_use]
    pub fn with_env_filter<S: Into<String>>(mut self, filter: S) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    /// Convert verbosity level to tracing filter string
    #[must_use]
    pub fn verbosity_to_filter(&self) -> &'static str {
        match self.verbosity {
            0 => "info",  // Default: startup, requests, failures
            1 => "debug", // -v: timings and model details
            _ => "trace", // -vv and above
        }
    }

    /// Install the global subscriber
    ///
    /// # Errors
    /// - Invalid filter directives
    /// - A global subscriber is already installed
    pub fn init(self) -> anyhow::Result<TracingGuard> {
        let filter = match &self.env_filter {
            Some(directives) => EnvFilter::try_new(directives)?,
            None => EnvFilter::try_new(self.verbosity_to_filter())?,
        };

        let mut layers: Vec<BoxedLayer> = Vec::new();
        #[allow(unused_mut)]
        let mut guard = TracingGuard::default();

        match &self.output {
            TracingOutput::Console => layers.push(console_layer(self.format)),
            #[cfg(feature = "tracing-files")]
            TracingOutput::File(path) => {
                let (layer, worker) = file_layer(self.format, path);
                layers.push(layer);
                guard._file_writer = Some(worker);
            },
            #[cfg(feature = "tracing-files")]
            TracingOutput::Both(path) => {
                layers.push(console_layer(self.format));
                let (layer, worker) = file_layer(self.format, path);
                layers.push(layer);
                guard._file_writer = Some(worker);
            },
        }

        Registry::default().with(filter).with(layers).try_init()?;
        Ok(guard)
    }
}

fn console_layer(format: TracingFormat) -> BoxedLayer {
    match format {
        TracingFormat::Console => fmt::layer()
            .with_ansi(true)
            .with_target(false)
            .compact()
            .boxed(),
        TracingFormat::Compact => fmt::layer()
            .with_ansi(false)
            .with_target(false)
            .compact()
            .boxed(),
        #[cfg(feature = "tracing-json")]
        TracingFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .boxed(),
    }
}

#[cfg(feature = "tracing-files")]
fn file_layer(
    format: TracingFormat,
    path: &std::path::Path,
) -> (BoxedLayer, tracing_appender::non_blocking::WorkerGuard) {
    use tracing_appender::{non_blocking, rolling};

    let file_appender = rolling::daily(
        path.parent().unwrap_or_else(|| std::path::Path::new(".")),
        path.file_name()
            .unwrap_or_else(|| std::ffi::OsStr::new("bg-remover-api.log")),
    );
    let (writer, worker) = non_blocking(file_appender);

    let layer = match format {
        TracingFormat::Console | TracingFormat::Compact => fmt::layer()
            .with_ansi(false)
            .with_writer(writer)
            .compact()
            .boxed(),
        #[cfg(feature = "tracing-json")]
        TracingFormat::Json => fmt::layer()
            .json()
            .with_writer(writer)
            .with_current_span(true)
            .with_span_list(true)
            .boxed(),
    };
    (layer, worker)
}

/// Output choice for an optional log file path
#[must_use]
pub fn output_for(log_file: Option<PathBuf>) -> TracingOutput {
    match log_file {
        #[cfg(feature = "tracing-files")]
        Some(path) => TracingOutput::Both(path),
        #[cfg(not(feature = "tracing-files"))]
        Some(path) => {
            eprintln!(
                "Ignoring log file {}: built without the tracing-files feature",
                path.display()
            );
            TracingOutput::Console
        },
        None => TracingOutput::Console,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_mapping() {
        assert_eq!(TracingConfig::new().with_verbosity(0).verbosity_to_filter(), "info");
        assert_eq!(TracingConfig::new().with_verbosity(1).verbosity_to_filter(), "debug");
        assert_eq!(TracingConfig::new().with_verbosity(2).verbosity_to_filter(), "trace");
        assert_eq!(TracingConfig::new().with_verbosity(10).verbosity_to_filter(), "trace");
    }

    #[test]
    fn test_config_builder() {
        let config = TracingConfig::new()
            .with_verbosity(2)
            .with_format(TracingFormat::Compact)
            .with_env_filter("bg_remover_api=debug");

        assert_eq!(config.verbosity, 2);
        assert_eq!(config.format, TracingFormat::Compact);
        assert_eq!(config.env_filter.as_deref(), Some("bg_remover_api=debug"));
    }

    #[test]
    fn test_default_config() {
        let config = TracingConfig::default();
        assert_eq!(config.verbosity, 0);
        assert_eq!(config.format, TracingFormat::Console);
        assert_eq!(config.output, TracingOutput::Console);
        assert!(config.env_filter.is_none());
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("console".parse::<TracingFormat>(), Ok(TracingFormat::Console));
        assert_eq!("Compact".parse::<TracingFormat>(), Ok(TracingFormat::Compact));
        assert!("yaml".parse::<TracingFormat>().is_err());
    }

    #[test]
    fn test_output_without_file() {
        assert_eq!(output_for(None), TracingOutput::Console);
    }
}
