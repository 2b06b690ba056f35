//! Tracing setup and configuration.

use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::MetricsError;

/// Tracing configuration.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Log level.
    pub level: Level,

    /// Log format.
    pub format: LogFormat,

    /// Enable span events.
    pub span_events: bool,

    /// Colored output.
    pub ansi: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Compact,
            span_events: false,
            ansi: true,
        }
    }
}

impl TracingConfig {
    /// Build from level and format names, as found in configuration files.
    pub fn from_names(level: &str, format: &str) -> Result<Self, MetricsError> {
        let level = level
            .parse::<Level>()
            .map_err(|_| MetricsError::InvalidLevel(level.to_string()))?;

        Ok(Self {
            level,
            format: format.parse()?,
            ..Default::default()
        })
    }
}

/// Log format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable format.
    Pretty,

    /// Compact format.
    Compact,

    /// JSON format.
    Json,
}

impl FromStr for LogFormat {
    type Err = MetricsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            other => Err(MetricsError::InvalidFormat(other.to_string())),
        }
    }
}

/// Initialize tracing. Log lines go to stderr so stdout stays free for reports.
pub fn init_tracing(config: TracingConfig) -> Result<(), MetricsError> {
    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.to_string()));

    let span_events = if config.span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    match config.format {
        LogFormat::Json => {
            let subscriber = tracing_subscriber::registry().with(filter).with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_span_events(span_events)
                    .with_target(true)
                    .with_current_span(true),
            );

            subscriber
                .try_init()
                .map_err(|e| MetricsError::TracingError(e.to_string()))?;
        }
        LogFormat::Compact => {
            let subscriber = tracing_subscriber::registry().with(filter).with(
                fmt::layer()
                    .compact()
                    .with_writer(std::io::stderr)
                    .with_ansi(config.ansi)
                    .with_span_events(span_events)
                    .with_target(false),
            );

            subscriber
                .try_init()
                .map_err(|e| MetricsError::TracingError(e.to_string()))?;
        }
        LogFormat::Pretty => {
            let subscriber = tracing_subscriber::registry().with(filter).with(
                fmt::layer()
                    .pretty()
                    .with_writer(std::io::stderr)
                    .with_ansi(config.ansi)
                    .with_span_events(span_events)
                    .with_target(true),
            );

            subscriber
                .try_init()
                .map_err(|e| MetricsError::TracingError(e.to_string()))?;
        }
    }

    Ok(())
}

/// Create a span for one pipeline stage.
#[macro_export]
macro_rules! stage_span {
    ($stage:expr) => {
        tracing::info_span!("stage", name = %$stage.action())
    };
    ($stage:expr, $model:expr) => {
        tracing::info_span!("stage", name = %$stage.action(), model = %$model)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parsing() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("compact".parse::<LogFormat>().unwrap(), LogFormat::Compact);
        assert_eq!("pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_config_from_names() {
        let config = TracingConfig::from_names("debug", "json").unwrap();
        assert_eq!(config.level, Level::DEBUG);
        assert_eq!(config.format, LogFormat::Json);

        assert!(matches!(
            TracingConfig::from_names("loud", "json"),
            Err(MetricsError::InvalidLevel(_))
        ));
    }
}
