// Telemetry Module
//
// Console tracing setup for applications embedding a worker host:
// - Configuration from environment variables
// - `tracing-subscriber` initialization with an `EnvFilter`

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Default filter when neither `RUST_LOG` nor `LOG_LEVEL` is set
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Configuration for console tracing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Service name, attached to the startup event
    pub service_name: String,
    /// Log filter (e.g., "info", "debug", "conductor_worker=trace")
    pub log_filter: Option<String>,
    /// Include the event target in every line
    pub with_target: bool,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "conductor-worker".to_string(),
            log_filter: None,
            with_target: true,
            json: false,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `OTEL_SERVICE_NAME`: Service name (default: "conductor-worker")
    /// - `RUST_LOG` or `LOG_LEVEL`: Log filter
    /// - `LOG_FORMAT`: "json" for JSON lines
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            service_name: lookup("OTEL_SERVICE_NAME").unwrap_or(defaults.service_name),
            log_filter: lookup("RUST_LOG").or_else(|| lookup("LOG_LEVEL")),
            with_target: defaults.with_target,
            json: lookup("LOG_FORMAT")
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
        }
    }

    /// Filter to install; invalid directives fall back to [`DEFAULT_LOG_FILTER`]
    pub fn env_filter(&self) -> EnvFilter {
        self.log_filter
            .as_ref()
            .and_then(|f| EnvFilter::try_new(f).ok())
            .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER))
    }
}

/// Install the global tracing subscriber
///
/// Returns `false` when a subscriber was already installed, e.g. by tests or
/// by the embedding application; the existing one is left in place.
///
/// # Example
///
/// ```no_run
/// use conductor_worker::telemetry::{init_telemetry, TelemetryConfig};
///
/// #[tokio::main]
/// async fn main() {
///     init_telemetry(TelemetryConfig::from_env());
///     // ... build and start the worker host
/// }
/// ```
pub fn init_telemetry(config: TelemetryConfig) -> bool {
    let filter = config.env_filter();

    let console_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(config.with_target)
            .with_filter(filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(config.with_target)
            .with_filter(filter)
            .boxed()
    };

    let installed = tracing_subscriber::registry()
        .with(console_layer)
        .try_init()
        .is_ok();

    if installed {
        tracing::debug!(service = %config.service_name, "Telemetry initialized");
    }
    installed
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_rust_log_beats_log_level() {
        let config = TelemetryConfig::from_lookup(lookup_from(&[
            ("RUST_LOG", "conductor_worker=trace"),
            ("LOG_LEVEL", "warn"),
        ]));
        assert_eq!(config.log_filter.as_deref(), Some("conductor_worker=trace"));
        assert_eq!(config.service_name, "conductor-worker");
        assert!(!config.json);
    }

    #[test]
    fn test_log_level_and_format() {
        let config = TelemetryConfig::from_lookup(lookup_from(&[
            ("LOG_LEVEL", "debug"),
            ("LOG_FORMAT", "JSON"),
            ("OTEL_SERVICE_NAME", "media-workers"),
        ]));
        assert_eq!(config.log_filter.as_deref(), Some("debug"));
        assert_eq!(config.service_name, "media-workers");
        assert!(config.json);
    }

    #[test]
    fn test_invalid_filter_falls_back() {
        let config = TelemetryConfig {
            log_filter: Some("conductor_worker=loud".to_string()),
            ..Default::default()
        };
        assert_eq!(config.env_filter().to_string(), DEFAULT_LOG_FILTER);
    }
}
