/*!
 * Logging functionality for BeamFlow.
 *
 * This module provides tracing setup and span helpers shared by the
 * mediation layer.
 */
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::{Error, Result};

/// Initialize the logging system with default configuration
pub fn init() -> Result<()> {
    init_with_filter("info")
}

/// Initialize the logging system with a specific filter
///
/// `RUST_LOG` takes precedence over `filter` when it is set.
///
/// # Arguments
///
/// * `filter` - The log filter string (e.g., "info", "debug", "beamflow_devices=trace")
pub fn init_with_filter(filter: &str) -> Result<()> {
    install(filter, true)
}

/// Initialize the logging system from the logging section of the configuration
pub fn init_from_config(config: &LoggingConfig) -> Result<()> {
    install(&config.level, config.with_target)
}

fn install(filter: &str, with_target: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(with_target))
        .with(filter)
        .try_init()
        .map_err(|e| Error::runtime(format!("Failed to initialize logging: {}", e)))?;

    Ok(())
}

/// A type alias for a tracing span
pub type Span = tracing::Span;

/// Create a span covering everything done on behalf of one attribute
pub fn attribute_span(attribute: &str) -> Span {
    tracing::info_span!("attribute", name = %attribute)
}

/// Create a span for one operation on an attribute
///
/// # Arguments
///
/// * `name` - The name of the operation (`set`, `notify`, ...)
/// * `attribute` - The attribute the operation acts on
pub fn operation_span(name: &str, attribute: &str) -> Span {
    tracing::info_span!("operation", name = %name, attribute = %attribute)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice_reports_error() {
        // Only the first global subscriber can be installed per process
        let first = init();
        let second = init_from_config(&LoggingConfig::default());
        assert!(first.is_err() || second.is_err());
    }

    #[test]
    fn test_spans_can_be_entered() {
        let span = attribute_span("energy");
        let _entered = span.enter();
        let _op = operation_span("set", "energy").entered();
    }
}
