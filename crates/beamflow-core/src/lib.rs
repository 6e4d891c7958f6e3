/*!
 * BeamFlow Core
 *
 * This crate provides the foundation shared by the BeamFlow mediation layer:
 * the dynamic value type, the namespaced event bus, configuration, logging
 * and async helpers.
 */

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod event;
pub mod logging;
pub mod prelude;
pub mod types;
pub mod utils;

pub use error::{Error, Result};

/// Re-export of dependencies that are part of the public API
pub mod deps {
    pub use anyhow;
    pub use chrono;
    pub use futures;
    pub use serde;
    pub use tokio;
    pub use tracing;
}

/// BeamFlow core crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library initialization
pub fn init() -> Result<()> {
    logging::init()?;
    tracing::info!("BeamFlow Core {} initialized", VERSION);
    Ok(())
}

/// Library initialization from a loaded configuration
pub fn init_with_config(config: &config::Config) -> Result<()> {
    logging::init_from_config(&config.logging)?;
    tracing::info!(
        app = %config.general.app_name,
        environment = %config.general.environment,
        "BeamFlow Core {} initialized",
        VERSION
    );
    Ok(())
}
