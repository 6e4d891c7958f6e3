/*!
 * Prelude module for BeamFlow Core.
 *
 * This module re-exports commonly used types and functions from the BeamFlow Core crate
 * to make them easier to import.
 */

// Re-export error types
pub use crate::error::{Error, Result};

// Re-export core types
pub use crate::types::Value;

// Re-export event types
pub use crate::event::{EventBus, EventReceiver, SharedEventBus};

// Re-export config types
pub use crate::config::{Config, ConfigBuilder, GetFailurePolicy, SharedConfig};

// Re-export utility functions
pub use crate::utils::{duration_to_millis, millis_to_duration, spawn_and_log, with_deadline};

// Re-export logging helpers
pub use crate::logging::{attribute_span, operation_span};
pub use tracing::{debug, error, info, trace, warn};

// Re-export core initialization
pub use crate::init;
