/*!
 * BeamFlow Devices
 *
 * Beamline attribute mediation: controller capability traits, the uniform
 * attribute contract and its four adapters, the change-notification bridge,
 * and the registry that resolves roles to attributes.
 */

#![warn(missing_docs)]

// Re-export core types
pub use beamflow_core::prelude;

pub mod adapters;
pub mod attribute;
pub mod bridge;
pub mod controller;
pub mod devices;
pub mod registry;

pub use adapters::{ActuatorAdapter, ActuatorPosition, EnergyAdapter, ResolutionAdapter, TransmissionAdapter};
pub use attribute::{
    AdapterOptions, Attribute, AttributeAdapter, AttributeError, AttributeState, Limits, Role,
};
pub use bridge::{Bridge, ChangeNotification, NotificationBus, NotificationSink};
pub use controller::{
    ActuatorController, ControllerError, ControllerHandle, EnergyController, HandlerId,
    ResolutionController, SignalEmitter, SignalHandler, SignalHub, TransmissionController,
};
pub use registry::{BeamlineRegistry, RegistryEvent, Resolved};

/// BeamFlow devices crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the device layer
pub fn init() -> Result<(), beamflow_core::Error> {
    tracing::info!("BeamFlow Devices {} initialized", VERSION);
    Ok(())
}
