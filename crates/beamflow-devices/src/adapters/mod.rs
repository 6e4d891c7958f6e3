/*!
 * Attribute adapters, one per role.
 */
mod actuator;
mod energy;
mod resolution;
mod transmission;

use std::sync::Arc;

pub use actuator::{ActuatorAdapter, ActuatorPosition};
pub use energy::EnergyAdapter;
pub use resolution::ResolutionAdapter;
pub use transmission::TransmissionAdapter;

use crate::attribute::{AdapterOptions, AttributeAdapter, Role};
use crate::controller::ControllerHandle;

/// Build the adapter for `role` around `controller`.
///
/// Returns `None` when the controller kind does not serve the role.
pub fn adapter_for(
    role: Role,
    controller: &ControllerHandle,
    options: AdapterOptions,
) -> Option<Arc<dyn AttributeAdapter>> {
    let adapter: Arc<dyn AttributeAdapter> = match (role, controller) {
        (Role::Energy, ControllerHandle::Energy(c)) => Arc::new(EnergyAdapter::new(c.clone(), options)),
        (Role::Transmission, ControllerHandle::Transmission(c)) => {
            Arc::new(TransmissionAdapter::new(c.clone(), options))
        }
        (Role::Resolution, ControllerHandle::Resolution(c)) => {
            Arc::new(ResolutionAdapter::new(c.clone(), options))
        }
        (Role::FastShutter, ControllerHandle::Actuator(c)) => Arc::new(ActuatorAdapter::new(c.clone(), options)),
        _ => return None,
    };
    Some(adapter)
}
