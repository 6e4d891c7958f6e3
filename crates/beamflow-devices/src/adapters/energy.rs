/*!
 * Energy attribute adapter.
 */
use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, Instrument};

use beamflow_core::logging::operation_span;
use beamflow_core::types::Value;

use crate::attribute::{
    coerce_requested, read_numeric, run_move, AdapterOptions, AttributeAdapter, AttributeError,
    AttributeState, Limits, Result, Role,
};
use crate::controller::{ControllerResult, EnergyController, HandlerId, SignalHandler};

/// Beam energy in keV, rounded to 4 decimals.
///
/// The only adapter that reports `BUSY` while the controller moves and
/// `ABORTED` after an interrupted move.
#[derive(Debug)]
pub struct EnergyAdapter {
    controller: Arc<dyn EnergyController>,
    options: AdapterOptions,
}

impl EnergyAdapter {
    /// Wrap an energy controller
    pub fn new(controller: Arc<dyn EnergyController>, options: AdapterOptions) -> Self {
        Self { controller, options }
    }

    /// The wrapped controller
    pub fn controller(&self) -> &Arc<dyn EnergyController> {
        &self.controller
    }
}

#[async_trait]
impl AttributeAdapter for EnergyAdapter {
    fn role(&self) -> Role {
        Role::Energy
    }

    fn options(&self) -> &AdapterOptions {
        &self.options
    }

    async fn get(&self) -> Result<Value> {
        read_numeric(Role::Energy, &self.options, self.controller.current_energy().await)
    }

    async fn set(&self, requested: Value) -> Result<Value> {
        let span = operation_span("set", Role::Energy.as_str());
        async move {
            let limits = self.limits().await;
            let target = coerce_requested(Role::Energy, &limits, &requested)?;

            debug!(target, "Moving energy");
            run_move(
                Role::Energy,
                &self.options,
                &requested,
                self.controller.start_move_energy(target),
            )
            .await?;

            if self.controller.is_aborted() {
                return Err(AttributeError::Interrupted {
                    attribute: Role::Energy.as_str().to_string(),
                    requested,
                });
            }

            self.get().await
        }
        .instrument(span)
        .await
    }

    async fn state(&self) -> AttributeState {
        if self.controller.is_aborted() {
            AttributeState::Aborted
        } else if self.controller.is_moving() {
            AttributeState::Busy
        } else {
            AttributeState::Idle
        }
    }

    async fn limits(&self) -> Limits {
        self.controller.limits().await.unwrap_or(self.options.limits)
    }

    fn connect_device(&self, handler: SignalHandler) -> ControllerResult<HandlerId> {
        self.controller.connect(Role::Energy.change_signal(), handler)
    }

    fn disconnect_device(&self, id: HandlerId) -> bool {
        self.controller.disconnect(id)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
