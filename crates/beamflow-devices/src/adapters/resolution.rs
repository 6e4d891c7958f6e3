/*!
 * Resolution attribute adapter.
 */
use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, Instrument};

use beamflow_core::logging::operation_span;
use beamflow_core::types::Value;

use crate::attribute::{
    coerce_requested, read_numeric, run_move, AdapterOptions, AttributeAdapter, Limits, Result,
    Role,
};
use crate::controller::{ControllerResult, HandlerId, ResolutionController, SignalHandler};

/// Resolution in Å, rounded to 3 decimals
#[derive(Debug)]
pub struct ResolutionAdapter {
    controller: Arc<dyn ResolutionController>,
    options: AdapterOptions,
}

impl ResolutionAdapter {
    /// Wrap a resolution controller
    pub fn new(controller: Arc<dyn ResolutionController>, options: AdapterOptions) -> Self {
        Self { controller, options }
    }

    /// The wrapped controller
    pub fn controller(&self) -> &Arc<dyn ResolutionController> {
        &self.controller
    }
}

#[async_trait]
impl AttributeAdapter for ResolutionAdapter {
    fn role(&self) -> Role {
        Role::Resolution
    }

    fn options(&self) -> &AdapterOptions {
        &self.options
    }

    async fn get(&self) -> Result<Value> {
        read_numeric(Role::Resolution, &self.options, self.controller.position().await)
    }

    async fn set(&self, requested: Value) -> Result<Value> {
        let span = operation_span("set", Role::Resolution.as_str());
        async move {
            let limits = self.limits().await;
            let target = coerce_requested(Role::Resolution, &limits, &requested)?;

            debug!(target, "Moving to new resolution");
            run_move(
                Role::Resolution,
                &self.options,
                &requested,
                self.controller.new_resolution(target),
            )
            .await?;

            self.get().await
        }
        .instrument(span)
        .await
    }

    async fn limits(&self) -> Limits {
        self.controller.limits().await.unwrap_or(self.options.limits)
    }

    fn connect_device(&self, handler: SignalHandler) -> ControllerResult<HandlerId> {
        self.controller.connect(Role::Resolution.change_signal(), handler)
    }

    fn disconnect_device(&self, id: HandlerId) -> bool {
        self.controller.disconnect(id)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
