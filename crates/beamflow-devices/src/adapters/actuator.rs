/*!
 * Two-position actuator adapter (fast shutter).
 *
 * The attribute value is `true` when the actuator is in. Writing toggles the
 * actuator: the requested value is not inspected, a caller that needs an
 * explicit target uses [`ActuatorAdapter::set_target`].
 */
use std::any::Any;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, Instrument};

use beamflow_core::logging::operation_span;
use beamflow_core::types::Value;

use crate::attribute::{
    apply_policy, run_move, AdapterOptions, AttributeAdapter, AttributeError, Result, Role,
};
use crate::bridge::ChangeNotification;
use crate::controller::{ActuatorController, ControllerResult, HandlerId, SignalHandler};

/// Reported actuator position
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActuatorPosition {
    /// In the beam
    In,
    /// Out of the beam
    Out,
    /// Moving, unknown, or anything else the controller reports
    Other(String),
}

impl ActuatorPosition {
    /// Interpret a controller state string
    pub fn parse(state: &str) -> Self {
        match state {
            "in" => ActuatorPosition::In,
            "out" => ActuatorPosition::Out,
            other => ActuatorPosition::Other(other.to_string()),
        }
    }

    /// Whether the actuator is in
    pub fn is_in(&self) -> bool {
        matches!(self, ActuatorPosition::In)
    }

    /// Controller representation
    pub fn as_str(&self) -> &str {
        match self {
            ActuatorPosition::In => "in",
            ActuatorPosition::Out => "out",
            ActuatorPosition::Other(state) => state,
        }
    }
}

impl fmt::Display for ActuatorPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fast shutter as a boolean attribute
#[derive(Debug)]
pub struct ActuatorAdapter {
    controller: Arc<dyn ActuatorController>,
    options: AdapterOptions,
}

impl ActuatorAdapter {
    /// Wrap an actuator controller
    pub fn new(controller: Arc<dyn ActuatorController>, options: AdapterOptions) -> Self {
        Self { controller, options }
    }

    /// The wrapped controller
    pub fn controller(&self) -> &Arc<dyn ActuatorController> {
        &self.controller
    }

    /// Position as read from hardware
    pub async fn position(&self) -> Result<ActuatorPosition> {
        self.controller
            .actuator_state(true)
            .await
            .map(|state| ActuatorPosition::parse(&state))
            .map_err(|e| AttributeError::ValueUnavailable {
                attribute: Role::FastShutter.as_str().to_string(),
                reason: e.to_string(),
            })
    }

    /// Drive the actuator to an explicit position, then read it back.
    ///
    /// No command is sent when the actuator already is in that position.
    pub async fn set_target(&self, inserted: bool) -> Result<Value> {
        let span = operation_span("set_target", Role::FastShutter.as_str());
        async move {
            if self.position().await?.is_in() == inserted {
                debug!(inserted, "Actuator already in position");
            } else {
                self.command(inserted).await?;
            }
            self.get().await
        }
        .instrument(span)
        .await
    }

    async fn command(&self, inserted: bool) -> Result<()> {
        let requested = Value::Bool(inserted);
        if inserted {
            debug!("Moving actuator in");
            run_move(Role::FastShutter, &self.options, &requested, self.controller.actuator_in(false)).await
        } else {
            debug!("Moving actuator out");
            run_move(Role::FastShutter, &self.options, &requested, self.controller.actuator_out(false)).await
        }
    }
}

#[async_trait]
impl AttributeAdapter for ActuatorAdapter {
    fn role(&self) -> Role {
        Role::FastShutter
    }

    fn options(&self) -> &AdapterOptions {
        &self.options
    }

    async fn get(&self) -> Result<Value> {
        let outcome = self.position().await.map(|position| Value::Bool(position.is_in()));
        apply_policy(Role::FastShutter, &self.options, outcome, Value::Bool(false))
    }

    /// Toggle. Anything but a confirmed `in` position is treated as out.
    async fn set(&self, _requested: Value) -> Result<Value> {
        let span = operation_span("set", Role::FastShutter.as_str());
        async move {
            let inserted = self.position().await?.is_in();
            self.command(!inserted).await?;
            self.get().await
        }
        .instrument(span)
        .await
    }

    async fn message(&self) -> String {
        match self.position().await {
            Ok(position) => position.to_string(),
            Err(e) => e.to_string(),
        }
    }

    fn connect_device(&self, handler: SignalHandler) -> ControllerResult<HandlerId> {
        self.controller.connect(Role::FastShutter.change_signal(), handler)
    }

    fn disconnect_device(&self, id: HandlerId) -> bool {
        self.controller.disconnect(id)
    }

    async fn on_device_event(&self, _args: &[Value]) -> ChangeNotification {
        ChangeNotification::from_attribute(self.describe().await, true)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
