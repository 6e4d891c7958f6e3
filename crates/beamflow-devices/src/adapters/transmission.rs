/*!
 * Transmission attribute adapter.
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
use crate::controller::{ControllerResult, HandlerId, SignalHandler, TransmissionController};

/// Beam transmission in %, rounded to 2 decimals
#[derive(Debug)]
pub struct TransmissionAdapter {
    controller: Arc<dyn TransmissionController>,
    options: AdapterOptions,
}

impl TransmissionAdapter {
    /// Wrap an attenuator controller
    pub fn new(controller: Arc<dyn TransmissionController>, options: AdapterOptions) -> Self {
        Self { controller, options }
    }

    /// The wrapped controller
    pub fn controller(&self) -> &Arc<dyn TransmissionController> {
        &self.controller
    }
}

#[async_trait]
impl AttributeAdapter for TransmissionAdapter {
    fn role(&self) -> Role {
        Role::Transmission
    }

    fn options(&self) -> &AdapterOptions {
        &self.options
    }

    async fn get(&self) -> Result<Value> {
        read_numeric(Role::Transmission, &self.options, self.controller.att_factor().await)
    }

    async fn set(&self, requested: Value) -> Result<Value> {
        let span = operation_span("set", Role::Transmission.as_str());
        async move {
            let limits = self.limits().await;
            let target = coerce_requested(Role::Transmission, &limits, &requested)?;

            debug!(target, "Setting transmission");
            run_move(
                Role::Transmission,
                &self.options,
                &requested,
                self.controller.set_value(target, true),
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
        self.controller.connect(Role::Transmission.change_signal(), handler)
    }

    fn disconnect_device(&self, id: HandlerId) -> bool {
        self.controller.disconnect(id)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::{AttributeError, AttributeState};
    use crate::controller::ControllerError;
    use crate::devices::{MoveFault, SimulatedAttenuator};
    use beamflow_core::config::GetFailurePolicy;

    fn adapter(sim: &Arc<SimulatedAttenuator>) -> TransmissionAdapter {
        TransmissionAdapter::new(sim.clone(), AdapterOptions::defaults(Role::Transmission))
    }

    #[tokio::test]
    async fn test_get_rounds_to_two_decimals() {
        let sim = Arc::new(SimulatedAttenuator::new(45.678));
        assert_eq!(adapter(&sim).get().await.unwrap(), Value::Float(45.68));
    }

    #[tokio::test]
    async fn test_unreadable_transmission_is_reported() {
        let sim = Arc::new(SimulatedAttenuator::new(45.0));
        sim.set_raw_reading(Value::from("filters moving"));

        let adapter = adapter(&sim);
        assert!(matches!(adapter.get().await, Err(AttributeError::ValueUnavailable { .. })));

        let described = adapter.describe().await;
        assert_eq!(described.value, Value::Null);
        assert!(described.message.contains("transmission"));
        assert_eq!(described.state, AttributeState::Idle);
    }

    #[tokio::test]
    async fn test_zero_default_is_opt_in() {
        let sim = Arc::new(SimulatedAttenuator::new(45.0));
        sim.set_raw_reading(Value::Null);
        let options = AdapterOptions {
            policy: GetFailurePolicy::DefaultZero,
            ..AdapterOptions::defaults(Role::Transmission)
        };

        let adapter = TransmissionAdapter::new(sim.clone(), options);
        assert_eq!(adapter.get().await.unwrap(), Value::Float(0.0));
        assert_eq!(adapter.describe().await.message, "");
    }

    #[tokio::test]
    async fn test_set_returns_device_value_not_request() {
        let sim = Arc::new(SimulatedAttenuator::new(100.0));
        let adapter = adapter(&sim);

        // The attenuator cannot transmit more than 100 %
        assert_eq!(adapter.set(Value::from(250)).await.unwrap(), Value::Float(100.0));
        assert_eq!(adapter.set(Value::from(12.3456)).await.unwrap(), Value::Float(12.35));
        assert_eq!(sim.move_count(), 2);
    }

    #[tokio::test]
    async fn test_set_failure_is_wrapped() {
        let sim = Arc::new(SimulatedAttenuator::new(100.0));
        sim.faults().fail_next_move(MoveFault::Reject("filter jammed".to_string()));

        let err = adapter(&sim).set(Value::from(50)).await.unwrap_err();
        assert!(matches!(
            &err,
            AttributeError::SetFailed { source: ControllerError::Rejected(_), .. }
        ));
        assert_eq!(
            err.to_string(),
            "Can't set transmission to 50: Command rejected: filter jammed"
        );
    }

    #[tokio::test]
    async fn test_set_rejects_garbage() {
        let sim = Arc::new(SimulatedAttenuator::new(100.0));
        assert!(matches!(
            adapter(&sim).set(Value::Bool(true)).await,
            Err(AttributeError::InvalidValue { .. })
        ));
        assert_eq!(sim.move_count(), 0);
    }

    #[tokio::test]
    async fn test_notification_carries_event_value() {
        let sim = Arc::new(SimulatedAttenuator::new(100.0));
        let adapter = adapter(&sim);

        let notification = adapter.on_device_event(&[Value::from(33.337)]).await;
        assert_eq!(notification.name, "transmission");
        assert_eq!(notification.value, Value::Float(33.34));
        assert!(notification.limits.is_none());

        // A payload that is not a number falls back to the current reading
        let fallback = adapter.on_device_event(&[Value::from("moving")]).await;
        assert_eq!(fallback.value, Value::Float(100.0));
    }
}
