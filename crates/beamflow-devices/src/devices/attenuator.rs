/*!
 * Simulated attenuator.
 */
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::{debug, warn};

use beamflow_core::types::Value;

use super::{lock, FaultInjector, MoveFault};
use crate::attribute::{Limits, Role};
use crate::controller::{
    ControllerError, ControllerResult, HandlerId, SignalEmitter, SignalHandler, SignalHub,
    TransmissionController,
};

/// Filter set whose transmission factor is clamped to `0..=100` %
#[derive(Debug)]
pub struct SimulatedAttenuator {
    reading: Mutex<Value>,
    limits: Option<Limits>,
    faults: FaultInjector,
    signals: SignalHub,
}

impl SimulatedAttenuator {
    /// Attenuator transmitting `transmission` %
    pub fn new(transmission: f64) -> Self {
        Self {
            reading: Mutex::new(Value::Float(transmission.clamp(0.0, 100.0))),
            limits: None,
            faults: FaultInjector::default(),
            signals: SignalHub::new(),
        }
    }

    /// Limits the controller reports itself
    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = Some(limits);
        self
    }

    /// Failure switches
    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    /// Move commands received so far
    pub fn move_count(&self) -> usize {
        self.faults.move_count()
    }

    /// Handler table
    pub fn signals(&self) -> &SignalHub {
        &self.signals
    }

    /// Replace the raw reading without emitting anything
    pub fn set_raw_reading(&self, reading: Value) {
        *lock(&self.reading) = reading;
    }

    /// Filters changed by something other than this mediator
    pub fn emit_external(&self, transmission: f64) -> usize {
        let transmission = transmission.clamp(0.0, 100.0);
        *lock(&self.reading) = Value::Float(transmission);
        self.signals
            .emit(Role::Transmission.change_signal(), &[Value::Float(transmission)])
    }
}

impl SignalEmitter for SimulatedAttenuator {
    fn connect(&self, signal: &str, handler: SignalHandler) -> ControllerResult<HandlerId> {
        self.faults.check_subscribe()?;
        Ok(self.signals.connect(signal, handler))
    }

    fn disconnect(&self, id: HandlerId) -> bool {
        self.signals.disconnect(id)
    }
}

#[async_trait]
impl TransmissionController for SimulatedAttenuator {
    async fn att_factor(&self) -> ControllerResult<Value> {
        self.faults.check_read()?;
        Ok(lock(&self.reading).clone())
    }

    async fn set_value(&self, value: f64, wait: bool) -> ControllerResult<()> {
        match self.faults.begin_move() {
            Some(MoveFault::Reject(reason)) => {
                warn!(value, reason = %reason, "Simulated attenuator refused new transmission");
                Err(ControllerError::Rejected(reason))
            }
            Some(MoveFault::Interrupt) => Err(ControllerError::Aborted("filter change stopped".to_string())),
            None => {
                debug!(value, wait, "Simulated attenuator changing filters");
                self.emit_external(value);
                Ok(())
            }
        }
    }

    async fn limits(&self) -> Option<Limits> {
        self.limits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_transmission_is_clamped() {
        let sim = SimulatedAttenuator::new(150.0);
        assert_eq!(sim.att_factor().await.unwrap(), Value::Float(100.0));

        sim.set_value(-3.0, true).await.unwrap();
        assert_eq!(sim.att_factor().await.unwrap(), Value::Float(0.0));
    }

    #[tokio::test]
    async fn test_interrupt_is_reported_as_abort() {
        let sim = SimulatedAttenuator::new(50.0);
        sim.faults().fail_next_move(MoveFault::Interrupt);

        assert!(matches!(sim.set_value(10.0, true).await, Err(ControllerError::Aborted(_))));
        assert_eq!(sim.att_factor().await.unwrap(), Value::Float(50.0));
    }
}
