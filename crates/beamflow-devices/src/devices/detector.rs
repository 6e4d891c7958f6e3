/*!
 * Simulated detector distance motor, positioned in resolution units.
 */
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::{debug, warn};

use beamflow_core::types::Value;

use super::{lock, FaultInjector, MoveFault};
use crate::attribute::{Limits, Role};
use crate::controller::{
    ControllerError, ControllerResult, HandlerId, ResolutionController, SignalEmitter,
    SignalHandler, SignalHub,
};

/// Detector distance motor reporting the resolution at the detector edge
#[derive(Debug)]
pub struct SimulatedDetectorDistance {
    reading: Mutex<Value>,
    limits: Option<Limits>,
    faults: FaultInjector,
    signals: SignalHub,
}

impl SimulatedDetectorDistance {
    /// Motor at `resolution` Å
    pub fn new(resolution: f64) -> Self {
        Self {
            reading: Mutex::new(Value::Float(resolution)),
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

    /// Motor moved by something other than this mediator
    pub fn emit_external(&self, resolution: f64) -> usize {
        *lock(&self.reading) = Value::Float(resolution);
        self.signals
            .emit(Role::Resolution.change_signal(), &[Value::Float(resolution)])
    }
}

impl SignalEmitter for SimulatedDetectorDistance {
    fn connect(&self, signal: &str, handler: SignalHandler) -> ControllerResult<HandlerId> {
        self.faults.check_subscribe()?;
        Ok(self.signals.connect(signal, handler))
    }

    fn disconnect(&self, id: HandlerId) -> bool {
        self.signals.disconnect(id)
    }
}

#[async_trait]
impl ResolutionController for SimulatedDetectorDistance {
    async fn position(&self) -> ControllerResult<Value> {
        self.faults.check_read()?;
        Ok(lock(&self.reading).clone())
    }

    async fn new_resolution(&self, resolution: f64) -> ControllerResult<()> {
        match self.faults.begin_move() {
            Some(MoveFault::Reject(reason)) => {
                warn!(resolution, reason = %reason, "Simulated detector move rejected");
                Err(ControllerError::Rejected(reason))
            }
            Some(MoveFault::Interrupt) => Err(ControllerError::Aborted("detector move stopped".to_string())),
            None => {
                debug!(resolution, "Simulated detector moving");
                self.emit_external(resolution);
                Ok(())
            }
        }
    }

    async fn limits(&self) -> Option<Limits> {
        self.limits
    }
}
