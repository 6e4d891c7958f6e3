/*!
 * Simulated fast shutter.
 */
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::{debug, warn};

use beamflow_core::types::Value;

use super::{lock, FaultInjector, MoveFault};
use crate::attribute::Role;
use crate::controller::{
    ActuatorController, ControllerError, ControllerResult, HandlerId, SignalEmitter,
    SignalHandler, SignalHub,
};

/// Two-position shutter reporting `"in"` or `"out"`
#[derive(Debug)]
pub struct SimulatedShutter {
    state: Mutex<String>,
    faults: FaultInjector,
    signals: SignalHub,
}

impl SimulatedShutter {
    /// Shutter starting in when `inserted`, out otherwise
    pub fn new(inserted: bool) -> Self {
        Self {
            state: Mutex::new(if inserted { "in" } else { "out" }.to_string()),
            faults: FaultInjector::default(),
            signals: SignalHub::new(),
        }
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

    /// Force the reported state without emitting anything
    pub fn set_raw_state(&self, state: &str) {
        *lock(&self.state) = state.to_string();
    }

    /// Shutter moved by something other than this mediator
    pub fn emit_external(&self, state: &str) -> usize {
        self.set_raw_state(state);
        self.signals
            .emit(Role::FastShutter.change_signal(), &[Value::from(state)])
    }

    fn drive(&self, target: &str, wait: bool) -> ControllerResult<()> {
        match self.faults.begin_move() {
            Some(MoveFault::Reject(reason)) => {
                warn!(target, reason = %reason, "Simulated shutter refused to move");
                Err(ControllerError::Rejected(reason))
            }
            Some(MoveFault::Interrupt) => Err(ControllerError::Aborted("shutter stuck".to_string())),
            None => {
                debug!(target, wait, "Simulated shutter moving");
                self.emit_external(target);
                Ok(())
            }
        }
    }
}

impl SignalEmitter for SimulatedShutter {
    fn connect(&self, signal: &str, handler: SignalHandler) -> ControllerResult<HandlerId> {
        self.faults.check_subscribe()?;
        Ok(self.signals.connect(signal, handler))
    }

    fn disconnect(&self, id: HandlerId) -> bool {
        self.signals.disconnect(id)
    }
}

#[async_trait]
impl ActuatorController for SimulatedShutter {
    async fn actuator_state(&self, _read: bool) -> ControllerResult<String> {
        self.faults.check_read()?;
        Ok(lock(&self.state).clone())
    }

    async fn actuator_in(&self, wait: bool) -> ControllerResult<()> {
        self.drive("in", wait)
    }

    async fn actuator_out(&self, wait: bool) -> ControllerResult<()> {
        self.drive("out", wait)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_and_out() {
        let sim = SimulatedShutter::new(false);
        assert_eq!(tokio_test::block_on(sim.actuator_state(true)).unwrap(), "out");

        tokio_test::block_on(sim.actuator_in(false)).unwrap();
        assert_eq!(tokio_test::block_on(sim.actuator_state(true)).unwrap(), "in");

        tokio_test::block_on(sim.actuator_out(false)).unwrap();
        assert_eq!(tokio_test::block_on(sim.actuator_state(true)).unwrap(), "out");
        assert_eq!(sim.move_count(), 2);
    }

    #[test]
    fn test_emits_state_text() {
        let sim = SimulatedShutter::new(false);
        let seen = std::sync::Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        sim.connect(
            "actuatorStateChanged",
            std::sync::Arc::new(move |args: &[Value]| lock(&sink).extend(args.iter().cloned())),
        )
        .unwrap();

        sim.emit_external("moving");
        tokio_test::block_on(sim.actuator_in(true)).unwrap();
        assert_eq!(*lock(&seen), vec![Value::from("moving"), Value::from("in")]);
    }
}
