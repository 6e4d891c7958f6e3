/*!
 * Simulated energy controller.
 */
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use beamflow_core::types::Value;

use super::{lock, BusyGuard, FaultInjector, MoveFault};
use crate::attribute::{Limits, Role};
use crate::controller::{
    ControllerError, ControllerResult, EnergyController, HandlerId, SignalEmitter, SignalHandler,
    SignalHub,
};

/// keV·Å
const HC_OVER_E: f64 = 12.398419843320026;

/// Monochromator that moves instantly or after a fixed settle time.
///
/// `energyChanged` carries `(energy, wavelength)`.
#[derive(Debug)]
pub struct SimulatedEnergy {
    reading: Mutex<Value>,
    moving: AtomicBool,
    aborted: AtomicBool,
    settle_time: Duration,
    limits: Option<Limits>,
    faults: FaultInjector,
    signals: SignalHub,
}

impl SimulatedEnergy {
    /// Controller at `energy` keV
    pub fn new(energy: f64) -> Self {
        Self {
            reading: Mutex::new(Value::Float(energy)),
            moving: AtomicBool::new(false),
            aborted: AtomicBool::new(false),
            settle_time: Duration::ZERO,
            limits: None,
            faults: FaultInjector::default(),
            signals: SignalHub::new(),
        }
    }

    /// Time every move takes
    pub fn with_settle_time(mut self, settle_time: Duration) -> Self {
        self.settle_time = settle_time;
        self
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

    /// Handler table, for inspecting subscriptions
    pub fn signals(&self) -> &SignalHub {
        &self.signals
    }

    /// Replace the raw reading without emitting anything
    pub fn set_raw_reading(&self, reading: Value) {
        *lock(&self.reading) = reading;
    }

    /// Abort whatever move is going on
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    /// Energy changed by something other than this mediator
    pub fn emit_external(&self, energy: f64) -> usize {
        *lock(&self.reading) = Value::Float(energy);
        self.emit_changed(energy)
    }

    fn emit_changed(&self, energy: f64) -> usize {
        let wavelength = if energy != 0.0 { HC_OVER_E / energy } else { 0.0 };
        self.signals.emit(
            Role::Energy.change_signal(),
            &[Value::Float(energy), Value::Float(wavelength)],
        )
    }
}

impl SignalEmitter for SimulatedEnergy {
    fn connect(&self, signal: &str, handler: SignalHandler) -> ControllerResult<HandlerId> {
        self.faults.check_subscribe()?;
        Ok(self.signals.connect(signal, handler))
    }

    fn disconnect(&self, id: HandlerId) -> bool {
        self.signals.disconnect(id)
    }
}

#[async_trait]
impl EnergyController for SimulatedEnergy {
    async fn current_energy(&self) -> ControllerResult<Value> {
        self.faults.check_read()?;
        Ok(lock(&self.reading).clone())
    }

    async fn start_move_energy(&self, energy: f64) -> ControllerResult<()> {
        let fault = self.faults.begin_move();
        if let Some(MoveFault::Reject(reason)) = &fault {
            warn!(energy, reason = %reason, "Simulated energy move rejected");
            return Err(ControllerError::Rejected(reason.clone()));
        }

        self.aborted.store(false, Ordering::SeqCst);
        {
            let _busy = BusyGuard::raise(&self.moving);
            debug!(energy, settle_ms = self.settle_time.as_millis() as u64, "Simulated energy move started");
            if !self.settle_time.is_zero() {
                tokio::time::sleep(self.settle_time).await;
            }
        }

        if fault == Some(MoveFault::Interrupt) || self.aborted.load(Ordering::SeqCst) {
            self.aborted.store(true, Ordering::SeqCst);
            warn!(energy, "Simulated energy move aborted");
            return Ok(());
        }

        *lock(&self.reading) = Value::Float(energy);
        info!(energy, "Simulated energy reached");
        self.emit_changed(energy);
        Ok(())
    }

    fn is_moving(&self) -> bool {
        self.moving.load(Ordering::SeqCst)
    }

    fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    async fn limits(&self) -> Option<Limits> {
        self.limits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_move_emits_energy_and_wavelength() {
        let sim = SimulatedEnergy::new(12.4);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        sim.connect(
            "energyChanged",
            Arc::new(move |args: &[Value]| lock(&sink).push(args.to_vec())),
        )
        .unwrap();

        sim.start_move_energy(12.398419843320026).await.unwrap();

        let seen = lock(&seen);
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0][0], Value::Float(12.398419843320026));
        assert_eq!(seen[0][1], Value::Float(1.0));
        assert_eq!(sim.current_energy().await.unwrap(), Value::Float(12.398419843320026));
    }

    #[tokio::test]
    async fn test_interrupted_move_keeps_reading() {
        let sim = SimulatedEnergy::new(12.4);
        let emitted = Arc::new(AtomicUsize::new(0));
        let counter = emitted.clone();
        sim.connect(
            "energyChanged",
            Arc::new(move |_: &[Value]| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();

        sim.faults().fail_next_move(MoveFault::Interrupt);
        sim.start_move_energy(8.0).await.unwrap();

        assert!(sim.is_aborted());
        assert!(!sim.is_moving());
        assert_eq!(sim.current_energy().await.unwrap(), Value::Float(12.4));
        assert_eq!(emitted.load(Ordering::SeqCst), 0);

        sim.start_move_energy(8.0).await.unwrap();
        assert!(!sim.is_aborted());
    }

    #[tokio::test]
    async fn test_dropped_move_clears_busy_flag() {
        let sim = SimulatedEnergy::new(12.4).with_settle_time(Duration::from_secs(5));
        let _ = tokio::time::timeout(Duration::from_millis(10), sim.start_move_energy(9.0)).await;
        assert!(!sim.is_moving());
    }

    #[test]
    fn test_refused_subscription() {
        let sim = SimulatedEnergy::new(12.4);
        sim.faults().set_refuse_signals(true);
        assert!(sim.connect("energyChanged", Arc::new(|_: &[Value]| {})).is_err());
        assert_eq!(sim.signals().handler_count("energyChanged"), 0);
    }
}
