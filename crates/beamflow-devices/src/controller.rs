/*!
 * Device controller capabilities.
 *
 * Controllers are owned by whatever wires the beamline together; the
 * mediation layer only sees them through these traits. Every controller can
 * emit named signals, and each device kind adds the handful of queries and
 * commands its adapter needs, under the controller's own naming.
 */
use std::any::Any;
use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{error, trace};

use beamflow_core::types::Value;

use crate::attribute::Limits;

/// Error reported by a device controller
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ControllerError {
    /// The controller is not connected to its hardware
    #[error("Device not connected")]
    NotConnected,

    /// The controller cannot currently produce the requested reading
    #[error("Value unavailable: {0}")]
    Unavailable(String),

    /// The controller refused the command
    #[error("Command rejected: {0}")]
    Rejected(String),

    /// Communication with the hardware failed
    #[error("Communication error: {0}")]
    Communication(String),

    /// The motion was aborted before it completed
    #[error("Motion aborted: {0}")]
    Aborted(String),
}

/// Result type for controller calls
pub type ControllerResult<T> = std::result::Result<T, ControllerError>;

/// Identifies one connected signal handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

impl HandlerId {
    /// Raw numeric value of the id
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// Callback invoked with the arguments of an emitted signal.
///
/// Handlers may run on any thread the controller dispatches from.
pub type SignalHandler = Arc<dyn Fn(&[Value]) + Send + Sync>;

/// Native event registration primitive of a controller
pub trait SignalEmitter: Send + Sync {
    /// Register `handler` for `signal`
    fn connect(&self, signal: &str, handler: SignalHandler) -> ControllerResult<HandlerId>;

    /// Remove a handler; returns whether it was connected
    fn disconnect(&self, id: HandlerId) -> bool;
}

/// Handler table controllers can embed to implement [`SignalEmitter`]
#[derive(Default)]
pub struct SignalHub {
    next_id: AtomicU64,
    handlers: Mutex<HashMap<String, Vec<(HandlerId, SignalHandler)>>>,
}

impl SignalHub {
    /// Create an empty hub
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `signal`
    pub fn connect(&self, signal: &str, handler: SignalHandler) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(signal.to_string())
            .or_default()
            .push((id, handler));
        id
    }

    /// Remove a handler; returns whether it was connected
    pub fn disconnect(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers.lock().unwrap_or_else(PoisonError::into_inner);
        let mut removed = false;
        for list in handlers.values_mut() {
            let before = list.len();
            list.retain(|(handler_id, _)| *handler_id != id);
            removed |= list.len() != before;
        }
        removed
    }

    /// Invoke every handler of `signal` with `args`, returning how many ran.
    ///
    /// Handlers are called outside the table lock. A panicking handler is
    /// logged and does not stop delivery to the others.
    pub fn emit(&self, signal: &str, args: &[Value]) -> usize {
        let handlers: Vec<SignalHandler> = self
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(signal)
            .map(|list| list.iter().map(|(_, handler)| Arc::clone(handler)).collect())
            .unwrap_or_default();

        trace!(signal, handlers = handlers.len(), "Emitting signal");

        let mut delivered = 0;
        for handler in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(args))) {
                Ok(()) => delivered += 1,
                Err(_) => error!(signal, "Signal handler panicked"),
            }
        }
        delivered
    }

    /// Number of handlers connected to `signal`
    pub fn handler_count(&self, signal: &str) -> usize {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(signal)
            .map_or(0, Vec::len)
    }
}

impl Debug for SignalHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handlers = self.handlers.lock().unwrap_or_else(PoisonError::into_inner);
        let counts: HashMap<&str, usize> = handlers
            .iter()
            .map(|(signal, list)| (signal.as_str(), list.len()))
            .collect();
        f.debug_struct("SignalHub").field("handlers", &counts).finish()
    }
}

/// Monochromator or undulator controller setting the beam energy
#[async_trait]
pub trait EnergyController: SignalEmitter + Debug {
    /// Current energy in keV, as the controller reports it
    async fn current_energy(&self) -> ControllerResult<Value>;

    /// Move to `energy` keV; resolves once the move has finished
    async fn start_move_energy(&self, energy: f64) -> ControllerResult<()>;

    /// Whether a move is in progress
    fn is_moving(&self) -> bool;

    /// Whether the last move was aborted
    fn is_aborted(&self) -> bool;

    /// Live limits, for controllers that can report them
    async fn limits(&self) -> Option<Limits> {
        None
    }
}

/// Attenuator controller setting the beam transmission
#[async_trait]
pub trait TransmissionController: SignalEmitter + Debug {
    /// Current attenuation factor (transmission in %)
    async fn att_factor(&self) -> ControllerResult<Value>;

    /// Set the transmission, optionally waiting for the filters to settle
    async fn set_value(&self, value: f64, wait: bool) -> ControllerResult<()>;

    /// Live limits, for controllers that can report them
    async fn limits(&self) -> Option<Limits> {
        None
    }
}

/// Detector distance controller expressed as resolution
#[async_trait]
pub trait ResolutionController: SignalEmitter + Debug {
    /// Current resolution in Å
    async fn position(&self) -> ControllerResult<Value>;

    /// Move the detector to reach `resolution` Å
    async fn new_resolution(&self, resolution: f64) -> ControllerResult<()>;

    /// Live limits, for controllers that can report them
    async fn limits(&self) -> Option<Limits> {
        None
    }
}

/// Two-position actuator such as a fast shutter
#[async_trait]
pub trait ActuatorController: SignalEmitter + Debug {
    /// Current actuator state (`"in"`, `"out"`, or anything else while moving
    /// or unknown). `read` forces a hardware read instead of a cached value.
    async fn actuator_state(&self, read: bool) -> ControllerResult<String>;

    /// Move the actuator in
    async fn actuator_in(&self, wait: bool) -> ControllerResult<()>;

    /// Move the actuator out
    async fn actuator_out(&self, wait: bool) -> ControllerResult<()>;
}

/// A controller as handed over by the wiring process
#[derive(Debug, Clone)]
pub enum ControllerHandle {
    /// Energy controller
    Energy(Arc<dyn EnergyController>),
    /// Transmission controller
    Transmission(Arc<dyn TransmissionController>),
    /// Resolution controller
    Resolution(Arc<dyn ResolutionController>),
    /// Two-position actuator
    Actuator(Arc<dyn ActuatorController>),
    /// Any controller without an adapter kind
    Raw(Arc<dyn Any + Send + Sync>),
}

impl ControllerHandle {
    /// Short name of the controller kind
    pub fn kind(&self) -> &'static str {
        match self {
            ControllerHandle::Energy(_) => "energy",
            ControllerHandle::Transmission(_) => "transmission",
            ControllerHandle::Resolution(_) => "resolution",
            ControllerHandle::Actuator(_) => "actuator",
            ControllerHandle::Raw(_) => "raw",
        }
    }

    fn data_ptr(&self) -> *const () {
        match self {
            ControllerHandle::Energy(c) => Arc::as_ptr(c) as *const (),
            ControllerHandle::Transmission(c) => Arc::as_ptr(c) as *const (),
            ControllerHandle::Resolution(c) => Arc::as_ptr(c) as *const (),
            ControllerHandle::Actuator(c) => Arc::as_ptr(c) as *const (),
            ControllerHandle::Raw(c) => Arc::as_ptr(c) as *const (),
        }
    }

    /// Whether both handles point at the same controller instance
    pub fn same_controller(&self, other: &ControllerHandle) -> bool {
        self.data_ptr() == other.data_ptr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_handler(counter: Arc<AtomicUsize>) -> SignalHandler {
        Arc::new(move |_args: &[Value]| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_connect_emit_disconnect() {
        let hub = SignalHub::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let id = hub.connect("energyChanged", counting_handler(counter.clone()));
        assert_eq!(hub.handler_count("energyChanged"), 1);

        assert_eq!(hub.emit("energyChanged", &[Value::from(12.4)]), 1);
        assert_eq!(hub.emit("otherSignal", &[]), 0);
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        assert!(hub.disconnect(id));
        assert!(!hub.disconnect(id));
        assert_eq!(hub.emit("energyChanged", &[]), 0);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handler_receives_arguments() {
        let hub = SignalHub::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        hub.connect(
            "actuatorStateChanged",
            Arc::new(move |args: &[Value]| sink.lock().unwrap().extend_from_slice(args)),
        );

        hub.emit("actuatorStateChanged", &[Value::from("in")]);
        assert_eq!(*seen.lock().unwrap(), vec![Value::from("in")]);
    }

    #[test]
    fn test_panicking_handler_does_not_stop_delivery() {
        let hub = SignalHub::new();
        let counter = Arc::new(AtomicUsize::new(0));

        hub.connect("positionChanged", Arc::new(|_args: &[Value]| panic!("handler bug")));
        hub.connect("positionChanged", counting_handler(counter.clone()));

        assert_eq!(hub.emit("positionChanged", &[]), 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handler_may_reenter_hub() {
        let hub = Arc::new(SignalHub::new());
        let inner = hub.clone();
        hub.connect(
            "energyChanged",
            Arc::new(move |_args: &[Value]| {
                assert_eq!(inner.handler_count("energyChanged"), 1);
            }),
        );
        assert_eq!(hub.emit("energyChanged", &[]), 1);
    }

    #[test]
    fn test_same_controller() {
        let a: Arc<dyn Any + Send + Sync> = Arc::new(1u8);
        let b: Arc<dyn Any + Send + Sync> = Arc::new(1u8);
        let first = ControllerHandle::Raw(a.clone());
        assert!(first.same_controller(&ControllerHandle::Raw(a)));
        assert!(!first.same_controller(&ControllerHandle::Raw(b)));
        assert_eq!(first.kind(), "raw");
    }
}
