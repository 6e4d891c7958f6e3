/*!
 * Simulated beamline controllers.
 *
 * In-memory stand-ins for the real hardware controllers, used by the demo
 * and the tests. Each one emits its native change signal when its value
 * changes and can be told to fail through a [`FaultInjector`].
 */
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::controller::{ControllerError, ControllerResult};

pub mod attenuator;
pub mod detector;
pub mod energy;
pub mod shutter;

pub use attenuator::SimulatedAttenuator;
pub use detector::SimulatedDetectorDistance;
pub use energy::SimulatedEnergy;
pub use shutter::SimulatedShutter;

/// How the next move command should fail
#[derive(Debug, Clone, PartialEq)]
pub enum MoveFault {
    /// The controller refuses the command
    Reject(String),
    /// The move starts and is aborted before it completes
    Interrupt,
}

/// Failure switches shared by all simulated controllers
#[derive(Debug, Default)]
pub struct FaultInjector {
    next_move: Mutex<Option<MoveFault>>,
    fail_reads: AtomicBool,
    refuse_signals: AtomicBool,
    moves: AtomicUsize,
}

impl FaultInjector {
    /// Make the next move command fail with `fault`
    pub fn fail_next_move(&self, fault: MoveFault) {
        *lock(&self.next_move) = Some(fault);
    }

    /// Make every read fail until switched off again
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Refuse new signal subscriptions
    pub fn set_refuse_signals(&self, refuse: bool) {
        self.refuse_signals.store(refuse, Ordering::SeqCst);
    }

    /// Move commands received so far, failed ones included
    pub fn move_count(&self) -> usize {
        self.moves.load(Ordering::SeqCst)
    }

    pub(crate) fn begin_move(&self) -> Option<MoveFault> {
        self.moves.fetch_add(1, Ordering::SeqCst);
        lock(&self.next_move).take()
    }

    pub(crate) fn check_read(&self) -> ControllerResult<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(ControllerError::Communication("simulated read failure".to_string()));
        }
        Ok(())
    }

    pub(crate) fn check_subscribe(&self) -> ControllerResult<()> {
        if self.refuse_signals.load(Ordering::SeqCst) {
            return Err(ControllerError::Unavailable("signal subscriptions refused".to_string()));
        }
        Ok(())
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Clears a busy flag when the move future completes or is dropped
pub(crate) struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    pub(crate) fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_move_fault_is_consumed_once() {
        let faults = FaultInjector::default();
        faults.fail_next_move(MoveFault::Interrupt);

        assert_eq!(faults.begin_move(), Some(MoveFault::Interrupt));
        assert_eq!(faults.begin_move(), None);
        assert_eq!(faults.move_count(), 2);
    }

    #[test]
    fn test_read_and_subscribe_switches() {
        let faults = FaultInjector::default();
        assert!(faults.check_read().is_ok());

        faults.set_fail_reads(true);
        assert!(matches!(faults.check_read(), Err(ControllerError::Communication(_))));

        faults.set_refuse_signals(true);
        assert!(matches!(faults.check_subscribe(), Err(ControllerError::Unavailable(_))));
    }

    #[test]
    fn test_busy_guard_clears_on_drop() {
        let flag = AtomicBool::new(false);
        {
            let _guard = BusyGuard::raise(&flag);
            assert!(flag.load(Ordering::SeqCst));
        }
        assert!(!flag.load(Ordering::SeqCst));
    }
}
