//! The safety supervisor
//!
//! Owns the monitors around the safety manager and safe watchdog. Any
//! monitor tripping latches the limp-home flag and requests an MCU reset.
//! The supervisor is constructed by the application bootstrap and passed by
//! reference into the safety manager and watchdog; the limp-home flag is
//! the only value read from both the safety context and the application and
//! is therefore atomic.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::monitor::{SequenceMonitor, TriggerMonitor, ValueMonitor};

/// Events the supervisor reacts to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SafetyEvent {
    SafetyManagerSequenceDeviation,
    WatchdogStartupCheckFailure,
    SafeWatchdogSequenceDeviation,
    SafeWatchdogConfigurationError,
    SafeWatchdogServiceDeviation,
    MpuUnlockedOnSafetyManagerEntry,
    MpuLockedOnSafetyManagerExit,
}

/// Checkpoints of the safety manager cyclic
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SafetyManagerCheckpoint {
    Enter,
    Leave,
}

/// Checkpoints of the safe watchdog cyclic
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WatchdogCheckpoint {
    Enter,
    Leave,
}

/// Last-resort reset hook
pub trait McuReset {
    fn reset(&mut self);
}

/// Reset hook for hosted builds and tests
#[derive(Default)]
pub struct NoopMcuReset;

impl McuReset for NoopMcuReset {
    fn reset(&mut self) {}
}

pub struct SafeSupervisor {
    safety_manager_sequence: SequenceMonitor<SafetyManagerCheckpoint>,
    watchdog_startup_check: TriggerMonitor,
    safe_watchdog_sequence: SequenceMonitor<WatchdogCheckpoint>,
    safe_watchdog_config: ValueMonitor<bool>,
    service_watchdog: TriggerMonitor,
    mpu_status_on_enter: ValueMonitor<bool>,
    mpu_status_on_leave: ValueMonitor<bool>,
    limp_home: AtomicBool,
    reset: Box<dyn McuReset>,
}

impl SafeSupervisor {
    /// The supervisor starts out in limp home; the bootstrap clears it
    /// once startup checks pass
    pub fn new(reset: Box<dyn McuReset>) -> Self {
        Self {
            safety_manager_sequence: SequenceMonitor::new(vec![
                SafetyManagerCheckpoint::Enter,
                SafetyManagerCheckpoint::Leave,
            ]),
            watchdog_startup_check: TriggerMonitor::new(),
            safe_watchdog_sequence: SequenceMonitor::new(vec![
                WatchdogCheckpoint::Enter,
                WatchdogCheckpoint::Leave,
            ]),
            safe_watchdog_config: ValueMonitor::new(true),
            service_watchdog: TriggerMonitor::new(),
            mpu_status_on_enter: ValueMonitor::new(true),
            mpu_status_on_leave: ValueMonitor::new(false),
            limp_home: AtomicBool::new(true),
            reset,
        }
    }

    /// React to a safety event: latch limp home and reset the MCU
    pub fn handle(&mut self, event: SafetyEvent) {
        tracing::error!("safety event {event:?}");
        self.enter_limp_home();
        self.reset.reset();
    }

    pub fn enter_limp_home(&self) {
        self.limp_home.store(true, Ordering::SeqCst);
    }

    pub fn leave_limp_home(&self) {
        self.limp_home.store(false, Ordering::SeqCst);
    }

    /// Observable from any context without racing the supervisor
    #[must_use]
    pub fn limp_home(&self) -> bool {
        self.limp_home.load(Ordering::SeqCst)
    }

    pub fn safety_manager_sequence_hit(&mut self, checkpoint: SafetyManagerCheckpoint) {
        if self.safety_manager_sequence.hit(checkpoint).is_err() {
            self.handle(SafetyEvent::SafetyManagerSequenceDeviation);
        }
    }

    pub fn watchdog_startup_check_failed(&mut self) {
        self.watchdog_startup_check.trigger();
        self.handle(SafetyEvent::WatchdogStartupCheckFailure);
    }

    pub fn safe_watchdog_sequence_hit(&mut self, checkpoint: WatchdogCheckpoint) {
        if self.safe_watchdog_sequence.hit(checkpoint).is_err() {
            self.handle(SafetyEvent::SafeWatchdogSequenceDeviation);
        }
    }

    pub fn safe_watchdog_config_check(&mut self, configuration_valid: bool) {
        if self.safe_watchdog_config.check(configuration_valid).is_err() {
            self.handle(SafetyEvent::SafeWatchdogConfigurationError);
        }
    }

    pub fn service_watchdog_deviation(&mut self) {
        self.service_watchdog.trigger();
        self.handle(SafetyEvent::SafeWatchdogServiceDeviation);
    }

    pub fn mpu_status_on_enter_check(&mut self, gate_locked: bool) {
        if self.mpu_status_on_enter.check(gate_locked).is_err() {
            self.handle(SafetyEvent::MpuUnlockedOnSafetyManagerEntry);
        }
    }

    pub fn mpu_status_on_leave_check(&mut self, gate_locked: bool) {
        if self.mpu_status_on_leave.check(gate_locked).is_err() {
            self.handle(SafetyEvent::MpuLockedOnSafetyManagerExit);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    #[derive(Clone, Default)]
    struct ResetCounter {
        count: Rc<RefCell<u32>>,
    }

    impl McuReset for ResetCounter {
        fn reset(&mut self) {
            *self.count.borrow_mut() += 1;
        }
    }

    fn supervisor(reset: &ResetCounter) -> SafeSupervisor {
        let supervisor = SafeSupervisor::new(Box::new(reset.clone()));
        supervisor.leave_limp_home();
        supervisor
    }

    #[test]
    fn test_starts_in_limp_home() {
        let supervisor = SafeSupervisor::new(Box::new(NoopMcuReset));
        assert!(supervisor.limp_home());
        supervisor.leave_limp_home();
        assert!(!supervisor.limp_home());
    }

    #[test]
    fn test_sequence_deviation_latches_limp_home_and_resets() {
        let reset = ResetCounter::default();
        let mut supervisor = supervisor(&reset);

        supervisor.safety_manager_sequence_hit(SafetyManagerCheckpoint::Enter);
        supervisor.safety_manager_sequence_hit(SafetyManagerCheckpoint::Leave);
        assert!(!supervisor.limp_home());
        assert_eq!(*reset.count.borrow(), 0);

        supervisor.safety_manager_sequence_hit(SafetyManagerCheckpoint::Enter);
        supervisor.safety_manager_sequence_hit(SafetyManagerCheckpoint::Enter);
        assert!(supervisor.limp_home());
        assert_eq!(*reset.count.borrow(), 1);
    }

    #[test]
    fn test_value_deviation_latches_limp_home() {
        let reset = ResetCounter::default();
        let mut supervisor = supervisor(&reset);

        supervisor.safe_watchdog_config_check(true);
        assert!(!supervisor.limp_home());
        supervisor.safe_watchdog_config_check(false);
        assert!(supervisor.limp_home());
    }

    #[test]
    fn test_trigger_latches_limp_home() {
        let reset = ResetCounter::default();
        let mut supervisor = supervisor(&reset);

        supervisor.service_watchdog_deviation();
        assert!(supervisor.limp_home());
        assert_eq!(*reset.count.borrow(), 1);
    }
}
