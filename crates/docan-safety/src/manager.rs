//! The safety manager cyclic

use crate::supervisor::{SafeSupervisor, SafetyManagerCheckpoint, WatchdogCheckpoint};
use crate::watchdog::{SafeWatchdog, WatchdogHal};

/// The watchdog is serviced every N-th safety cycle, giving three services
/// per watchdog window
pub const WATCHDOG_CYCLIC_COUNTER: u32 = 8;

/// Gate protecting the safety-relevant RAM region
///
/// The gate must be locked whenever the safety manager is not running; the
/// cyclic opens it for the duration of one pass.
pub trait MpuGate {
    fn is_locked(&self) -> bool;

    fn unlock(&mut self);

    fn lock(&mut self);
}

#[derive(Default)]
pub struct SafetyManager {
    counter: u32,
}

impl SafetyManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn init(&mut self) {
        tracing::warn!("safety manager initialized");
        self.counter = 0;
    }

    /// One pass of the safety cyclic
    ///
    /// Asserts the MPU gate state on entry and exit, hits the enter/leave
    /// sequence monitor and services the watchdog every
    /// [WATCHDOG_CYCLIC_COUNTER]-th call.
    pub fn cyclic<M: MpuGate, W: WatchdogHal>(
        &mut self,
        supervisor: &mut SafeSupervisor,
        watchdog: &mut SafeWatchdog<W>,
        mpu: &mut M,
    ) {
        supervisor.mpu_status_on_enter_check(mpu.is_locked());
        mpu.unlock();

        supervisor.safety_manager_sequence_hit(SafetyManagerCheckpoint::Enter);
        self.counter += 1;
        if self.counter >= WATCHDOG_CYCLIC_COUNTER {
            supervisor.safe_watchdog_sequence_hit(WatchdogCheckpoint::Enter);
            watchdog.cyclic(supervisor);
            self.counter = 0;
        }
        supervisor.safety_manager_sequence_hit(SafetyManagerCheckpoint::Leave);

        supervisor.mpu_status_on_leave_check(mpu.is_locked());
        mpu.lock();
    }
}
