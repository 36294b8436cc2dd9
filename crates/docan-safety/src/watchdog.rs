//! Safe watchdog: validated servicing of the hardware watchdog

use crate::supervisor::{SafeSupervisor, WatchdogCheckpoint};

/// Hardware watchdog window
pub const WATCHDOG_TIMEOUT_MS: u32 = 250;

/// Access to the hardware watchdog peripheral
pub trait WatchdogHal {
    /// Number of times the watchdog was serviced since boot
    fn service_counter(&self) -> u32;

    fn service(&mut self);

    /// Whether the watchdog registers still carry the expected
    /// configuration
    fn is_configuration_valid(&self) -> bool;

    fn enable(&mut self, timeout_ms: u32);
}

pub struct SafeWatchdog<W: WatchdogHal> {
    hal: W,
    service_counter: u32,
}

impl<W: WatchdogHal> SafeWatchdog<W> {
    pub fn new(hal: W) -> Self {
        Self {
            hal,
            service_counter: 0,
        }
    }

    pub fn init(&mut self) {
        self.service_counter = self.hal.service_counter();
    }

    pub fn enable_mcu_watchdog(&mut self) {
        self.hal.enable(WATCHDOG_TIMEOUT_MS);
    }

    #[inline]
    #[must_use]
    pub fn hal(&self) -> &W {
        &self.hal
    }

    /// Service the watchdog, validating its configuration and that nobody
    /// serviced it behind our back
    pub fn cyclic(&mut self, supervisor: &mut SafeSupervisor) {
        supervisor.safe_watchdog_config_check(self.hal.is_configuration_valid());

        let current = self.hal.service_counter();
        if current > self.service_counter + 1 {
            supervisor.service_watchdog_deviation();
        }
        self.service_counter = current;
        self.hal.service();

        supervisor.safe_watchdog_sequence_hit(WatchdogCheckpoint::Leave);
    }
}
