//! Scoped interrupt-suspend critical sections
//!
//! Every mutation of the receiver/transmitter lists, timers and remove-lock
//! counters happens inside such a scope. On the target an acquired guard
//! disables all interrupts and saves the prior state; the drop restores it.
//! Guards nest: the saved state is per-scope, never shared across scopes.
//!
//! The hosted implementation models the save/restore pair with a depth
//! counter so that tests can assert balanced acquisition.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicU32, Ordering};

static SUSPEND_DEPTH: AtomicU32 = AtomicU32::new(0);

/// Guard holding all interrupts suspended until dropped
pub struct InterruptsSuspended {
    // ISR state must be restored on the core that saved it
    _not_send: PhantomData<*const ()>,
}

/// Suspend all interrupts for the current scope
#[must_use = "dropping the guard immediately re-enables interrupts"]
pub fn suspend() -> InterruptsSuspended {
    SUSPEND_DEPTH.fetch_add(1, Ordering::AcqRel);
    InterruptsSuspended {
        _not_send: PhantomData,
    }
}

/// Current nesting depth of interrupt suspension
#[inline]
#[must_use]
pub fn suspend_depth() -> u32 {
    SUSPEND_DEPTH.load(Ordering::Acquire)
}

impl Drop for InterruptsSuspended {
    fn drop(&mut self) {
        let prior = SUSPEND_DEPTH.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prior > 0, "unbalanced interrupt suspension");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_suspension_restores_depth() {
        let before = suspend_depth();
        {
            let _outer = suspend();
            assert_eq!(suspend_depth(), before + 1);
            {
                let _inner = suspend();
                assert_eq!(suspend_depth(), before + 2);
            }
            assert_eq!(suspend_depth(), before + 1);
        }
        assert_eq!(suspend_depth(), before);
    }
}
