//! Free transmit buffer accounting shared with the interrupt handler.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicU8, Ordering};

use crate::registers::TX_MOB_COUNT;

/// Global interrupt flag as it was before a critical section began.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterruptState {
    enabled: bool,
}

impl InterruptState {
    pub fn enabled() -> InterruptState {
        InterruptState { enabled: true }
    }

    pub fn disabled() -> InterruptState {
        InterruptState { enabled: false }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

/// Token proving that interrupts are masked for its lifetime.
pub struct CriticalSection<'cs> {
    _marker: PhantomData<&'cs ()>,
}

/// Masks and unmasks the interrupts that may touch [`FreeBuffers`].
pub trait InterruptGate {
    /// Masks interrupts and returns the previous state.
    fn disable(&self) -> InterruptState;

    fn restore(&self, state: InterruptState);

    /// Runs `f` with interrupts masked, then restores the previous state.
    /// The state is restored even if `f` unwinds.
    fn free<F, T>(&self, f: F) -> T
    where
        Self: Sized,
        F: FnOnce(&CriticalSection<'_>) -> T,
    {
        let _guard = RestoreGuard {
            gate: self,
            state: self.disable(),
        };
        f(&CriticalSection {
            _marker: PhantomData,
        })
    }
}

struct RestoreGuard<'a, G: InterruptGate> {
    gate: &'a G,
    state: InterruptState,
}

impl<'a, G: InterruptGate> Drop for RestoreGuard<'a, G> {
    fn drop(&mut self) {
        self.gate.restore(self.state);
    }
}

/// One free buffer taken out of the pool, spent by arming a MOb.
#[must_use]
pub struct Claim {
    _private: (),
}

impl Claim {
    pub(crate) fn consume(self) {}
}

/// Number of transmit MObs that are currently unused.
#[derive(Debug)]
pub struct FreeBuffers {
    count: AtomicU8,
    capacity: u8,
}

impl FreeBuffers {
    pub fn new(capacity: u8) -> FreeBuffers {
        FreeBuffers {
            count: AtomicU8::new(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> u8 {
        self.capacity
    }

    pub fn available(&self) -> u8 {
        self.count.load(Ordering::Acquire)
    }

    /// Takes one buffer. Returns `None` and leaves the pool untouched when it
    /// is already empty.
    pub fn claim(&self, _cs: &CriticalSection<'_>) -> Option<Claim> {
        self.count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                count.checked_sub(1)
            })
            .ok()
            .map(|_| Claim { _private: () })
    }

    /// Returns one buffer to the pool, called when a transmission completes.
    pub fn release(&self) -> bool {
        let capacity = self.capacity;
        let res = self
            .count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                if count < capacity {
                    Some(count + 1)
                } else {
                    None
                }
            });
        if res.is_err() {
            log::warn!("Released a transmit buffer while all {} were free", capacity);
        }
        res.is_ok()
    }
}

impl Default for FreeBuffers {
    fn default() -> FreeBuffers {
        FreeBuffers::new(TX_MOB_COUNT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimController;

    #[test]
    fn starts_with_every_transmit_mob_free() {
        let buffers = FreeBuffers::default();
        assert_eq!(buffers.available(), 7);
        assert_eq!(buffers.capacity(), 7);
    }

    #[test]
    fn claim_stops_at_zero() {
        let gate = SimController::new().gate();
        let buffers = FreeBuffers::new(1);

        let claim = gate.free(|cs| buffers.claim(cs));
        assert!(claim.is_some());
        assert_eq!(buffers.available(), 0);

        assert!(gate.free(|cs| buffers.claim(cs)).is_none());
        assert_eq!(buffers.available(), 0);
    }

    #[test]
    fn release_saturates_at_capacity() {
        let buffers = FreeBuffers::new(2);
        assert!(!buffers.release());
        assert_eq!(buffers.available(), 2);
    }

    #[test]
    fn critical_section_restores_previous_state() {
        let sim = SimController::new();
        let gate = sim.gate();

        gate.free(|_| assert!(!sim.interrupts_enabled()));
        assert!(sim.interrupts_enabled());

        // nested sections must not unmask early
        gate.free(|_| {
            gate.free(|_| {});
            assert!(!sim.interrupts_enabled());
        });
        assert!(sim.interrupts_enabled());
        assert_eq!(sim.critical_sections(), 3);
    }

    #[test]
    fn critical_section_restores_on_unwind() {
        let sim = SimController::new();
        let gate = sim.gate();

        let res = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            gate.free::<_, ()>(|_| panic!("inside critical section"));
        }));
        assert!(res.is_err());
        assert!(sim.interrupts_enabled());
    }
}
