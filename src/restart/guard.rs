//! Single-flight guard for restart attempts.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Admits one holder at a time; later callers are refused instead of queued.
///
/// Clones share state, so one guard can be injected into several owners
/// that must not restart concurrently.
#[derive(Debug, Clone, Default)]
pub struct SingleFlight {
    busy: Arc<AtomicBool>,
}

impl SingleFlight {
    /// New, idle guard.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the guard if nobody holds it.
    #[must_use]
    pub fn try_acquire(&self) -> Option<SingleFlightPermit> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SingleFlightPermit {
                busy: Arc::clone(&self.busy),
            })
    }

    /// Whether a permit is currently outstanding.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Proof of holding a [`SingleFlight`]; released on drop.
#[derive(Debug)]
pub struct SingleFlightPermit {
    busy: Arc<AtomicBool>,
}

impl Drop for SingleFlightPermit {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}
