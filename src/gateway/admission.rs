//! Admission control for the fast path

use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

/// Caps the number of in-flight fast path calls.
///
/// Admission never blocks: a caller over the limit is told no and routes
/// elsewhere.
#[derive(Debug)]
pub struct AdmissionController {
    active: AtomicUsize,
    limit: usize,
}

impl AdmissionController {
    pub fn new(limit: usize) -> Self {
        Self {
            active: AtomicUsize::new(0),
            limit,
        }
    }

    /// Take a slot if one is free
    pub fn try_admit(&self) -> bool {
        let admitted = self
            .active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |active| {
                (active < self.limit).then_some(active + 1)
            })
            .is_ok();

        if !admitted {
            debug!(limit = self.limit, "Admission denied");
        }
        admitted
    }

    /// Give a slot back. Saturates at zero.
    pub fn release(&self) {
        let _ = self
            .active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |active| {
                active.checked_sub(1)
            });
    }

    /// Scoped admission; the slot is released when the permit drops
    pub fn try_acquire(&self) -> Option<AdmissionPermit<'_>> {
        self.try_admit().then_some(AdmissionPermit { controller: self })
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}

/// Holds one admission slot
#[derive(Debug)]
pub struct AdmissionPermit<'a> {
    controller: &'a AdmissionController,
}

impl Drop for AdmissionPermit<'_> {
    fn drop(&mut self) {
        self.controller.release();
    }
}
