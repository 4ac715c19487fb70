//! Per-user admission gate.
//!
//! A user present in the busy set has exactly one generation request in
//! flight. [`AdmissionGate::try_acquire`] is the check-and-set used by the
//! router; it hands back a [`GatePermit`] that frees the user when dropped,
//! so every exit path of the background unit (including unwinding and task
//! cancellation) releases the gate exactly once.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

#[derive(Clone, Default)]
pub struct AdmissionGate {
    busy: Arc<Mutex<HashSet<i64>>>,
    released: Arc<AtomicU64>,
}

impl AdmissionGate {
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(dead_code)]
    pub fn is_busy(&self, user_id: i64) -> bool {
        self.busy.lock().contains(&user_id)
    }

    /// Marks the user busy without checking the previous state.
    #[allow(dead_code)]
    pub fn lock(&self, user_id: i64) {
        self.busy.lock().insert(user_id);
    }

    /// Marks the user free. Unlocking a free user is a no-op.
    pub fn unlock(&self, user_id: i64) {
        if self.busy.lock().remove(&user_id) {
            self.released.fetch_add(1, Ordering::Relaxed);
            debug!("Gate released for user {user_id}");
        }
    }

    /// Atomically checks and locks the user. Returns `None` when the user
    /// already has a request in flight.
    pub fn try_acquire(&self, user_id: i64) -> Option<GatePermit> {
        let inserted = self.busy.lock().insert(user_id);
        if !inserted {
            return None;
        }
        Some(GatePermit {
            gate: self.clone(),
            user_id,
        })
    }

    pub fn busy_count(&self) -> usize {
        self.busy.lock().len()
    }

    /// Number of busy -> free transitions observed since startup.
    pub fn released_total(&self) -> u64 {
        self.released.load(Ordering::Relaxed)
    }
}

/// Release capability for one admitted request.
pub struct GatePermit {
    gate: AdmissionGate,
    user_id: i64,
}

impl GatePermit {
    pub fn user_id(&self) -> i64 {
        self.user_id
    }
}

impl std::fmt::Debug for GatePermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatePermit")
            .field("user_id", &self.user_id)
            .finish()
    }
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        self.gate.unlock(self.user_id);
    }
}
