//! Process-wide implicit multi-threading switch.
//!
//! When enabled, Parquet partitions load in parallel on the rayon pool and the
//! snapshot builder runs the nodes of a batch concurrently. Catalogue and
//! index writing force it off for their duration with [`ImplicitMtGuard`].

use std::sync::atomic::{AtomicBool, Ordering};

static IMPLICIT_MT: AtomicBool = AtomicBool::new(false);

/// Turn implicit multi-threading on for the whole process.
pub fn enable_implicit_mt() {
    IMPLICIT_MT.store(true, Ordering::SeqCst);
}

/// Turn implicit multi-threading off for the whole process.
pub fn disable_implicit_mt() {
    IMPLICIT_MT.store(false, Ordering::SeqCst);
}

/// Current state of the switch.
pub fn is_implicit_mt_enabled() -> bool {
    IMPLICIT_MT.load(Ordering::SeqCst)
}

/// Sets the switch for a scope and restores the previous state on drop,
/// including during unwinding.
#[must_use = "the previous state is restored when the guard is dropped"]
pub struct ImplicitMtGuard {
    previous: bool,
}

impl ImplicitMtGuard {
    /// Set the switch to `enabled` until the guard is dropped.
    pub fn new(enabled: bool) -> Self {
        let previous = IMPLICIT_MT.swap(enabled, Ordering::SeqCst);
        Self { previous }
    }

    /// Shorthand for `ImplicitMtGuard::new(false)`.
    pub fn disabled() -> Self {
        Self::new(false)
    }
}

impl Drop for ImplicitMtGuard {
    fn drop(&mut self) {
        IMPLICIT_MT.store(self.previous, Ordering::SeqCst);
    }
}

#[cfg(test)]
pub(crate) static TEST_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
