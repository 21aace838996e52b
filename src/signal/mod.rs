//! Signal handling for graceful shutdown (SIGINT/SIGTERM)
//!
//! On the first signal the run is cancelled cooperatively: in-flight builds
//! and transfers finish or abort cleanly, queued-but-unstarted work is
//! dropped, and the run exits with the cancelled code. A second signal
//! exits immediately.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use crate::summary::ExitCode;

/// Shared cancellation flag checked by the worker pool and long loops.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Create a new, unset flag
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Check whether cancellation has been requested
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Install the SIGINT/SIGTERM handler.
///
/// First signal: set the cancel flag and let the run wind down.
/// Second signal: exit immediately with the cancelled exit code.
pub fn install_handler(flag: CancelFlag) -> Result<(), ctrlc::Error> {
    let count = Arc::new(AtomicU8::new(0));
    ctrlc::set_handler(move || {
        let n = count.fetch_add(1, Ordering::SeqCst);
        if n == 0 {
            eprintln!(
                "interrupt received, finishing in-flight operations (press again to exit now)"
            );
            flag.set();
        } else {
            std::process::exit(ExitCode::Cancelled.as_i32());
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_starts_unset() {
        let flag = CancelFlag::new();
        assert!(!flag.is_set());
    }

    #[test]
    fn set_is_visible_through_clones() {
        let flag = CancelFlag::new();
        let other = flag.clone();
        flag.set();
        assert!(other.is_set());
    }
}
