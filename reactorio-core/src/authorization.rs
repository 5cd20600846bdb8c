use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

const OPEN: u8 = 0;
const ABORTED: u8 = 1;

/// A cancellable guard shared by one or more [`crate::dispatch::Invoker`]s
/// (§4.5 `C5`). `abort()` transitions `Open -> Aborted`; further
/// transitions are no-ops (§5 "cancellation monotonicity").
///
/// Cloning an `Authorization` shares the same underlying flag: every clone
/// observes the same abort.
#[derive(Clone, Debug)]
pub struct Authorization(Arc<AtomicU8>);

impl Authorization {
    /// Create a fresh, open authorization.
    pub fn new() -> Self {
        Self(Arc::new(AtomicU8::new(OPEN)))
    }

    /// Transition to `Aborted`. Idempotent: calling this more than once has
    /// no further effect, and every subsequent invocation attempt through
    /// this (or a cloned) `Authorization` observes the abort (§5).
    pub fn abort(&self) {
        self.0.store(ABORTED, Ordering::Release);
    }

    /// `true` once [`Authorization::abort`] has been observed.
    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::Acquire) == ABORTED
    }
}

impl Default for Authorization {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Authorization {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abort_is_observed_by_every_clone() {
        let a = Authorization::new();
        let b = a.clone();
        assert!(!a.is_aborted());
        b.abort();
        assert!(a.is_aborted());
    }

    #[test]
    fn abort_is_idempotent() {
        let a = Authorization::new();
        a.abort();
        a.abort();
        assert!(a.is_aborted());
    }
}
