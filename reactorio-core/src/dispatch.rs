use parking_lot::MutexGuard;
use reactorio_driver::Error;

use crate::authorization::Authorization;
use crate::strand::Strand;

/// A user function packaged with an [`Authorization`] and an optional
/// [`Strand`] affinity (§3 `Invoker`, §4.5 `C5`).
///
/// Only the zero-argument arity is modeled directly, per Design Notes §9
/// ("variadic callback templates... expose only the needed arities as
/// concrete variants"): every notification this crate delivers (socket
/// readiness/error, detach, timer fire) carries its payload, if any,
/// through the closure's captures rather than through `Invoker` itself.
pub struct Invoker {
    function: Box<dyn FnMut() + Send>,
    authorization: Authorization,
    strand: Option<Strand>,
}

impl Invoker {
    pub fn new(function: impl FnMut() + Send + 'static, authorization: Authorization, strand: Option<Strand>) -> Self {
        Self {
            function: Box::new(function),
            authorization,
            strand,
        }
    }

    pub fn authorization(&self) -> &Authorization {
        &self.authorization
    }

    pub fn strand(&self) -> Option<&Strand> {
        self.strand.as_ref()
    }

    /// First CAS-checks the authorization; if open, runs the function and
    /// returns `Ok`, else returns `Cancelled` without running it (§4.5).
    fn call(&mut self) -> Result<(), Error> {
        if self.authorization.is_aborted() {
            return Err(Error::Cancelled);
        }
        (self.function)();
        Ok(())
    }
}

/// Whether to run a callback bound to `callee_strand` inline on the calling
/// thread or to defer it onto a strand/executor, per §4.7:
///
/// - inline when `callee_strand == caller_strand`, or `callee_strand` is
///   unspecified and the caller marks the call `immediate`, or the calling
///   thread is already draining `callee_strand`;
/// - otherwise deferred onto `callee_strand`, or the supplied executor when
///   `callee_strand` is `None`.
fn passthrough(callee_strand: Option<&Strand>, caller_strand: Option<&Strand>, immediate: bool) -> bool {
    match callee_strand {
        Some(callee) => {
            if let Some(caller) = caller_strand {
                if caller == callee {
                    return true;
                }
            }
            Strand::current().as_ref() == Some(callee)
        }
        None => immediate,
    }
}

/// Dispatch `invoker`, honoring its strand affinity. Returns `Ok(())` when
/// run inline and it succeeded, `Err(Cancelled)` when run inline and
/// authorization was aborted, `Err(Invalid)` when no executor/strand is
/// available for a deferred call, and `Err(Pending)` when the call was
/// successfully enqueued rather than run.
pub fn dispatch(
    invoker: Invoker,
    caller_strand: Option<&Strand>,
    executor: Option<&Strand>,
    defer: bool,
) -> Result<(), Error> {
    dispatch_with_mutex::<()>(invoker, caller_strand, executor, defer, None)
}

/// The `dispatch` form that additionally accepts a mutex guard already held
/// by the caller: when inline invocation is chosen, the guarded mutex is
/// unlocked for the duration of the call and relocked afterward (§4.7),
/// mirroring the teacher's C++ `Callback<SIGNATURE>::dispatch(..., MUTEX*
/// mutex)` overload (`ntci_callback.h`), whose `bslmt::UnLockGuard` unlocks
/// an already-locked mutex on construction and relocks it on destruction.
/// Deferred invocation never touches the guard: the callback runs later, on
/// a different stack, after this call has already returned it to the caller.
pub fn dispatch_with_mutex<T>(
    mut invoker: Invoker,
    caller_strand: Option<&Strand>,
    executor: Option<&Strand>,
    defer: bool,
    held_mutex: Option<&mut MutexGuard<'_, T>>,
) -> Result<(), Error> {
    let callee_strand = invoker.strand.clone();
    if !defer && passthrough(callee_strand.as_ref(), caller_strand, true) {
        return match held_mutex {
            Some(guard) => MutexGuard::unlocked(guard, || invoker.call()),
            None => invoker.call(),
        };
    }
    if let Some(strand) = callee_strand {
        strand.execute(move || {
            let _ = invoker.call();
        });
        Err(Error::Pending)
    } else if let Some(executor) = executor {
        executor.execute(move || {
            let _ = invoker.call();
        });
        Err(Error::Pending)
    } else {
        Err(Error::Invalid("no function/strand/executor to dispatch through"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn same_strand_runs_inline() {
        let strand = Strand::new();
        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = ran.clone();
        let invoker = Invoker::new(move || ran2.store(true, Ordering::SeqCst), Authorization::new(), Some(strand.clone()));
        let result = dispatch(invoker, Some(&strand), None, false);
        assert!(result.is_ok());
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn different_strand_defers_and_returns_pending() {
        let callee = Strand::new();
        let caller = Strand::new();
        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = ran.clone();
        let invoker = Invoker::new(move || ran2.store(true, Ordering::SeqCst), Authorization::new(), Some(callee.clone()));
        let result = dispatch(invoker, Some(&caller), None, false);
        assert!(matches!(result, Err(Error::Pending)));
        assert!(ran.load(Ordering::SeqCst), "strand drains inline when unowned");
    }

    #[test]
    fn aborted_authorization_yields_cancelled_when_inline() {
        let strand = Strand::new();
        let auth = Authorization::new();
        auth.abort();
        let invoker = Invoker::new(|| (), auth, Some(strand.clone()));
        let result = dispatch(invoker, Some(&strand), None, false);
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[test]
    fn held_mutex_is_unlocked_for_the_duration_of_an_inline_call() {
        let strand = Strand::new();
        let held = Arc::new(parking_lot::Mutex::new(0u32));
        let held_in_callback = held.clone();
        let mut guard = held.lock();
        let reentered = Arc::new(AtomicBool::new(false));
        let reentered2 = reentered.clone();
        let invoker = Invoker::new(
            move || reentered2.store(held_in_callback.try_lock().is_some(), Ordering::SeqCst),
            Authorization::new(),
            Some(strand.clone()),
        );
        let result = dispatch_with_mutex(invoker, Some(&strand), None, false, Some(&mut guard));
        assert!(result.is_ok());
        assert!(reentered.load(Ordering::SeqCst), "mutex must be unlocked during the inline call");
    }
}
