use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use reactorio_driver::{HandleId, Interest};

use crate::authorization::Authorization;
use crate::dispatch::Invoker;
use crate::strand::Strand;

/// A per-kind socket callback (readable/writable/error), stored so it can
/// fire repeatedly (level-triggered, or re-armed one-shot) without being
/// consumed. Each firing builds a fresh, single-use [`Invoker`] around the
/// shared function, mirroring the pattern `Chronology::announce` uses for
/// recurring timer callbacks.
#[derive(Clone)]
pub struct CallbackSlot {
    function: Arc<Mutex<dyn FnMut() + Send>>,
    authorization: Authorization,
    strand: Option<Strand>,
}

impl CallbackSlot {
    pub fn new(function: impl FnMut() + Send + 'static, authorization: Authorization, strand: Option<Strand>) -> Self {
        Self {
            function: Arc::new(Mutex::new(function)),
            authorization,
            strand,
        }
    }

    pub fn to_invoker(&self) -> Invoker {
        let function = self.function.clone();
        Invoker::new(move || (function.lock())(), self.authorization.clone(), self.strand.clone())
    }
}

/// A generation-stamped index into the Registry's arena, returned by `add`
/// and used by every later operation on that registration.
///
/// Grounded on Design Notes §9's "smart-pointer-based lifetime for entries":
/// the source answers "is it still alive during my callback?" with
/// `shared_ptr` plus an atomic counter; this rewrite instead packs
/// generation, process-counter and detach-pending into one atomic word per
/// arena slot, so `lookup_and_mark_processing` is a lock-free CAS rather
/// than heap churn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryRef {
    pub(crate) slot: u32,
    pub(crate) generation: u32,
}

// Bit layout of the packed state word: [ generation:32 | counter:16 | detach_pending:1 | reserved:15 ]
const COUNTER_SHIFT: u32 = 16;
const DETACH_BIT: u64 = 1 << 15;
const COUNTER_MASK: u64 = 0xFFFF << COUNTER_SHIFT;
const GEN_SHIFT: u32 = 32;

fn pack(generation: u32, counter: u16, detach_pending: bool) -> u64 {
    ((generation as u64) << GEN_SHIFT)
        | ((counter as u64) << COUNTER_SHIFT)
        | if detach_pending { DETACH_BIT } else { 0 }
}

fn unpack(word: u64) -> (u32, u16, bool) {
    let generation = (word >> GEN_SHIFT) as u32;
    let counter = ((word & COUNTER_MASK) >> COUNTER_SHIFT) as u16;
    let detach_pending = word & DETACH_BIT != 0;
    (generation, counter, detach_pending)
}

/// The registry's per-handle record (§3 `RegistryEntry`).
pub struct Entry {
    pub handle: HandleId,
    pub interest: Interest,
    pub on_readable: Option<CallbackSlot>,
    pub on_writable: Option<CallbackSlot>,
    pub on_error: Option<CallbackSlot>,
    pub on_detach: Option<Invoker>,
    state: AtomicU64,
    /// Whether this slot is occupied at all; a freed slot with a stale
    /// generation must never be mistaken for a live entry.
    pub(crate) live: bool,
}

impl Entry {
    pub(crate) fn new(handle: HandleId, generation: u32) -> Self {
        Self {
            handle,
            interest: Interest::none(),
            on_readable: None,
            on_writable: None,
            on_error: None,
            on_detach: None,
            state: AtomicU64::new(pack(generation, 0, false)),
            live: true,
        }
    }

    pub(crate) fn generation(&self) -> u32 {
        unpack(self.state.load(Ordering::Acquire)).0
    }

    pub(crate) fn detachment_pending(&self) -> bool {
        unpack(self.state.load(Ordering::Acquire)).2
    }

    pub(crate) fn process_counter(&self) -> u16 {
        unpack(self.state.load(Ordering::Acquire)).1
    }

    /// Atomically: if the generation matches and the entry is not already
    /// marked-for-detach-at-zero, increment the process-counter and return
    /// the new value. Returns `None` when the caller lost the race against
    /// a detach that has already reached zero, per §4.2's invariant that an
    /// entry must never be dispatched to after its detach callback fired.
    pub(crate) fn try_mark_processing(&self, generation: u32) -> Option<u16> {
        loop {
            let word = self.state.load(Ordering::Acquire);
            let (gen, counter, detach_pending) = unpack(word);
            if gen != generation {
                return None;
            }
            if detach_pending && counter == 0 {
                // Already fully detached (or detaching with nobody in
                // flight) -- refuse new dispatches.
                return None;
            }
            let new_word = pack(gen, counter + 1, detach_pending);
            if self
                .state
                .compare_exchange(word, new_word, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Some(counter + 1);
            }
        }
    }

    /// Decrement the process-counter, returning `(new_counter,
    /// detachment_pending)`.
    pub(crate) fn decrement_processing(&self, generation: u32) -> (u16, bool) {
        loop {
            let word = self.state.load(Ordering::Acquire);
            let (gen, counter, detach_pending) = unpack(word);
            debug_assert_eq!(gen, generation, "decrement on stale generation");
            debug_assert!(counter > 0, "decrement underflow");
            let new_counter = counter.saturating_sub(1);
            let new_word = pack(gen, new_counter, detach_pending);
            if self
                .state
                .compare_exchange(word, new_word, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return (new_counter, detach_pending);
            }
        }
    }

    /// Mark detachment pending. Returns whether the process-counter was
    /// already zero at the moment of marking (the caller can then run the
    /// driver-remove + detach callback inline, per §4.2).
    pub(crate) fn mark_detachment_pending(&self, generation: u32) -> bool {
        loop {
            let word = self.state.load(Ordering::Acquire);
            let (gen, counter, _) = unpack(word);
            debug_assert_eq!(gen, generation, "mark_detachment_pending on stale generation");
            let new_word = pack(gen, counter, true);
            if self
                .state
                .compare_exchange(word, new_word, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return counter == 0;
            }
        }
    }

    /// Bump the generation for reuse of this slot after it is fully freed.
    pub(crate) fn reset_for_reuse(&mut self, handle: HandleId) {
        let next_gen = self.generation().wrapping_add(1);
        self.handle = handle;
        self.interest = Interest::none();
        self.on_readable = None;
        self.on_writable = None;
        self.on_error = None;
        self.on_detach = None;
        self.state = AtomicU64::new(pack(next_gen, 0, false));
        self.live = true;
    }
}
