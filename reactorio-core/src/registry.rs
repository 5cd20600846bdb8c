use std::collections::HashMap;

use parking_lot::Mutex;
use reactorio_driver::{Driver, Error, HandleId, Interest, Result};
use reactorio_log::instrument;
use slab::Slab;

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::dispatch::{dispatch, Invoker};
use crate::entry::{CallbackSlot, Entry, EntryRef};
use crate::strand::Strand;

const SHARD_COUNT: usize = 16;

fn shard_of(handle: HandleId) -> usize {
    // A raw descriptor is already a small dense integer on every supported
    // platform, so a direct modulo gives an even-enough spread without
    // pulling in a hasher.
    (handle.raw() as usize) % SHARD_COUNT
}

struct Shard {
    slots: Slab<Entry>,
}

/// The mapping from OS handle to a reference-counted [`Entry`] (§4.2 `C2`).
///
/// Sharded by handle rather than protected by one lock, per §5's "fine-
/// grained locking on a per-bucket basis (or equivalent sharded
/// discipline)" -- a direct, spec-sanctioned simplification of Design Notes
/// §9's lock-free arena-with-CAS suggestion, keeping the CAS'd
/// process-counter/detach/generation word from `Entry` but accepting a
/// short per-bucket lock to reach it.
pub struct Registry {
    shards: Vec<Mutex<Shard>>,
    index: Mutex<HashMap<HandleId, (usize, u32)>>,
    /// Count of entries currently marked detach-pending but not yet
    /// finalized (in-flight callback holding the process-counter above
    /// zero). The wait loop forces a zero timeout while this is nonzero, per
    /// §4.8 step 1.
    pending_detachments: AtomicUsize,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            shards: (0..SHARD_COUNT)
                .map(|_| {
                    Mutex::new(Shard {
                        slots: Slab::new(),
                    })
                })
                .collect(),
            index: Mutex::new(HashMap::new()),
            pending_detachments: AtomicUsize::new(0),
        }
    }

    /// Whether any entry is currently waiting on an in-flight callback
    /// before its detach can finalize.
    pub fn has_pending_detachments(&self) -> bool {
        self.pending_detachments.load(Ordering::Acquire) > 0
    }

    /// Create an Entry with empty interest (§4.2 `add`).
    pub fn add(&self, handle: HandleId) -> Result<EntryRef> {
        let shard_idx = shard_of(handle);
        let mut shard = self.shards[shard_idx].lock();
        let mut index = self.index.lock();
        if index.contains_key(&handle) {
            return Err(Error::Invalid("handle already registered"));
        }
        let slot = shard.slots.insert(Entry::new(handle, 0)) as u32;
        let generation = shard.slots[slot as usize].generation();
        index.insert(handle, (shard_idx, slot));
        Ok(EntryRef { slot, generation })
    }

    /// §4.2 `lookup`.
    pub fn lookup(&self, handle: HandleId) -> Option<EntryRef> {
        let index = self.index.lock();
        let (shard_idx, slot) = *index.get(&handle)?;
        let shard = self.shards[shard_idx].lock();
        let entry = shard.slots.get(slot as usize)?;
        Some(EntryRef {
            slot,
            generation: entry.generation(),
        })
    }

    fn entry_ref_to_shard(&self, handle: HandleId) -> Option<usize> {
        self.index.lock().get(&handle).map(|(s, _)| *s)
    }

    /// Read-only access to an entry's interest/handle, without affecting
    /// the process-counter.
    pub fn with_entry<R>(&self, handle: HandleId, f: impl FnOnce(&Entry) -> R) -> Option<R> {
        let shard_idx = self.entry_ref_to_shard(handle)?;
        let shard = self.shards[shard_idx].lock();
        let (_, slot) = *self.index.lock().get(&handle)?;
        shard.slots.get(slot as usize).map(f)
    }

    /// Mutable access to an entry, e.g. to install callbacks or widen/narrow
    /// interest.
    pub fn with_entry_mut<R>(&self, handle: HandleId, f: impl FnOnce(&mut Entry) -> R) -> Option<R> {
        let shard_idx = self.entry_ref_to_shard(handle)?;
        let mut shard = self.shards[shard_idx].lock();
        let (_, slot) = *self.index.lock().get(&handle)?;
        shard.slots.get_mut(slot as usize).map(f)
    }

    /// Atomically: if present and not already fully detached, increment the
    /// process-counter and return the entry ref (§4.2
    /// `lookup_and_mark_processing`). The caller MUST call
    /// [`Registry::decrement_process_counter`] exactly once.
    pub fn lookup_and_mark_processing(&self, handle: HandleId) -> Option<EntryRef> {
        let shard_idx = self.entry_ref_to_shard(handle)?;
        let shard = self.shards[shard_idx].lock();
        let (_, slot) = *self.index.lock().get(&handle)?;
        let entry = shard.slots.get(slot as usize)?;
        let generation = entry.generation();
        entry.try_mark_processing(generation)?;
        Some(EntryRef { slot, generation })
    }

    /// §4.2 `decrement_process_counter`: returns the counter value after
    /// decrementing. When it reaches zero and detachment is pending, fires
    /// the detach callback exactly once and removes the Entry.
    pub fn decrement_process_counter(&self, handle: HandleId, entry_ref: EntryRef, caller_strand: Option<&Strand>) -> u16 {
        let Some(shard_idx) = self.entry_ref_to_shard(handle) else {
            return 0;
        };
        let (counter, should_finalize) = {
            let shard = self.shards[shard_idx].lock();
            let Some(entry) = shard.slots.get(entry_ref.slot as usize) else {
                return 0;
            };
            if entry.generation() != entry_ref.generation {
                return 0;
            }
            let (counter, detach_pending) = entry.decrement_processing(entry_ref.generation);
            (counter, counter == 0 && detach_pending)
        };
        if should_finalize {
            self.pending_detachments.fetch_sub(1, Ordering::AcqRel);
            self.finalize_detach(handle, entry_ref, caller_strand);
        }
        counter
    }

    /// §4.2 `remove_and_mark_ready_to_detach`: sets `detachment pending`,
    /// records the user callback, then either runs `driver_remove_fn`
    /// inline (when the process-counter is already zero) or leaves removal
    /// to the decrement that reaches zero.
    pub fn remove_and_mark_ready_to_detach(
        &self,
        handle: HandleId,
        user_cb: Option<Invoker>,
        driver: &mut dyn Driver,
        caller_strand: Option<&Strand>,
    ) -> Result<()> {
        let Some(entry_ref) = self.lookup(handle) else {
            return Err(Error::Invalid("unknown handle"));
        };
        let already_zero = {
            let shard_idx = self.entry_ref_to_shard(handle).ok_or(Error::Invalid("unknown handle"))?;
            let mut shard = self.shards[shard_idx].lock();
            let entry = shard
                .slots
                .get_mut(entry_ref.slot as usize)
                .ok_or(Error::Invalid("unknown handle"))?;
            if entry.generation() != entry_ref.generation {
                return Err(Error::Invalid("stale entry"));
            }
            entry.on_detach = user_cb;
            entry.mark_detachment_pending(entry_ref.generation)
        };
        let _ = driver.remove(handle); // silent success when absent, per §4.1.
        if already_zero {
            self.finalize_detach(handle, entry_ref, caller_strand);
        } else {
            self.pending_detachments.fetch_add(1, Ordering::AcqRel);
        }
        Ok(())
    }

    fn finalize_detach(&self, handle: HandleId, entry_ref: EntryRef, caller_strand: Option<&Strand>) {
        let shard_idx = match self.entry_ref_to_shard(handle) {
            Some(s) => s,
            None => return,
        };
        let on_detach = {
            let mut shard = self.shards[shard_idx].lock();
            let mut index = self.index.lock();
            let Some(entry) = shard.slots.get_mut(entry_ref.slot as usize) else {
                return;
            };
            if entry.generation() != entry_ref.generation || !entry.live {
                return;
            }
            let cb = entry.on_detach.take();
            entry.live = false;
            index.remove(&handle);
            shard.slots.remove(entry_ref.slot as usize);
            cb
        };
        instrument!(reactorio_log::Level::DEBUG, "registry_detach_finalized");
        if let Some(invoker) = on_detach {
            let _ = dispatch(invoker, caller_strand, None, false);
        }
    }

    /// Widen an entry's interest for one event kind (`show_readable` etc),
    /// installing `callback` if present. Returns whether the entry existed.
    pub fn show(&self, handle: HandleId, widened: Interest, callback: Option<CallbackSlot>, kind: ShowKind) -> Option<()> {
        self.with_entry_mut(handle, |entry| {
            entry.interest.widen(widened);
            match kind {
                ShowKind::Readable => entry.on_readable = callback,
                ShowKind::Writable => entry.on_writable = callback,
                ShowKind::Error => entry.on_error = callback,
            }
        })
    }

    /// Narrow an entry's interest for one event kind (`hide_readable` etc).
    /// Returns the entry's resulting interest, for the caller to decide
    /// whether `auto_detach` should now remove the handle.
    pub fn hide(&self, handle: HandleId, narrowed: Interest, kind: ShowKind) -> Option<Interest> {
        self.with_entry_mut(handle, |entry| {
            entry.interest.narrow(narrowed);
            match kind {
                ShowKind::Readable => entry.on_readable = None,
                ShowKind::Writable => entry.on_writable = None,
                ShowKind::Error => entry.on_error = None,
            }
            entry.interest
        })
    }

    /// Build a fresh, single-use [`Invoker`] from the callback slot matching
    /// `kind`, for this one event firing.
    pub fn fire(&self, handle: HandleId, kind: ShowKind) -> Option<Invoker> {
        self.with_entry(handle, |entry| {
            let slot = match kind {
                ShowKind::Readable => &entry.on_readable,
                ShowKind::Writable => &entry.on_writable,
                ShowKind::Error => &entry.on_error,
            };
            slot.as_ref().map(CallbackSlot::to_invoker)
        })
        .flatten()
    }

    /// Invoked during shutdown: every entry except `except` is dropped
    /// without announcing individual detachments (§4.2 `close_all`).
    pub fn close_all(&self, except: Option<HandleId>) {
        let mut index = self.index.lock();
        let handles: Vec<HandleId> = index.keys().copied().filter(|h| Some(*h) != except).collect();
        for handle in handles {
            if let Some((shard_idx, slot)) = index.remove(&handle) {
                let mut shard = self.shards[shard_idx].lock();
                shard.slots.try_remove(slot as usize);
            }
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

/// Which per-socket callback slot a `show`/`hide` call targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShowKind {
    Readable,
    Writable,
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;
    use reactorio_driver::Trigger;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    struct NoopDriver;
    impl Driver for NoopDriver {
        fn add(&mut self, _h: HandleId, _i: Interest) -> Result<()> {
            Ok(())
        }
        fn update(&mut self, _h: HandleId, _i: Interest, _c: reactorio_driver::InterestChange) -> Result<()> {
            Ok(())
        }
        fn remove(&mut self, _h: HandleId) -> Result<()> {
            Ok(())
        }
        fn wait(&mut self, _e: &mut Vec<reactorio_driver::Event>, _m: usize, _t: Option<std::time::Duration>) -> Result<usize> {
            Ok(0)
        }
        fn name(&self) -> &'static str {
            "noop"
        }
        fn supports_native_edge(&self) -> bool {
            true
        }
    }

    #[test]
    fn add_then_remove_leaves_registry_empty() {
        let registry = Registry::new();
        let handle = HandleId::new(42);
        registry.add(handle).unwrap();
        assert!(registry.lookup(handle).is_some());
        let mut driver = NoopDriver;
        registry
            .remove_and_mark_ready_to_detach(handle, None, &mut driver, None)
            .unwrap();
        assert!(registry.lookup(handle).is_none());
    }

    #[test]
    fn detach_waits_for_in_flight_callback() {
        let registry = Registry::new();
        let handle = HandleId::new(7);
        registry.add(handle).unwrap();
        let entry_ref = registry.lookup_and_mark_processing(handle).unwrap();

        let detached = Arc::new(AtomicBool::new(false));
        let detached2 = detached.clone();
        let on_detach = Invoker::new(
            move || detached2.store(true, Ordering::SeqCst),
            crate::authorization::Authorization::new(),
            None,
        );
        let mut driver = NoopDriver;
        registry
            .remove_and_mark_ready_to_detach(handle, Some(on_detach), &mut driver, None)
            .unwrap();
        assert!(!detached.load(Ordering::SeqCst), "must not fire while in flight");

        registry.decrement_process_counter(handle, entry_ref, None);
        assert!(detached.load(Ordering::SeqCst), "must fire exactly once after");
    }

    #[test]
    fn show_then_hide_under_auto_detach_empties_interest() {
        let registry = Registry::new();
        let handle = HandleId::new(9);
        registry.add(handle).unwrap();
        registry.show(handle, Interest::readable(Trigger::Level, false), None, ShowKind::Readable);
        let remaining = registry
            .hide(handle, Interest::readable(Trigger::Level, false), ShowKind::Readable)
            .unwrap();
        assert!(remaining.is_empty());
    }
}
