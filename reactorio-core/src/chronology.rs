use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use reactorio_log::instrument;

use crate::authorization::Authorization;
use crate::dispatch::{dispatch, Invoker};
use crate::strand::Strand;

/// Why a timer callback fired (§3 Timer lifecycle:
/// `created -> (scheduled)* -> (fired | cancelled) -> closed`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    Deadline,
    Cancelled,
    Closed,
}

type TimerFn = dyn FnMut(TimerEvent) + Send;

struct TimerRecord {
    deadline: Instant,
    period: Option<Duration>,
    authorization: Authorization,
    strand: Option<Strand>,
    callback: Arc<Mutex<TimerFn>>,
    /// Registration order, used to break ties between identical deadlines
    /// (§5 "Timer expirations scheduled for identical deadlines are
    /// announced in registration order").
    sequence: u64,
    closed: bool,
}

/// A single wheel entry; ordered by `(deadline, sequence)` so `BinaryHeap`
/// (a max-heap) combined with `Reverse` gives earliest-deadline-first,
/// ties broken by registration order.
struct WheelEntry {
    deadline: Instant,
    sequence: u64,
    id: u64,
}

impl PartialEq for WheelEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.sequence == other.sequence
    }
}
impl Eq for WheelEntry {}
impl PartialOrd for WheelEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for WheelEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.deadline, self.sequence).cmp(&(other.deadline, other.sequence))
    }
}

struct Inner {
    next_id: u64,
    next_sequence: u64,
    wheel: BinaryHeap<Reverse<WheelEntry>>,
    timers: HashMap<u64, TimerRecord>,
    deferred: VecDeque<Box<dyn FnOnce() + Send>>,
}

/// The timer wheel and deferred-function queue (§4.4 `C4`).
///
/// Grounded on the teacher's `compio-runtime/src/runtime/time.rs`
/// `TimerRuntime`: a `BinaryHeap<Reverse<_>>` keyed by deadline rather than
/// a literal hashed wheel, which is the idiomatic choice for a handful to a
/// few thousand live timers and is exactly what the teacher does.
pub struct Chronology {
    inner: Mutex<Inner>,
}

/// A handle to a live (or formerly live) timer, returned by
/// [`Chronology::create_timer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerId(u64);

impl Chronology {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_id: 0,
                next_sequence: 0,
                wheel: BinaryHeap::new(),
                timers: HashMap::new(),
                deferred: VecDeque::new(),
            }),
        }
    }

    /// Create a timer with the given authorization/strand and callback, but
    /// do not schedule it yet. Mirrors §4.4 `create_timer(options,
    /// session_or_callback)`.
    pub fn create_timer(
        &self,
        authorization: Authorization,
        strand: Option<Strand>,
        callback: impl FnMut(TimerEvent) + Send + 'static,
    ) -> TimerId {
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.timers.insert(
            id,
            TimerRecord {
                deadline: Instant::now(),
                period: None,
                authorization,
                strand,
                callback: Arc::new(Mutex::new(callback)),
                sequence: 0,
                closed: false,
            },
        );
        TimerId(id)
    }

    /// Arm (or re-arm) the timer for `deadline`, optionally making it
    /// periodic.
    pub fn schedule(&self, id: TimerId, deadline: Instant, period: Option<Duration>) {
        let mut inner = self.inner.lock();
        let sequence = inner.next_sequence;
        inner.next_sequence += 1;
        if let Some(record) = inner.timers.get_mut(&id.0) {
            record.deadline = deadline;
            record.period = period;
            record.sequence = sequence;
            inner.wheel.push(Reverse(WheelEntry {
                deadline,
                sequence,
                id: id.0,
            }));
        }
    }

    /// Remove a not-yet-fired timer and announce a cancellation event. A
    /// concurrently firing timer may still deliver its deadline event,
    /// followed by this cancellation (or a close), per §5.
    pub fn cancel(&self, id: TimerId) {
        // Bumping the record's sequence (without removing it -- `close` is
        // still owed its own announcement later) invalidates any wheel
        // entry already pushed for this timer: `announce_expired_and_deferred`
        // only fires an entry whose `sequence` still matches the live
        // record's, so a deadline arriving after cancellation becomes a
        // no-op instead of firing spuriously.
        let record = {
            let mut inner = self.inner.lock();
            let sequence = inner.next_sequence;
            inner.next_sequence += 1;
            inner.timers.get_mut(&id.0).map(|r| {
                r.sequence = sequence;
                (r.authorization.clone(), r.strand.clone(), r.callback.clone())
            })
        };
        if let Some((authorization, strand, callback)) = record {
            announce(&authorization, strand.as_ref(), &callback, TimerEvent::Cancelled);
        }
    }

    /// Close a timer permanently, announcing a close event and removing its
    /// bookkeeping.
    pub fn close(&self, id: TimerId) {
        let record = {
            let mut inner = self.inner.lock();
            inner.timers.remove(&id.0)
        };
        if let Some(record) = record {
            if !record.closed {
                announce(&record.authorization, record.strand.as_ref(), &record.callback, TimerEvent::Closed);
            }
        }
    }

    /// Append a functor to run on the next drain, atomically with respect
    /// to `move_and_execute`'s batch-plus-one semantics (§4.4 `defer`).
    pub fn defer(&self, f: impl FnOnce() + Send + 'static) {
        self.inner.lock().deferred.push_back(Box::new(f));
    }

    /// Atomically append a batch of functors followed by one more, per
    /// §4.4 `move_and_execute`. Used for cross-thread `Core::execute`
    /// submission where the wakeup functor must run after everything
    /// already queued ahead of it in the same batch.
    pub fn move_and_execute(&self, mut sequence: Vec<Box<dyn FnOnce() + Send>>, f: impl FnOnce() + Send + 'static) {
        let mut inner = self.inner.lock();
        inner.deferred.extend(sequence.drain(..));
        inner.deferred.push_back(Box::new(f));
    }

    /// Time until the next deadline, or `None` when no timer is scheduled
    /// (§4.4 `timeout_interval`).
    pub fn timeout_interval(&self) -> Option<Duration> {
        let inner = self.inner.lock();
        let now = Instant::now();
        inner.wheel.peek().map(|entry| {
            entry.0.deadline.saturating_duration_since(now)
        })
    }

    /// Run up to `max_cycles` rounds of "announce everything expired, then
    /// run every deferred functor queued so far", per the wait loop's step
    /// 7 (§4.8). Returns the number of cycles actually run.
    pub fn announce_expired_and_deferred(&self, max_cycles: usize) -> usize {
        let mut cycles = 0;
        while cycles < max_cycles {
            let (fired, deferred) = {
                let mut inner = self.inner.lock();
                let now = Instant::now();
                let mut fired = Vec::new();
                while let Some(Reverse(entry)) = inner.wheel.peek() {
                    if entry.deadline > now {
                        break;
                    }
                    let Reverse(entry) = inner.wheel.pop().unwrap();
                    // The record may have been rescheduled (different
                    // sequence) or removed since this wheel entry was
                    // pushed; only fire if it still matches.
                    if let Some(record) = inner.timers.get(&entry.id) {
                        if record.sequence == entry.sequence {
                            fired.push((
                                entry.id,
                                record.authorization.clone(),
                                record.strand.clone(),
                                record.callback.clone(),
                                record.period,
                            ));
                        }
                    }
                }
                let deferred: Vec<_> = inner.deferred.drain(..).collect();
                (fired, deferred)
            };
            if fired.is_empty() && deferred.is_empty() {
                break;
            }
            instrument!(
                reactorio_log::Level::DEBUG,
                "chronology_cycle",
                fired = fired.len(),
                deferred = deferred.len()
            );
            for (id, authorization, strand, callback, period) in fired {
                announce(&authorization, strand.as_ref(), &callback, TimerEvent::Deadline);
                if let Some(period) = period {
                    // Reschedule from the *old* deadline, not `now`, to
                    // avoid drift, per SPEC_FULL.md's periodic-timer rule.
                    let mut inner = self.inner.lock();
                    if let Some(record) = inner.timers.get_mut(&id) {
                        let next_deadline = record.deadline + period;
                        record.deadline = next_deadline;
                        let sequence = inner.next_sequence;
                        inner.next_sequence += 1;
                        record.sequence = sequence;
                        inner.wheel.push(Reverse(WheelEntry {
                            deadline: next_deadline,
                            sequence,
                            id,
                        }));
                    }
                }
            }
            for f in deferred {
                f();
            }
            cycles += 1;
        }
        cycles
    }
}

fn announce(authorization: &Authorization, strand: Option<&Strand>, callback: &Arc<Mutex<TimerFn>>, event: TimerEvent) {
    let callback = callback.clone();
    let invoker = Invoker::new(
        move || (callback.lock())(event),
        authorization.clone(),
        strand.cloned(),
    );
    let _ = dispatch(invoker, Strand::current().as_ref(), None, false);
}

impl Default for Chronology {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc as StdArc;

    #[test]
    fn timers_with_identical_deadlines_fire_in_registration_order() {
        let chrono = Chronology::new();
        let order = StdArc::new(Mutex::new(Vec::new()));
        let now = Instant::now();
        for i in 0..3 {
            let order = order.clone();
            let id = chrono.create_timer(Authorization::new(), None, move |ev| {
                if ev == TimerEvent::Deadline {
                    order.lock().push(i);
                }
            });
            chrono.schedule(id, now, None);
        }
        chrono.announce_expired_and_deferred(4);
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn timeout_interval_is_none_when_nothing_scheduled() {
        let chrono = Chronology::new();
        assert!(chrono.timeout_interval().is_none());
    }

    #[test]
    fn periodic_timer_reschedules_without_drift() {
        let chrono = Chronology::new();
        let fires = StdArc::new(AtomicUsize::new(0));
        let fires2 = fires.clone();
        let now = Instant::now();
        let id = chrono.create_timer(Authorization::new(), None, move |ev| {
            if ev == TimerEvent::Deadline {
                fires2.fetch_add(1, Ordering::SeqCst);
            }
        });
        chrono.schedule(id, now, Some(Duration::from_millis(1)));
        std::thread::sleep(Duration::from_millis(5));
        chrono.announce_expired_and_deferred(10);
        assert!(fires.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn cancelled_timer_does_not_fire_once_its_deadline_arrives() {
        let chrono = Chronology::new();
        let events = StdArc::new(Mutex::new(Vec::new()));
        let events2 = events.clone();
        let id = chrono.create_timer(Authorization::new(), None, move |ev| events2.lock().push(ev));
        let deadline = Instant::now() + Duration::from_millis(5);
        chrono.schedule(id, deadline, None);
        chrono.cancel(id);
        std::thread::sleep(Duration::from_millis(20));
        chrono.announce_expired_and_deferred(4);
        assert_eq!(*events.lock(), vec![TimerEvent::Cancelled]);
    }

    #[test]
    fn defer_runs_on_next_drain() {
        let chrono = Chronology::new();
        let ran = StdArc::new(std::sync::atomic::AtomicBool::new(false));
        let ran2 = ran.clone();
        chrono.defer(move || ran2.store(true, Ordering::SeqCst));
        chrono.announce_expired_and_deferred(1);
        assert!(ran.load(Ordering::SeqCst));
    }
}
