use std::time::Duration;

use crate::{Event, HandleId, Interest, InterestChange, Result};

/// The contract every backend (readiness or completion) implements, per
/// §4.1. Readiness backends (epoll/kqueue/poll/event ports) and completion
/// backends (io_uring/IOCP) share this one trait; the core above never
/// branches on which family it's talking to except to decide how to
/// interpret the `Event`s `wait` hands back.
pub trait Driver: Send {
    /// Idempotent registration: if `handle` is already present, equivalent
    /// to `update(handle, interest, Include)`.
    fn add(&mut self, handle: HandleId, interest: Interest) -> Result<()>;

    /// Replace the current interest for `handle` atomically from the
    /// driver's point of view. `change` is advisory only.
    fn update(&mut self, handle: HandleId, interest: Interest, change: InterestChange) -> Result<()>;

    /// Remove `handle`. Silent success when not present: some backends
    /// naturally report absent descriptors as an error and this contract
    /// flattens that difference away.
    fn remove(&mut self, handle: HandleId) -> Result<()>;

    /// Block up to `timeout` (or indefinitely when `None`), appending up to
    /// `max` events to `events_out`, and returning how many were appended.
    /// Must be interruptible by another thread writing to the controller
    /// handle registered via [`Driver::add`].
    fn wait(&mut self, events_out: &mut Vec<Event>, max: usize, timeout: Option<Duration>) -> Result<usize>;

    /// Short identifier used in diagnostics and configuration (§4.1).
    fn name(&self) -> &'static str;

    /// Whether an edge-triggered registration is realized natively or must
    /// be refused with `NotImplemented`. Published so the choice (§4.1) is
    /// discoverable without a failed registration attempt.
    fn supports_native_edge(&self) -> bool;
}
