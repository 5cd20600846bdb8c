use crate::{HandleId, ReadinessKind};

/// The completion-event counterpart to [`ReadinessKind`], used by the
/// IOCP/io_uring backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionKind {
    /// An `accept()` completed, yielding a new connected handle.
    Accepted,
    /// A `connect()` completed.
    Connected,
    /// A read completed.
    Received,
    /// A write completed.
    Sent,
    /// The operation failed; `os_error` carries the cause.
    Error,
    /// The handle was detached from the backend (e.g. IOCP cancellation).
    Detached,
}

/// A single notification reported by [`crate::Driver::wait`] (§3 `Event`).
#[derive(Debug, Clone)]
pub enum Event {
    /// A readiness event: the handle *may* support the operation, the
    /// caller still performs the actual I/O.
    Readiness {
        /// The handle this event is about.
        handle: HandleId,
        /// Which operation(s) the handle is now ready for.
        kind: ReadinessKind,
        /// Backend-reported hint of how many bytes are pending, when known.
        bytes_pending: Option<usize>,
        /// `SO_ERROR` (or platform equivalent) peeked by the driver, when
        /// the backend surfaces one alongside the event.
        os_error: Option<i32>,
    },
    /// A completion event: the I/O already ran, this reports the outcome.
    Completion {
        /// The handle this event is about.
        handle: HandleId,
        /// What kind of operation completed.
        kind: CompletionKind,
        /// An opaque token identifying which operation this completion
        /// belongs to, supplied by the caller at submission time.
        context: u64,
        /// The OS error code, when `kind` is [`CompletionKind::Error`].
        os_error: Option<i32>,
    },
}

impl Event {
    /// The handle this event pertains to, regardless of variant.
    pub fn handle(&self) -> HandleId {
        match self {
            Event::Readiness { handle, .. } => *handle,
            Event::Completion { handle, .. } => *handle,
        }
    }
}
