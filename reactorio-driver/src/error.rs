use std::io;

/// The error taxonomy shared by the driver and the core on top of it.
///
/// Every fallible operation in `reactorio` returns this type rather than a
/// bare `io::Error`, because several of the outcomes here (`Pending`,
/// `Cancelled`, `NotImplemented`) are not I/O failures at all.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An argument precondition was not met: a null function, an unknown
    /// handle passed without `auto_attach`, or contradictory options.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),

    /// The requested capability is not supported by the selected backend
    /// (e.g. edge trigger on a level-only backend).
    #[error("not implemented on this backend: {0}")]
    NotImplemented(&'static str),

    /// The operation was accepted but will complete asynchronously; the
    /// caller must not assume it has already run.
    #[error("operation pending")]
    Pending,

    /// The backing authorization (`reactorio_core::Authorization`) was
    /// aborted before invocation.
    #[error("cancelled")]
    Cancelled,

    /// A peer-side failure was detected while mapping a driver event.
    #[error("connection dead")]
    ConnectionDead,

    /// A handle-reservation request was denied because a configured limit
    /// was reached.
    #[error("limit exceeded")]
    LimitExceeded,

    /// A raw, unrecoverable OS error surfaced by the driver.
    #[error("I/O failure: {0}")]
    IoFailure(#[from] io::Error),
}

impl Error {
    /// True for errors that the wait loop should swallow and retry (e.g.
    /// `EINTR`), as opposed to fatal errors that must propagate out of
    /// `run`/`poll`.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::IoFailure(e) if e.kind() == io::ErrorKind::Interrupted)
    }
}

/// Convenience alias used throughout `reactorio`.
pub type Result<T> = std::result::Result<T, Error>;
