//! Concrete backend implementations of [`crate::Driver`].
//!
//! `reactorio` follows the teacher's own split: the readiness family
//! (epoll/kqueue/poll/event ports) is realized through the cross-platform
//! `polling` crate, exactly as `compio-driver`'s non-io_uring path does,
//! while the completion family (io_uring, IOCP) gets its own backend per
//! platform.

mod readiness;
mod unsupported;

pub use readiness::ReadinessDriver;
pub use unsupported::UnsupportedDriver;

#[cfg(all(target_os = "linux", feature = "io-uring"))]
mod iouring;
#[cfg(all(target_os = "linux", feature = "io-uring"))]
pub use iouring::IoUringDriver;

#[cfg(windows)]
mod iocp;
#[cfg(windows)]
pub use iocp::IocpDriver;
