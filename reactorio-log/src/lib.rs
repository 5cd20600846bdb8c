//! Logging facade used by every other `reactorio` crate.
//!
//! When the `enable_log` feature is off, all macros compile away to nothing;
//! dependents never pay for logging they didn't opt into. This mirrors the
//! `compio-log` crate in the wider pack this workspace grew out of.

#![warn(missing_docs)]

#[cfg_attr(not(feature = "enable_log"), doc(hidden))]
pub use tracing::*;

#[cfg(not(feature = "enable_log"))]
pub mod dummy;
#[cfg(not(feature = "enable_log"))]
pub use dummy::*;

/// Open (and automatically close) a tracing span around the annotated scope.
#[cfg(feature = "enable_log")]
#[macro_export]
macro_rules! instrument {
    ($lvl:expr, $name:expr, $($fields:tt)*) => {
        let _guard = $crate::span!(target: module_path!(), $lvl, $name, $($fields)*).entered();
    };
    ($lvl:expr, $name:expr) => {
        let _guard = $crate::span!(target: module_path!(), $lvl, $name).entered();
    };
}

#[cfg(not(feature = "enable_log"))]
#[macro_export]
macro_rules! instrument {
    ($lvl:expr, $name:expr, $($fields:tt)*) => {};
    ($lvl:expr, $name:expr) => {};
}
