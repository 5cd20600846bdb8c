/// Options passed to [`crate::Core::register_waiter`].
#[derive(Debug, Clone, Copy, Default)]
pub struct WaiterOptions {
    /// Relative weight contributed to the load accounting in
    /// `increment_load`/`decrement_load` (§4.8).
    pub weight: usize,
}

/// A thread admitted to a Core's wait loop (§5 "Waiter").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaiterId(pub(crate) u64);
