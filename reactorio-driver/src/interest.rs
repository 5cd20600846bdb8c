/// When a notification fires relative to the underlying edge/level state of
/// the descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Fire repeatedly while the condition holds.
    Level,
    /// Fire once on a state transition only.
    Edge,
}

impl Default for Trigger {
    fn default() -> Self {
        Trigger::Level
    }
}

/// Which event kinds a registration wants to be notified about, plus the
/// trigger mode and one-shot flag. Equality is structural (`derive`d), per
/// §3 of the spec this crate implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Interest {
    pub readable: bool,
    pub writable: bool,
    pub error: bool,
    pub trigger: Trigger,
    pub one_shot: bool,
}

impl Interest {
    /// The empty interest: not notified for anything.
    pub const fn none() -> Self {
        Self {
            readable: false,
            writable: false,
            error: false,
            trigger: Trigger::Level,
            one_shot: false,
        }
    }

    /// Readable-only interest at the given trigger/one-shot settings.
    pub const fn readable(trigger: Trigger, one_shot: bool) -> Self {
        Self {
            readable: true,
            writable: false,
            error: false,
            trigger,
            one_shot,
        }
    }

    /// Writable-only interest at the given trigger/one-shot settings.
    pub const fn writable(trigger: Trigger, one_shot: bool) -> Self {
        Self {
            readable: false,
            writable: true,
            error: false,
            trigger,
            one_shot,
        }
    }

    /// True when no event kind is wanted; registries use this to decide
    /// whether `auto_detach` should remove the handle.
    pub fn is_empty(&self) -> bool {
        !self.readable && !self.writable && !self.error
    }

    /// Merge in another interest's flags (used by `show_*`). The trigger and
    /// one-shot settings of `other` win, matching "last arming wins" (§3).
    pub fn widen(&mut self, other: Interest) {
        self.readable |= other.readable;
        self.writable |= other.writable;
        self.error |= other.error;
        self.trigger = other.trigger;
        self.one_shot = other.one_shot;
    }

    /// Clear the flags present in `other` (used by `hide_*`).
    pub fn narrow(&mut self, other: Interest) {
        if other.readable {
            self.readable = false;
        }
        if other.writable {
            self.writable = false;
        }
        if other.error {
            self.error = false;
        }
    }

    /// Clear a single kind after a one-shot notification fires for it.
    pub fn clear_kind(&mut self, kind: ReadinessKind) {
        match kind {
            ReadinessKind::Readable => self.readable = false,
            ReadinessKind::Writable => self.writable = false,
            ReadinessKind::Error => self.error = false,
        }
    }
}

/// The three readiness event kinds (§3 `Event`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessKind {
    Readable,
    Writable,
    Error,
}

/// Whether an `update` call is believed to have widened or narrowed
/// interest; advisory only (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterestChange {
    Include,
    Exclude,
}
