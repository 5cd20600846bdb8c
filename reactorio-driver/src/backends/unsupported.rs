use std::time::Duration;

use crate::{driver_type::DriverType, Driver, Error, Event, HandleId, Interest, InterestChange, Result};

/// A backend named in §4.1's mapping table (`/dev/poll`, bare `select`) for
/// which this workspace has no direct dependency to realize natively. The
/// capability query (`supports_native_edge`) and `name()` are still stable
/// and queryable, per §4.1's requirement that the refuse-vs-emulate choice
/// be discoverable even when the backend itself can't run here; every
/// mutating operation returns `NotImplemented` rather than silently no-op'ing.
pub struct UnsupportedDriver {
    kind: DriverType,
}

impl UnsupportedDriver {
    pub fn new(kind: DriverType) -> Self {
        Self { kind }
    }
}

impl Driver for UnsupportedDriver {
    fn add(&mut self, _handle: HandleId, _interest: Interest) -> Result<()> {
        Err(Error::NotImplemented("backend not available in this build"))
    }

    fn update(&mut self, _handle: HandleId, _interest: Interest, _change: InterestChange) -> Result<()> {
        Err(Error::NotImplemented("backend not available in this build"))
    }

    fn remove(&mut self, _handle: HandleId) -> Result<()> {
        Ok(())
    }

    fn wait(&mut self, _events_out: &mut Vec<Event>, _max: usize, _timeout: Option<Duration>) -> Result<usize> {
        Err(Error::NotImplemented("backend not available in this build"))
    }

    fn name(&self) -> &'static str {
        self.kind.name()
    }

    fn supports_native_edge(&self) -> bool {
        self.kind.supports_native_edge()
    }
}
