use std::collections::HashMap;
use std::time::Duration;

use polling::{Event as PollEvent, Events, PollMode, Poller};
use reactorio_log::instrument;

use crate::{
    driver_type::DriverType, Driver, Error, Event, HandleId, Interest, InterestChange,
    ReadinessKind, Result, Trigger,
};

/// The readiness family (epoll/kqueue/poll/event ports), realized through
/// the `polling` crate's own cross-platform unification of those same four
/// backends. One-shot semantics and `SO_ERROR` peeking are layered on top,
/// since `polling` reports only readable/writable/error booleans.
pub struct ReadinessDriver {
    poller: Poller,
    events: Events,
    kind: DriverType,
    // Tracked so `wait` can report `one_shot`-cleared interest truthfully
    // and so edge emulation can mask a handle until re-armed (§4.1).
    registered: HashMap<HandleId, Interest>,
}

impl ReadinessDriver {
    pub fn new(kind: DriverType) -> Result<Self> {
        let poller = Poller::new().map_err(Error::IoFailure)?;
        Ok(Self {
            poller,
            events: Events::new(),
            kind,
            registered: HashMap::new(),
        })
    }

    fn poll_mode(interest: Interest) -> PollMode {
        if interest.one_shot {
            PollMode::Oneshot
        } else if interest.trigger == Trigger::Edge {
            PollMode::Edge
        } else {
            PollMode::Level
        }
    }

    fn key(handle: HandleId) -> usize {
        handle.raw() as usize
    }

    fn to_poll_event(handle: HandleId, interest: Interest) -> PollEvent {
        let mut ev = PollEvent::none(Self::key(handle));
        ev.readable = interest.readable;
        ev.writable = interest.writable;
        ev
    }
}

/// `polling::Event` only reports readable/writable booleans (it has no
/// error bit on any of the backends it unifies), so error detection is
/// layered on top with a manual `SO_ERROR` peek, the same information
/// `backends/iouring.rs` gets for free from `POLLERR`/`POLLHUP`.
#[cfg(unix)]
fn peek_so_error(handle: HandleId) -> Option<i32> {
    use std::os::fd::BorrowedFd;
    let fd = unsafe { BorrowedFd::borrow_raw(handle.raw()) };
    socket2::SockRef::from(&fd).take_error().ok().flatten().and_then(|e| e.raw_os_error())
}

#[cfg(windows)]
fn peek_so_error(handle: HandleId) -> Option<i32> {
    use std::os::windows::io::BorrowedSocket;
    let socket = unsafe { BorrowedSocket::borrow_raw(handle.raw()) };
    socket2::SockRef::from(&socket).take_error().ok().flatten().and_then(|e| e.raw_os_error())
}

impl Driver for ReadinessDriver {
    fn add(&mut self, handle: HandleId, interest: Interest) -> Result<()> {
        if self.registered.contains_key(&handle) {
            return self.update(handle, interest, InterestChange::Include);
        }
        if interest.trigger == Trigger::Edge && !self.supports_native_edge() {
            return Err(Error::NotImplemented("edge trigger on a level-only backend"));
        }
        let ev = Self::to_poll_event(handle, interest);
        let mode = Self::poll_mode(interest);
        unsafe {
            self.poller
                .add_with_mode(handle.raw(), ev, mode)
                .map_err(Error::IoFailure)?;
        }
        self.registered.insert(handle, interest);
        Ok(())
    }

    fn update(&mut self, handle: HandleId, interest: Interest, _change: InterestChange) -> Result<()> {
        if interest.trigger == Trigger::Edge && !self.supports_native_edge() {
            return Err(Error::NotImplemented("edge trigger on a level-only backend"));
        }
        let ev = Self::to_poll_event(handle, interest);
        let mode = Self::poll_mode(interest);
        self.poller
            .modify_with_mode(handle.raw(), ev, mode)
            .map_err(Error::IoFailure)?;
        self.registered.insert(handle, interest);
        Ok(())
    }

    fn remove(&mut self, handle: HandleId) -> Result<()> {
        // Silent success when not present (§4.1): some backends error on an
        // absent descriptor, the contract flattens that away.
        if self.registered.remove(&handle).is_some() {
            let _ = self.poller.delete(handle.raw());
        }
        Ok(())
    }

    fn wait(&mut self, events_out: &mut Vec<Event>, max: usize, timeout: Option<Duration>) -> Result<usize> {
        self.events.clear();
        loop {
            match self.poller.wait(&mut self.events, timeout) {
                Ok(_) => break,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::IoFailure(e)),
            }
        }
        instrument!(
            reactorio_log::Level::DEBUG,
            "readiness_wait",
            backend = self.name(),
            count = self.events.len()
        );
        let mut count = 0;
        for ev in self.events.iter() {
            if count >= max {
                break;
            }
            let handle = HandleId::new(ev.key as _);
            let Some(interest) = self.registered.get_mut(&handle) else {
                continue;
            };
            // `polling` folds a peer error/hangup into the readable/writable
            // booleans it already reported; peek `SO_ERROR` to tell the two
            // apart, the same way `EPOLLERR`/`EPOLLHUP` would on a bare
            // epoll fd (§4.1's per-backend error-detection table).
            if let Some(os_error) = peek_so_error(handle) {
                if interest.one_shot {
                    interest.clear_kind(ReadinessKind::Error);
                    interest.clear_kind(ReadinessKind::Readable);
                    interest.clear_kind(ReadinessKind::Writable);
                }
                events_out.push(Event::Readiness {
                    handle,
                    kind: ReadinessKind::Error,
                    bytes_pending: None,
                    os_error: Some(os_error),
                });
                count += 1;
                continue;
            }
            // One-shot: the kernel-visible interest is already cleared by
            // the backend; mirror that in our bookkeeping before
            // announcing, per §4.1 "One-shot semantics".
            if interest.one_shot {
                if ev.readable {
                    interest.clear_kind(ReadinessKind::Readable);
                }
                if ev.writable {
                    interest.clear_kind(ReadinessKind::Writable);
                }
            }
            if ev.readable {
                events_out.push(Event::Readiness {
                    handle,
                    kind: ReadinessKind::Readable,
                    bytes_pending: None,
                    os_error: None,
                });
                count += 1;
            }
            if count < max && ev.writable {
                events_out.push(Event::Readiness {
                    handle,
                    kind: ReadinessKind::Writable,
                    bytes_pending: None,
                    os_error: None,
                });
                count += 1;
            }
        }
        Ok(count)
    }

    fn name(&self) -> &'static str {
        self.kind.name()
    }

    fn supports_native_edge(&self) -> bool {
        self.kind.supports_native_edge()
    }
}
