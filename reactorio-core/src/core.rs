//! The Reactor/Proactor Core (§4.8 `C9`): the object that owns a `Driver`,
//! a `Registry`, a `Chronology` and a `Controller`, and runs the wait loop
//! that ties them together.
//!
//! The spec's own concurrency sketch (§4.8) is a generation-mutex guarding a
//! lazily-applied change list plus a wait-admission semaphore, so that a
//! thread wanting to mutate driver state never blocks behind another thread
//! parked in a (possibly unbounded) `wait()` call. This rewrite reaches the
//! same observable property -- mutators make progress promptly regardless of
//! what a waiter thread is doing -- with a single `Mutex<Box<dyn Driver>>`
//! plus a rule: always `Controller::interrupt` before attempting to lock the
//! driver for a structural change. A thread blocked in `wait()` wakes on the
//! controller's readability, returns, and releases the mutex well before any
//! mutator's lock attempt would have to wait indefinitely.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use reactorio_driver::{
    create_driver, CompletionKind, Controller, Driver, DriverType, Error, Event, HandleId, Interest, InterestChange,
    ReadinessKind, Result, Trigger,
};
use reactorio_log::instrument;

use crate::authorization::Authorization;
use crate::chronology::{Chronology, TimerEvent, TimerId};
use crate::config::Config;
use crate::dispatch::{dispatch, Invoker};
use crate::entry::CallbackSlot;
use crate::registry::{Registry, ShowKind};
use crate::strand::Strand;
use crate::waiter::{WaiterId, WaiterOptions};

fn readiness_kind_to_show_kind(kind: ReadinessKind) -> ShowKind {
    match kind {
        ReadinessKind::Readable => ShowKind::Readable,
        ReadinessKind::Writable => ShowKind::Writable,
        ReadinessKind::Error => ShowKind::Error,
    }
}

/// Completion backends (IOCP, io_uring) realize readiness-style events
/// through completion primitives (§4.1's Open Question resolution); this
/// maps the outcome back onto the same three kinds the readiness path uses,
/// so the rest of the wait loop doesn't need to know which family produced
/// the event. `Detached` has no readiness counterpart and is dropped.
fn completion_kind_to_readiness(kind: CompletionKind) -> Option<ReadinessKind> {
    match kind {
        CompletionKind::Accepted | CompletionKind::Connected | CompletionKind::Received => Some(ReadinessKind::Readable),
        CompletionKind::Sent => Some(ReadinessKind::Writable),
        CompletionKind::Error => Some(ReadinessKind::Error),
        CompletionKind::Detached => None,
    }
}

/// The central object described by §2's `C9`: owns the driver, registry,
/// chronology and controller, and exposes the full operation surface of
/// §4.8 plus the attach/show/hide/timer/execute operations of §4.2-§4.6.
pub struct Core {
    driver: Mutex<Box<dyn Driver>>,
    registry: Registry,
    chronology: Chronology,
    controller: Controller,
    controller_handle: HandleId,
    config: Config,
    stopped: AtomicBool,
    /// Sum of the `WaiterOptions::weight` of every waiter currently blocked
    /// inside `Driver::wait` (§4.8 `increment_load`/`decrement_load`).
    load: AtomicUsize,
    /// Each registered waiter's weight, consulted by `wait_once` around its
    /// own `Driver::wait` call.
    waiter_weights: Mutex<HashMap<u64, usize>>,
    next_waiter_id: AtomicU64,
    waiter_count: AtomicUsize,
    /// The first-registered waiter, pinned as the sole blocking waiter under
    /// a statically sized pool (§5 "static load-balancing pins one
    /// principal waiter"); `None` once no waiter is registered.
    principal_waiter: Mutex<Option<WaiterId>>,
}

impl Core {
    /// Construct a core bound to a concrete driver backend. `create_reactor`
    /// / `create_proactor` in `lib.rs` resolve the platform default before
    /// calling this, so `Config::driver == None` never reaches here.
    pub fn new(config: Config, driver_type: DriverType) -> Result<Arc<Self>> {
        let mut driver = create_driver(driver_type)?;
        let controller = Controller::new()?;
        let controller_handle = controller.handle();
        driver.add(controller_handle, Interest::readable(Trigger::Level, false))?;
        Ok(Arc::new(Self {
            driver: Mutex::new(driver),
            registry: Registry::new(),
            chronology: Chronology::new(),
            controller,
            controller_handle,
            config,
            stopped: AtomicBool::new(false),
            load: AtomicUsize::new(0),
            waiter_weights: Mutex::new(HashMap::new()),
            next_waiter_id: AtomicU64::new(0),
            waiter_count: AtomicUsize::new(0),
            principal_waiter: Mutex::new(None),
        }))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// §4.2 `attach`: register a handle with empty interest. The driver
    /// itself only learns about the handle once a `show_*` call arms it, so
    /// a bare attach is cheap and never fails on backends that reject
    /// unarmed registrations.
    pub fn attach(&self, handle: HandleId) -> Result<()> {
        self.registry.add(handle)?;
        Ok(())
    }

    /// §4.2 `detach`: mark ready-to-detach, remove from the driver, and
    /// announce `on_detach` once no callback for this handle is in flight.
    pub fn detach(&self, handle: HandleId, on_detach: Option<Invoker>) -> Result<()> {
        self.controller.interrupt(1)?;
        let mut driver = self.driver.lock();
        self.registry
            .remove_and_mark_ready_to_detach(handle, on_detach, &mut **driver, Strand::current().as_ref())
    }

    fn show(
        &self,
        handle: HandleId,
        kind: ShowKind,
        trigger: Trigger,
        one_shot: Option<bool>,
        callback: impl FnMut() + Send + 'static,
        authorization: Authorization,
        strand: Option<Strand>,
    ) -> Result<()> {
        let one_shot = one_shot.unwrap_or(self.config.one_shot);
        if self.registry.lookup(handle).is_none() {
            if self.config.auto_attach {
                self.registry.add(handle)?;
            } else {
                return Err(Error::Invalid("show_* on an unattached handle"));
            }
        }
        let was_unarmed = self
            .registry
            .with_entry(handle, |e| e.interest.is_empty())
            .unwrap_or(true);
        let requested = match kind {
            ShowKind::Readable => Interest {
                readable: true,
                ..Interest::none()
            },
            ShowKind::Writable => Interest {
                writable: true,
                ..Interest::none()
            },
            ShowKind::Error => Interest {
                error: true,
                ..Interest::none()
            },
        };
        let requested = Interest {
            trigger,
            one_shot,
            ..requested
        };
        if requested.trigger == Trigger::Edge {
            let supports_edge = self.driver.lock().supports_native_edge();
            if !supports_edge {
                return Err(Error::NotImplemented("edge trigger on a level-only backend"));
            }
        }
        let slot = CallbackSlot::new(callback, authorization, strand);
        self.registry
            .show(handle, requested, Some(slot), kind)
            .ok_or(Error::Invalid("unknown handle"))?;
        let merged = self
            .registry
            .with_entry(handle, |e| e.interest)
            .ok_or(Error::Invalid("unknown handle"))?;
        self.controller.interrupt(1)?;
        let mut driver = self.driver.lock();
        if was_unarmed {
            driver.add(handle, merged)
        } else {
            driver.update(handle, merged, InterestChange::Include)
        }
    }

    /// `one_shot: None` falls back to `Config::one_shot` (§6's configured
    /// default); `Some(_)` overrides it for this one registration.
    pub fn show_readable(
        &self,
        handle: HandleId,
        trigger: Trigger,
        one_shot: Option<bool>,
        callback: impl FnMut() + Send + 'static,
        authorization: Authorization,
        strand: Option<Strand>,
    ) -> Result<()> {
        self.show(handle, ShowKind::Readable, trigger, one_shot, callback, authorization, strand)
    }

    /// See [`Core::show_readable`] for the `one_shot` fallback rule.
    pub fn show_writable(
        &self,
        handle: HandleId,
        trigger: Trigger,
        one_shot: Option<bool>,
        callback: impl FnMut() + Send + 'static,
        authorization: Authorization,
        strand: Option<Strand>,
    ) -> Result<()> {
        self.show(handle, ShowKind::Writable, trigger, one_shot, callback, authorization, strand)
    }

    /// See [`Core::show_readable`] for the `one_shot` fallback rule.
    pub fn show_error(
        &self,
        handle: HandleId,
        trigger: Trigger,
        one_shot: Option<bool>,
        callback: impl FnMut() + Send + 'static,
        authorization: Authorization,
        strand: Option<Strand>,
    ) -> Result<()> {
        self.show(handle, ShowKind::Error, trigger, one_shot, callback, authorization, strand)
    }

    fn hide(&self, handle: HandleId, kind: ShowKind) -> Result<()> {
        let narrowed = match kind {
            ShowKind::Readable => Interest {
                readable: true,
                ..Interest::none()
            },
            ShowKind::Writable => Interest {
                writable: true,
                ..Interest::none()
            },
            ShowKind::Error => Interest {
                error: true,
                ..Interest::none()
            },
        };
        let remaining = self
            .registry
            .hide(handle, narrowed, kind)
            .ok_or(Error::Invalid("unknown handle"))?;
        self.controller.interrupt(1)?;
        if remaining.is_empty() && self.config.auto_detach {
            return self.detach(handle, None);
        }
        let mut driver = self.driver.lock();
        driver.update(handle, remaining, InterestChange::Exclude)
    }

    pub fn hide_readable(&self, handle: HandleId) -> Result<()> {
        self.hide(handle, ShowKind::Readable)
    }

    pub fn hide_writable(&self, handle: HandleId) -> Result<()> {
        self.hide(handle, ShowKind::Writable)
    }

    pub fn hide_error(&self, handle: HandleId) -> Result<()> {
        self.hide(handle, ShowKind::Error)
    }

    /// §4.4 `create_timer`: a timer exists but is unscheduled until
    /// `schedule_timer` is called.
    pub fn create_timer(
        &self,
        authorization: Authorization,
        strand: Option<Strand>,
        callback: impl FnMut(TimerEvent) + Send + 'static,
    ) -> TimerId {
        self.chronology.create_timer(authorization, strand, callback)
    }

    pub fn schedule_timer(&self, id: TimerId, deadline: std::time::Instant, period: Option<Duration>) -> Result<()> {
        self.chronology.schedule(id, deadline, period);
        self.controller.interrupt(1)
    }

    pub fn cancel_timer(&self, id: TimerId) {
        self.chronology.cancel(id);
    }

    pub fn close_timer(&self, id: TimerId) {
        self.chronology.close(id);
    }

    /// §4.4 `execute`: run `f` on the core's drain cycle, waking a blocked
    /// waiter so it runs promptly rather than at the next unrelated event.
    pub fn execute(&self, f: impl FnOnce() + Send + 'static) -> Result<()> {
        self.chronology.defer(f);
        self.controller.interrupt(1)
    }

    pub fn move_and_execute(&self, sequence: Vec<Box<dyn FnOnce() + Send>>, f: impl FnOnce() + Send + 'static) -> Result<()> {
        self.chronology.move_and_execute(sequence, f);
        self.controller.interrupt(1)
    }

    /// §5 "Waiter": admit a thread to the wait loop, returning an id used
    /// for `run`/`poll`/`deregister_waiter`. A weight of 0 is treated as 1,
    /// the same as an unspecified weight.
    pub fn register_waiter(&self, options: WaiterOptions) -> WaiterId {
        let id = WaiterId(self.next_waiter_id.fetch_add(1, Ordering::Relaxed));
        self.waiter_weights.lock().insert(id.0, options.weight.max(1));
        self.waiter_count.fetch_add(1, Ordering::AcqRel);
        let mut principal = self.principal_waiter.lock();
        if principal.is_none() {
            *principal = Some(id);
        }
        id
    }

    pub fn deregister_waiter(&self, id: WaiterId) {
        self.waiter_weights.lock().remove(&id.0);
        self.waiter_count.fetch_sub(1, Ordering::AcqRel);
        let mut principal = self.principal_waiter.lock();
        if *principal == Some(id) {
            *principal = None;
        }
    }

    /// Current sum of the weights of every waiter blocked inside
    /// `Driver::wait` right now (§4.8 load accounting).
    pub fn load(&self) -> usize {
        self.load.load(Ordering::Acquire)
    }

    /// §4.2 `close_all` is invoked here, during shutdown, exempting the
    /// controller's own handle so the interrupt below still has something to
    /// wake a blocked waiter with.
    pub fn stop(&self) -> Result<()> {
        self.stopped.store(true, Ordering::Release);
        self.registry.close_all(Some(self.controller_handle));
        self.controller.interrupt(1)
    }

    pub fn restart(&self) {
        self.stopped.store(false, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Run wait cycles on the calling thread until `stop` is called.
    pub fn run(&self, waiter: WaiterId) -> Result<()> {
        while !self.is_stopped() {
            self.wait_once(waiter, true)?;
        }
        Ok(())
    }

    /// Run exactly one non-blocking wait cycle, for manual pumping. Returns
    /// the number of driver events processed.
    pub fn poll(&self, waiter: WaiterId) -> Result<usize> {
        self.wait_once(waiter, false)
    }

    fn increment_load(&self, weight: usize) {
        self.load.fetch_add(weight, Ordering::AcqRel);
    }

    fn decrement_load(&self, weight: usize) {
        self.load.fetch_sub(weight, Ordering::AcqRel);
    }

    /// The §4.8 wait loop, collapsed to the steps that matter with a single
    /// driver mutex: pick a timeout, wait, dispatch each event, then drain
    /// expired timers and deferred functors.
    fn wait_once(&self, waiter: WaiterId, block: bool) -> Result<usize> {
        let timeout = if !block {
            Some(Duration::ZERO)
        } else if self.registry.has_pending_detachments() {
            Some(Duration::ZERO)
        } else {
            self.chronology.timeout_interval()
        };

        let weight = self.waiter_weights.lock().get(&waiter.0).copied().unwrap_or(1);
        let mut events = Vec::with_capacity(self.config.max_events_per_wait);
        let count = {
            self.increment_load(weight);
            let mut driver = self.driver.lock();
            let result = driver.wait(&mut events, self.config.max_events_per_wait, timeout);
            self.decrement_load(weight);
            result?
        };

        for event in &events {
            self.dispatch_event(event);
        }

        self.chronology.announce_expired_and_deferred(self.config.max_cycles_per_wait);
        Ok(count)
    }

    fn dispatch_event(&self, event: &Event) {
        let handle = event.handle();
        if handle == self.controller_handle {
            let _ = self.controller.acknowledge();
            return;
        }
        let readiness_kind = match event {
            Event::Readiness { kind, .. } => Some(*kind),
            Event::Completion { kind, .. } => completion_kind_to_readiness(*kind),
        };
        let Some(readiness_kind) = readiness_kind else {
            return;
        };
        let Some(entry_ref) = self.registry.lookup_and_mark_processing(handle) else {
            return;
        };
        let one_shot = self
            .registry
            .with_entry(handle, |e| e.interest.one_shot)
            .unwrap_or(false);
        if one_shot {
            self.registry.with_entry_mut(handle, |e| e.interest.clear_kind(readiness_kind));
        }
        let show_kind = readiness_kind_to_show_kind(readiness_kind);
        if let Some(invoker) = self.registry.fire(handle, show_kind) {
            instrument!(reactorio_log::Level::TRACE, "core_dispatch_event", handle = handle.raw() as i64);
            let _ = dispatch(invoker, Strand::current().as_ref(), None, false);
        }
        self.registry.decrement_process_counter(handle, entry_ref, Strand::current().as_ref());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixStream;
    use std::os::unix::io::AsRawFd;
    use std::sync::atomic::AtomicBool as StdAtomicBool;

    fn test_core() -> Arc<Core> {
        let config = Config::builder().build().unwrap();
        let driver_type = DriverType::default_reactor();
        Core::new(config, driver_type).unwrap()
    }

    #[test]
    fn readable_peer_write_fires_callback() {
        let core = test_core();
        let waiter = core.register_waiter(WaiterOptions::default());
        let (a, b) = UnixStream::pair().unwrap();
        a.set_nonblocking(true).unwrap();
        let handle = HandleId::new(a.as_raw_fd());
        core.attach(handle).unwrap();
        let fired = Arc::new(StdAtomicBool::new(false));
        let fired2 = fired.clone();
        core.show_readable(handle, Trigger::Level, Some(false), move || fired2.store(true, Ordering::SeqCst), Authorization::new(), None)
            .unwrap();

        std::io::Write::write_all(&mut &b, b"x").unwrap();
        core.poll(waiter).unwrap();
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn show_without_one_shot_falls_back_to_the_configured_default() {
        let config = Config::builder().max_threads(4).build().unwrap();
        assert!(config.one_shot);
        let core = Core::new(config, DriverType::default_reactor()).unwrap();
        let waiter = core.register_waiter(WaiterOptions::default());
        let (a, b) = UnixStream::pair().unwrap();
        a.set_nonblocking(true).unwrap();
        let handle = HandleId::new(a.as_raw_fd());
        core.attach(handle).unwrap();
        let fires = Arc::new(AtomicUsize::new(0));
        let fires2 = fires.clone();
        core.show_readable(handle, Trigger::Level, None, move || {
            fires2.fetch_add(1, Ordering::SeqCst);
        }, Authorization::new(), None)
        .unwrap();

        std::io::Write::write_all(&mut &b, b"x").unwrap();
        core.poll(waiter).unwrap();
        std::io::Write::write_all(&mut &b, b"y").unwrap();
        core.poll(waiter).unwrap();
        assert_eq!(fires.load(Ordering::SeqCst), 1, "config.one_shot == true must clear interest after the first fire");
    }

    #[test]
    fn blocked_waiter_contributes_its_configured_weight_to_load() {
        let core = test_core();
        let waiter = core.register_waiter(WaiterOptions { weight: 5 });
        let core2 = core.clone();
        let handle = std::thread::spawn(move || core2.run(waiter));

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while core.load() == 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(core.load(), 5);

        core.stop().unwrap();
        handle.join().unwrap().unwrap();
        assert_eq!(core.load(), 0);
    }

    #[test]
    fn execute_wakes_a_blocked_waiter() {
        let core = test_core();
        let waiter = core.register_waiter(WaiterOptions::default());
        let ran = Arc::new(StdAtomicBool::new(false));
        let ran2 = ran.clone();
        core.execute(move || ran2.store(true, Ordering::SeqCst)).unwrap();
        core.poll(waiter).unwrap();
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn stop_closes_every_attached_handle() {
        let core = test_core();
        let (a, _b) = UnixStream::pair().unwrap();
        a.set_nonblocking(true).unwrap();
        let handle = HandleId::new(a.as_raw_fd());
        core.attach(handle).unwrap();

        core.stop().unwrap();

        let result = core.detach(handle, None);
        assert!(matches!(result, Err(Error::Invalid(_))), "stop() must have already dropped the entry");
    }

    #[test]
    fn timer_cancel_after_close_is_a_no_op() {
        let core = test_core();
        let fired = Arc::new(Mutex::new(Vec::new()));
        let fired2 = fired.clone();
        let id = core.create_timer(Authorization::new(), None, move |ev| fired2.lock().push(ev));
        core.schedule_timer(id, std::time::Instant::now() + Duration::from_millis(200), None)
            .unwrap();
        core.cancel_timer(id);
        core.close_timer(id);
        assert_eq!(*fired.lock(), vec![TimerEvent::Cancelled, TimerEvent::Closed]);
    }
}
