//! A pool of OS threads admitted as waiters on a shared
//! [`reactorio_core::Core`] (§5 "Waiter").
//!
//! Grounded on the teacher's `compio-dispatcher::Dispatcher`/
//! `DispatcherBuilder`: the same builder surface (worker count, stack size,
//! thread naming) and the same panic-resuming `join`. The teacher's threads
//! each run an independent async `Runtime` pulled from a `flume` task
//! channel; here every thread instead calls into one shared `Core`'s wait
//! loop, so there is no per-task channel to carry -- submission already
//! goes through `Core::execute`. `flume` is accordingly not pulled into
//! this crate's dependency list; see DESIGN.md.

#![warn(missing_docs)]

use std::panic::resume_unwind;
use std::sync::Arc;
use std::thread::{available_parallelism, JoinHandle};

use reactorio_core::{Core, WaiterOptions};
use reactorio_driver::Result;

/// A pool of threads each running [`Core::run`] against the same core.
pub struct WaiterPool {
    core: Arc<Core>,
    threads: Vec<JoinHandle<Result<()>>>,
}

impl WaiterPool {
    fn new_impl(builder: WaiterPoolBuilder) -> Self {
        let core = builder.core;
        let threads = (0..builder.nthreads)
            .map(|index| {
                let core = core.clone();
                let weight = builder.weight;
                let mut thread_builder = std::thread::Builder::new();
                if let Some(s) = builder.stack_size {
                    thread_builder = thread_builder.stack_size(s);
                }
                if let Some(f) = &builder.names {
                    thread_builder = thread_builder.name(f(index));
                }
                thread_builder
                    .spawn(move || {
                        let waiter = core.register_waiter(WaiterOptions { weight });
                        let result = core.run(waiter);
                        core.deregister_waiter(waiter);
                        result
                    })
                    .expect("failed to spawn waiter thread")
            })
            .collect();
        Self { core, threads }
    }

    /// Create a pool with default settings over `core`.
    pub fn new(core: Arc<Core>) -> Self {
        Self::builder(core).build()
    }

    /// Start building a pool over `core`.
    pub fn builder(core: Arc<Core>) -> WaiterPoolBuilder {
        WaiterPoolBuilder::new(core)
    }

    /// The shared core every thread in this pool waits on.
    pub fn core(&self) -> &Arc<Core> {
        &self.core
    }

    /// Stop the shared core and join every waiter thread. Resumes the first
    /// panic encountered, same as the teacher's `Dispatcher::join`.
    pub fn join(self) -> Result<()> {
        self.core.stop()?;
        for thread in self.threads {
            match thread.join() {
                Ok(result) => result?,
                Err(payload) => resume_unwind(payload),
            }
        }
        Ok(())
    }
}

/// A builder for [`WaiterPool`].
pub struct WaiterPoolBuilder {
    core: Arc<Core>,
    nthreads: usize,
    weight: usize,
    stack_size: Option<usize>,
    names: Option<Box<dyn Fn(usize) -> String>>,
}

impl WaiterPoolBuilder {
    fn new(core: Arc<Core>) -> Self {
        Self {
            core,
            nthreads: available_parallelism().map(|n| n.get()).unwrap_or(1),
            weight: 1,
            stack_size: None,
            names: None,
        }
    }

    /// Set the number of waiter threads. Defaults to the available
    /// parallelism, falling back to 1.
    pub fn worker_threads(mut self, n: usize) -> Self {
        self.nthreads = n.max(1);
        self
    }

    /// The load weight each thread in this pool registers with (§4.8 load
    /// accounting).
    pub fn weight(mut self, weight: usize) -> Self {
        self.weight = weight;
        self
    }

    /// Set the stack size of each worker thread.
    pub fn stack_size(mut self, s: usize) -> Self {
        self.stack_size = Some(s);
        self
    }

    /// Provide a function assigning names to worker threads.
    pub fn thread_names(mut self, f: impl Fn(usize) -> String + 'static) -> Self {
        self.names = Some(Box::new(f));
        self
    }

    /// Build the pool, spawning every worker thread immediately.
    pub fn build(self) -> WaiterPool {
        WaiterPool::new_impl(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reactorio_core::Config;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn pool_runs_deferred_work_and_joins_cleanly() {
        let config = Config::builder().max_threads(2).build().unwrap();
        let core = reactorio_core::create_reactor(config).unwrap();
        let pool = WaiterPool::builder(core.clone()).worker_threads(2).build();

        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = ran.clone();
        core.execute(move || {
            ran2.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        std::thread::sleep(std::time::Duration::from_millis(50));
        pool.join().unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }
}
