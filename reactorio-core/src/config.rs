use reactorio_driver::{DriverType, Error, Result, Trigger};

/// The recognized options of §6, collected behind a builder the way the
/// teacher's `compio-driver::ProactorBuilder` / `compio-dispatcher::DispatcherBuilder`
/// collect theirs.
#[derive(Debug, Clone)]
pub struct Config {
    pub driver: Option<DriverType>,
    pub min_threads: usize,
    pub max_threads: usize,
    pub max_events_per_wait: usize,
    pub max_timers_per_wait: usize,
    pub max_cycles_per_wait: usize,
    pub auto_attach: bool,
    pub auto_detach: bool,
    pub one_shot: bool,
    pub trigger: Trigger,
    pub metrics_overall: bool,
    pub metrics_per_waiter: bool,
    pub metrics_per_socket: bool,
}

impl Config {
    /// A builder seeded with the spec's defaults: `one_shot` true only when
    /// `max_threads > 1` (Design Notes §9's load-bearing asymmetry),
    /// `trigger` Level, auto-attach/detach off, one thread.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }
}

pub struct ConfigBuilder {
    driver_name: String,
    min_threads: usize,
    max_threads: usize,
    max_events_per_wait: usize,
    max_timers_per_wait: usize,
    max_cycles_per_wait: usize,
    auto_attach: bool,
    auto_detach: bool,
    one_shot: Option<bool>,
    trigger: Trigger,
    metrics_overall: bool,
    metrics_per_waiter: bool,
    metrics_per_socket: bool,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self {
            driver_name: String::new(),
            min_threads: 1,
            max_threads: 1,
            max_events_per_wait: 128,
            max_timers_per_wait: 64,
            max_cycles_per_wait: 4,
            auto_attach: false,
            auto_detach: false,
            one_shot: None,
            trigger: Trigger::Level,
            metrics_overall: false,
            metrics_per_waiter: false,
            metrics_per_socket: false,
        }
    }
}

impl ConfigBuilder {
    pub fn driver_name(mut self, name: impl Into<String>) -> Self {
        self.driver_name = name.into();
        self
    }

    pub fn min_threads(mut self, n: usize) -> Self {
        self.min_threads = n.max(1);
        self
    }

    pub fn max_threads(mut self, n: usize) -> Self {
        self.max_threads = n.max(1);
        self
    }

    pub fn max_events_per_wait(mut self, n: usize) -> Self {
        self.max_events_per_wait = n;
        self
    }

    pub fn max_timers_per_wait(mut self, n: usize) -> Self {
        self.max_timers_per_wait = n;
        self
    }

    pub fn max_cycles_per_wait(mut self, n: usize) -> Self {
        self.max_cycles_per_wait = n;
        self
    }

    pub fn auto_attach(mut self, v: bool) -> Self {
        self.auto_attach = v;
        self
    }

    pub fn auto_detach(mut self, v: bool) -> Self {
        self.auto_detach = v;
        self
    }

    pub fn one_shot(mut self, v: bool) -> Self {
        self.one_shot = Some(v);
        self
    }

    pub fn trigger(mut self, t: Trigger) -> Self {
        self.trigger = t;
        self
    }

    pub fn metrics_overall(mut self, v: bool) -> Self {
        self.metrics_overall = v;
        self
    }

    pub fn metrics_per_waiter(mut self, v: bool) -> Self {
        self.metrics_per_waiter = v;
        self
    }

    pub fn metrics_per_socket(mut self, v: bool) -> Self {
        self.metrics_per_socket = v;
        self
    }

    pub fn build(self) -> Result<Config> {
        if self.min_threads > self.max_threads {
            return Err(Error::Invalid("min_threads must be <= max_threads"));
        }
        let driver = DriverType::parse(&self.driver_name)?;
        let one_shot = self.one_shot.unwrap_or(self.max_threads > 1);
        Ok(Config {
            driver,
            min_threads: self.min_threads,
            max_threads: self.max_threads,
            max_events_per_wait: self.max_events_per_wait,
            max_timers_per_wait: self.max_timers_per_wait,
            max_cycles_per_wait: self.max_cycles_per_wait,
            auto_attach: self.auto_attach,
            auto_detach: self.auto_detach,
            one_shot,
            trigger: self.trigger,
            metrics_overall: self.metrics_overall,
            metrics_per_waiter: self.metrics_per_waiter,
            metrics_per_socket: self.metrics_per_socket,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_shot_defaults_false_for_single_threaded() {
        let cfg = Config::builder().max_threads(1).build().unwrap();
        assert!(!cfg.one_shot);
    }

    #[test]
    fn one_shot_defaults_true_above_one_thread() {
        let cfg = Config::builder().min_threads(1).max_threads(4).build().unwrap();
        assert!(cfg.one_shot);
    }

    #[test]
    fn min_greater_than_max_is_invalid() {
        let result = Config::builder().min_threads(4).max_threads(2).build();
        assert!(matches!(result, Err(Error::Invalid(_))));
    }
}
