use crate::Error;

/// The closed set of backends `reactorio` knows about. `Config::driver_name`
/// (a string, for compatibility with the source system's configuration
/// surface) is parsed into this enum at the config boundary and never
/// carried as a string past that point, per Design Notes §9 ("backend
/// selection via string names").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverType {
    /// Linux's `epoll_create1`/`epoll_wait`.
    Epoll,
    /// BSD/macOS's `kqueue`.
    Kqueue,
    /// AIX's `/dev/poll`.
    DevPoll,
    /// Solaris/illumos event ports.
    EventPort,
    /// The POSIX `poll(2)` fallback.
    Poll,
    /// The POSIX `select(2)` fallback.
    Select,
    /// Windows I/O Completion Ports.
    Iocp,
    /// Linux `io_uring`.
    IoUring,
}

impl DriverType {
    /// Parse a configuration string, as recognized by §6. An empty string
    /// means "use the platform default".
    pub fn parse(name: &str) -> Result<Option<Self>, Error> {
        Ok(Some(match name {
            "" => return Ok(None),
            "epoll" => DriverType::Epoll,
            "kqueue" => DriverType::Kqueue,
            "devpoll" => DriverType::DevPoll,
            "eventport" => DriverType::EventPort,
            "poll" => DriverType::Poll,
            "select" => DriverType::Select,
            "iocp" => DriverType::Iocp,
            "iouring" => DriverType::IoUring,
            _ => return Err(Error::Invalid("unknown driver_name")),
        }))
    }

    /// Short identifier used in diagnostics and configuration, the inverse
    /// of [`DriverType::parse`].
    pub fn name(self) -> &'static str {
        match self {
            DriverType::Epoll => "epoll",
            DriverType::Kqueue => "kqueue",
            DriverType::DevPoll => "devpoll",
            DriverType::EventPort => "eventport",
            DriverType::Poll => "poll",
            DriverType::Select => "select",
            DriverType::Iocp => "iocp",
            DriverType::IoUring => "iouring",
        }
    }

    /// The platform's default reactor (readiness) backend, per the table in
    /// §6.
    pub fn default_reactor() -> Self {
        cfg_if::cfg_if! {
            if #[cfg(target_os = "linux")] {
                DriverType::Epoll
            } else if #[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd",
                                 target_os = "dragonfly", target_os = "netbsd", target_os = "openbsd"))] {
                DriverType::Kqueue
            } else if #[cfg(target_os = "solaris")] {
                DriverType::EventPort
            } else if #[cfg(target_os = "aix")] {
                DriverType::DevPoll
            } else if #[cfg(windows)] {
                DriverType::Poll
            } else {
                DriverType::Poll
            }
        }
    }

    /// The platform's default proactor (completion) backend, when one
    /// exists, per the table in §6.
    pub fn default_proactor() -> Option<Self> {
        cfg_if::cfg_if! {
            if #[cfg(target_os = "linux")] {
                Some(DriverType::IoUring)
            } else if #[cfg(windows)] {
                Some(DriverType::Iocp)
            } else {
                None
            }
        }
    }

    /// `true` for the completion family, `false` for readiness.
    pub fn is_completion(self) -> bool {
        matches!(self, DriverType::Iocp | DriverType::IoUring)
    }

    /// Whether this backend natively supports edge-triggered registration,
    /// or only emulates it by auto-masking until re-armed. Published so
    /// callers can query the capability rather than discover it by trial
    /// and error (§4.1).
    pub fn supports_native_edge(self) -> bool {
        matches!(self, DriverType::Epoll | DriverType::Kqueue | DriverType::EventPort)
    }
}
