//! The C8 Polling Driver abstraction: a family of interchangeable backends
//! (readiness: epoll/kqueue/`/dev/poll`/event ports/poll/select; completion:
//! IOCP/io_uring) behind one `Driver` trait, plus the shared data model
//! (`Interest`, `Event`, `Error`) and the Controller wakeup primitive.

#![warn(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod backends;
mod controller;
mod driver;
pub mod driver_type;
mod error;
mod event;
mod handle;
mod interest;
#[macro_use]
mod macros;

pub use controller::Controller;
pub use driver::Driver;
pub use driver_type::DriverType;
pub use error::{Error, Result};
pub use event::{CompletionKind, Event};
pub use handle::HandleId;
pub use interest::{Interest, InterestChange, ReadinessKind, Trigger};

/// Construct the concrete [`Driver`] for a given [`DriverType`], falling
/// back to [`backends::UnsupportedDriver`] for backends this build cannot
/// realize natively (see SPEC_FULL.md's Open Question resolution).
pub fn create_driver(kind: DriverType) -> Result<Box<dyn Driver>> {
    match kind {
        #[cfg(unix)]
        DriverType::Epoll | DriverType::Kqueue | DriverType::Poll | DriverType::EventPort => {
            Ok(Box::new(backends::ReadinessDriver::new(kind)?))
        }
        #[cfg(windows)]
        DriverType::Poll => Ok(Box::new(backends::ReadinessDriver::new(kind)?)),
        #[cfg(all(target_os = "linux", feature = "io-uring"))]
        DriverType::IoUring => Ok(Box::new(backends::IoUringDriver::new()?)),
        #[cfg(windows)]
        DriverType::Iocp => Ok(Box::new(backends::IocpDriver::new()?)),
        _ => Ok(Box::new(backends::UnsupportedDriver::new(kind))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_type_round_trips_through_its_name() {
        for d in [
            DriverType::Epoll,
            DriverType::Kqueue,
            DriverType::DevPoll,
            DriverType::EventPort,
            DriverType::Poll,
            DriverType::Select,
            DriverType::Iocp,
            DriverType::IoUring,
        ] {
            assert_eq!(DriverType::parse(d.name()).unwrap(), Some(d));
        }
    }

    #[test]
    fn empty_driver_name_means_platform_default() {
        assert_eq!(DriverType::parse("").unwrap(), None);
    }

    #[test]
    fn unknown_driver_name_is_invalid() {
        assert!(matches!(DriverType::parse("made-up"), Err(Error::Invalid(_))));
    }

    #[test]
    fn interest_one_shot_clears_the_fired_kind() {
        let mut i = Interest::readable(Trigger::Level, true);
        i.clear_kind(ReadinessKind::Readable);
        assert!(!i.readable);
    }

    #[test]
    fn interest_widen_then_narrow_to_empty() {
        let mut i = Interest::none();
        i.widen(Interest::readable(Trigger::Level, false));
        assert!(!i.is_empty());
        i.narrow(Interest::readable(Trigger::Level, false));
        assert!(i.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn unsupported_backend_reports_not_implemented() {
        let mut d = backends::UnsupportedDriver::new(DriverType::DevPoll);
        let err = d.add(HandleId::new(0), Interest::none());
        assert!(matches!(err, Err(Error::NotImplemented(_))));
    }
}
