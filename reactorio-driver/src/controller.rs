//! The Controller (C3): a wakeup primitive whose readable side is polled by
//! the driver like any other handle. Interrupting the driver from another
//! thread is "write N bytes to the controller".
//!
//! Grounded on the teacher's self-pipe/eventfd implementations
//! (`compio-runtime/src/event/eventfd.rs`, `.../event/pipe.rs`): an eventfd
//! on Linux, a non-blocking pipe elsewhere on Unix.

use std::io::{self, Read, Write};
#[cfg(unix)]
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use reactorio_log::instrument;

use crate::{syscall, Error, HandleId, Result};

#[cfg(all(unix, target_os = "linux"))]
fn new_eventfd() -> Result<OwnedFd> {
    let fd = syscall!(libc::eventfd(0, libc::EFD_CLOEXEC | libc::EFD_NONBLOCK))?;
    Ok(unsafe { OwnedFd::from_raw_fd(fd as RawFd) })
}

#[cfg(unix)]
fn new_pipe() -> Result<(OwnedFd, OwnedFd)> {
    let mut fds = [0 as RawFd; 2];
    syscall!(libc::pipe(fds.as_mut_ptr()))?;
    let (read_fd, write_fd) = unsafe {
        (
            OwnedFd::from_raw_fd(fds[0]),
            OwnedFd::from_raw_fd(fds[1]),
        )
    };
    for fd in [read_fd.as_raw_fd(), write_fd.as_raw_fd()] {
        syscall!(libc::fcntl(fd, libc::F_SETFL, libc::O_NONBLOCK))?;
    }
    Ok((read_fd, write_fd))
}

/// A self-pipe (or eventfd) pair used to wake a thread blocked in
/// `Driver::wait`. Registered in the Registry as a reserved entry; its
/// handle is remembered by the core so the wait loop can special-case it.
#[cfg(unix)]
pub struct Controller {
    read: OwnedFd,
    write: OwnedFd,
    is_eventfd: bool,
}

#[cfg(unix)]
impl Controller {
    /// Create a new controller, preferring eventfd on Linux (one fd, cheap
    /// drain) and falling back to a self-pipe elsewhere.
    pub fn new() -> Result<Self> {
        #[cfg(target_os = "linux")]
        {
            let fd = new_eventfd()?;
            let write = fd.try_clone().map_err(Error::IoFailure)?;
            return Ok(Self {
                read: fd,
                write,
                is_eventfd: true,
            });
        }
        #[cfg(not(target_os = "linux"))]
        {
            let (read, write) = new_pipe()?;
            Ok(Self {
                read,
                write,
                is_eventfd: false,
            })
        }
    }

    /// The handle the driver registers for readability.
    pub fn handle(&self) -> HandleId {
        HandleId::new(self.read.as_raw_fd())
    }

    /// Write `n` wakeup bytes (or one eventfd increment of `n`).
    pub fn interrupt(&self, n: u64) -> Result<()> {
        let fd = self.write.as_raw_fd();
        if self.is_eventfd {
            let buf = n.to_ne_bytes();
            match syscall!(libc::write(fd, buf.as_ptr() as *const _, buf.len())) {
                Ok(_) => Ok(()),
                Err(Error::IoFailure(e)) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
                Err(e) => Err(e),
            }
        } else {
            let buf = vec![0u8; n as usize];
            match (&self.write).write_all(&buf) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
                Err(e) => Err(Error::IoFailure(e)),
            }
        }
    }

    /// Drain exactly the wakeup bytes currently available, per §4.1
    /// "Controller handling". Returns an error if the drain itself failed,
    /// so the caller can recreate the controller without aborting the
    /// reactor.
    pub fn acknowledge(&self) -> Result<()> {
        let mut buf = [0u8; 64];
        loop {
            match (&self.read).read(&mut buf) {
                Ok(0) => return Ok(()),
                Ok(_) => {
                    if self.is_eventfd {
                        // One read drains the full 64-bit counter.
                        return Ok(());
                    }
                    continue;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::IoFailure(e)),
            }
        }
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        instrument!(reactorio_log::Level::DEBUG, "controller_drop");
    }
}

#[cfg(unix)]
impl AsRawFd for Controller {
    fn as_raw_fd(&self) -> RawFd {
        self.read.as_raw_fd()
    }
}

#[cfg(windows)]
mod windows_impl {
    use super::*;
    use std::net::{TcpListener, TcpStream};

    /// Windows has no cheap self-pipe; a connected loopback TCP pair plays
    /// the same role, same as the classic mio/libevent Windows workaround.
    pub struct Controller {
        read: TcpStream,
        write: TcpStream,
    }

    impl Controller {
        /// Create a new controller over a connected loopback TCP pair.
        pub fn new() -> Result<Self> {
            let listener = TcpListener::bind("127.0.0.1:0").map_err(Error::IoFailure)?;
            let addr = listener.local_addr().map_err(Error::IoFailure)?;
            let write = TcpStream::connect(addr).map_err(Error::IoFailure)?;
            let (read, _) = listener.accept().map_err(Error::IoFailure)?;
            read.set_nonblocking(true).map_err(Error::IoFailure)?;
            write.set_nonblocking(true).map_err(Error::IoFailure)?;
            Ok(Self { read, write })
        }

        /// The handle the driver registers for readability.
        pub fn handle(&self) -> HandleId {
            use std::os::windows::io::AsRawSocket;
            HandleId::new(self.read.as_raw_socket())
        }

        /// Write `n` wakeup bytes.
        pub fn interrupt(&self, n: u64) -> Result<()> {
            let buf = vec![0u8; n as usize];
            match (&self.write).write_all(&buf) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
                Err(e) => Err(Error::IoFailure(e)),
            }
        }

        /// Drain every wakeup byte currently available.
        pub fn acknowledge(&self) -> Result<()> {
            let mut buf = [0u8; 64];
            loop {
                match (&self.read).read(&mut buf) {
                    Ok(0) => return Ok(()),
                    Ok(_) => continue,
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                    Err(e) => return Err(Error::IoFailure(e)),
                }
            }
        }
    }
}
#[cfg(windows)]
pub use windows_impl::Controller;
