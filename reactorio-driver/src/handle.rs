use std::fmt;

/// The platform's native descriptor type: a raw file descriptor on Unix, a
/// raw socket handle on Windows.
#[cfg(unix)]
pub type RawHandle = std::os::unix::io::RawFd;
/// The platform's native descriptor type: a raw file descriptor on Unix, a
/// raw socket handle on Windows.
#[cfg(windows)]
pub type RawHandle = std::os::windows::io::RawSocket;

/// An opaque OS descriptor identifier.
///
/// Compared by identity only: the OS is free to reuse the numeric value
/// after the underlying descriptor is closed, so a `HandleId` must never be
/// held past the `detach` that retires it.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleId(RawHandle);

impl HandleId {
    /// Wrap a raw OS descriptor.
    pub fn new(raw: RawHandle) -> Self {
        Self(raw)
    }

    /// The raw OS descriptor this id identifies.
    pub fn raw(self) -> RawHandle {
        self.0
    }
}

impl fmt::Debug for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HandleId({})", self.0)
    }
}

#[cfg(unix)]
impl std::os::unix::io::AsRawFd for HandleId {
    fn as_raw_fd(&self) -> std::os::unix::io::RawFd {
        self.0
    }
}
