use std::collections::HashMap;
use std::os::windows::io::RawSocket;
use std::time::Duration;

use windows_sys::Win32::Foundation::HANDLE;
use windows_sys::Win32::System::IO::{
    CreateIoCompletionPort, GetQueuedCompletionStatus, OVERLAPPED,
};

use crate::{driver_type::DriverType, Driver, Error, Event, HandleId, Interest, InterestChange, Result};

/// The completion family's Windows backend: handles are associated with one
/// I/O completion port and `wait` dequeues completion packets from it.
/// `reactorio` does not submit the buffer-carrying overlapped operations
/// itself (socket protocol logic is out of scope per §1); `add` associates
/// the handle with the port so that a caller-driven overlapped operation's
/// completion surfaces through this same `wait` loop.
pub struct IocpDriver {
    port: HANDLE,
    registered: HashMap<HandleId, Interest>,
}

unsafe impl Send for IocpDriver {}

impl IocpDriver {
    pub fn new() -> Result<Self> {
        let port = unsafe { CreateIoCompletionPort(-1isize as HANDLE, std::ptr::null_mut(), 0, 0) };
        if port.is_null() {
            return Err(Error::IoFailure(std::io::Error::last_os_error()));
        }
        Ok(Self {
            port,
            registered: HashMap::new(),
        })
    }
}

impl Driver for IocpDriver {
    fn add(&mut self, handle: HandleId, interest: Interest) -> Result<()> {
        let raw = handle.raw() as RawSocket as HANDLE;
        let key = handle.raw() as usize;
        let res = unsafe { CreateIoCompletionPort(raw, self.port, key, 0) };
        if res.is_null() {
            return Err(Error::IoFailure(std::io::Error::last_os_error()));
        }
        self.registered.insert(handle, interest);
        Ok(())
    }

    fn update(&mut self, handle: HandleId, interest: Interest, _change: InterestChange) -> Result<()> {
        // IOCP associations cannot be narrowed once made; interest is kept
        // only for the core's bookkeeping of what the caller last asked for.
        self.registered.insert(handle, interest);
        Ok(())
    }

    fn remove(&mut self, handle: HandleId) -> Result<()> {
        self.registered.remove(&handle);
        Ok(())
    }

    fn wait(&mut self, events_out: &mut Vec<Event>, max: usize, timeout: Option<Duration>) -> Result<usize> {
        let mut count = 0;
        let timeout_ms = timeout.map(|d| d.as_millis() as u32).unwrap_or(u32::MAX);
        while count < max {
            let mut bytes = 0u32;
            let mut key = 0usize;
            let mut overlapped: *mut OVERLAPPED = std::ptr::null_mut();
            let ok = unsafe {
                GetQueuedCompletionStatus(
                    self.port,
                    &mut bytes,
                    &mut key,
                    &mut overlapped,
                    if count == 0 { timeout_ms } else { 0 },
                )
            };
            if ok == 0 && overlapped.is_null() {
                break; // timed out, nothing more pending
            }
            let handle = HandleId::new(key as _);
            let kind = if ok == 0 {
                crate::event::CompletionKind::Error
            } else {
                crate::event::CompletionKind::Received
            };
            events_out.push(Event::Completion {
                handle,
                kind,
                context: overlapped as u64,
                os_error: if ok == 0 {
                    Some(unsafe { windows_sys::Win32::Foundation::GetLastError() } as i32)
                } else {
                    None
                },
            });
            count += 1;
        }
        Ok(count)
    }

    fn name(&self) -> &'static str {
        DriverType::Iocp.name()
    }

    fn supports_native_edge(&self) -> bool {
        false
    }
}
