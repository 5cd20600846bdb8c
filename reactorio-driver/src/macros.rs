/// Run a raw OS call, mapping a `-1`/negative return into
/// [`crate::Error::IoFailure`]. Grounded on `compio-driver`'s `syscall!`
/// macro, which does the same libc-errno dance.
#[macro_export]
macro_rules! syscall {
    (BOOL, $e:expr) => {{
        #[allow(unused_unsafe)]
        let res = unsafe { $e };
        if res == 0 {
            Err($crate::Error::IoFailure(::std::io::Error::last_os_error()))
        } else {
            Ok(res)
        }
    }};
    ($e:expr) => {{
        #[allow(unused_unsafe)]
        let res = unsafe { $e };
        if res < 0 {
            Err($crate::Error::IoFailure(::std::io::Error::last_os_error()))
        } else {
            Ok(res)
        }
    }};
}
