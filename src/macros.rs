/// Call a libc function, turning a `-1` return into `Err(io::Error::last_os_error())`.
///
/// Does not retry on `EINTR`; callers that need EINTR-as-zero-events semantics
/// (the pollers) handle that explicitly at the call site.
macro_rules! syscall {
    ($fn: ident ( $($arg: expr),* $(,)* ) ) => {{
        let res = unsafe { libc::$fn($($arg, )*) };
        if res == -1 {
            Err(std::io::Error::last_os_error())
        } else {
            Ok(res)
        }
    }};
}
