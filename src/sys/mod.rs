//! Raw, non-blocking OS primitives. Nothing above this module touches a
//! libc syscall directly.

pub mod eventfd;
pub mod fd;
pub mod socket;
pub mod timerfd;

pub use eventfd::EventFd;
pub use fd::FileDesc;
pub use socket::Socket;
pub use timerfd::TimerFd;
