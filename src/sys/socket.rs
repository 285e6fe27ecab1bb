use std::io::{self, IoSlice, IoSliceMut};
use std::mem;
use std::net::{Shutdown, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::os::unix::io::{AsRawFd, FromRawFd, IntoRawFd, RawFd};

use libc::{c_int, c_void, sockaddr, socklen_t, SOCK_CLOEXEC};

use super::fd::FileDesc;

/// A non-blocking socket fd plus the small set of syscalls the reactor core
/// needs: bind/listen/accept on the acceptor side, read/write/shutdown on
/// the connection side. Deliberately not a general-purpose sockets crate —
/// higher-level concerns (address resolution, UDP, Unix sockets) are out of
/// scope, matching spec.md's "socket-ops" external-collaborator boundary.
#[derive(Debug)]
pub struct Socket(FileDesc);

impl Socket {
    /// A non-blocking, close-on-exec `SOCK_STREAM` socket for `addr`'s family.
    pub fn new_stream_nonblocking(addr: &SocketAddr) -> io::Result<Socket> {
        let fam = match addr {
            SocketAddr::V4(..) => libc::AF_INET,
            SocketAddr::V6(..) => libc::AF_INET6,
        };

        match syscall!(socket(fam, libc::SOCK_STREAM | SOCK_CLOEXEC, 0)) {
            Ok(fd) => {
                let fd = unsafe { FileDesc::new(fd) };
                let sock = Socket(fd);
                sock.set_nonblocking(true)?;
                return Ok(sock);
            }
            Err(ref e) if e.raw_os_error() == Some(libc::EINVAL) => {}
            Err(e) => return Err(e),
        }

        // SOCK_CLOEXEC unsupported on this kernel; fall back and set flags by hand.
        let fd = syscall!(socket(fam, libc::SOCK_STREAM, 0))?;
        let fd = unsafe { FileDesc::new(fd) };
        fd.set_cloexec()?;
        let sock = Socket(fd);
        sock.set_nonblocking(true)?;
        Ok(sock)
    }

    pub fn bind(&self, addr: &SocketAddr) -> io::Result<()> {
        let (storage, len) = sockaddr_of(addr);
        syscall!(bind(self.0.as_raw_fd(), storage.as_ptr(), len))?;
        Ok(())
    }

    pub fn listen(&self, backlog: i32) -> io::Result<()> {
        syscall!(listen(self.0.as_raw_fd(), backlog))?;
        Ok(())
    }

    /// Accepts one pending connection, returning the new socket and the
    /// peer's address. Callers loop this until `WouldBlock`.
    pub fn accept(&self) -> io::Result<(Socket, SocketAddr)> {
        let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
        let mut len = mem::size_of_val(&storage) as socklen_t;

        let fd = match syscall!(accept4(
            self.0.as_raw_fd(),
            &mut storage as *mut _ as *mut sockaddr,
            &mut len,
            SOCK_CLOEXEC
        )) {
            Ok(fd) => fd,
            Err(ref e) if e.raw_os_error() == Some(libc::ENOSYS) => {
                let fd = syscall!(accept(
                    self.0.as_raw_fd(),
                    &mut storage as *mut _ as *mut sockaddr,
                    &mut len
                ))?;
                let fd_owned = unsafe { FileDesc::new(fd) };
                fd_owned.set_cloexec()?;
                let addr = sockaddr_to_addr(&storage, len as usize)?;
                return Ok((Socket(fd_owned), addr));
            }
            Err(e) => return Err(e),
        };

        let addr = sockaddr_to_addr(&storage, len as usize)?;
        Ok((Socket(unsafe { FileDesc::new(fd) }), addr))
    }

    pub fn connect(&self, addr: &SocketAddr) -> io::Result<()> {
        let (storage, len) = sockaddr_of(addr);
        match syscall!(connect(self.0.as_raw_fd(), storage.as_ptr(), len)) {
            Ok(_) => Ok(()),
            Err(ref e) if e.raw_os_error() == Some(libc::EINPROGRESS) => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        sockname(|storage, len| unsafe { libc::getsockname(self.0.as_raw_fd(), storage, len) })
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        sockname(|storage, len| unsafe { libc::getpeername(self.0.as_raw_fd(), storage, len) })
    }

    pub fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let n = syscall!(recv(
            self.0.as_raw_fd(),
            buf.as_mut_ptr() as *mut c_void,
            buf.len(),
            0
        ))?;
        Ok(n as usize)
    }

    pub fn read_vectored(&self, bufs: &mut [IoSliceMut<'_>]) -> io::Result<usize> {
        let n = syscall!(readv(
            self.0.as_raw_fd(),
            bufs.as_mut_ptr() as *mut libc::iovec,
            bufs.len() as c_int
        ))?;
        Ok(n as usize)
    }

    pub fn write(&self, buf: &[u8]) -> io::Result<usize> {
        let n = syscall!(send(
            self.0.as_raw_fd(),
            buf.as_ptr() as *const c_void,
            buf.len(),
            libc::MSG_NOSIGNAL
        ))?;
        Ok(n as usize)
    }

    pub fn write_vectored(&self, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
        let n = syscall!(writev(
            self.0.as_raw_fd(),
            bufs.as_ptr() as *const libc::iovec,
            bufs.len() as c_int
        ))?;
        Ok(n as usize)
    }

    pub fn shutdown(&self, how: Shutdown) -> io::Result<()> {
        let how = match how {
            Shutdown::Write => libc::SHUT_WR,
            Shutdown::Read => libc::SHUT_RD,
            Shutdown::Both => libc::SHUT_RDWR,
        };
        syscall!(shutdown(self.0.as_raw_fd(), how))?;
        Ok(())
    }

    pub fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        let mut val = nonblocking as c_int;
        syscall!(ioctl(self.0.as_raw_fd(), libc::FIONBIO, &mut val))?;
        Ok(())
    }

    pub fn set_reuse_addr(&self, on: bool) -> io::Result<()> {
        self.set_opt(libc::SOL_SOCKET, libc::SO_REUSEADDR, on as c_int)
    }

    pub fn set_reuse_port(&self, on: bool) -> io::Result<()> {
        self.set_opt(libc::SOL_SOCKET, libc::SO_REUSEPORT, on as c_int)
    }

    pub fn set_keepalive(&self, on: bool) -> io::Result<()> {
        self.set_opt(libc::SOL_SOCKET, libc::SO_KEEPALIVE, on as c_int)
    }

    pub fn set_nodelay(&self, on: bool) -> io::Result<()> {
        self.set_opt(libc::IPPROTO_TCP, libc::TCP_NODELAY, on as c_int)
    }

    pub fn take_error(&self) -> io::Result<Option<io::Error>> {
        let mut raw: c_int = 0;
        let mut len = mem::size_of::<c_int>() as socklen_t;
        syscall!(getsockopt(
            self.0.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_ERROR,
            &mut raw as *mut _ as *mut c_void,
            &mut len
        ))?;
        if raw == 0 {
            Ok(None)
        } else {
            Ok(Some(io::Error::from_raw_os_error(raw)))
        }
    }

    fn set_opt(&self, level: c_int, name: c_int, val: c_int) -> io::Result<()> {
        syscall!(setsockopt(
            self.0.as_raw_fd(),
            level,
            name,
            &val as *const _ as *const c_void,
            mem::size_of::<c_int>() as socklen_t
        ))?;
        Ok(())
    }
}

fn sockname<F>(f: F) -> io::Result<SocketAddr>
where
    F: FnOnce(*mut sockaddr, *mut socklen_t) -> c_int,
{
    unsafe {
        let mut storage: libc::sockaddr_storage = mem::zeroed();
        let mut len = mem::size_of_val(&storage) as socklen_t;
        let ret = f(&mut storage as *mut _ as *mut sockaddr, &mut len);
        if ret == -1 {
            return Err(io::Error::last_os_error());
        }
        sockaddr_to_addr(&storage, len as usize)
    }
}

/// Owns a real `sockaddr_in`/`sockaddr_in6` built field-by-field from a
/// `std::net` address. Rust's `SocketAddrV4`/`SocketAddrV6` have not been
/// layout-compatible with these C structs since Rust 1.64 (no `sin_family`,
/// host-order port, different field order), so `bind`/`connect` can't just
/// reinterpret-cast a reference to one — they need an actual `sockaddr_in`
/// built the way `sockaddr_to_addr` below reads one back.
enum SockAddrStorage {
    V4(libc::sockaddr_in),
    V6(libc::sockaddr_in6),
}

impl SockAddrStorage {
    fn as_ptr(&self) -> *const sockaddr {
        match self {
            SockAddrStorage::V4(a) => a as *const _ as *const sockaddr,
            SockAddrStorage::V6(a) => a as *const _ as *const sockaddr,
        }
    }
}

fn sockaddr_of(addr: &SocketAddr) -> (SockAddrStorage, socklen_t) {
    match addr {
        SocketAddr::V4(a) => {
            let mut sin: libc::sockaddr_in = unsafe { mem::zeroed() };
            sin.sin_family = libc::AF_INET as libc::sa_family_t;
            sin.sin_port = a.port().to_be();
            sin.sin_addr = libc::in_addr {
                s_addr: u32::from_ne_bytes(a.ip().octets()),
            };
            (
                SockAddrStorage::V4(sin),
                mem::size_of::<libc::sockaddr_in>() as socklen_t,
            )
        }
        SocketAddr::V6(a) => {
            let mut sin6: libc::sockaddr_in6 = unsafe { mem::zeroed() };
            sin6.sin6_family = libc::AF_INET6 as libc::sa_family_t;
            sin6.sin6_port = a.port().to_be();
            sin6.sin6_flowinfo = a.flowinfo();
            sin6.sin6_addr = libc::in6_addr {
                s6_addr: a.ip().octets(),
            };
            sin6.sin6_scope_id = a.scope_id();
            (
                SockAddrStorage::V6(sin6),
                mem::size_of::<libc::sockaddr_in6>() as socklen_t,
            )
        }
    }
}

fn sockaddr_to_addr(storage: &libc::sockaddr_storage, len: usize) -> io::Result<SocketAddr> {
    match storage.ss_family as c_int {
        libc::AF_INET => {
            assert!(len >= mem::size_of::<libc::sockaddr_in>());
            let addr: libc::sockaddr_in =
                unsafe { *(storage as *const _ as *const libc::sockaddr_in) };
            let ip = addr.sin_addr.s_addr.to_ne_bytes();
            Ok(SocketAddr::V4(SocketAddrV4::new(
                std::net::Ipv4Addr::new(ip[0], ip[1], ip[2], ip[3]),
                u16::from_be(addr.sin_port),
            )))
        }
        libc::AF_INET6 => {
            assert!(len >= mem::size_of::<libc::sockaddr_in6>());
            let addr: libc::sockaddr_in6 =
                unsafe { *(storage as *const _ as *const libc::sockaddr_in6) };
            Ok(SocketAddr::V6(SocketAddrV6::new(
                std::net::Ipv6Addr::from(addr.sin6_addr.s6_addr),
                u16::from_be(addr.sin6_port),
                addr.sin6_flowinfo,
                addr.sin6_scope_id,
            )))
        }
        _ => Err(io::Error::new(io::ErrorKind::InvalidInput, "invalid address family")),
    }
}

impl FromRawFd for Socket {
    unsafe fn from_raw_fd(fd: RawFd) -> Self {
        Socket(FileDesc::from_raw_fd(fd))
    }
}

impl IntoRawFd for Socket {
    fn into_raw_fd(self) -> RawFd {
        self.0.into_raw_fd()
    }
}

impl AsRawFd for Socket {
    fn as_raw_fd(&self) -> RawFd {
        self.0.as_raw_fd()
    }
}
