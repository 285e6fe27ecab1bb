use std::cell::RefCell;
use std::io;
use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};
use std::rc::Rc;

use crate::channel::Channel;
use crate::config::{DEFAULT_BACKLOG, IDLE_FD_PATH};
use crate::error::is_out_of_fds;
use crate::event_loop::EventLoop;
use crate::sys::socket::Socket;
use crate::sys::FileDesc;

type NewConnectionCallback = Box<dyn Fn(&EventLoop, Socket, SocketAddr)>;

/// The listen socket plus its channel. Lives entirely on the base loop —
/// `new_connection_cb` is the only thing `TcpServer` ever hands it, so it
/// never needs to know anything about the thread pool it feeds.
pub struct Acceptor {
    fd: RawFd,
    accept_socket: Socket,
    accept_channel: Rc<RefCell<Channel>>,
    listening: bool,
    // Held open so a level-triggered poller never spins hot on an
    // unaccepted connection when the process is out of descriptors; see
    // `handle_emfile`.
    idle_fd: Option<FileDesc>,
    new_connection_cb: Option<NewConnectionCallback>,
}

impl Acceptor {
    pub fn new(addr: &SocketAddr, reuse_port: bool) -> io::Result<Rc<RefCell<Acceptor>>> {
        let accept_socket = Socket::new_stream_nonblocking(addr)?;
        accept_socket.set_reuse_addr(true)?;
        if reuse_port {
            accept_socket.set_reuse_port(true)?;
        }
        accept_socket.bind(addr)?;

        let fd = accept_socket.as_raw_fd();
        let accept_channel = Channel::new(fd);
        let idle_fd = open_idle_fd().ok();

        let acceptor = Rc::new(RefCell::new(Acceptor {
            fd,
            accept_socket,
            accept_channel: accept_channel.clone(),
            listening: false,
            idle_fd,
            new_connection_cb: None,
        }));

        let weak = Rc::downgrade(&acceptor);
        accept_channel.borrow_mut().set_read_callback(move |loop_, _now| {
            if let Some(acceptor) = weak.upgrade() {
                Acceptor::handle_read(&acceptor, loop_);
            }
        });

        Ok(acceptor)
    }

    pub fn set_new_connection_callback<F>(acceptor: &Rc<RefCell<Acceptor>>, cb: F)
    where
        F: Fn(&EventLoop, Socket, SocketAddr) + 'static,
    {
        acceptor.borrow_mut().new_connection_cb = Some(Box::new(cb));
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.accept_socket.local_addr()
    }

    pub fn listening(&self) -> bool {
        self.listening
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// Must run on the base loop. Starts listening and enables read interest.
    pub fn listen(acceptor: &Rc<RefCell<Acceptor>>, loop_: &EventLoop) -> io::Result<()> {
        loop_.assert_in_loop_thread();
        {
            let mut a = acceptor.borrow_mut();
            a.accept_socket.listen(DEFAULT_BACKLOG)?;
            a.listening = true;
        }
        let channel = acceptor.borrow().accept_channel.clone();
        Channel::enable_reading(&channel, loop_);
        Ok(())
    }

    fn handle_read(acceptor: &Rc<RefCell<Acceptor>>, loop_: &EventLoop) {
        loop_.assert_in_loop_thread();

        match acceptor.borrow().accept_socket.accept() {
            Ok((socket, peer_addr)) => {
                // Drop the borrow before invoking the callback: it drives
                // `TcpServer::new_connection`, which may call back into
                // this loop (e.g. `run_in_loop`) and must never find
                // `Acceptor` already borrowed.
                let cb = acceptor.borrow().new_connection_cb.is_some();
                if cb {
                    let a = acceptor.borrow();
                    let f = a.new_connection_cb.as_ref().unwrap();
                    f(loop_, socket, peer_addr);
                }
                // if no callback is registered, `socket` is simply dropped,
                // closing the accepted fd.
            }
            Err(e) => {
                log::error!("Acceptor::handle_read accept failed: {}", e);
                if is_out_of_fds(&e) {
                    Acceptor::handle_emfile(acceptor);
                }
            }
        }
    }

    /// The process is out of file descriptors: a level-triggered poller
    /// would otherwise spin hot on the still-pending connection forever.
    /// Free one fd, accept-and-drop the excess connection, then reopen the
    /// placeholder so the trick is available again next time.
    fn handle_emfile(acceptor: &Rc<RefCell<Acceptor>>) {
        let mut a = acceptor.borrow_mut();
        a.idle_fd = None;
        let _ = a.accept_socket.accept();
        a.idle_fd = open_idle_fd().ok();
    }

    pub fn remove(acceptor: &Rc<RefCell<Acceptor>>, loop_: &EventLoop) {
        let channel = acceptor.borrow().accept_channel.clone();
        Channel::disable_all(&channel, loop_);
        Channel::remove(&channel, loop_);
    }
}

fn open_idle_fd() -> io::Result<FileDesc> {
    let path = std::ffi::CString::new(IDLE_FD_PATH).unwrap();
    let fd = unsafe { libc::open(path.as_ptr(), libc::O_RDONLY | libc::O_CLOEXEC) };
    if fd < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(unsafe { FileDesc::from_raw_fd(fd) })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn idle_fd_opens() {
        assert!(open_idle_fd().is_ok());
    }

    #[test]
    fn new_binds_ephemeral_port() {
        let loop_ = EventLoop::new().unwrap();
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let acceptor = Acceptor::new(&addr, false).unwrap();
        let bound = acceptor.borrow().local_addr().unwrap();
        assert_ne!(bound.port(), 0);
        let _ = loop_;
    }
}
