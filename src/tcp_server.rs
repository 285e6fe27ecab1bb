//! A listening TCP server: owns an [`Acceptor`] on the base loop, an
//! [`EventLoopThreadPool`] of IO loops, and the registry of every live
//! connection it has handed out.
//!
//! Like `TcpConnection`, `TcpServer` itself is `Rc<RefCell<..>>`-confined to
//! the base loop thread that creates it — `new`, `start`, and every setter
//! below assume that. What *does* need to cross threads is the one closure
//! `new_connection` builds per accepted socket and hands to the chosen IO
//! loop, and the `close_cb` that closure gives each connection to call back
//! into `remove_connection_in_loop` later. Both travel as `Arc`s (see
//! `callbacks.rs`), and a thread-local `SERVERS` registry — set once when
//! the server is constructed — lets that `close_cb` find this `TcpServer`
//! again without capturing the `Rc` itself.

use std::cell::RefCell;
use std::net::SocketAddr;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;

use crate::acceptor::Acceptor;
use crate::callbacks::{
    default_connection_callback, default_message_callback, ConnectionCallback, HighWaterMarkCallback,
    MessageCallback, ThreadInitCallback, WriteCompleteCallback,
};
use crate::config::{ServerOptions, DEFAULT_HIGH_WATER_MARK};
use crate::event_loop::{EventLoop, EventLoopHandle};
use crate::event_loop_thread_pool::EventLoopThreadPool;
use crate::sys::socket::Socket;
use crate::tcp_connection::{TcpConnection, TcpConnectionHandle};

static NEXT_SERVER_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static SERVERS: RefCell<std::collections::HashMap<u64, Rc<RefCell<TcpServerInner>>>> =
        RefCell::new(std::collections::HashMap::new());
}

struct TcpServerInner {
    id: u64,
    base_loop: EventLoopHandle,
    ip_port: String,
    name: Arc<str>,
    acceptor: Rc<RefCell<Acceptor>>,
    thread_pool: EventLoopThreadPool,
    connections: IndexMap<String, TcpConnectionHandle>,
    next_conn_id: u64,
    connection_cb: ConnectionCallback,
    message_cb: MessageCallback,
    write_complete_cb: Option<WriteCompleteCallback>,
    high_water_mark_cb: Option<HighWaterMarkCallback>,
    high_water_mark: usize,
    thread_init_cb: Option<ThreadInitCallback>,
}

/// A running (or not-yet-started) listener. Construct on the loop that will
/// be its base loop; every method here runs on that thread.
pub struct TcpServer {
    inner: Rc<RefCell<TcpServerInner>>,
    started: AtomicBool,
}

impl TcpServer {
    pub fn new(
        loop_: &Rc<EventLoop>,
        addr: &SocketAddr,
        name: impl Into<Arc<str>>,
        options: ServerOptions,
    ) -> std::io::Result<TcpServer> {
        loop_.assert_in_loop_thread();
        let name = name.into();
        let id = NEXT_SERVER_ID.fetch_add(1, Ordering::Relaxed);

        let acceptor = Acceptor::new(addr, options.reuse_port)?;
        let ip_port = format!("{}", addr);

        let inner = Rc::new(RefCell::new(TcpServerInner {
            id,
            base_loop: loop_.handle(),
            ip_port,
            name,
            acceptor: acceptor.clone(),
            thread_pool: EventLoopThreadPool::new(loop_.handle()),
            connections: IndexMap::new(),
            next_conn_id: 1,
            connection_cb: default_connection_callback(),
            message_cb: default_message_callback(),
            write_complete_cb: None,
            high_water_mark_cb: None,
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
            thread_init_cb: None,
        }));

        SERVERS.with(|s| {
            s.borrow_mut().insert(id, inner.clone());
        });

        let server = TcpServer {
            inner: inner.clone(),
            started: AtomicBool::new(false),
        };

        let weak = Rc::downgrade(&inner);
        Acceptor::set_new_connection_callback(&acceptor, move |loop_, socket, peer_addr| {
            if let Some(inner) = weak.upgrade() {
                TcpServer::new_connection(&inner, loop_, socket, peer_addr);
            }
        });

        Ok(server)
    }

    pub fn name(&self) -> Arc<str> {
        self.inner.borrow().name.clone()
    }

    pub fn ip_port(&self) -> String {
        self.inner.borrow().ip_port.clone()
    }

    pub fn set_thread_num(&self, n: usize) {
        self.inner.borrow_mut().thread_pool.set_thread_num(n);
    }

    pub fn set_thread_init_callback(&self, cb: ThreadInitCallback) {
        self.inner.borrow_mut().thread_init_cb = Some(cb);
    }

    pub fn set_connection_callback(&self, cb: ConnectionCallback) {
        self.inner.borrow_mut().connection_cb = cb;
    }

    pub fn set_message_callback(&self, cb: MessageCallback) {
        self.inner.borrow_mut().message_cb = cb;
    }

    pub fn set_write_complete_callback(&self, cb: WriteCompleteCallback) {
        self.inner.borrow_mut().write_complete_cb = Some(cb);
    }

    pub fn set_high_water_mark_callback(&self, cb: HighWaterMarkCallback, bytes: usize) {
        let mut inner = self.inner.borrow_mut();
        inner.high_water_mark_cb = Some(cb);
        inner.high_water_mark = bytes;
    }

    /// Idempotent, safe to call more than once and from any thread: starts
    /// the worker pool and begins listening. Matches muduo's
    /// `AtomicInt32::getAndSet` guard in `TcpServer::start`.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let base_loop = {
            let mut inner = self.inner.borrow_mut();
            let init_cb = inner.thread_init_cb.clone();
            inner.thread_pool.start(init_cb);
            inner.base_loop.clone()
        };

        let acceptor = self.inner.borrow().acceptor.clone();
        base_loop.run_in_loop(move || {
            let loop_ = EventLoop::current();
            Acceptor::listen(&acceptor, &loop_).expect("Acceptor::listen failed");
        });
    }

    fn new_connection(inner: &Rc<RefCell<TcpServerInner>>, loop_: &EventLoop, socket: Socket, peer_addr: SocketAddr) {
        loop_.assert_in_loop_thread();

        let io_loop = inner.borrow_mut().thread_pool.get_next_loop();
        let (conn_name, local_addr, server_id, base_loop, connection_cb, message_cb, write_complete_cb, high_water_mark_cb, high_water_mark) = {
            let mut i = inner.borrow_mut();
            let local_addr = socket.local_addr().unwrap_or(peer_addr);
            let conn_name: Arc<str> =
                format!("{}-{}#{}", i.name, i.ip_port, i.next_conn_id).into();
            i.next_conn_id += 1;
            log::info!(
                "TcpServer::new_connection [{}] - new connection [{}] from {}",
                i.name,
                conn_name,
                peer_addr
            );
            (
                conn_name,
                local_addr,
                i.id,
                i.base_loop.clone(),
                i.connection_cb.clone(),
                i.message_cb.clone(),
                i.write_complete_cb.clone(),
                i.high_water_mark_cb.clone(),
                i.high_water_mark,
            )
        };

        let close_cb = {
            let name = conn_name.clone();
            Arc::new(move |_conn: &TcpConnectionHandle| {
                let name = name.clone();
                base_loop.run_in_loop(move || {
                    TcpServer::remove_connection_in_loop(server_id, &name);
                });
            })
        };

        io_loop.run_in_loop(move || {
            let (conn, handle) = TcpConnection::new(
                io_loop_handle_for_current(),
                conn_name.clone(),
                socket,
                local_addr,
                peer_addr,
                connection_cb,
                message_cb,
            );
            TcpConnection::set_write_complete_callback(&conn, write_complete_cb);
            TcpConnection::set_high_water_mark_callback(&conn, high_water_mark_cb);
            TcpConnection::set_high_water_mark_bytes(&conn, high_water_mark);
            TcpConnection::set_close_callback(&conn, close_cb);

            with_server(server_id, |inner| {
                inner.borrow_mut().connections.insert(conn_name.to_string(), handle);
            });

            TcpConnection::connect_established(&conn);
        });
    }

    fn remove_connection_in_loop(server_id: u64, name: &str) {
        let removed = with_server(server_id, |inner| {
            let mut i = inner.borrow_mut();
            log::info!(
                "TcpServer::remove_connection_in_loop [{}] - connection {}",
                i.name,
                name
            );
            i.connections.shift_remove(name)
        })
        .flatten();

        if let Some(handle) = removed {
            handle.schedule_destroy();
        }
    }

    /// Every live connection's handle, in acceptance order.
    pub fn connections(&self) -> Vec<TcpConnectionHandle> {
        self.inner.borrow().connections.values().cloned().collect()
    }

    pub fn started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }
}

impl Drop for TcpServerInner {
    fn drop(&mut self) {
        SERVERS.with(|s| {
            s.borrow_mut().remove(&self.id);
        });
        // Mirrors muduo's ~TcpServer: every still-live connection gets torn
        // down on its own IO loop rather than left dangling in that loop's
        // thread-local registry.
        for (_, handle) in self.connections.drain(..) {
            handle.schedule_destroy();
        }
    }
}

fn with_server<R>(id: u64, f: impl FnOnce(&Rc<RefCell<TcpServerInner>>) -> R) -> Option<R> {
    SERVERS.with(|s| s.borrow().get(&id).map(f))
}

fn io_loop_handle_for_current() -> EventLoopHandle {
    EventLoop::current().handle()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn new_reports_the_name_and_requested_listen_address() {
        let loop_ = EventLoop::new().unwrap();
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let server = TcpServer::new(&loop_, &addr, "echo", ServerOptions::default()).unwrap();
        assert_eq!(server.name().as_ref(), "echo");
        // Mirrors muduo's `ipPort_`: the address the caller asked for, not
        // whatever ephemeral port the kernel assigned after bind.
        assert_eq!(server.ip_port(), addr.to_string());
    }

    #[test]
    fn start_is_idempotent() {
        let loop_ = EventLoop::new().unwrap();
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let server = TcpServer::new(&loop_, &addr, "echo", ServerOptions::default()).unwrap();
        assert!(!server.started());
        server.start();
        assert!(server.started());
        server.start();
        assert!(server.started());
    }

    #[test]
    fn no_connections_right_after_construction() {
        let loop_ = EventLoop::new().unwrap();
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let server = TcpServer::new(&loop_, &addr, "echo", ServerOptions::default()).unwrap();
        assert!(server.connections().is_empty());
    }
}
