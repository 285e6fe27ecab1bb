//! The per-connection state machine.
//!
//! `TcpConnection` itself — like `Channel`, `Acceptor` and `TimerQueue` — is
//! `Rc<RefCell<..>>`-confined to the one loop thread that owns it: every
//! mutation of its state, its buffers, or its channel happens there (spec
//! §3, Testable Property 3). That is a problem the original C++ doesn't
//! have: `shared_ptr<TcpConnection>` has an atomically refcounted control
//! block, so muduo freely hands the *same* object across the base loop
//! (which builds it and holds it in `TcpServer`'s registry) and the IO loop
//! (which runs its callbacks). `Rc` can't make that trip.
//!
//! The fix is [`TcpConnectionHandle`]: a small `Clone + Send + Sync` value
//! (an id, the immutable addresses, and the owning loop's
//! [`EventLoopHandle`]) that stands in for the connection everywhere it
//! needs to cross a thread — `TcpServer`'s registry, user code holding onto
//! a connection to push data to it later, and every callback parameter.
//! Its thread-unsafe methods (`send`, `shutdown`, `force_close`, ...) simply
//! post a closure to the owning loop that looks the real
//! `Rc<RefCell<TcpConnection>>` up by id in a loop-thread-local registry —
//! the same technique `event_loop.rs`'s `EventLoop::current()` uses for the
//! loop itself, generalized here because a `Rc` can't be captured in the
//! `Send` closure that performs the handoff.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::net::{Shutdown, SocketAddr};
use std::os::unix::io::AsRawFd;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::buffer::Buffer;
use crate::callbacks::{
    default_connection_callback, default_message_callback, CloseCallback, ConnectionCallback,
    HighWaterMarkCallback, MessageCallback, WriteCompleteCallback,
};
use crate::channel::Channel;
use crate::config::DEFAULT_HIGH_WATER_MARK;
use crate::error::{is_peer_reset, is_would_block};
use crate::event_loop::{EventLoop, EventLoopHandle};
use crate::sys::socket::Socket;

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
}

pub(crate) type ConnPtr = Rc<RefCell<TcpConnection>>;

thread_local! {
    static REGISTRY: RefCell<HashMap<u64, ConnPtr>> = RefCell::new(HashMap::new());
}

fn register(id: u64, conn: ConnPtr) {
    REGISTRY.with(|r| {
        r.borrow_mut().insert(id, conn);
    });
}

fn unregister(id: u64) {
    REGISTRY.with(|r| {
        r.borrow_mut().remove(&id);
    });
}

fn with_conn<R>(id: u64, f: impl FnOnce(&ConnPtr) -> R) -> Option<R> {
    REGISTRY.with(|r| r.borrow().get(&id).map(f))
}

/// The real per-connection object: socket, channel, buffers, callbacks.
/// Constructed (and destroyed) only on the loop thread that serves it.
pub struct TcpConnection {
    id: u64,
    loop_handle: EventLoopHandle,
    name: Arc<str>,
    socket: Socket,
    channel: Rc<RefCell<Channel>>,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
    state: Cell<State>,
    reading: Cell<bool>,
    input_buffer: RefCell<Buffer>,
    output_buffer: RefCell<Buffer>,
    high_water_mark: Cell<usize>,
    connection_cb: RefCell<ConnectionCallback>,
    message_cb: RefCell<MessageCallback>,
    write_complete_cb: RefCell<Option<WriteCompleteCallback>>,
    high_water_mark_cb: RefCell<Option<HighWaterMarkCallback>>,
    close_cb: RefCell<Option<CloseCallback>>,
    context: RefCell<Option<Box<dyn Any>>>,
}

/// The public, thread-safe stand-in for a [`TcpConnection`]; this is what
/// user callbacks actually receive and what `TcpServer`'s registry stores.
#[derive(Clone)]
pub struct TcpConnectionHandle {
    id: u64,
    name: Arc<str>,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
    loop_handle: EventLoopHandle,
}

impl TcpConnectionHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn is_in_loop_thread(&self) -> bool {
        self.loop_handle.is_in_loop_thread()
    }

    pub fn connected(&self) -> bool {
        with_conn(self.id, |c| c.borrow().state.get() == State::Connected).unwrap_or(false)
    }

    /// Thread-safe: queues `data` for send, copying it first if called off
    /// the owning loop (spec §4.7's "the canonical example is
    /// `TcpConnection::send`").
    pub fn send(&self, data: impl Into<Vec<u8>>) {
        let data = data.into();
        let id = self.id;
        self.loop_handle.run_in_loop(move || {
            with_conn(id, |conn| TcpConnection::send_in_loop(conn, &data));
        });
    }

    /// Sends everything currently readable in `buf`, consuming it.
    pub fn send_buffer(&self, buf: &mut Buffer) {
        self.send(buf.retrieve_all_as_vec());
    }

    /// Half-closes the write side once queued output drains; see
    /// `TcpConnection::shutdown_in_loop` for why this can't always be
    /// immediate.
    pub fn shutdown(&self) {
        let id = self.id;
        self.loop_handle.run_in_loop(move || {
            with_conn(id, |conn| TcpConnection::shutdown_entry(conn));
        });
    }

    pub fn force_close(&self) {
        let id = self.id;
        self.loop_handle.run_in_loop(move || {
            with_conn(id, |conn| TcpConnection::force_close_entry(conn));
        });
    }

    /// Arms a timer that force-closes after `delay` unless the connection
    /// has already died — see `TcpConnection::force_close_with_delay`.
    pub fn force_close_with_delay(&self, delay: Duration) {
        let id = self.id;
        self.loop_handle.run_in_loop(move || {
            with_conn(id, |conn| TcpConnection::force_close_with_delay(conn, delay));
        });
    }

    pub fn start_read(&self) {
        let id = self.id;
        self.loop_handle.run_in_loop(move || {
            with_conn(id, |conn| TcpConnection::start_read_in_loop(conn));
        });
    }

    pub fn stop_read(&self) {
        let id = self.id;
        self.loop_handle.run_in_loop(move || {
            with_conn(id, |conn| TcpConnection::stop_read_in_loop(conn));
        });
    }

    pub fn set_high_water_mark(&self, bytes: usize) {
        let id = self.id;
        self.loop_handle.run_in_loop(move || {
            with_conn(id, |conn| conn.borrow().high_water_mark.set(bytes));
        });
    }

    pub fn set_tcp_no_delay(&self, on: bool) {
        let id = self.id;
        self.loop_handle.run_in_loop(move || {
            with_conn(id, |conn| {
                let _ = conn.borrow().socket.set_nodelay(on);
            });
        });
    }

    /// Must be called from the owning loop thread (typically from inside a
    /// callback for this very connection); panics otherwise, since a
    /// `Box<dyn Any>` can't safely cross the thread boundary this handle
    /// otherwise hides.
    pub fn set_context(&self, context: Box<dyn Any>) {
        assert!(self.is_in_loop_thread(), "set_context called off the owning loop");
        with_conn(self.id, |conn| {
            *conn.borrow().context.borrow_mut() = Some(context);
        });
    }

    pub fn with_context<R>(&self, f: impl FnOnce(Option<&Box<dyn Any>>) -> R) -> Option<R> {
        assert!(self.is_in_loop_thread(), "with_context called off the owning loop");
        with_conn(self.id, |conn| f(conn.borrow().context.borrow().as_ref()))
    }

    /// Posts `connect_destroyed` to the owning loop. Called by
    /// `TcpServer::remove_connection_in_loop` once the connection has been
    /// erased from the server's registry — this is its last strong
    /// reference from outside the owning loop's own thread-local registry.
    pub(crate) fn schedule_destroy(&self) {
        let id = self.id;
        self.loop_handle.run_in_loop(move || {
            let loop_ = EventLoop::current();
            with_conn(id, |conn| TcpConnection::connect_destroyed(conn, &loop_));
        });
    }
}

impl TcpConnection {
    /// Constructs the connection and registers it in the calling thread's
    /// registry. Must run on the loop that will own it.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        loop_handle: EventLoopHandle,
        name: Arc<str>,
        socket: Socket,
        local_addr: SocketAddr,
        peer_addr: SocketAddr,
        connection_cb: ConnectionCallback,
        message_cb: MessageCallback,
    ) -> (ConnPtr, TcpConnectionHandle) {
        let id = NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed);
        let fd = socket.as_raw_fd();
        let channel = Channel::new(fd);
        let _ = socket.set_keepalive(true);

        let conn = Rc::new(RefCell::new(TcpConnection {
            id,
            loop_handle: loop_handle.clone(),
            name: name.clone(),
            socket,
            channel: channel.clone(),
            local_addr,
            peer_addr,
            state: Cell::new(State::Connecting),
            reading: Cell::new(true),
            input_buffer: RefCell::new(Buffer::new()),
            output_buffer: RefCell::new(Buffer::new()),
            high_water_mark: Cell::new(DEFAULT_HIGH_WATER_MARK),
            connection_cb: RefCell::new(connection_cb),
            message_cb: RefCell::new(message_cb),
            write_complete_cb: RefCell::new(None),
            high_water_mark_cb: RefCell::new(None),
            close_cb: RefCell::new(None),
            context: RefCell::new(None),
        }));

        {
            let c = conn.clone();
            channel.borrow_mut().set_read_callback(move |loop_, ts| {
                TcpConnection::handle_read(&c, loop_, ts);
            });
        }
        {
            let c = conn.clone();
            channel.borrow_mut().set_write_callback(move |loop_| {
                TcpConnection::handle_write(&c, loop_);
            });
        }
        {
            let c = conn.clone();
            channel.borrow_mut().set_close_callback(move |loop_| {
                TcpConnection::handle_close(&c, loop_);
            });
        }
        {
            let c = conn.clone();
            channel.borrow_mut().set_error_callback(move |_loop_| {
                TcpConnection::handle_error(&c);
            });
        }

        let handle = TcpConnectionHandle {
            id,
            name,
            local_addr,
            peer_addr,
            loop_handle,
        };

        register(id, conn.clone());
        (conn, handle)
    }

    pub fn handle(conn: &ConnPtr) -> TcpConnectionHandle {
        let c = conn.borrow();
        TcpConnectionHandle {
            id: c.id,
            name: c.name.clone(),
            local_addr: c.local_addr,
            peer_addr: c.peer_addr,
            loop_handle: c.loop_handle.clone(),
        }
    }

    pub(crate) fn set_write_complete_callback(conn: &ConnPtr, cb: Option<WriteCompleteCallback>) {
        *conn.borrow().write_complete_cb.borrow_mut() = cb;
    }

    pub(crate) fn set_high_water_mark_callback(conn: &ConnPtr, cb: Option<HighWaterMarkCallback>) {
        *conn.borrow().high_water_mark_cb.borrow_mut() = cb;
    }

    pub(crate) fn set_close_callback(conn: &ConnPtr, cb: CloseCallback) {
        *conn.borrow().close_cb.borrow_mut() = Some(cb);
    }

    pub(crate) fn set_high_water_mark_bytes(conn: &ConnPtr, bytes: usize) {
        conn.borrow().high_water_mark.set(bytes);
    }

    /// Transitions `Connecting -> Connected`: ties the channel to this
    /// connection's lifetime, enables reading, and fires the user
    /// connection callback. Must run on the owning loop.
    pub(crate) fn connect_established(conn: &ConnPtr) {
        {
            let c = conn.borrow();
            assert_eq!(c.state.get(), State::Connecting);
            c.state.set(State::Connected);
        }

        let channel = conn.borrow().channel.clone();
        channel.borrow_mut().tie(&(conn.clone() as Rc<dyn Any>));
        let loop_ = EventLoop::current();
        Channel::enable_reading(&channel, &loop_);

        let handle = TcpConnection::handle(conn);
        let cb = conn.borrow().connection_cb.borrow().clone();
        cb(&handle);
    }

    /// The reverse of `connect_established`, run after the server's
    /// registry has released its reference: removes the channel from the
    /// poller and drops this thread's own strong reference, which (barring
    /// some other live `Rc` clone mid-dispatch) frees the connection.
    pub(crate) fn connect_destroyed(conn: &ConnPtr, loop_: &EventLoop) {
        let id = {
            let c = conn.borrow();
            if c.state.get() == State::Connected {
                c.state.set(State::Disconnected);
                let channel = c.channel.clone();
                drop(c);
                Channel::disable_all(&channel, loop_);
                let handle = TcpConnection::handle(conn);
                let cb = conn.borrow().connection_cb.borrow().clone();
                cb(&handle);
            }
            conn.borrow().id
        };

        let channel = conn.borrow().channel.clone();
        Channel::remove(&channel, loop_);
        unregister(id);
    }

    fn handle_read(conn: &ConnPtr, loop_: &EventLoop, ts: Instant) {
        loop_.assert_in_loop_thread();
        let result = {
            let c = conn.borrow();
            c.input_buffer.borrow_mut().read_fd(&c.socket)
        };

        match result {
            Ok(0) => TcpConnection::handle_close(conn, loop_),
            Ok(_n) => {
                let handle = TcpConnection::handle(conn);
                let c = conn.borrow();
                let message_cb = c.message_cb.borrow().clone();
                let mut input = c.input_buffer.borrow_mut();
                message_cb(&handle, &mut input, ts);
            }
            Err(e) if is_would_block(&e) => {}
            Err(e) => {
                log::error!("TcpConnection::handle_read: {}", e);
                TcpConnection::handle_error(conn);
            }
        }
    }

    fn handle_write(conn: &ConnPtr, loop_: &EventLoop) {
        loop_.assert_in_loop_thread();
        let channel = conn.borrow().channel.clone();
        if !channel.borrow().is_writing() {
            log::trace!("connection fd = {} is down, no more writing", channel.borrow().fd());
            return;
        }

        let write_result = {
            let c = conn.borrow();
            let out = c.output_buffer.borrow();
            c.socket.write(out.peek())
        };

        match write_result {
            Ok(n) => {
                conn.borrow().output_buffer.borrow_mut().retrieve(n);
                let remaining = conn.borrow().output_buffer.borrow().readable_bytes();
                if remaining == 0 {
                    Channel::disable_writing(&channel, loop_);
                    let handle = TcpConnection::handle(conn);
                    if let Some(cb) = conn.borrow().write_complete_cb.borrow().clone() {
                        loop_.queue_in_loop(move || cb(&handle));
                    }
                    if conn.borrow().state.get() == State::Disconnecting {
                        TcpConnection::shutdown_in_loop(conn, loop_);
                    }
                }
            }
            Err(e) => log::error!("TcpConnection::handle_write: {}", e),
        }
    }

    fn handle_close(conn: &ConnPtr, loop_: &EventLoop) {
        loop_.assert_in_loop_thread();
        {
            let c = conn.borrow();
            assert!(matches!(c.state.get(), State::Connected | State::Disconnecting));
            c.state.set(State::Disconnected);
        }
        let channel = conn.borrow().channel.clone();
        Channel::disable_all(&channel, loop_);

        // `conn` already keeps this alive for the duration of the call, same
        // as muduo's explicit `TcpConnectionPtr guardThis(shared_from_this())`
        // — an `Rc` clone living on the stack through both callbacks below.
        let guard = conn.clone();
        let handle = TcpConnection::handle(&guard);

        let connection_cb = guard.borrow().connection_cb.borrow().clone();
        connection_cb(&handle);

        let close_cb = guard.borrow().close_cb.borrow().clone();
        if let Some(cb) = close_cb {
            cb(&handle);
        }
    }

    fn handle_error(conn: &ConnPtr) {
        let c = conn.borrow();
        match c.socket.take_error() {
            Ok(Some(e)) => log::error!("TcpConnection [{}] - SO_ERROR = {}", c.name, e),
            Ok(None) => {}
            Err(e) => log::error!("TcpConnection [{}] - getsockopt failed: {}", c.name, e),
        }
    }

    fn send_in_loop(conn: &ConnPtr, data: &[u8]) {
        let loop_ = EventLoop::current();
        loop_.assert_in_loop_thread();

        if conn.borrow().state.get() == State::Disconnected {
            log::warn!("disconnected, give up writing");
            return;
        }

        let channel = conn.borrow().channel.clone();
        let mut wrote = 0usize;
        let mut fault = false;

        if !channel.borrow().is_writing() && conn.borrow().output_buffer.borrow().readable_bytes() == 0
        {
            match conn.borrow().socket.write(data) {
                Ok(n) => {
                    wrote = n;
                    if n == data.len() {
                        let handle = TcpConnection::handle(conn);
                        if let Some(cb) = conn.borrow().write_complete_cb.borrow().clone() {
                            loop_.queue_in_loop(move || cb(&handle));
                        }
                    }
                }
                Err(e) if is_would_block(&e) => {}
                Err(e) => {
                    log::error!("TcpConnection::send_in_loop: {}", e);
                    if is_peer_reset(&e) {
                        fault = true;
                    }
                }
            }
        }

        if !fault && wrote < data.len() {
            let remaining = &data[wrote..];
            let (old_len, hwm) = {
                let c = conn.borrow();
                (c.output_buffer.borrow().readable_bytes(), c.high_water_mark.get())
            };
            let new_len = old_len + remaining.len();
            if new_len >= hwm && old_len < hwm {
                let handle = TcpConnection::handle(conn);
                if let Some(cb) = conn.borrow().high_water_mark_cb.borrow().clone() {
                    loop_.queue_in_loop(move || cb(&handle, new_len));
                }
            }
            conn.borrow().output_buffer.borrow_mut().append(remaining);
            if !channel.borrow().is_writing() {
                Channel::enable_writing(&channel, &loop_);
            }
        }
    }

    fn shutdown_entry(conn: &ConnPtr) {
        let loop_ = EventLoop::current();
        if conn.borrow().state.get() == State::Connected {
            conn.borrow().state.set(State::Disconnecting);
            TcpConnection::shutdown_in_loop(conn, &loop_);
        }
    }

    /// Half-closes the write side immediately, unless the channel is still
    /// draining queued output — in which case `handle_write` calls this
    /// again once it finishes, guaranteeing queued bytes reach the peer
    /// before the FIN (spec §4.7's graceful-close protocol).
    fn shutdown_in_loop(conn: &ConnPtr, loop_: &EventLoop) {
        loop_.assert_in_loop_thread();
        let channel = conn.borrow().channel.clone();
        if !channel.borrow().is_writing() {
            let _ = conn.borrow().socket.shutdown(Shutdown::Write);
        }
    }

    fn force_close_entry(conn: &ConnPtr) {
        let state = conn.borrow().state.get();
        if matches!(state, State::Connected | State::Disconnecting) {
            conn.borrow().state.set(State::Disconnecting);
            let loop_ = EventLoop::current();
            TcpConnection::handle_close(conn, &loop_);
        }
    }

    /// Arms a timer that calls `force_close_entry` after `delay`. Captures
    /// only the connection's `id`, not the `Rc` itself — if the connection
    /// is gone by the time the timer fires, `with_conn` finds nothing and
    /// the callback is a no-op, the same guarantee muduo gets from a weak
    /// `shared_ptr`.
    fn force_close_with_delay(conn: &ConnPtr, delay: Duration) {
        let state = conn.borrow().state.get();
        if !matches!(state, State::Connected | State::Disconnecting) {
            return;
        }
        conn.borrow().state.set(State::Disconnecting);
        let id = conn.borrow().id;
        let loop_ = EventLoop::current();
        loop_.run_after(
            delay,
            Box::new(move || {
                with_conn(id, |c| TcpConnection::force_close_entry(c));
            }),
        );
    }

    fn start_read_in_loop(conn: &ConnPtr) {
        let loop_ = EventLoop::current();
        let (reading, channel) = {
            let c = conn.borrow();
            (c.reading.get(), c.channel.clone())
        };
        if !reading || !channel.borrow().is_reading() {
            Channel::enable_reading(&channel, &loop_);
            conn.borrow().reading.set(true);
        }
    }

    fn stop_read_in_loop(conn: &ConnPtr) {
        let loop_ = EventLoop::current();
        let (reading, channel) = {
            let c = conn.borrow();
            (c.reading.get(), c.channel.clone())
        };
        if reading || channel.borrow().is_reading() {
            Channel::disable_reading(&channel, &loop_);
            conn.borrow().reading.set(false);
        }
    }
}

impl Drop for TcpConnection {
    fn drop(&mut self) {
        debug_assert_eq!(
            self.state.get(),
            State::Disconnected,
            "TcpConnection [{}] dropped in state {:?}",
            self.name,
            self.state.get()
        );
    }
}

pub(crate) fn new_connection_callback() -> ConnectionCallback {
    default_connection_callback()
}

pub(crate) fn new_message_callback() -> MessageCallback {
    default_message_callback()
}
