//! Callback type aliases shared by `tcp_connection.rs` and `tcp_server.rs`.
//!
//! These are `Arc<dyn Fn(..) + Send + Sync>`, not the `Rc<dyn Fn>` used by
//! `Channel`: a `TcpServer`'s callbacks are set once (usually on whatever
//! thread builds the server) and then handed to a `TcpConnection`
//! constructed on an IO-loop thread that may differ from the one that set
//! them — an `Rc` cannot make that trip. See `tcp_connection.rs`'s module
//! doc comment for the fuller explanation of why `TcpConnection` itself
//! stays `Rc`-confined to its owning loop while only its callbacks and its
//! `TcpConnectionHandle` cross threads.

use std::time::Instant;

use crate::buffer::Buffer;
use crate::event_loop::EventLoop;
use crate::tcp_connection::TcpConnectionHandle;

pub type ConnectionCallback = std::sync::Arc<dyn Fn(&TcpConnectionHandle) + Send + Sync>;
pub type MessageCallback =
    std::sync::Arc<dyn Fn(&TcpConnectionHandle, &mut Buffer, Instant) + Send + Sync>;
pub type WriteCompleteCallback = std::sync::Arc<dyn Fn(&TcpConnectionHandle) + Send + Sync>;
pub type HighWaterMarkCallback = std::sync::Arc<dyn Fn(&TcpConnectionHandle, usize) + Send + Sync>;
pub type CloseCallback = std::sync::Arc<dyn Fn(&TcpConnectionHandle) + Send + Sync>;

/// Runs once, on the loop's own thread, right after `EventLoopThread` spawns
/// it and before the loop starts polling.
pub type ThreadInitCallback = std::sync::Arc<dyn Fn(&EventLoop) + Send + Sync>;

pub(crate) fn default_connection_callback() -> ConnectionCallback {
    std::sync::Arc::new(|conn: &TcpConnectionHandle| {
        log::debug!(
            "{} -> {}",
            conn.local_addr(),
            conn.peer_addr(),
        );
    })
}

pub(crate) fn default_message_callback() -> MessageCallback {
    std::sync::Arc::new(|_conn: &TcpConnectionHandle, buf: &mut Buffer, _ts: Instant| {
        // muduo's default just discards unread bytes; do the same rather
        // than let unconsumed input pile up for a server that never set a
        // message callback.
        buf.retrieve_all();
    })
}
