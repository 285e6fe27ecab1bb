//! A single-host, multi-reactor TCP networking runtime.
//!
//! One [`EventLoop`] per OS thread, each driving its own [`Poller`]
//! (`epoll` by default, `poll` if `MUDUO_USE_POLL` is set), timer queue,
//! and cross-thread task queue. A [`TcpServer`] accepts on a base loop and
//! hands each accepted connection to one loop from an
//! [`EventLoopThreadPool`], round-robin or by hash; every connection
//! (addressed from the outside as a [`TcpConnectionHandle`]) then lives out
//! its life on that one IO loop.
//!
//! ```no_run
//! use std::rc::Rc;
//! use reactor_net::{EventLoop, TcpServer, config::ServerOptions};
//!
//! let loop_ = EventLoop::new().unwrap();
//! let addr = "127.0.0.1:9000".parse().unwrap();
//! let server = TcpServer::new(&loop_, &addr, "echo", ServerOptions::default()).unwrap();
//! server.set_thread_num(4);
//! server.start();
//! loop_.run().unwrap();
//! ```

#[macro_use]
mod macros;

mod acceptor;
mod buffer;
mod callbacks;
mod channel;
pub mod config;
pub mod error;
mod event_loop;
mod event_loop_thread;
mod event_loop_thread_pool;
mod poller;
mod queue;
mod ready;
mod sys;
mod tcp_connection;
mod tcp_server;
mod timer;
mod timer_queue;
mod token;
mod waker;

#[cfg(feature = "http")]
pub mod http;

pub use acceptor::Acceptor;
pub use buffer::{Buffer, CHEAP_PREPEND};
pub use callbacks::{
    CloseCallback, ConnectionCallback, HighWaterMarkCallback, MessageCallback, ThreadInitCallback,
    WriteCompleteCallback,
};
pub use channel::Channel;
pub use event_loop::{EventLoop, EventLoopHandle, Task};
pub use event_loop_thread::EventLoopThread;
pub use event_loop_thread_pool::EventLoopThreadPool;
pub use poller::{ArrayPoller, EpollPoller, Event, Poller};
pub use ready::Ready;
pub use sys::socket::Socket;
pub use tcp_connection::TcpConnectionHandle;
pub use tcp_server::TcpServer;
pub use timer::{Timer, TimerCallback, TimerId};
pub use timer_queue::TimerQueue;
pub use token::Token;
