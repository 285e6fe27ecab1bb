//! Option flags and defaults, matching spec §6's "Option flags" table.
//!
//! Intentionally just scalars and one env var — nothing here justifies a
//! parsing crate; `std::env::var` and plain struct fields are what the
//! corpus reaches for at this scale.

/// Mirrors muduo's `TcpServer::Option`: whether `SO_REUSEPORT` is set on the
/// listen socket, letting several processes/threads bind the same port.
#[derive(Debug, Clone, Copy, Default)]
pub struct ServerOptions {
    pub reuse_port: bool,
}

impl ServerOptions {
    pub const fn new() -> ServerOptions {
        ServerOptions { reuse_port: false }
    }

    pub const fn reuse_port(mut self, on: bool) -> ServerOptions {
        self.reuse_port = on;
        self
    }
}

/// Default `TcpConnection::set_high_water_mark` threshold: 64 MiB of queued,
/// unwritten output before the high-water-mark callback fires once.
pub const DEFAULT_HIGH_WATER_MARK: usize = 64 * 1024 * 1024;

/// Default `listen()` backlog.
pub const DEFAULT_BACKLOG: i32 = 1024;

/// The name of the env var that selects `poll(2)` over the default
/// `epoll(2)` backend — kept as the literal muduo name since it's part of
/// the deployment contract, not an internal detail this port gets to rename.
pub const USE_POLL_ENV: &str = "MUDUO_USE_POLL";

/// Where `Acceptor` parks its placeholder fd for the EMFILE dance.
pub const IDLE_FD_PATH: &str = "/dev/null";

pub(crate) fn use_poll_backend() -> bool {
    std::env::var_os(USE_POLL_ENV).is_some()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn server_options_default_is_no_reuse_port() {
        let opts = ServerOptions::default();
        assert!(!opts.reuse_port);
    }

    #[test]
    fn server_options_builder_sets_reuse_port() {
        let opts = ServerOptions::new().reuse_port(true);
        assert!(opts.reuse_port);
    }
}
