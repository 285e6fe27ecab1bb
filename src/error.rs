//! Error-kind classification, per spec §7's three-way split: transient I/O
//! that the caller should just retry, a peer-initiated close that isn't
//! really an error at all, and everything else that gets logged and
//! propagated. Every fallible operation in this crate still returns a plain
//! `std::io::Result<T>` (see `DESIGN.md`); this module only adds the
//! judgment calls needed to act differently on specific `io::Error`s
//! without sprinkling `raw_os_error() == Some(libc::EWOULDBLOCK)` checks
//! across every call site.

use std::io;

/// `read`/`write`/`accept` would have blocked — not an error, just "try
/// again once the poller says the fd is ready."
pub fn is_would_block(err: &io::Error) -> bool {
    matches!(
        err.raw_os_error(),
        Some(libc::EAGAIN) | Some(libc::EWOULDBLOCK)
    ) || err.kind() == io::ErrorKind::WouldBlock
}

/// A write failed because the peer already closed its side — the expected
/// way a connection dies, not a bug to log loudly about.
pub fn is_peer_reset(err: &io::Error) -> bool {
    matches!(err.raw_os_error(), Some(libc::EPIPE) | Some(libc::ECONNRESET))
}

/// The process is out of file descriptors. `Acceptor::handle_read` reacts
/// to this specifically (spec §6's EMFILE scenario) rather than just
/// logging and moving on, since a level-triggered poller would otherwise
/// spin hot on the still-pending connection.
pub fn is_out_of_fds(err: &io::Error) -> bool {
    matches!(
        err.raw_os_error(),
        Some(libc::EMFILE) | Some(libc::ENFILE)
    )
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn classifies_would_block() {
        let err = io::Error::from_raw_os_error(libc::EAGAIN);
        assert!(is_would_block(&err));
        assert!(!is_peer_reset(&err));
        assert!(!is_out_of_fds(&err));
    }

    #[test]
    fn classifies_peer_reset() {
        let err = io::Error::from_raw_os_error(libc::EPIPE);
        assert!(is_peer_reset(&err));
        assert!(!is_would_block(&err));
    }

    #[test]
    fn classifies_out_of_fds() {
        let err = io::Error::from_raw_os_error(libc::EMFILE);
        assert!(is_out_of_fds(&err));
    }
}
