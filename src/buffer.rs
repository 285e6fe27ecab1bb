use std::io::{self, IoSliceMut};

use crate::sys::socket::Socket;

/// Bytes reserved at the front of every buffer so a framing layer (e.g. the
/// HTTP response writer prepending a chunk-size) can prepend without a copy.
pub const CHEAP_PREPEND: usize = 8;
const INITIAL_SIZE: usize = 1024;

/// A growable byte buffer with three cursors: `[0, prepend)` is reserved
/// prepend space, `[prepend, reader)` has already been consumed,
/// `[reader, writer)` is unread data, and `[writer, capacity)` is free to
/// write into. `0 <= prepend <= reader <= writer <= capacity` holds after
/// every operation here.
#[derive(Debug, Clone)]
pub struct Buffer {
    buf: Vec<u8>,
    reader_index: usize,
    writer_index: usize,
}

impl Default for Buffer {
    fn default() -> Self {
        Buffer::new()
    }
}

impl Buffer {
    pub fn new() -> Buffer {
        Buffer::with_capacity(INITIAL_SIZE)
    }

    pub fn with_capacity(initial_size: usize) -> Buffer {
        Buffer {
            buf: vec![0u8; CHEAP_PREPEND + initial_size],
            reader_index: CHEAP_PREPEND,
            writer_index: CHEAP_PREPEND,
        }
    }

    pub fn readable_bytes(&self) -> usize {
        self.writer_index - self.reader_index
    }

    pub fn writable_bytes(&self) -> usize {
        self.buf.len() - self.writer_index
    }

    pub fn prependable_bytes(&self) -> usize {
        self.reader_index
    }

    pub fn peek(&self) -> &[u8] {
        &self.buf[self.reader_index..self.writer_index]
    }

    /// Consumes `n` readable bytes. `n` is clamped to `readable_bytes()`;
    /// once fully drained the cursors reset to `CHEAP_PREPEND` so the next
    /// `append` doesn't need to grow or compact.
    pub fn retrieve(&mut self, n: usize) {
        let n = n.min(self.readable_bytes());
        if n < self.readable_bytes() {
            self.reader_index += n;
        } else {
            self.retrieve_all();
        }
    }

    pub fn retrieve_all(&mut self) {
        self.reader_index = CHEAP_PREPEND;
        self.writer_index = CHEAP_PREPEND;
    }

    /// Consumes and returns every readable byte.
    pub fn retrieve_all_as_vec(&mut self) -> Vec<u8> {
        let data = self.peek().to_vec();
        self.retrieve_all();
        data
    }

    pub fn retrieve_as_vec(&mut self, n: usize) -> Vec<u8> {
        let n = n.min(self.readable_bytes());
        let data = self.buf[self.reader_index..self.reader_index + n].to_vec();
        self.retrieve(n);
        data
    }

    /// Finds the first `\r\n` in the readable region, if any.
    pub fn find_crlf(&self) -> Option<usize> {
        find_subslice(self.peek(), b"\r\n")
    }

    /// Finds the first end-of-line marker (`\n`) in the readable region.
    pub fn find_eol(&self) -> Option<usize> {
        self.peek().iter().position(|&b| b == b'\n')
    }

    pub fn append(&mut self, data: &[u8]) {
        self.ensure_writable(data.len());
        let start = self.writer_index;
        self.buf[start..start + data.len()].copy_from_slice(data);
        self.writer_index += data.len();
    }

    /// Writes `data` just before the readable region, growing prependable
    /// space if there isn't enough (rare: callers should reserve
    /// `CHEAP_PREPEND` bytes for this up front, as muduo's protocol framing
    /// does).
    pub fn prepend(&mut self, data: &[u8]) {
        assert!(
            data.len() <= self.prependable_bytes(),
            "prepend({} bytes) exceeds {} prependable",
            data.len(),
            self.prependable_bytes()
        );
        self.reader_index -= data.len();
        let start = self.reader_index;
        self.buf[start..start + data.len()].copy_from_slice(data);
    }

    /// Releases unused capacity, shrinking to fit `readable_bytes() +
    /// reserve` after compacting back to `CHEAP_PREPEND`. Not in muduo's
    /// header-described API but present in `Buffer::shrink`; useful to
    /// release a per-connection buffer that grew during a burst (S3).
    pub fn shrink(&mut self, reserve: usize) {
        let mut shrunk = Buffer::with_capacity(self.readable_bytes() + reserve);
        shrunk.append(self.peek());
        *self = shrunk;
    }

    pub fn internal_capacity(&self) -> usize {
        self.buf.len()
    }

    fn ensure_writable(&mut self, n: usize) {
        if self.writable_bytes() >= n {
            return;
        }

        if self.prependable_bytes() + self.writable_bytes() < n + CHEAP_PREPEND {
            // truly need more room
            self.buf.resize(self.writer_index + n, 0);
        } else {
            // compact: shift the readable bytes back to CHEAP_PREPEND
            let readable = self.readable_bytes();
            self.buf.copy_within(self.reader_index..self.writer_index, CHEAP_PREPEND);
            self.reader_index = CHEAP_PREPEND;
            self.writer_index = CHEAP_PREPEND + readable;
        }
    }

    /// Scatter-reads from `fd` into the writable tail of this buffer, using
    /// a 64 KiB stack scratch as a second `iovec` so a single `readv` can
    /// drain up to `writable_bytes() + 64 KiB` without growing the buffer
    /// for the common small-message case. Bytes that overflowed into the
    /// scratch are appended (and may trigger a grow/compact) afterward.
    /// Returns `Ok(0)` on a peer-initiated close, same as a plain `read`.
    pub fn read_fd(&mut self, socket: &Socket) -> io::Result<usize> {
        let mut extra_buf = [0u8; 65536];
        let writable = self.writable_bytes();

        let n = {
            let start = self.writer_index;
            let mut slices = [
                IoSliceMut::new(&mut self.buf[start..]),
                IoSliceMut::new(&mut extra_buf),
            ];
            socket.read_vectored(&mut slices)?
        };

        if n <= writable {
            self.writer_index += n;
        } else {
            self.writer_index = self.buf.len();
            self.append(&extra_buf[..n - writable]);
        }

        Ok(n)
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn starts_empty_with_cheap_prepend() {
        let buf = Buffer::new();
        assert_eq!(buf.readable_bytes(), 0);
        assert_eq!(buf.prependable_bytes(), CHEAP_PREPEND);
    }

    #[test]
    fn append_then_retrieve_round_trips() {
        let mut buf = Buffer::new();
        buf.append(b"hello");
        assert_eq!(buf.readable_bytes(), 5);
        assert_eq!(buf.peek(), b"hello");
        buf.retrieve(5);
        assert_eq!(buf.readable_bytes(), 0);
        assert_eq!(buf.prependable_bytes(), CHEAP_PREPEND);
    }

    #[test]
    fn grows_past_initial_capacity() {
        let mut buf = Buffer::with_capacity(4);
        let data = vec![b'x'; 100];
        buf.append(&data);
        assert_eq!(buf.readable_bytes(), 100);
        assert_eq!(buf.peek(), data.as_slice());
    }

    #[test]
    fn compacts_before_growing_when_room_is_available() {
        let mut buf = Buffer::with_capacity(1024);
        buf.append(&vec![b'a'; 900]);
        buf.retrieve(900);
        let cap_before = buf.internal_capacity();
        buf.append(&vec![b'b'; 900]);
        assert_eq!(buf.internal_capacity(), cap_before, "should compact, not grow");
        assert_eq!(buf.readable_bytes(), 900);
    }

    #[test]
    fn find_crlf_locates_terminator() {
        let mut buf = Buffer::new();
        buf.append(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n");
        let idx = buf.find_crlf().unwrap();
        assert_eq!(&buf.peek()[..idx], b"GET / HTTP/1.1");
    }

    #[test]
    fn prepend_writes_just_before_readable_region() {
        let mut buf = Buffer::new();
        buf.append(b"world");
        buf.prepend(b"X");
        assert_eq!(buf.peek(), b"Xworld");
    }

    #[test]
    fn shrink_releases_capacity_while_preserving_data() {
        let mut buf = Buffer::with_capacity(1024 * 1024);
        buf.append(b"small");
        buf.shrink(0);
        assert_eq!(buf.peek(), b"small");
        assert!(buf.internal_capacity() < 1024 * 1024);
    }
}
