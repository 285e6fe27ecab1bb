use std::time::Instant;

use crate::buffer::Buffer;
use crate::http::request::{HttpRequest, Version};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    ExpectRequestLine,
    ExpectHeaders,
    GotAll,
}

/// The incremental HTTP/1.x request parser muduo ties to each connection's
/// opaque context slot (`TcpConnection::setContext`); one instance per
/// connection, reset after each request so keep-alive connections reuse it.
/// Request bodies aren't parsed — matching the original, whose
/// `kExpectBody` branch is itself an empty "FIXME".
#[derive(Debug, Clone)]
pub struct HttpContext {
    state: State,
    request: HttpRequest,
}

impl Default for HttpContext {
    fn default() -> Self {
        HttpContext::new()
    }
}

impl HttpContext {
    pub fn new() -> HttpContext {
        HttpContext {
            state: State::ExpectRequestLine,
            request: HttpRequest::new(),
        }
    }

    pub fn got_all(&self) -> bool {
        self.state == State::GotAll
    }

    pub fn reset(&mut self) {
        self.state = State::ExpectRequestLine;
        self.request = HttpRequest::new();
    }

    pub fn request(&self) -> &HttpRequest {
        &self.request
    }

    /// Feeds `buf` through the state machine, consuming exactly the bytes
    /// parsed (via `Buffer::retrieve`). Returns `false` on a malformed
    /// request line or version; the caller should then send `400 Bad
    /// Request` and shut the connection down.
    pub fn parse_request(&mut self, buf: &mut Buffer, receive_time: Instant) -> bool {
        let mut ok = true;
        let mut has_more = true;

        while has_more {
            match self.state {
                State::ExpectRequestLine => {
                    if let Some(crlf) = buf.find_crlf() {
                        let line = buf.peek()[..crlf].to_vec();
                        ok = self.process_request_line(&line);
                        if ok {
                            self.request.set_receive_time(receive_time);
                            buf.retrieve(crlf + 2);
                            self.state = State::ExpectHeaders;
                        } else {
                            has_more = false;
                        }
                    } else {
                        has_more = false;
                    }
                }
                State::ExpectHeaders => {
                    if let Some(crlf) = buf.find_crlf() {
                        let line = buf.peek()[..crlf].to_vec();
                        match line.iter().position(|&b| b == b':') {
                            Some(colon) => {
                                let field = String::from_utf8_lossy(&line[..colon]).into_owned();
                                let value = String::from_utf8_lossy(&line[colon + 1..]);
                                self.request.add_header(&field, value.trim());
                            }
                            None => {
                                // blank line: end of headers
                                self.state = State::GotAll;
                                has_more = false;
                            }
                        }
                        buf.retrieve(crlf + 2);
                    } else {
                        has_more = false;
                    }
                }
                State::GotAll => {
                    has_more = false;
                }
            }
        }

        ok
    }

    fn process_request_line(&mut self, line: &[u8]) -> bool {
        let text = match std::str::from_utf8(line) {
            Ok(t) => t,
            Err(_) => return false,
        };

        let mut parts = text.splitn(3, ' ');
        let method = match parts.next() {
            Some(m) => m,
            None => return false,
        };
        if !self.request.set_method(method) {
            return false;
        }

        let target = match parts.next() {
            Some(t) => t,
            None => return false,
        };
        let version = match parts.next() {
            Some(v) => v,
            None => return false,
        };

        match target.find('?') {
            Some(idx) => {
                self.request.set_path(&target[..idx]);
                self.request.set_query(&target[idx..]);
            }
            None => self.request.set_path(target),
        }

        match version {
            "HTTP/1.1" => {
                self.request.set_version(Version::Http11);
                true
            }
            "HTTP/1.0" => {
                self.request.set_version(Version::Http10);
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::http::request::Method;

    #[test]
    fn parses_a_simple_get_with_one_header() {
        let mut ctx = HttpContext::new();
        let mut buf = Buffer::new();
        buf.append(b"GET /foo?bar=1 HTTP/1.1\r\nHost: example.com\r\n\r\n");

        assert!(ctx.parse_request(&mut buf, Instant::now()));
        assert!(ctx.got_all());

        let req = ctx.request();
        assert_eq!(req.method(), Method::Get);
        assert_eq!(req.path(), "/foo");
        assert_eq!(req.query(), "?bar=1");
        assert_eq!(req.header("Host"), Some("example.com"));
    }

    #[test]
    fn stops_partway_through_a_split_request() {
        let mut ctx = HttpContext::new();
        let mut buf = Buffer::new();
        buf.append(b"GET / HTTP/1.1\r\n");

        assert!(ctx.parse_request(&mut buf, Instant::now()));
        assert!(!ctx.got_all());

        buf.append(b"\r\n");
        assert!(ctx.parse_request(&mut buf, Instant::now()));
        assert!(ctx.got_all());
    }

    #[test]
    fn rejects_a_bad_version_token() {
        let mut ctx = HttpContext::new();
        let mut buf = Buffer::new();
        buf.append(b"GET / HTTP/2.0\r\n");
        assert!(!ctx.parse_request(&mut buf, Instant::now()));
    }
}
