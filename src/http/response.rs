use std::collections::HashMap;
use std::fmt::Write as _;

use crate::buffer::Buffer;

/// The small set of status codes `HttpResponse.cc`'s callers actually use;
/// anything else the user wants goes through `set_status_code_raw`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Ok200,
    MovedPermanently301,
    BadRequest400,
    NotFound404,
    Other(u16),
}

impl StatusCode {
    fn code(self) -> u16 {
        match self {
            StatusCode::Ok200 => 200,
            StatusCode::MovedPermanently301 => 301,
            StatusCode::BadRequest400 => 400,
            StatusCode::NotFound404 => 404,
            StatusCode::Other(c) => c,
        }
    }
}

/// A response under construction; `appendToBuffer`'s Rust name,
/// `append_to_buffer`, serializes it onto the wire exactly like the
/// original: status line, `Content-Length`/`Connection` framing headers,
/// user headers, blank line, body.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    status_code: StatusCode,
    status_message: String,
    close_connection: bool,
    headers: HashMap<String, String>,
    body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(close_connection: bool) -> HttpResponse {
        HttpResponse {
            status_code: StatusCode::Ok200,
            status_message: String::new(),
            close_connection,
            headers: HashMap::new(),
            body: Vec::new(),
        }
    }

    pub fn set_status_code(&mut self, code: StatusCode) {
        self.status_code = code;
    }

    pub fn status_code(&self) -> StatusCode {
        self.status_code
    }

    pub fn set_status_message(&mut self, message: impl Into<String>) {
        self.status_message = message.into();
    }

    pub fn set_close_connection(&mut self, close: bool) {
        self.close_connection = close;
    }

    pub fn close_connection(&self) -> bool {
        self.close_connection
    }

    pub fn add_header(&mut self, field: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(field.into(), value.into());
    }

    pub fn set_body(&mut self, body: impl Into<Vec<u8>>) {
        self.body = body.into();
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn append_to_buffer(&self, output: &mut Buffer) {
        let mut head = String::new();
        let _ = write!(head, "HTTP/1.1 {} {}\r\n", self.status_code.code(), self.status_message);
        output.append(head.as_bytes());

        if self.close_connection {
            output.append(b"Connection: close\r\n");
        } else {
            let mut len_line = String::new();
            let _ = write!(len_line, "Content-Length: {}\r\n", self.body.len());
            output.append(len_line.as_bytes());
            output.append(b"Connection: Keep-Alive\r\n");
        }

        for (field, value) in &self.headers {
            output.append(field.as_bytes());
            output.append(b": ");
            output.append(value.as_bytes());
            output.append(b"\r\n");
        }

        output.append(b"\r\n");
        output.append(&self.body);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn keep_alive_response_carries_content_length() {
        let mut resp = HttpResponse::new(false);
        resp.set_status_code(StatusCode::Ok200);
        resp.set_status_message("OK");
        resp.set_body(b"hi".to_vec());

        let mut buf = Buffer::new();
        resp.append_to_buffer(&mut buf);
        let text = String::from_utf8(buf.peek().to_vec()).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Content-Length: 2\r\n"));
        assert!(text.contains("Connection: Keep-Alive\r\n"));
        assert!(text.ends_with("\r\n\r\nhi"));
    }

    #[test]
    fn close_response_omits_content_length() {
        let mut resp = HttpResponse::new(true);
        resp.set_status_code(StatusCode::NotFound404);
        resp.set_status_message("Not Found");

        let mut buf = Buffer::new();
        resp.append_to_buffer(&mut buf);
        let text = String::from_utf8(buf.peek().to_vec()).unwrap();
        assert!(text.contains("Connection: close\r\n"));
        assert!(!text.contains("Content-Length"));
    }
}
