use std::collections::HashMap;
use std::time::Instant;

/// The request line's method, parsed from the literal token between the
/// first two spaces (spec supplement: grounded on `HttpRequest.h`'s
/// `setMethod`/`Method` enum, which is stricter than the HTTP spec's open
/// method set — anything else is `Invalid` and fails parsing).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Invalid,
    Get,
    Post,
    Head,
    Put,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    Unknown,
    Http10,
    Http11,
}

/// One parsed HTTP request. Headers are case-sensitive exactly as the
/// wire names them, matching the original's plain `std::map<string,
/// string>` (no case-folding).
#[derive(Debug, Clone)]
pub struct HttpRequest {
    method: Method,
    version: Version,
    path: String,
    query: String,
    receive_time: Option<Instant>,
    headers: HashMap<String, String>,
}

impl Default for HttpRequest {
    fn default() -> Self {
        HttpRequest::new()
    }
}

impl HttpRequest {
    pub fn new() -> HttpRequest {
        HttpRequest {
            method: Method::Invalid,
            version: Version::Unknown,
            path: String::new(),
            query: String::new(),
            receive_time: None,
            headers: HashMap::new(),
        }
    }

    pub fn set_version(&mut self, v: Version) {
        self.version = v;
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Returns `false` (leaving `method` as `Invalid`) for any token besides
    /// the five muduo recognizes.
    pub fn set_method(&mut self, token: &str) -> bool {
        self.method = match token {
            "GET" => Method::Get,
            "POST" => Method::Post,
            "HEAD" => Method::Head,
            "PUT" => Method::Put,
            "DELETE" => Method::Delete,
            _ => Method::Invalid,
        };
        self.method != Method::Invalid
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn method_string(&self) -> &'static str {
        match self.method {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Head => "HEAD",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Invalid => "UNKNOWN",
        }
    }

    pub fn set_path(&mut self, path: &str) {
        self.path = path.to_string();
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn set_query(&mut self, query: &str) {
        self.query = query.to_string();
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn set_receive_time(&mut self, t: Instant) {
        self.receive_time = Some(t);
    }

    pub fn receive_time(&self) -> Option<Instant> {
        self.receive_time
    }

    /// `line` is everything between the colon's neighbors already trimmed by
    /// the caller: `field` is the header name, `value` the trimmed value.
    pub fn add_header(&mut self, field: &str, value: &str) {
        self.headers.insert(field.to_string(), value.trim().to_string());
    }

    pub fn header(&self, field: &str) -> Option<&str> {
        self.headers.get(field).map(String::as_str)
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rejects_unknown_method() {
        let mut req = HttpRequest::new();
        assert!(!req.set_method("PATCH"));
        assert_eq!(req.method(), Method::Invalid);
    }

    #[test]
    fn accepts_known_methods() {
        let mut req = HttpRequest::new();
        assert!(req.set_method("GET"));
        assert_eq!(req.method(), Method::Get);
        assert_eq!(req.method_string(), "GET");
    }

    #[test]
    fn header_lookup_is_case_sensitive_like_the_original() {
        let mut req = HttpRequest::new();
        req.add_header("Host", " example.com ");
        assert_eq!(req.header("Host"), Some("example.com"));
        assert_eq!(req.header("host"), None);
    }
}
