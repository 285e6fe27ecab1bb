//! A minimal HTTP/1.x server built on top of [`crate::TcpServer`] — the
//! `http` feature, grounded on muduo's `net/http/` (`HttpContext`,
//! `HttpRequest`, `HttpResponse`, `HttpServer`). Request bodies are not
//! parsed, matching the original.

mod context;
mod request;
mod response;
mod server;

pub use request::{HttpRequest, Method, Version};
pub use response::{HttpResponse, StatusCode};
pub use server::{HttpCallback, HttpServer};
