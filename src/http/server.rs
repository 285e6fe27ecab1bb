use std::cell::RefCell;
use std::net::SocketAddr;
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::buffer::Buffer;
use crate::config::ServerOptions;
use crate::event_loop::EventLoop;
use crate::http::context::HttpContext;
use crate::http::request::{HttpRequest, Version};
use crate::http::response::{HttpResponse, StatusCode};
use crate::tcp_connection::TcpConnectionHandle;
use crate::tcp_server::TcpServer;

pub type HttpCallback = Arc<dyn Fn(&HttpRequest, &mut HttpResponse) + Send + Sync>;

fn default_http_callback() -> HttpCallback {
    Arc::new(|_req: &HttpRequest, resp: &mut HttpResponse| {
        resp.set_status_code(StatusCode::NotFound404);
        resp.set_status_message("Not Found");
        resp.set_close_connection(true);
    })
}

/// A `TcpServer` that speaks HTTP/1.x request/response framing instead of
/// raw bytes; grounded on muduo's `HttpServer`, which is itself nothing more
/// than a thin `TcpServer` wrapper plus the context dance below.
pub struct HttpServer {
    server: TcpServer,
    http_cb: Arc<Mutex<HttpCallback>>,
}

impl HttpServer {
    pub fn new(
        loop_: &Rc<EventLoop>,
        addr: &SocketAddr,
        name: impl Into<Arc<str>>,
        options: ServerOptions,
    ) -> std::io::Result<HttpServer> {
        let server = TcpServer::new(loop_, addr, name, options)?;
        // A plain `Arc<Mutex<..>>`, not an `Rc`: the message callback below
        // must be `Send + Sync` since `TcpServer` may hand it to any IO loop
        // thread in the pool.
        let http_cb = Arc::new(Mutex::new(default_http_callback()));

        server.set_connection_callback(Arc::new(HttpServer::on_connection));

        {
            let http_cb = http_cb.clone();
            server.set_message_callback(Arc::new(
                move |conn: &TcpConnectionHandle, buf: &mut Buffer, ts: Instant| {
                    HttpServer::on_message(conn, buf, ts, &http_cb);
                },
            ));
        }

        Ok(HttpServer { server, http_cb })
    }

    pub fn set_http_callback(&self, cb: HttpCallback) {
        *self.http_cb.lock().unwrap() = cb;
    }

    pub fn set_thread_num(&self, n: usize) {
        self.server.set_thread_num(n);
    }

    pub fn name(&self) -> Arc<str> {
        self.server.name()
    }

    pub fn ip_port(&self) -> String {
        self.server.ip_port()
    }

    pub fn start(&self) {
        self.server.start();
    }

    fn on_connection(conn: &TcpConnectionHandle) {
        if conn.connected() {
            conn.set_context(Box::new(RefCell::new(HttpContext::new())));
        }
    }

    fn on_message(conn: &TcpConnectionHandle, buf: &mut Buffer, ts: Instant, http_cb: &Arc<Mutex<HttpCallback>>) {
        let parsed = conn.with_context(|ctx| {
            let ctx = ctx
                .and_then(|c| c.downcast_ref::<RefCell<HttpContext>>())
                .expect("HttpServer connection missing its HttpContext");
            ctx.borrow_mut().parse_request(buf, ts)
        });

        let ok = match parsed {
            Some(ok) => ok,
            None => return,
        };

        if !ok {
            conn.send(b"HTTP/1.1 400 Bad Request\r\n\r\n".to_vec());
            conn.shutdown();
            return;
        }

        let got_all = conn
            .with_context(|ctx| {
                ctx.and_then(|c| c.downcast_ref::<RefCell<HttpContext>>())
                    .map(|c| c.borrow().got_all())
                    .unwrap_or(false)
            })
            .unwrap_or(false);

        if got_all {
            HttpServer::on_request(conn, http_cb);
            conn.with_context(|ctx| {
                if let Some(c) = ctx.and_then(|c| c.downcast_ref::<RefCell<HttpContext>>()) {
                    c.borrow_mut().reset();
                }
            });
        }
    }

    fn on_request(conn: &TcpConnectionHandle, http_cb: &Arc<Mutex<HttpCallback>>) {
        let request = conn
            .with_context(|ctx| {
                ctx.and_then(|c| c.downcast_ref::<RefCell<HttpContext>>())
                    .map(|c| c.borrow().request().clone())
            })
            .flatten();
        let request = match request {
            Some(r) => r,
            None => return,
        };

        let connection_header = request.header("Connection").unwrap_or("");
        let close = connection_header == "close"
            || (request.version() == Version::Http10 && connection_header != "Keep-Alive");

        let mut response = HttpResponse::new(close);
        (http_cb.lock().unwrap())(&request, &mut response);

        let mut out = Buffer::new();
        response.append_to_buffer(&mut out);
        conn.send_buffer(&mut out);

        if response.close_connection() {
            conn.shutdown();
        }
    }
}
