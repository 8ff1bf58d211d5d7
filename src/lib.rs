//! beacon_web - Embedded HTTP/1.1 and WebSocket server core
//!
//! A single-threaded, event-driven server for tools that embed an HTTP
//! endpoint: a bound listener goes in, delegate callbacks come out. The
//! crate also ships a stateless QUIC client-hello probe
//! ([`quic::chlo_extractor`]) for dispatchers that must decide admission
//! from the first packet of a connection.
//!
//! # Protocol Support
//!
//! - **HTTP/1.1** with serial request processing per connection and
//!   `content-length` bodies (no pipelining, no chunked encoding).
//! - **WebSocket** via the opportunistic upgrade path: a request carrying
//!   `Connection: Upgrade` and `Upgrade: websocket` switches the
//!   connection to RFC 6455 framing.
//!
//! # Concurrency Model
//!
//! Everything runs on one thread inside a [`tokio::task::LocalSet`]:
//! accepting, reading, parsing, delegate callbacks, and writing. There are
//! no locks and no `Send` bounds; delegates may re-enter the server from
//! any callback. Closing a connection keeps it alive until the end of the
//! current scheduler tick so that callers up the stack never hold a
//! dangling reference.
//!
//! # Quick Start
//!
//! ```no_run
//! use beacon_web::{Delegate, HttpServer, RequestInfo, TrafficAnnotation};
//! use std::rc::Rc;
//! use tokio::net::TcpListener;
//!
//! const ANNOTATION: TrafficAnnotation = TrafficAnnotation("hello_server");
//!
//! struct Hello;
//!
//! impl Delegate for Hello {
//!     fn on_connect(&self, _: &HttpServer, _: u64) {}
//!     fn on_http_request(&self, server: &HttpServer, id: u64, _: RequestInfo) {
//!         server.send_200(id, "Hello world!", "text/plain", ANNOTATION);
//!     }
//!     fn on_websocket_request(&self, server: &HttpServer, id: u64, request: RequestInfo) {
//!         server.accept_websocket(id, &request, ANNOTATION);
//!     }
//!     fn on_websocket_message(&self, server: &HttpServer, id: u64, message: String) {
//!         server.send_over_websocket(id, &message, ANNOTATION);
//!     }
//!     fn on_close(&self, _: &HttpServer, _: u64) {}
//! }
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let local = tokio::task::LocalSet::new();
//!     local
//!         .run_until(async {
//!             let listener = TcpListener::bind("127.0.0.1:8080").await.unwrap();
//!             let _server = HttpServer::new(listener, Rc::new(Hello));
//!             std::future::pending::<()>().await;
//!         })
//!         .await;
//! }
//! ```
pub(crate) mod http {
    pub(crate) mod parser;
    pub(crate) mod request;
    pub(crate) mod response;
    pub(crate) mod types;
}
pub(crate) mod server {
    pub(crate) mod buffer;
    pub(crate) mod connection;
    pub(crate) mod server_impl;
    pub(crate) mod web_socket;
}
pub mod quic {
    pub mod chlo_extractor;
    pub mod crypto_framer;
    pub mod types;
}
pub(crate) mod errors;
pub mod limits;

pub use crate::{
    http::{request::RequestInfo, response::ResponseInfo, types::StatusCode},
    server::{
        connection::ConnectionId,
        server_impl::{Delegate, HttpServer, TrafficAnnotation},
    },
};
