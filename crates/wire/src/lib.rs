//! The HTTP/1.1 wire protocol, from socket bytes to request objects and back.
//!
//! This crate turns a byte stream into dispatched [`http::Request`]s and writes
//! responses back out, leaving routing and application logic to the caller. It is
//! built on top of tokio and the `http` crate types.
//!
//! # Features
//!
//! - Incremental request parsing, bytes may arrive in arbitrarily small pieces
//! - Streaming request bodies with a per request, raiseable size cap
//! - Chunked transfer encoding in both directions, trailers included
//! - Keep-alive and pipelining, with responses kept in request order
//! - Streaming responses pulled from a lazy [`Producer`](writer::Producer) that may suspend on futures
//! - `h2c` upgrade and the HTTP/2 prior-knowledge preface, handing the socket over for HTTP/2 framing
//! - Parse errors answered with their HTTP status before the connection closes
//!
//! # Example
//!
//! ```no_run
//! use std::error::Error;
//! use std::sync::Arc;
//!
//! use http::{Request, Response};
//! use http_body_util::BodyExt;
//! use tokio::net::TcpListener;
//! use tracing::{Level, error, info, warn};
//! use tracing_subscriber::FmtSubscriber;
//!
//! use micro_wire::connection::{HttpConnection, Processed};
//! use micro_wire::handler::make_handler;
//! use micro_wire::options::Options;
//! use micro_wire::protocol::ClientInfo;
//! use micro_wire::protocol::body::RequestBody;
//!
//! #[tokio::main]
//! async fn main() {
//!     let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
//!     tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");
//!
//!     let tcp_listener = match TcpListener::bind("127.0.0.1:8080").await {
//!         Ok(tcp_listener) => tcp_listener,
//!         Err(e) => {
//!             error!(cause = %e, "bind server error");
//!             return;
//!         }
//!     };
//!
//!     let options = Arc::new(Options::default());
//!     let handler = Arc::new(make_handler(echo));
//!     let mut next_id = 0;
//!
//!     loop {
//!         let (tcp_stream, remote_addr) = match tcp_listener.accept().await {
//!             Ok(stream_and_addr) => stream_and_addr,
//!             Err(e) => {
//!                 warn!(cause = %e, "failed to accept");
//!                 continue;
//!             }
//!         };
//!
//!         next_id += 1;
//!         let client = Arc::new(ClientInfo::new(next_id).with_remote_addr(remote_addr));
//!         let options = Arc::clone(&options);
//!         let handler = Arc::clone(&handler);
//!
//!         tokio::spawn(async move {
//!             let (reader, writer) = tcp_stream.into_split();
//!             match HttpConnection::new(reader, writer, options, client).process(handler).await {
//!                 Ok(Processed::Closed) => info!("finished process, connection shutdown"),
//!                 Ok(Processed::Upgraded(_handoff)) => info!("connection handed over to http2"),
//!                 Err(e) => error!("service has error, cause {}, connection shutdown", e),
//!             }
//!         });
//!     }
//! }
//!
//! async fn echo(request: Request<RequestBody>) -> Result<Response<String>, Box<dyn Error + Send + Sync>> {
//!     // accept uploads up to 4 MiB on this route
//!     request.body().increase_max_size(4 * 1024 * 1024);
//!     let body = request.into_body().collect().await?.to_bytes();
//!     Ok(Response::new(String::from_utf8_lossy(&body).into_owned()))
//! }
//! ```
//!
//! # Architecture
//!
//! - [`codec`]: request head and body decoders, response head and body encoders
//! - [`driver`]: the sans-io [`Http1Driver`](driver::Http1Driver) owning a connection's parse state
//! - [`writer`]: the [`ResponseWriter`](writer::ResponseWriter) draining a body producer into the socket
//! - [`upgrade`]: `h2c` and preface detection, HTTP/2 settings encoding and decoding
//! - [`connection`]: [`HttpConnection`](connection::HttpConnection) gluing a socket, the driver and a handler
//! - [`protocol`]: request and response types plus the error types
//! - [`handler`]: the [`Handler`](handler::Handler) trait and function adapters
//! - [`options`]: connection limits
//!
//! The driver does no io of its own. It receives bytes through
//! [`feed`](driver::Http1Driver::feed) and reports what happened through an
//! [`Emitter`](driver::Emitter), so it can be embedded into any event loop.
//! [`HttpConnection`](connection::HttpConnection) is the tokio embedding.

pub mod codec;
pub mod connection;
pub mod driver;
pub mod handler;
pub mod options;
pub mod protocol;
pub mod upgrade;
pub mod writer;

mod utils;
pub(crate) use utils::ensure;
