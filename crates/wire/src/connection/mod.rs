//! Connection handling over tokio I/O.
//!
//! [`HttpConnection`] plugs the sans-io [`Http1Driver`](crate::driver::Http1Driver)
//! into a socket: it reads bytes into the driver, runs the [`Handler`](crate::handler::Handler)
//! for every dispatched request and writes each response through a
//! [`ResponseWriter`](crate::writer::ResponseWriter).
//!
//! Features:
//!
//! - keep-alive with an idle timeout and a per-connection request budget
//! - pipelined requests, answered strictly in order
//! - request bodies streamed to the handler while they are received
//! - `Expect: 100-continue`
//! - hand-off of the socket after a switch to HTTP/2

mod http_connection;

pub use http_connection::Http2Handoff;
pub use http_connection::HttpConnection;
pub use http_connection::Processed;
