//! The sans-io protocol driver.
//!
//! [`Http1Driver`] owns the parser state of one connection. Bytes go in through
//! [`Http1Driver::feed`], complete requests and handshake output come out
//! through an [`Emitter`], and [`Http1Driver::writer`] builds the
//! [`ResponseWriter`](crate::writer::ResponseWriter) for each response.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use bytes::Bytes;
//! use http::{Request, Response};
//! use micro_wire::driver::{Emitter, Http1Driver};
//! use micro_wire::options::Options;
//! use micro_wire::protocol::body::RequestBody;
//! use micro_wire::protocol::{ClientInfo, RequestExt};
//! use micro_wire::upgrade::Http2Upgrade;
//! use micro_wire::writer::{IterProducer, Yielded};
//!
//! #[derive(Default)]
//! struct Requests(Vec<Request<RequestBody>>);
//!
//! impl Emitter for Requests {
//!     fn emit(&mut self, request: Request<RequestBody>) {
//!         self.0.push(request);
//!     }
//!     fn transmit(&mut self, _bytes: Bytes, _close: bool) {}
//!     fn upgrade(&mut self, _upgrade: Http2Upgrade) {}
//!     fn forward(&mut self, _bytes: Bytes) {}
//! }
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let mut driver = Http1Driver::new(Arc::new(Options::default()), Arc::new(ClientInfo::new(1)));
//! let mut requests = Requests::default();
//! driver.feed(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n", &mut requests)?;
//!
//! let context = requests.0[0].context();
//! let body = IterProducer::new([Yielded::<()>::Chunk(Bytes::from_static(b"hello"))]);
//! let mut output = Vec::new();
//! driver.writer(Response::new(()), Some(&context), body, &mut output)?.await?;
//!
//! // the pipelining gate is open again, buffered requests are parsed
//! driver.feed(&[], &mut requests)?;
//! # Ok(())
//! # }
//! ```

mod http1_driver;

pub use http1_driver::Emitter;
pub use http1_driver::Http1Driver;
pub use http1_driver::ResponseTicket;
