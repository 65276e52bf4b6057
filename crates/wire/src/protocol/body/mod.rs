//! Streaming request bodies.
//!
//! [`RequestBody`] is the consumer side handed to applications and implements
//! `http_body::Body`. [`BodySender`] is the driver side, fed with decoded payload
//! chunks. They are connected by an unbounded channel: the decoder never waits
//! for the application, and the pipelining gate in the driver bounds how much is
//! buffered.

mod req_body;

pub use req_body::BodySender;
pub use req_body::RequestBody;
