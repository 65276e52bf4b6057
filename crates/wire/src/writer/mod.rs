//! Streaming response output.
//!
//! A [`ResponseWriter`] drains a [`Producer`] onto an `AsyncWrite`, one write
//! and at most one pending value at a time, so a fast producer never piles up
//! output in front of a slow socket.

mod producer;
mod response_writer;

pub use producer::BodyProducer;
pub use producer::IterProducer;
pub use producer::NextFrame;
pub use producer::Pending;
pub use producer::Producer;
pub use producer::Resumed;
pub use producer::Yielded;
pub use response_writer::CloseSignal;
pub use response_writer::ResponseWriter;
pub use response_writer::WriteOutcome;
