//! Header section codecs.
//!
//! - [`HeaderDecoder`]: parses the request line and header fields, enforces the
//!   size and count limits and selects the body framing
//! - [`HeaderEncoder`]: writes a response status line and header fields

mod header_decoder;
mod header_encoder;

pub use header_decoder::HeaderDecoder;
pub use header_encoder::HeaderEncoder;
pub(crate) use header_encoder::FastWrite;
