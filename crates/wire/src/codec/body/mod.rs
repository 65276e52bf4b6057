//! Body codecs.
//!
//! Decoders turn request payload bytes into [`PayloadItem`](crate::protocol::PayloadItem)s:
//! - [`ChunkedDecoder`]: `Transfer-Encoding: chunked`, trailers kept aside
//! - [`LengthDecoder`]: `Content-Length`
//! - [`PayloadDecoder`]: picks one of the above, or no body
//!
//! Encoders frame response payload chunks:
//! - [`ChunkedEncoder`]: chunked framing with the `0\r\n\r\n` terminator
//! - [`LengthEncoder`]: exactly the declared length
//! - [`PayloadEncoder`]: picks one of the above, unframed until close, or no body

mod chunked_decoder;
mod chunked_encoder;
mod length_decoder;
mod length_encoder;
mod payload_decoder;
mod payload_encoder;

pub use chunked_decoder::ChunkedDecoder;
pub use chunked_encoder::ChunkedEncoder;
pub use length_decoder::LengthDecoder;
pub use length_encoder::LengthEncoder;
pub use payload_decoder::PayloadDecoder;
pub use payload_encoder::PayloadEncoder;
