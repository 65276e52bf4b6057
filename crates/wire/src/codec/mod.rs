//! Codecs between raw bytes and protocol messages.
//!
//! All codecs implement the `tokio_util::codec` traits and work on a `BytesMut`
//! that may hold any fragment of the stream: `Ok(None)` means more input is
//! needed and nothing was lost.
//!
//! - Request side: [`RequestDecoder`] chains the [`header::HeaderDecoder`] and the
//!   [`body::PayloadDecoder`]
//! - Response side: [`header::HeaderEncoder`] writes the head and
//!   [`body::PayloadEncoder`] frames the body chunks

pub mod body;
pub mod header;
mod request_decoder;

pub use request_decoder::RequestDecoder;
