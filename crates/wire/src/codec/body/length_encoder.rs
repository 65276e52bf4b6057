//! Encoder for response bodies with a declared `Content-Length`.

use bytes::{Buf, BytesMut};
use tokio_util::codec::Encoder;
use tracing::warn;

use crate::protocol::{PayloadItem, SendError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LengthEncoder {
    remaining: u64,
}

impl LengthEncoder {
    pub fn new(length: u64) -> Self {
        Self { remaining: length }
    }

    pub fn is_finish(&self) -> bool {
        self.remaining == 0
    }
}

impl<D: Buf> Encoder<PayloadItem<D>> for LengthEncoder {
    type Error = SendError;

    fn encode(&mut self, item: PayloadItem<D>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            PayloadItem::Chunk(mut bytes) => {
                let len = bytes.remaining() as u64;
                if len > self.remaining {
                    warn!(len, remaining = self.remaining, "response body exceeds declared content-length");
                    return Err(SendError::invalid_body("body longer than declared content-length"));
                }
                self.remaining -= len;
                dst.reserve(bytes.remaining());
                while bytes.has_remaining() {
                    let chunk = bytes.chunk();
                    let chunk_len = chunk.len();
                    dst.extend_from_slice(chunk);
                    bytes.advance(chunk_len);
                }
                Ok(())
            }
            PayloadItem::Eof if self.remaining > 0 => {
                warn!(remaining = self.remaining, "response body shorter than declared content-length");
                Err(SendError::invalid_body("body shorter than declared content-length"))
            }
            PayloadItem::Eof => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn writes_exact_length() {
        let mut encoder = LengthEncoder::new(9);
        let mut dst = BytesMut::new();

        encoder.encode(PayloadItem::Chunk(Bytes::from_static(b"woot!")), &mut dst).unwrap();
        encoder.encode(PayloadItem::Chunk(Bytes::from_static(b"test")), &mut dst).unwrap();
        encoder.encode(PayloadItem::<Bytes>::Eof, &mut dst).unwrap();

        assert!(encoder.is_finish());
        assert_eq!(&dst[..], b"woot!test");
    }

    #[test]
    fn rejects_length_mismatch() {
        let mut dst = BytesMut::new();
        assert!(LengthEncoder::new(2).encode(PayloadItem::Chunk(Bytes::from_static(b"abc")), &mut dst).is_err());
        assert!(LengthEncoder::new(2).encode(PayloadItem::<Bytes>::Eof, &mut dst).is_err());
    }
}
