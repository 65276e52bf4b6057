//! Chains the header decoder and the payload decoder into one request stream.
//!
//! Each request yields one `Message::Header`, then zero or more
//! `Message::Payload(PayloadItem::Chunk(_))` and exactly one
//! `Message::Payload(PayloadItem::Eof)`, even for requests without a body.
//!
//! ```
//! use bytes::BytesMut;
//! use micro_wire::codec::RequestDecoder;
//! use micro_wire::options::Options;
//! use micro_wire::protocol::Message;
//! use tokio_util::codec::Decoder;
//!
//! let mut decoder = RequestDecoder::new(&Options::default());
//! let mut buffer = BytesMut::from(&b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n"[..]);
//!
//! assert!(matches!(decoder.decode(&mut buffer), Ok(Some(Message::Header(_)))));
//! assert!(matches!(decoder.decode(&mut buffer), Ok(Some(Message::Payload(_)))));
//! ```

use bytes::BytesMut;
use http::HeaderMap;
use tokio_util::codec::Decoder;

use crate::codec::body::PayloadDecoder;
use crate::codec::header::HeaderDecoder;
use crate::options::Options;
use crate::protocol::{Message, ParseError, PayloadItem, PayloadSize, RequestHeader};

#[derive(Debug, Clone)]
pub struct RequestDecoder {
    header_decoder: HeaderDecoder,
    payload_decoder: Option<PayloadDecoder>,
    trailers: HeaderMap,
}

impl RequestDecoder {
    pub fn new(options: &Options) -> Self {
        Self { header_decoder: HeaderDecoder::new(options), payload_decoder: None, trailers: HeaderMap::new() }
    }

    /// Whether the decoder is between a head and the end of its body.
    pub fn is_decoding_payload(&self) -> bool {
        self.payload_decoder.is_some()
    }

    /// Trailer fields of the last chunked body that finished.
    pub fn take_trailers(&mut self) -> HeaderMap {
        std::mem::take(&mut self.trailers)
    }
}

impl Default for RequestDecoder {
    fn default() -> Self {
        Self::new(&Options::default())
    }
}

impl Decoder for RequestDecoder {
    type Item = Message<(RequestHeader, PayloadSize)>;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(payload_decoder) = &mut self.payload_decoder {
            let message = match payload_decoder.decode(src)? {
                Some(item @ PayloadItem::Chunk(_)) => Some(Message::Payload(item)),
                Some(item @ PayloadItem::Eof) => {
                    self.trailers = payload_decoder.take_trailers();
                    self.payload_decoder = None;
                    Some(Message::Payload(item))
                }
                None => None,
            };

            return Ok(message);
        }

        let message = match self.header_decoder.decode(src)? {
            Some((header, payload_size)) => {
                self.payload_decoder = Some(payload_size.into());
                Some(Message::Header((header, payload_size)))
            }
            None => None,
        };

        Ok(message)
    }
}
