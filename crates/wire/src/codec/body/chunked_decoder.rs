//! Decoder for `Transfer-Encoding: chunked` bodies, RFC 9112 section 7.1.
//!
//! Chunk data is handed out as soon as it arrives, a chunk does not have to be
//! complete before its first bytes are yielded. Trailer fields after the last
//! chunk are parsed with header syntax and kept apart from the request headers.

use std::task::Poll;

use bytes::{Buf, Bytes, BytesMut};
use http::{HeaderMap, HeaderName, HeaderValue};
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::protocol::{ParseError, PayloadItem};
use crate::utils::find_subslice;
use ChunkedState::{Body, BodyCr, BodyLf, End, Extension, Size, SizeLf, SizeLws, Trailer};

const MAX_TRAILER_BYTES: usize = 8 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkedDecoder {
    state: ChunkedState,
    remaining_size: u64,
    size_digits: usize,
    trailers: HeaderMap,
    trailer_bytes: usize,
}

impl ChunkedDecoder {
    pub fn new() -> Self {
        Self { state: Size, remaining_size: 0, size_digits: 0, trailers: HeaderMap::new(), trailer_bytes: 0 }
    }

    /// Trailer fields received after the last chunk.
    pub fn trailers(&self) -> &HeaderMap {
        &self.trailers
    }

    pub fn take_trailers(&mut self) -> HeaderMap {
        std::mem::take(&mut self.trailers)
    }
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkedState {
    /// hex digits of the chunk size
    Size,
    /// whitespace after the size
    SizeLws,
    /// chunk extensions, ignored
    Extension,
    SizeLf,
    /// chunk data
    Body,
    BodyCr,
    BodyLf,
    /// one trailer line at a time, until the empty line
    Trailer,
    End,
}

impl Decoder for ChunkedDecoder {
    type Item = PayloadItem;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            if self.state == End {
                trace!(trailers = self.trailers.len(), "finished reading chunked data");
                return Ok(Some(PayloadItem::Eof));
            }

            if src.is_empty() {
                return Ok(None);
            }

            let mut buf = None;

            self.state = match self.step(src, &mut buf) {
                Poll::Pending => return Ok(None),
                Poll::Ready(Ok(new_state)) => new_state,
                Poll::Ready(Err(e)) => return Err(e),
            };

            if let Some(bytes) = buf {
                trace!(len = bytes.len(), "read chunked bytes");
                return Ok(Some(PayloadItem::Chunk(bytes)));
            }
        }
    }
}

macro_rules! try_next_byte {
    ($src:ident) => {{
        if $src.is_empty() {
            return Poll::Pending;
        }
        $src.get_u8()
    }};
}

impl ChunkedDecoder {
    fn step(&mut self, src: &mut BytesMut, buf: &mut Option<Bytes>) -> Poll<Result<ChunkedState, ParseError>> {
        match self.state {
            Size => read_size(src, &mut self.remaining_size, &mut self.size_digits),
            SizeLws => read_size_lws(src),
            Extension => read_extension(src),
            SizeLf => read_size_lf(src, self.remaining_size),
            Body => read_body(src, &mut self.remaining_size, buf),
            BodyCr => read_body_cr(src),
            BodyLf => read_body_lf(src),
            Trailer => self.read_trailer(src),
            End => Poll::Ready(Ok(End)),
        }
    }

    /// Reads one complete trailer line. An empty line ends the message.
    fn read_trailer(&mut self, src: &mut BytesMut) -> Poll<Result<ChunkedState, ParseError>> {
        let Some(line_end) = find_subslice(src, b"\r\n", 0) else {
            if self.trailer_bytes + src.len() > MAX_TRAILER_BYTES {
                return Poll::Ready(Err(ParseError::invalid_chunk("trailer section too large")));
            }
            return Poll::Pending;
        };

        let line = src.split_to(line_end + 2).freeze();
        self.trailer_bytes += line.len();
        if line_end == 0 {
            return Poll::Ready(Ok(End));
        }
        if self.trailer_bytes > MAX_TRAILER_BYTES {
            return Poll::Ready(Err(ParseError::invalid_chunk("trailer section too large")));
        }

        let (name, value) = match parse_trailer(&line.slice(..line_end)) {
            Ok(field) => field,
            Err(e) => return Poll::Ready(Err(e)),
        };
        self.trailers.append(name, value);
        Poll::Ready(Ok(Trailer))
    }
}

fn parse_trailer(line: &Bytes) -> Result<(HeaderName, HeaderValue), ParseError> {
    const INVALID: ParseError = ParseError::InvalidChunk { reason: "invalid trailer field" };

    let colon = line.iter().position(|b| *b == b':').ok_or(INVALID)?;
    let name = HeaderName::from_bytes(&line[..colon]).map_err(|_| INVALID)?;

    let raw_value = &line[colon + 1..];
    let value = raw_value.trim_ascii();
    let start = colon + 1 + (raw_value.len() - raw_value.trim_ascii_start().len());
    let value = HeaderValue::from_maybe_shared(line.slice(start..start + value.len())).map_err(|_| INVALID)?;
    Ok((name, value))
}

fn read_size(src: &mut BytesMut, size_per_chunk: &mut u64, digits: &mut usize) -> Poll<Result<ChunkedState, ParseError>> {
    let digit = match try_next_byte!(src) {
        b @ b'0'..=b'9' => b - b'0',
        b @ b'a'..=b'f' => b + 10 - b'a',
        b @ b'A'..=b'F' => b + 10 - b'A',
        b => return Poll::Ready(end_of_size(b, digits)),
    };

    match size_per_chunk.checked_mul(16).and_then(|size| size.checked_add(u64::from(digit))) {
        Some(size) => {
            *size_per_chunk = size;
            *digits += 1;
            Poll::Ready(Ok(Size))
        }
        None => Poll::Ready(Err(ParseError::invalid_chunk("chunk size overflow"))),
    }
}

/// A size line must carry at least one hex digit before anything else.
fn end_of_size(byte: u8, digits: &mut usize) -> Result<ChunkedState, ParseError> {
    if std::mem::take(digits) == 0 {
        return Err(ParseError::invalid_chunk("invalid chunk size"));
    }
    match byte {
        b'\t' | b' ' => Ok(SizeLws),
        b';' => Ok(Extension),
        b'\r' => Ok(SizeLf),
        _ => Err(ParseError::invalid_chunk("invalid chunk size")),
    }
}

fn read_size_lws(src: &mut BytesMut) -> Poll<Result<ChunkedState, ParseError>> {
    match try_next_byte!(src) {
        // no more digits after whitespace
        b'\t' | b' ' => Poll::Ready(Ok(SizeLws)),
        b';' => Poll::Ready(Ok(Extension)),
        b'\r' => Poll::Ready(Ok(SizeLf)),
        _ => Poll::Ready(Err(ParseError::invalid_chunk("invalid chunk size linear white space"))),
    }
}

fn read_extension(src: &mut BytesMut) -> Poll<Result<ChunkedState, ParseError>> {
    // extensions end at CRLF, a bare LF inside one is rejected
    match try_next_byte!(src) {
        b'\r' => Poll::Ready(Ok(SizeLf)),
        b'\n' => Poll::Ready(Err(ParseError::invalid_chunk("chunk extension contains newline"))),
        _ => Poll::Ready(Ok(Extension)),
    }
}

fn read_size_lf(src: &mut BytesMut, size_per_chunk: u64) -> Poll<Result<ChunkedState, ParseError>> {
    match try_next_byte!(src) {
        b'\n' if size_per_chunk == 0 => Poll::Ready(Ok(Trailer)),
        b'\n' => Poll::Ready(Ok(Body)),
        _ => Poll::Ready(Err(ParseError::invalid_chunk("invalid chunk size LF"))),
    }
}

fn read_body(src: &mut BytesMut, size_per_chunk: &mut u64, buf: &mut Option<Bytes>) -> Poll<Result<ChunkedState, ParseError>> {
    if src.is_empty() {
        return Poll::Pending;
    }

    let read_size = usize::try_from(*size_per_chunk).map_or(src.len(), |remaining| remaining.min(src.len()));
    *size_per_chunk -= read_size as u64;
    *buf = Some(src.split_to(read_size).freeze());

    if *size_per_chunk > 0 { Poll::Ready(Ok(Body)) } else { Poll::Ready(Ok(BodyCr)) }
}

fn read_body_cr(src: &mut BytesMut) -> Poll<Result<ChunkedState, ParseError>> {
    match try_next_byte!(src) {
        b'\r' => Poll::Ready(Ok(BodyLf)),
        _ => Poll::Ready(Err(ParseError::invalid_chunk("invalid chunk body CR"))),
    }
}

fn read_body_lf(src: &mut BytesMut) -> Poll<Result<ChunkedState, ParseError>> {
    match try_next_byte!(src) {
        b'\n' => Poll::Ready(Ok(Size)),
        _ => Poll::Ready(Err(ParseError::invalid_chunk("invalid chunk body LF"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_to_end(decoder: &mut ChunkedDecoder, buffer: &mut BytesMut) -> Result<Vec<u8>, ParseError> {
        let mut body = Vec::new();
        loop {
            match decoder.decode(buffer)? {
                Some(PayloadItem::Chunk(bytes)) => body.extend_from_slice(&bytes),
                Some(PayloadItem::Eof) => return Ok(body),
                None => panic!("decoder needs more data"),
            }
        }
    }

    #[test]
    fn test_basic() {
        let mut buffer = BytesMut::from(&b"10\r\n1234567890abcdef\r\n0\r\n\r\n"[..]);
        let mut decoder = ChunkedDecoder::new();

        let item = decoder.decode(&mut buffer).unwrap().unwrap();
        assert!(item.is_chunk());
        assert_eq!(item.as_bytes().unwrap(), &Bytes::from_static(b"1234567890abcdef"));

        assert!(decoder.decode(&mut buffer).unwrap().unwrap().is_eof());
        assert!(buffer.is_empty());
    }

    #[test]
    fn woot_test() {
        let mut buffer = BytesMut::from(&b"5\r\nwoot!\r\n4\r\ntest\r\n0\r\n\r\n"[..]);
        let body = decode_to_end(&mut ChunkedDecoder::new(), &mut buffer).unwrap();
        assert_eq!(&body[..], b"woot!test");
    }

    #[test]
    fn alphabet_in_uneven_chunks() {
        let mut buffer =
            BytesMut::from(&b"2\r\nab\r\n3\r\ncde\r\n5\r\nfghij\r\n10\r\nklmnopqrstuvwxyz\r\n0\r\n\r\n"[..]);
        let body = decode_to_end(&mut ChunkedDecoder::new(), &mut buffer).unwrap();
        assert_eq!(&body[..], b"abcdefghijklmnopqrstuvwxyz");
    }

    #[test]
    fn byte_at_a_time() {
        let input = b"5\r\nwoot!\r\n4;ext=1\r\ntest\r\n0\r\nMy-Trailer: 42\r\n\r\nGET";
        let mut decoder = ChunkedDecoder::new();
        let mut buffer = BytesMut::new();
        let mut body = Vec::new();
        let mut consumed = 0;

        for byte in input {
            buffer.extend_from_slice(&[*byte]);
            consumed += 1;
            match decoder.decode(&mut buffer).unwrap() {
                Some(PayloadItem::Chunk(bytes)) => body.extend_from_slice(&bytes),
                Some(PayloadItem::Eof) => break,
                None => {}
            }
        }

        assert_eq!(&body[..], b"woot!test");
        assert_eq!(&input[consumed..], b"GET");
        assert_eq!(decoder.trailers().get("my-trailer").unwrap(), "42");
    }

    #[test]
    fn test_chunks_with_extensions() {
        let mut buffer = BytesMut::from(&b"5;chunk-ext=value\r\nhello\r\n0\r\n\r\n"[..]);
        let body = decode_to_end(&mut ChunkedDecoder::new(), &mut buffer).unwrap();
        assert_eq!(&body[..], b"hello");
    }

    #[test]
    fn trailers_are_kept_apart() {
        let mut buffer = BytesMut::from(&b"5\r\nhello\r\n0\r\nMy-Trailer: 42\r\nOther:  x \r\n\r\n"[..]);
        let mut decoder = ChunkedDecoder::new();

        let body = decode_to_end(&mut decoder, &mut buffer).unwrap();
        assert_eq!(&body[..], b"hello");

        let trailers = decoder.take_trailers();
        assert_eq!(trailers.len(), 2);
        assert_eq!(trailers.get("my-trailer").unwrap(), "42");
        assert_eq!(trailers.get("other").unwrap(), "x");
        assert!(decoder.trailers().is_empty());
    }

    #[test]
    fn invalid_trailer() {
        let mut buffer = BytesMut::from(&b"0\r\nno colon here\r\n\r\n"[..]);
        let error = decode_to_end(&mut ChunkedDecoder::new(), &mut buffer).unwrap_err();
        assert!(matches!(error, ParseError::InvalidChunk { .. }));
    }

    #[test]
    fn test_incomplete_chunk() {
        let mut buffer = BytesMut::from(&b"5\r\nhel"[..]);
        let mut decoder = ChunkedDecoder::new();

        let chunk = decoder.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(chunk.as_bytes().unwrap(), &Bytes::from_static(b"hel"));
        assert!(decoder.decode(&mut buffer).unwrap().is_none());

        buffer.extend_from_slice(b"lo\r\n0\r\n\r\n");

        let chunk = decoder.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(chunk.as_bytes().unwrap(), &Bytes::from_static(b"lo"));
        assert!(decoder.decode(&mut buffer).unwrap().unwrap().is_eof());
    }

    #[test]
    fn test_invalid_chunk_size() {
        let mut buffer = BytesMut::from(&b"xyz\r\n"[..]);
        let error = ChunkedDecoder::new().decode(&mut buffer).unwrap_err();
        assert_eq!(error.to_string(), "Bad Request: invalid chunked encoding");
    }

    #[test]
    fn size_line_without_digits() {
        for line in [&b"\r\n\r\n"[..], b";ext\r\n\r\n", b" \r\n\r\n"] {
            let mut buffer = BytesMut::from(line);
            let error = ChunkedDecoder::new().decode(&mut buffer).unwrap_err();
            assert_eq!(error, ParseError::invalid_chunk("invalid chunk size"), "line {line:?}");
        }
    }

    #[test]
    fn digitless_size_after_a_chunk() {
        let mut buffer = BytesMut::from(&b"3\r\nabc\r\n;last\r\n\r\n"[..]);
        let mut decoder = ChunkedDecoder::new();

        let chunk = decoder.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(chunk.as_bytes().unwrap(), &Bytes::from_static(b"abc"));
        assert_eq!(decoder.decode(&mut buffer).unwrap_err(), ParseError::invalid_chunk("invalid chunk size"));
    }

    #[test]
    fn test_size_overflow() {
        let mut buffer = BytesMut::from(&b"fffffffffffffffff\r\n"[..]);
        assert!(ChunkedDecoder::new().decode(&mut buffer).is_err());
    }

    #[test]
    fn test_missing_crlf() {
        let mut buffer = BytesMut::from(&b"5\r\nhelloBad"[..]);
        let mut decoder = ChunkedDecoder::new();

        let chunk = decoder.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(chunk.as_bytes().unwrap(), &Bytes::from_static(b"hello"));
        assert!(decoder.decode(&mut buffer).is_err());
    }

    #[test]
    fn test_large_chunk() {
        let size = 1024 * 1024;
        let mut data = format!("{size:x}\r\n").into_bytes();
        data.extend(vec![b'A'; size]);
        data.extend(b"\r\n0\r\n\r\n");

        let mut buffer = BytesMut::from(&data[..]);
        let mut decoder = ChunkedDecoder::new();

        let chunk = decoder.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(chunk.as_bytes().unwrap().len(), size);
        assert!(decoder.decode(&mut buffer).unwrap().unwrap().is_eof());
    }
}
