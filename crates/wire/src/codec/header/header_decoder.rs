//! Incremental decoder for the request line and header section.
//!
//! Bytes may arrive in any fragmentation, down to a single byte per call. The
//! decoder waits for the blank line that ends the header section, remembering
//! how far it already scanned, and only then parses. The outcome is the same no
//! matter how the input was split.
//!
//! Parsing happens in stages:
//!
//! 1. the request line is split by hand into method, target and version
//! 2. header lines are checked for obsolete line folding
//! 3. `httparse` tokenizes the header lines
//! 4. name and value byte ranges are recorded and turned into `http` types
//!    sharing the frozen header buffer
//! 5. the payload framing is picked from `Transfer-Encoding` and `Content-Length`

use bytes::{Buf, Bytes, BytesMut};
use http::header::{CONTENT_LENGTH, TRANSFER_ENCODING};
use http::{HeaderMap, HeaderName, HeaderValue, Method, Request, Uri, Version};
use httparse::Status;
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::ensure;
use crate::options::Options;
use crate::protocol::{ParseError, PayloadSize, RequestHeader};
use crate::utils::find_subslice;

const CRLF: &[u8] = b"\r\n";
const HEADER_END: &[u8] = b"\r\n\r\n";

/// Decodes a request head into a [`RequestHeader`] and the [`PayloadSize`]
/// describing how its body is framed.
#[derive(Debug, Clone)]
pub struct HeaderDecoder {
    max_header_size: usize,
    max_header_count: usize,
    /// Bytes already searched for the end of the header section.
    scanned: usize,
}

impl HeaderDecoder {
    pub fn new(options: &Options) -> Self {
        Self { max_header_size: options.max_header_size(), max_header_count: options.max_header_count(), scanned: 0 }
    }
}

impl Default for HeaderDecoder {
    fn default() -> Self {
        Self::new(&Options::default())
    }
}

impl Decoder for HeaderDecoder {
    type Item = (RequestHeader, PayloadSize);
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // empty lines ahead of a request line are ignored, see RFC 9112 section 2.2
        while src.starts_with(CRLF) {
            src.advance(CRLF.len());
            self.scanned = self.scanned.saturating_sub(CRLF.len());
        }

        if src.is_empty() {
            return Ok(None);
        }

        let Some(position) = find_subslice(src, HEADER_END, self.scanned) else {
            // the terminator may straddle the next read, so rescan its possible prefix
            self.scanned = src.len().saturating_sub(HEADER_END.len() - 1);
            ensure!(src.len() <= self.max_header_size, ParseError::too_large_header(src.len(), self.max_header_size));
            return Ok(None);
        };

        self.scanned = 0;
        let header_size = position + HEADER_END.len();
        ensure!(header_size <= self.max_header_size, ParseError::too_large_header(header_size, self.max_header_size));

        let head = src.split_to(header_size).freeze();
        trace!(header_size, "parsed header section size");

        let header = self.parse_head(&head)?;
        let payload_size = parse_payload(&header)?;
        Ok(Some((header, payload_size)))
    }
}

impl HeaderDecoder {
    fn parse_head(&self, head: &Bytes) -> Result<RequestHeader, ParseError> {
        // the section ends with CRLF CRLF, so a request line terminator always exists
        let line_end = find_subslice(head, CRLF, 0).ok_or(ParseError::InvalidRequestLine)?;
        let (method, uri, version) = parse_request_line(&head[..line_end])?;

        let fields = head.slice(line_end + CRLF.len()..);
        check_line_folding(&fields)?;
        let headers = self.parse_fields(&fields)?;

        let mut request = Request::new(());
        *request.method_mut() = method;
        *request.uri_mut() = uri;
        *request.version_mut() = version;
        *request.headers_mut() = headers;
        Ok(RequestHeader::from(request))
    }

    /// Tokenizes the header lines and builds the header map without copying
    /// names or values out of `fields`.
    fn parse_fields(&self, fields: &Bytes) -> Result<HeaderMap, ParseError> {
        let mut parsed = vec![httparse::EMPTY_HEADER; self.max_header_count];
        let mut header_index = vec![EMPTY_HEADER_INDEX; self.max_header_count];

        let header_count = match httparse::parse_headers(fields, &mut parsed) {
            Ok(Status::Complete((_, headers))) => {
                HeaderIndex::record(fields, headers, &mut header_index);
                headers.len()
            }
            Ok(Status::Partial) => return Err(ParseError::invalid_header("incomplete header section")),
            Err(httparse::Error::TooManyHeaders) => return Err(ParseError::too_many_headers(self.max_header_count)),
            Err(e) => return Err(ParseError::invalid_header(e)),
        };

        let mut headers = HeaderMap::with_capacity(header_count);
        for index in &header_index[..header_count] {
            let name = HeaderName::from_bytes(&fields[index.name.0..index.name.1]).map_err(ParseError::invalid_header)?;
            let value = HeaderValue::from_maybe_shared(fields.slice(index.value.0..index.value.1))
                .map_err(ParseError::invalid_header)?;
            headers.append(name, value);
        }
        Ok(headers)
    }
}

/// `METHOD SP TARGET SP HTTP/DIGIT.DIGIT`, with exactly one space between parts.
fn parse_request_line(line: &[u8]) -> Result<(Method, Uri, Version), ParseError> {
    let mut parts = line.split(|b| *b == b' ');
    let (Some(method), Some(target), Some(version), None) = (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(ParseError::InvalidRequestLine);
    };

    ensure!(!method.is_empty() && method.iter().all(|b| is_token(*b)), ParseError::InvalidRequestLine);
    ensure!(!target.is_empty(), ParseError::InvalidRequestLine);

    let version = parse_version(version)?;
    let method = Method::from_bytes(method).map_err(|_| ParseError::InvalidRequestLine)?;
    let uri = Uri::try_from(target).map_err(|_| ParseError::InvalidUri)?;
    Ok((method, uri, version))
}

fn parse_version(version: &[u8]) -> Result<Version, ParseError> {
    match version {
        b"HTTP/1.1" => Ok(Version::HTTP_11),
        b"HTTP/1.0" => Ok(Version::HTTP_10),
        [b'H', b'T', b'T', b'P', b'/', major, b'.', minor] if major.is_ascii_digit() && minor.is_ascii_digit() => {
            Err(ParseError::UnsupportedVersion { version: String::from_utf8_lossy(version).into_owned() })
        }
        _ => Err(ParseError::InvalidRequestLine),
    }
}

/// tchar from RFC 9110 section 5.6.2
fn is_token(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}

/// A header line starting with whitespace continues the previous one. That
/// syntax is obsolete and rejected on its own error.
fn check_line_folding(fields: &[u8]) -> Result<(), ParseError> {
    let mut line_start = 0;
    while line_start < fields.len() {
        ensure!(!matches!(fields[line_start], b' ' | b'\t'), ParseError::ObsoleteLineFolding);
        match find_subslice(fields, CRLF, line_start) {
            Some(line_end) => line_start = line_end + CRLF.len(),
            None => break,
        }
    }
    Ok(())
}

/// Byte ranges of a header's name and value inside the header buffer.
#[derive(Clone, Copy)]
struct HeaderIndex {
    name: (usize, usize),
    value: (usize, usize),
}

const EMPTY_HEADER_INDEX: HeaderIndex = HeaderIndex { name: (0, 0), value: (0, 0) };

impl HeaderIndex {
    /// Records positions relative to `bytes`, which the parsed headers borrow from.
    /// Values are trimmed of surrounding whitespace.
    fn record(bytes: &[u8], headers: &[httparse::Header<'_>], indices: &mut [HeaderIndex]) {
        let bytes_ptr = bytes.as_ptr() as usize;
        for (header, index) in headers.iter().zip(indices.iter_mut()) {
            let name_start = header.name.as_ptr() as usize - bytes_ptr;
            index.name = (name_start, name_start + header.name.len());

            let value = header.value.trim_ascii();
            let value_start = value.as_ptr() as usize - bytes_ptr;
            index.value = (value_start, value_start + value.len());
        }
    }
}

/// Picks the body framing, see RFC 9112 section 6.3.
///
/// `Transfer-Encoding` takes precedence over `Content-Length`. A transfer coding
/// list must end in `chunked`, anything else cannot be delimited on a request.
/// Repeated `Content-Length` values must agree.
fn parse_payload(header: &RequestHeader) -> Result<PayloadSize, ParseError> {
    let headers = header.headers();

    if headers.contains_key(TRANSFER_ENCODING) {
        ensure!(is_chunked(headers.get_all(TRANSFER_ENCODING).iter().next_back()), ParseError::UnsupportedTransferEncoding);
        return Ok(PayloadSize::Chunked);
    }

    let mut length = None;
    for value in &headers.get_all(CONTENT_LENGTH) {
        for item in value.as_bytes().split(|b| *b == b',') {
            let parsed = parse_content_length(item)?;
            match length {
                Some(previous) if previous != parsed => {
                    return Err(ParseError::invalid_content_length(format!("conflicting values {previous} and {parsed}")));
                }
                _ => length = Some(parsed),
            }
        }
    }

    Ok(match length {
        None | Some(0) => PayloadSize::Empty,
        Some(length) => PayloadSize::Length(length),
    })
}

fn parse_content_length(value: &[u8]) -> Result<u64, ParseError> {
    let value = value.trim_ascii();
    ensure!(!value.is_empty() && value.iter().all(u8::is_ascii_digit), ParseError::invalid_content_length("value is not a number"));

    value.iter().try_fold(0u64, |length, digit| {
        length
            .checked_mul(10)
            .and_then(|length| length.checked_add(u64::from(digit - b'0')))
            .ok_or_else(|| ParseError::invalid_content_length("value overflows u64"))
    })
}

/// Whether `chunked` is the final coding of the last Transfer-Encoding value.
fn is_chunked(header_value: Option<&HeaderValue>) -> bool {
    const CHUNKED: &[u8] = b"chunked";
    header_value
        .and_then(|value| value.as_bytes().rsplit(|b| *b == b',').next())
        .is_some_and(|coding| coding.trim_ascii().eq_ignore_ascii_case(CHUNKED))
}
