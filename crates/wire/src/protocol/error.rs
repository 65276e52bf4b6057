//! Error types for request parsing and response writing.
//!
//! - [`ParseError`] covers everything that can go wrong while turning bytes into a
//!   request. Each variant maps onto an HTTP status through [`ParseError::status`]
//!   and is fatal for the connection.
//! - [`SendError`] covers the response side: a destination that went away, a body
//!   producer that broke its contract, or a producer that failed.
//! - [`HttpError`] is what a whole connection run resolves to.

use std::error::Error;
use std::io;

use http::StatusCode;
use thiserror::Error;

pub type BoxError = Box<dyn Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("request error: {source}")]
    RequestError {
        #[from]
        source: ParseError,
    },

    #[error("response error: {source}")]
    ResponseError {
        #[from]
        source: SendError,
    },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

/// A client error found while reading a request.
///
/// The `Display` output is the reason phrase sent back to the client. The type is
/// `Clone` so the same error can fail a streaming body and be returned to the
/// caller feeding bytes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("Bad Request: invalid request line")]
    InvalidRequestLine,

    #[error("Bad Request: invalid request target")]
    InvalidUri,

    #[error("Protocol not supported")]
    UnsupportedVersion { version: String },

    #[error("Bad Request: header size violation")]
    TooLargeHeader { current_size: usize, max_size: usize },

    #[error("Bad Request: too many headers")]
    TooManyHeaders { max_num: usize },

    #[error("Bad Request: Invalid header syntax: Obsolete line folding")]
    ObsoleteLineFolding,

    #[error("Bad Request: Invalid header syntax")]
    InvalidHeader { reason: String },

    #[error("Bad Request: invalid content-length")]
    InvalidContentLength { reason: String },

    #[error("Bad Request: unsupported transfer-encoding")]
    UnsupportedTransferEncoding,

    #[error("Bad Request: invalid chunked encoding")]
    InvalidChunk { reason: &'static str },

    #[error("Bad Request: body size violation")]
    TooLargeBody { max_size: u64 },

    #[error("Bad Request: incomplete body")]
    IncompleteBody,

    #[error("Bad Request: invalid http2-settings header")]
    InvalidHttp2Settings,

    #[error("io error: {message}")]
    Io { kind: io::ErrorKind, message: String },
}

impl ParseError {
    pub fn too_large_header(current_size: usize, max_size: usize) -> Self {
        Self::TooLargeHeader { current_size, max_size }
    }

    pub fn too_many_headers(max_num: usize) -> Self {
        Self::TooManyHeaders { max_num }
    }

    pub fn invalid_header<S: ToString>(str: S) -> Self {
        Self::InvalidHeader { reason: str.to_string() }
    }

    pub fn invalid_content_length<S: ToString>(str: S) -> Self {
        Self::InvalidContentLength { reason: str.to_string() }
    }

    pub fn invalid_chunk(reason: &'static str) -> Self {
        Self::InvalidChunk { reason }
    }

    pub fn too_large_body(max_size: u64) -> Self {
        Self::TooLargeBody { max_size }
    }

    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        let e = e.into();
        Self::Io { kind: e.kind(), message: e.to_string() }
    }

    /// The status code to answer this error with.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::TooLargeHeader { .. } | Self::TooManyHeaders { .. } => StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE,
            Self::TooLargeBody { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::UnsupportedVersion { .. } => StatusCode::HTTP_VERSION_NOT_SUPPORTED,
            Self::InvalidRequestLine
            | Self::InvalidUri
            | Self::ObsoleteLineFolding
            | Self::InvalidHeader { .. }
            | Self::InvalidContentLength { .. }
            | Self::UnsupportedTransferEncoding
            | Self::InvalidChunk { .. }
            | Self::IncompleteBody
            | Self::InvalidHttp2Settings
            | Self::Io { .. } => StatusCode::BAD_REQUEST,
        }
    }
}

impl From<io::Error> for ParseError {
    fn from(e: io::Error) -> Self {
        Self::io(e)
    }
}

#[derive(Debug, Error)]
pub enum SendError {
    #[error("destination pipe broken")]
    PipeBroken {
        #[source]
        source: io::Error,
    },

    #[error("Yielded values MUST be a pending value or a non-empty byte chunk; {kind} returned")]
    InvalidYield { kind: &'static str },

    #[error("Invalid yield group: non-empty group of pending values required")]
    EmptyGroup,

    #[error("body producer failed: {source}")]
    Producer {
        #[source]
        source: BoxError,
    },

    #[error("invalid body: {reason}")]
    InvalidBody { reason: String },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl SendError {
    pub fn pipe_broken<E: Into<io::Error>>(e: E) -> Self {
        Self::PipeBroken { source: e.into() }
    }

    pub fn invalid_yield(kind: &'static str) -> Self {
        Self::InvalidYield { kind }
    }

    pub fn producer<E: Into<BoxError>>(e: E) -> Self {
        Self::Producer { source: e.into() }
    }

    pub fn invalid_body<S: ToString>(str: S) -> Self {
        Self::InvalidBody { reason: str.to_string() }
    }

    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }

    /// True when the body producer broke the yield contract.
    pub fn is_domain(&self) -> bool {
        matches!(self, Self::InvalidYield { .. } | Self::EmptyGroup)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classes() {
        assert_eq!(ParseError::InvalidRequestLine.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ParseError::too_large_header(200, 128).status(), StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE);
        assert_eq!(ParseError::too_many_headers(64).status(), StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE);
        assert_eq!(ParseError::too_large_body(4).status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(
            ParseError::UnsupportedVersion { version: "HTTP/3.0".into() }.status(),
            StatusCode::HTTP_VERSION_NOT_SUPPORTED
        );
    }

    #[test]
    fn reason_phrases() {
        assert_eq!(ParseError::too_large_header(200, 128).to_string(), "Bad Request: header size violation");
        assert_eq!(
            ParseError::ObsoleteLineFolding.to_string(),
            "Bad Request: Invalid header syntax: Obsolete line folding"
        );
        assert_eq!(ParseError::invalid_header("control byte").to_string(), "Bad Request: Invalid header syntax");
    }

    #[test]
    fn io_errors_convert_for_decoders() {
        let error: ParseError = io::Error::new(io::ErrorKind::UnexpectedEof, "socket closed").into();
        assert_eq!(error, ParseError::Io { kind: io::ErrorKind::UnexpectedEof, message: "socket closed".into() });
        assert_eq!(error.status(), StatusCode::BAD_REQUEST);
        assert_eq!(error.clone(), error);
    }

    #[test]
    fn domain_errors() {
        assert!(SendError::invalid_yield("integer").is_domain());
        assert!(SendError::EmptyGroup.is_domain());
        assert!(!SendError::pipe_broken(io::ErrorKind::BrokenPipe).is_domain());
        assert_eq!(
            SendError::invalid_yield("integer").to_string(),
            "Yielded values MUST be a pending value or a non-empty byte chunk; integer returned"
        );
    }
}
