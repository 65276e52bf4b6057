//! HTTP/2 upgrade negotiation.
//!
//! Two triggers switch a connection from HTTP/1.1 framing to HTTP/2:
//!
//! - a cleartext upgrade request (`Connection: upgrade`, `Upgrade: h2c` and an
//!   `HTTP2-Settings` header), answered with `101 Switching Protocols`
//! - the prior-knowledge [`PREFACE`] arriving in place of a request line
//!
//! In both cases the server answers with its own SETTINGS frame, built by
//! [`settings_frame`]. Framing after the switch is left to the caller, which
//! receives an [`Http2Upgrade`] describing how the switch happened.

use bytes::{BufMut, Bytes, BytesMut};
use http::HeaderValue;
use http::Version;
use http::header::{CONNECTION, UPGRADE};
use tracing::trace;

use crate::options::Options;
use crate::protocol::{ParseError, RequestHeader};
use crate::utils::{ensure, has_token};

/// The client connection preface of RFC 9113 §3.4.
pub const PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

pub const HTTP2_SETTINGS: &str = "http2-settings";

const FRAME_HEADER_SIZE: usize = 9;
const FRAME_TYPE_SETTINGS: u8 = 0x4;
const SETTING_SIZE: usize = 6;

pub const SETTINGS_MAX_CONCURRENT_STREAMS: u16 = 0x3;
pub const SETTINGS_INITIAL_WINDOW_SIZE: u16 = 0x4;
pub const SETTINGS_MAX_HEADER_LIST_SIZE: u16 = 0x6;

// largest flow control window allowed by RFC 9113 §6.9.2
const MAX_WINDOW_SIZE: u32 = (1 << 31) - 1;

const SWITCHING_PROTOCOLS: &[u8] = b"HTTP/1.1 101 Switching Protocols\r\nConnection: Upgrade\r\nUpgrade: h2c\r\n\r\n";

/// How far a buffer matches the connection preface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefaceMatch {
    /// The buffer starts with the complete preface.
    Full,
    /// The buffer is a strict prefix of the preface, more bytes are needed.
    Partial,
    /// The buffer cannot be the preface.
    Mismatch,
}

pub fn match_preface(buf: &[u8]) -> PrefaceMatch {
    if buf.starts_with(PREFACE) {
        PrefaceMatch::Full
    } else if PREFACE.starts_with(buf) {
        PrefaceMatch::Partial
    } else {
        PrefaceMatch::Mismatch
    }
}

/// SETTINGS parameters as `(identifier, value)` pairs, in wire order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings(Vec<(u16, u32)>);

impl Settings {
    /// The value of `id`. A parameter sent twice takes its last value.
    pub fn get(&self, id: u16) -> Option<u32> {
        self.0.iter().rev().find(|(setting_id, _)| *setting_id == id).map(|(_, value)| *value)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(u16, u32)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn parse(payload: &[u8]) -> Result<Self, ParseError> {
        ensure!(payload.len() % SETTING_SIZE == 0, ParseError::InvalidHttp2Settings);

        let settings = payload
            .chunks_exact(SETTING_SIZE)
            .map(|setting| {
                let id = u16::from_be_bytes([setting[0], setting[1]]);
                let value = u32::from_be_bytes([setting[2], setting[3], setting[4], setting[5]]);
                (id, value)
            })
            .collect();
        Ok(Self(settings))
    }
}

/// Decodes the base64url `HTTP2-Settings` header into the peer's settings.
pub fn decode_settings_header(value: &HeaderValue) -> Result<Settings, ParseError> {
    let payload = base64url_decode(value.as_bytes()).ok_or(ParseError::InvalidHttp2Settings)?;
    Settings::parse(&payload)
}

/// This server's SETTINGS frame, drawn from `options`.
pub fn settings_frame(options: &Options) -> Bytes {
    let window_size = u32::try_from(options.max_body_size().saturating_add(256))
        .unwrap_or(MAX_WINDOW_SIZE)
        .min(MAX_WINDOW_SIZE);

    let settings = [
        (SETTINGS_INITIAL_WINDOW_SIZE, window_size),
        (SETTINGS_MAX_CONCURRENT_STREAMS, options.max_concurrent_streams()),
        (SETTINGS_MAX_HEADER_LIST_SIZE, options.header_list_size()),
    ];

    let length = settings.len() * SETTING_SIZE;
    let mut frame = BytesMut::with_capacity(FRAME_HEADER_SIZE + length);
    frame.put_uint(length as u64, 3);
    frame.put_u8(FRAME_TYPE_SETTINGS);
    // no flags, stream 0
    frame.put_u8(0);
    frame.put_u32(0);
    for (id, value) in settings {
        frame.put_u16(id);
        frame.put_u32(value);
    }
    frame.freeze()
}

/// The `101 Switching Protocols` response that accepts an `h2c` upgrade.
pub fn switching_protocols() -> Bytes {
    Bytes::from_static(SWITCHING_PROTOCOLS)
}

/// Returns true when `header` asks for a cleartext HTTP/2 upgrade.
pub fn is_h2c_upgrade(header: &RequestHeader) -> bool {
    if header.version() != Version::HTTP_11 {
        return false;
    }

    let headers = header.headers();
    let wants_upgrade = headers.get_all(CONNECTION).iter().any(|value| has_token(value.as_bytes(), b"upgrade"));
    let wants_h2c = headers.get_all(UPGRADE).iter().any(|value| has_token(value.as_bytes(), b"h2c"));

    wants_upgrade && wants_h2c && headers.contains_key(HTTP2_SETTINGS)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeKind {
    /// `Upgrade: h2c` on an HTTP/1.1 request.
    Cleartext,
    /// The connection started with the HTTP/2 preface.
    PriorKnowledge,
}

/// Describes a completed switch to HTTP/2.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Http2Upgrade {
    kind: UpgradeKind,
    peer_settings: Option<Settings>,
}

impl Http2Upgrade {
    pub fn cleartext(peer_settings: Settings) -> Self {
        Self { kind: UpgradeKind::Cleartext, peer_settings: Some(peer_settings) }
    }

    pub fn prior_knowledge() -> Self {
        Self { kind: UpgradeKind::PriorKnowledge, peer_settings: None }
    }

    pub fn kind(&self) -> UpgradeKind {
        self.kind
    }

    /// Settings the client sent in `HTTP2-Settings`. A prior-knowledge client
    /// sends its settings in the first HTTP/2 frame instead.
    pub fn peer_settings(&self) -> Option<&Settings> {
        self.peer_settings.as_ref()
    }
}

fn base64url_decode(input: &[u8]) -> Option<Vec<u8>> {
    let input = input.trim_ascii();
    let end = input.iter().rposition(|b| *b != b'=').map_or(0, |pos| pos + 1);
    let (data, padding) = input.split_at(end);
    if padding.len() > 2 || (!padding.is_empty() && input.len() % 4 != 0) {
        return None;
    }

    let mut out = Vec::with_capacity(data.len() * 3 / 4);
    for group in data.chunks(4) {
        let mut word24 = 0u32;
        for (i, b) in group.iter().enumerate() {
            word24 |= u32::from(decode_b64(*b)?) << (18 - 6 * i);
        }

        match group.len() {
            4 => out.extend_from_slice(&[(word24 >> 16) as u8, (word24 >> 8) as u8, word24 as u8]),
            3 => out.extend_from_slice(&[(word24 >> 16) as u8, (word24 >> 8) as u8]),
            2 => out.push((word24 >> 16) as u8),
            _ => return None,
        }
    }

    trace!(encoded = input.len(), decoded = out.len(), "decoded http2-settings");
    Some(out)
}

fn decode_b64(b: u8) -> Option<u8> {
    match b {
        b'A'..=b'Z' => Some(b - b'A'),
        b'a'..=b'z' => Some(b - b'a' + 26),
        b'0'..=b'9' => Some(b - b'0' + 52),
        b'-' | b'+' => Some(62),
        b'_' | b'/' => Some(63),
        _ => None,
    }
}
