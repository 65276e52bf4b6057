//! Request side types.
//!
//! The decoder produces a [`RequestHeader`], a thin wrapper over `http::Request<()>`.
//! Once the body stream is attached it becomes a plain `http::Request<B>`, and
//! [`RequestExt`] adds the accessors the driver and applications need on top of
//! the `http` crate: protocol string, owning client, resolved host and port, and
//! multi-value header mutation.

use std::net::SocketAddr;
use std::sync::Arc;

use http::header::{AsHeaderName, CONNECTION, CONTENT_LENGTH, HOST, TRANSFER_ENCODING};
use http::uri::Authority;
use http::{HeaderMap, HeaderName, HeaderValue, Method, Request, Uri, Version};

use crate::utils::has_token;

#[derive(Debug)]
pub struct RequestHeader {
    inner: Request<()>,
}

impl AsRef<Request<()>> for RequestHeader {
    fn as_ref(&self) -> &Request<()> {
        &self.inner
    }
}

impl AsMut<Request<()>> for RequestHeader {
    fn as_mut(&mut self) -> &mut Request<()> {
        &mut self.inner
    }
}

impl RequestHeader {
    pub fn into_inner(self) -> Request<()> {
        self.inner
    }

    /// Attaches a body, turning the head into a complete request.
    pub fn body<T>(self, body: T) -> Request<T> {
        self.inner.map(|()| body)
    }

    pub fn method(&self) -> &Method {
        self.inner.method()
    }

    pub fn uri(&self) -> &Uri {
        self.inner.uri()
    }

    pub fn version(&self) -> Version {
        self.inner.version()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    /// Both `Transfer-Encoding` and `Content-Length` were sent.
    ///
    /// Transfer-Encoding wins, but such a message may be a smuggling attempt, so
    /// the connection is not reused afterwards.
    pub fn has_conflicting_framing(&self) -> bool {
        self.headers().contains_key(TRANSFER_ENCODING) && self.headers().contains_key(CONTENT_LENGTH)
    }
}

impl From<Request<()>> for RequestHeader {
    #[inline]
    fn from(inner: Request<()>) -> Self {
        Self { inner }
    }
}

/// The peer a request came from. Stored in the request extensions by the driver.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClientInfo {
    id: u64,
    remote_addr: Option<SocketAddr>,
    local_addr: Option<SocketAddr>,
    encrypted: bool,
}

impl ClientInfo {
    pub fn new(id: u64) -> Self {
        Self { id, ..Self::default() }
    }

    #[must_use]
    pub fn with_remote_addr(mut self, remote_addr: SocketAddr) -> Self {
        self.remote_addr = Some(remote_addr);
        self
    }

    #[must_use]
    pub fn with_local_addr(mut self, local_addr: SocketAddr) -> Self {
        self.local_addr = Some(local_addr);
        self
    }

    #[must_use]
    pub fn with_encrypted(mut self, encrypted: bool) -> Self {
        self.encrypted = encrypted;
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }
}

/// What the response writer needs to know about the request it answers.
///
/// Captured before the request is handed to the application, so the application
/// is free to consume or drop the request itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    method: Method,
    version: Version,
    close_requested: bool,
}

impl RequestContext {
    pub fn new(method: Method, version: Version, close_requested: bool) -> Self {
        Self { method, version, close_requested }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// The client asked for the connection to end after this exchange.
    pub fn close_requested(&self) -> bool {
        self.close_requested
    }
}

impl<B> From<&Request<B>> for RequestContext {
    fn from(request: &Request<B>) -> Self {
        let has_connection_token =
            |token: &[u8]| request.headers().get_all(CONNECTION).iter().any(|value| has_token(value.as_bytes(), token));
        let close_requested = match request.version() {
            Version::HTTP_10 => !has_connection_token(b"keep-alive"),
            _ => has_connection_token(b"close"),
        };
        Self::new(request.method().clone(), request.version(), close_requested)
    }
}

/// Accessors and mutators on top of `http::Request`.
pub trait RequestExt {
    /// `"1.0"`, `"1.1"` or `"2.0"`.
    fn protocol_version(&self) -> &'static str;

    fn client(&self) -> Option<&Arc<ClientInfo>>;

    /// The request target path, empty for the asterisk form (`OPTIONS *`).
    fn path(&self) -> &str;

    /// `https` for encrypted clients or absolute `https` targets, `http` otherwise.
    fn scheme(&self) -> &str;

    /// Host from an absolute target, falling back to the `Host` header.
    fn host(&self) -> Option<&str>;

    /// Explicit port if any, otherwise the default port of the scheme.
    fn port(&self) -> u16;

    fn context(&self) -> RequestContext;

    fn header_values<K: AsHeaderName>(&self, name: K) -> Vec<&HeaderValue>;

    /// Replaces every value of `name` with `value`.
    fn set_header(&mut self, name: HeaderName, value: HeaderValue);

    /// Appends `value`, keeping the values already present.
    fn add_header(&mut self, name: HeaderName, value: HeaderValue);

    /// Replaces every value of `name`. An empty list removes the header.
    fn set_header_values<I: IntoIterator<Item = HeaderValue>>(&mut self, name: HeaderName, values: I);

    fn remove_header<K: AsHeaderName>(&mut self, name: K);
}

impl<B> RequestExt for Request<B> {
    fn protocol_version(&self) -> &'static str {
        match self.version() {
            Version::HTTP_09 => "0.9",
            Version::HTTP_10 => "1.0",
            Version::HTTP_2 => "2.0",
            Version::HTTP_3 => "3.0",
            _ => "1.1",
        }
    }

    fn client(&self) -> Option<&Arc<ClientInfo>> {
        self.extensions().get::<Arc<ClientInfo>>()
    }

    fn path(&self) -> &str {
        match self.uri().path() {
            "*" => "",
            path => path,
        }
    }

    fn scheme(&self) -> &str {
        match self.uri().scheme_str() {
            Some(scheme) => scheme,
            None if self.client().is_some_and(|client| client.is_encrypted()) => "https",
            None => "http",
        }
    }

    fn host(&self) -> Option<&str> {
        self.uri().host().or_else(|| host_authority(self.headers()).map(|(host, _)| host))
    }

    fn port(&self) -> u16 {
        let explicit = match self.uri().port_u16() {
            Some(port) => Some(port),
            None if self.uri().host().is_some() => None,
            None => host_authority(self.headers()).and_then(|(_, port)| port),
        };
        explicit.unwrap_or(if self.scheme().eq_ignore_ascii_case("https") { 443 } else { 80 })
    }

    fn context(&self) -> RequestContext {
        RequestContext::from(self)
    }

    fn header_values<K: AsHeaderName>(&self, name: K) -> Vec<&HeaderValue> {
        self.headers().get_all(name).iter().collect()
    }

    fn set_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers_mut().insert(name, value);
    }

    fn add_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers_mut().append(name, value);
    }

    fn set_header_values<I: IntoIterator<Item = HeaderValue>>(&mut self, name: HeaderName, values: I) {
        let headers = self.headers_mut();
        headers.remove(&name);
        for value in values {
            headers.append(name.clone(), value);
        }
    }

    fn remove_header<K: AsHeaderName>(&mut self, name: K) {
        self.headers_mut().remove(name);
    }
}

/// Splits the `Host` header into host and optional port. Tolerates a scheme
/// prefix such as `http://localhost`, which some clients send.
fn host_authority(headers: &HeaderMap) -> Option<(&str, Option<u16>)> {
    let value = headers.get(HOST)?.to_str().ok()?.trim();
    let value = value.split_once("://").map_or(value, |(_, rest)| rest);
    let value = value.split('/').next()?;
    if value.is_empty() {
        return None;
    }

    let authority = Authority::try_from(value).ok()?;
    let port = authority.port_u16();
    // borrow the host out of the header value rather than the temporary authority
    let start = value.rfind('@').map_or(0, |at| at + 1);
    let host = value.get(start..start + authority.host().len())?;
    Some((host, port))
}
