//! Connection level limits and behaviour switches.
//!
//! [`Options`] is built once at startup and shared read-only between every
//! connection through an `Arc<Options>`. Nothing in this crate mutates it after
//! construction.
//!
//! ```
//! use std::time::Duration;
//! use micro_wire::options::Options;
//!
//! let options = Options::default()
//!     .with_max_body_size(4 * 1024 * 1024)
//!     .with_connection_timeout(Duration::from_secs(60));
//!
//! assert_eq!(options.header_list_size(), options.max_header_size() as u32);
//! ```

use std::time::Duration;

const DEFAULT_MAX_HEADER_SIZE: usize = 32 * 1024;
const DEFAULT_MAX_HEADER_COUNT: usize = 64;
const DEFAULT_MAX_BODY_SIZE: u64 = 128 * 1024;
const DEFAULT_MAX_CONCURRENT_STREAMS: u32 = 20;
const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(6);
const DEFAULT_MAX_REQUESTS_PER_CONNECTION: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    max_header_size: usize,
    max_header_count: usize,
    max_body_size: u64,
    max_concurrent_streams: u32,
    connection_timeout: Duration,
    header_list_size: Option<u32>,
    max_requests_per_connection: usize,
    http2_upgrade: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            max_header_size: DEFAULT_MAX_HEADER_SIZE,
            max_header_count: DEFAULT_MAX_HEADER_COUNT,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            max_concurrent_streams: DEFAULT_MAX_CONCURRENT_STREAMS,
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            header_list_size: None,
            max_requests_per_connection: DEFAULT_MAX_REQUESTS_PER_CONNECTION,
            http2_upgrade: true,
        }
    }
}

impl Options {
    /// Upper bound for the request line plus all header lines, in bytes.
    #[inline]
    pub fn max_header_size(&self) -> usize {
        self.max_header_size
    }

    #[inline]
    pub fn max_header_count(&self) -> usize {
        self.max_header_count
    }

    /// Initial body cap for every request. Applications may raise it per request
    /// through [`RequestBody::increase_max_size`](crate::protocol::body::RequestBody::increase_max_size).
    #[inline]
    pub fn max_body_size(&self) -> u64 {
        self.max_body_size
    }

    #[inline]
    pub fn max_concurrent_streams(&self) -> u32 {
        self.max_concurrent_streams
    }

    /// Idle time a persistent connection is kept open, advertised through `Keep-Alive`.
    #[inline]
    pub fn connection_timeout(&self) -> Duration {
        self.connection_timeout
    }

    /// HTTP/2 `MAX_HEADER_LIST_SIZE`, falls back to the max header size.
    pub fn header_list_size(&self) -> u32 {
        self.header_list_size.unwrap_or_else(|| u32::try_from(self.max_header_size).unwrap_or(u32::MAX))
    }

    #[inline]
    pub fn max_requests_per_connection(&self) -> usize {
        self.max_requests_per_connection
    }

    /// Whether `h2c` upgrades and the prior-knowledge preface are honoured.
    #[inline]
    pub fn http2_upgrade(&self) -> bool {
        self.http2_upgrade
    }

    #[must_use]
    pub fn with_max_header_size(mut self, max_header_size: usize) -> Self {
        self.max_header_size = max_header_size;
        self
    }

    #[must_use]
    pub fn with_max_header_count(mut self, max_header_count: usize) -> Self {
        self.max_header_count = max_header_count;
        self
    }

    #[must_use]
    pub fn with_max_body_size(mut self, max_body_size: u64) -> Self {
        self.max_body_size = max_body_size;
        self
    }

    #[must_use]
    pub fn with_max_concurrent_streams(mut self, max_concurrent_streams: u32) -> Self {
        self.max_concurrent_streams = max_concurrent_streams;
        self
    }

    #[must_use]
    pub fn with_connection_timeout(mut self, connection_timeout: Duration) -> Self {
        self.connection_timeout = connection_timeout;
        self
    }

    #[must_use]
    pub fn with_header_list_size(mut self, header_list_size: u32) -> Self {
        self.header_list_size = Some(header_list_size);
        self
    }

    #[must_use]
    pub fn with_max_requests_per_connection(mut self, max_requests_per_connection: usize) -> Self {
        self.max_requests_per_connection = max_requests_per_connection;
        self
    }

    #[must_use]
    pub fn with_http2_upgrade(mut self, http2_upgrade: bool) -> Self {
        self.http2_upgrade = http2_upgrade;
        self
    }
}
