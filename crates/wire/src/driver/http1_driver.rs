use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::{Buf, Bytes, BytesMut};
use http::header::{CONNECTION, CONTENT_LENGTH, LINK, TRANSFER_ENCODING};
use http::{HeaderName, HeaderValue, Method, Request, StatusCode, Version};
use tokio::io::AsyncWrite;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, trace, warn};

use crate::codec::RequestDecoder;
use crate::codec::body::PayloadEncoder;
use crate::codec::header::HeaderEncoder;
use crate::options::Options;
use crate::protocol::body::{BodySender, RequestBody};
use crate::protocol::{
    ClientInfo, Message, ParseError, PayloadItem, PayloadSize, PushHints, RequestContext, RequestHeader, ResponseExt,
    ResponseHead, SendError,
};
use crate::upgrade::{
    HTTP2_SETTINGS, Http2Upgrade, PREFACE, PrefaceMatch, decode_settings_header, is_h2c_upgrade, match_preface,
    settings_frame, switching_protocols,
};
use crate::utils::{ensure, has_token};
use crate::writer::{Producer, ResponseWriter};

const KEEP_ALIVE: &str = "keep-alive";

/// Receives everything the driver produces while bytes are fed.
pub trait Emitter {
    /// A request whose head is complete. Its body may still be streaming.
    fn emit(&mut self, request: Request<RequestBody>);

    /// Bytes the driver writes on its own, the upgrade handshake. `close` asks
    /// for the connection to be closed once they are sent.
    fn transmit(&mut self, bytes: Bytes, close: bool);

    /// The connection switched to HTTP/2.
    fn upgrade(&mut self, upgrade: Http2Upgrade);

    /// Bytes received after the switch to HTTP/2, passed on unparsed.
    fn forward(&mut self, bytes: Bytes);
}

#[derive(Debug)]
enum Phase {
    /// Nothing parsed yet, the input may still turn out to be the HTTP/2 preface.
    Preface,
    Head,
    Body,
    Http2,
    Failed(ParseError),
}

/// Drives HTTP/1.x parsing for one connection.
///
/// Input can be fed in fragments of any size. Requests are dispatched as soon
/// as their head is complete, with a body that streams the bytes decoded later.
///
/// Pipelined requests are gated: once a request's body has been decoded, bytes
/// beyond it stay buffered until every [`ResponseTicket`] handed out so far is
/// dropped. A writer holds its ticket until it completes, so calling
/// `feed(&[])` after a response resumes parsing.
#[derive(Debug)]
pub struct Http1Driver {
    options: Arc<Options>,
    client: Arc<ClientInfo>,
    buffer: BytesMut,
    decoder: RequestDecoder,
    phase: Phase,
    body_sender: Option<BodySender>,
    pending: Arc<AtomicUsize>,
    remaining_requests: usize,
    dispatched: usize,
    force_close: bool,
}

impl Http1Driver {
    pub fn new(options: Arc<Options>, client: Arc<ClientInfo>) -> Self {
        let phase = if options.http2_upgrade() { Phase::Preface } else { Phase::Head };
        Self {
            decoder: RequestDecoder::new(&options),
            remaining_requests: options.max_requests_per_connection(),
            options,
            client,
            buffer: BytesMut::new(),
            phase,
            body_sender: None,
            pending: Arc::new(AtomicUsize::new(0)),
            dispatched: 0,
            force_close: false,
        }
    }

    /// Feeds received bytes, an empty slice resumes parsing of buffered input.
    ///
    /// # Arguments
    ///
    /// * `bytes` - Bytes read from the connection, in any fragmentation
    /// * `emitter` - Receives dispatched requests, handshake output and HTTP/2 input
    ///
    /// # Errors
    ///
    /// A parse error is fatal: it is returned from this call and from every
    /// later one, and a request body still streaming receives it too. Input
    /// held back behind a pending response may hold one more request head and
    /// body at most, anything beyond fails with a header size violation.
    pub fn feed<E: Emitter>(&mut self, bytes: &[u8], emitter: &mut E) -> Result<(), ParseError> {
        match &self.phase {
            Phase::Failed(e) => return Err(e.clone()),
            Phase::Http2 => {
                if !bytes.is_empty() {
                    emitter.forward(Bytes::copy_from_slice(bytes));
                }
                return Ok(());
            }
            Phase::Preface | Phase::Head | Phase::Body => {}
        }

        self.buffer.extend_from_slice(bytes);
        self.advance(emitter).inspect_err(|e| {
            warn!(client = self.client.id(), cause = %e, "failed to parse request");
            if let Some(mut body_sender) = self.body_sender.take() {
                body_sender.fail(e.clone());
            }
            self.phase = Phase::Failed(e.clone());
        })
    }

    /// The peer closed its side. A body that is still streaming is incomplete.
    pub fn end_of_input(&mut self) -> Result<(), ParseError> {
        if let Some(mut body_sender) = self.body_sender.take() {
            let error = ParseError::IncompleteBody;
            warn!(client = self.client.id(), received = body_sender.received(), "connection closed inside a request body");
            body_sender.fail(error.clone());
            self.phase = Phase::Failed(error.clone());
            return Err(error);
        }
        Ok(())
    }

    /// Whether a dispatched request body still expects bytes.
    pub fn is_receiving_body(&self) -> bool {
        self.body_sender.is_some()
    }

    pub fn is_upgraded(&self) -> bool {
        matches!(self.phase, Phase::Http2)
    }

    /// Responses dispatched but not yet written.
    pub fn pending_responses(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    pub fn remaining_requests(&self) -> usize {
        self.remaining_requests
    }

    fn advance<E: Emitter>(&mut self, emitter: &mut E) -> Result<(), ParseError> {
        loop {
            match &self.phase {
                Phase::Preface => match match_preface(&self.buffer) {
                    PrefaceMatch::Full => {
                        self.buffer.advance(PREFACE.len());
                        debug!(client = self.client.id(), "received http2 preface");
                        emitter.transmit(settings_frame(&self.options), false);
                        self.switch_to_http2(Http2Upgrade::prior_knowledge(), emitter);
                        return Ok(());
                    }
                    PrefaceMatch::Partial => return Ok(()),
                    PrefaceMatch::Mismatch => self.phase = Phase::Head,
                },

                Phase::Head => {
                    if self.remaining_requests == 0 {
                        return Ok(());
                    }
                    if self.pending.load(Ordering::Acquire) > 0 {
                        if self.buffer.has_remaining() {
                            trace!(buffered = self.buffer.len(), "response pending, holding back pipelined input");
                        }
                        return self.check_held_back();
                    }

                    match self.decoder.decode(&mut self.buffer)? {
                        Some(Message::Header((header, payload_size))) => self.dispatch(header, payload_size, emitter)?,
                        Some(Message::Payload(_)) => return Err(ParseError::InvalidRequestLine),
                        None => return Ok(()),
                    }
                }

                Phase::Body => match self.decoder.decode(&mut self.buffer)? {
                    Some(Message::Payload(PayloadItem::Chunk(bytes))) => {
                        trace!(size = bytes.len(), "decoded body chunk");
                        if let Some(body_sender) = &mut self.body_sender {
                            body_sender.send_chunk(bytes)?;
                        }
                    }
                    Some(Message::Payload(PayloadItem::Eof)) => {
                        let trailers = self.decoder.take_trailers();
                        if !trailers.is_empty() {
                            debug!(count = trailers.len(), "request trailers parsed, not merged into headers");
                        }
                        self.body_sender = None;
                        self.phase = Phase::Head;
                    }
                    Some(Message::Header(_)) => return Err(ParseError::IncompleteBody),
                    None => return Ok(()),
                },

                Phase::Http2 | Phase::Failed(_) => return Ok(()),
            }
        }
    }

    /// Held back input may hold at most one more request head and body.
    fn check_held_back(&self) -> Result<(), ParseError> {
        let max_body_size = usize::try_from(self.options.max_body_size()).unwrap_or(usize::MAX);
        let limit = self.options.max_header_size().saturating_add(max_body_size);
        ensure!(self.buffer.len() <= limit, ParseError::too_large_header(self.buffer.len(), limit));
        Ok(())
    }

    fn dispatch<E: Emitter>(
        &mut self,
        header: RequestHeader,
        payload_size: PayloadSize,
        emitter: &mut E,
    ) -> Result<(), ParseError> {
        self.remaining_requests = self.remaining_requests.saturating_sub(1);
        self.dispatched += 1;

        if self.dispatched == 1 && self.options.http2_upgrade() && payload_size.is_empty() && is_h2c_upgrade(&header) {
            return self.upgrade_h2c(header, emitter);
        }

        if header.has_conflicting_framing() {
            warn!(client = self.client.id(), "both transfer-encoding and content-length sent, closing after response");
            self.force_close = true;
        }

        let (body, body_sender) = match payload_size {
            PayloadSize::Empty => (RequestBody::empty(), None),
            PayloadSize::Length(length) => {
                let (body, body_sender) = RequestBody::channel(self.options.max_body_size(), Some(length));
                (body, Some(body_sender))
            }
            PayloadSize::Chunked => {
                let (body, body_sender) = RequestBody::channel(self.options.max_body_size(), None);
                (body, Some(body_sender))
            }
        };

        let mut request = header.body(body);
        request.extensions_mut().insert(Arc::clone(&self.client));

        self.body_sender = body_sender;
        self.phase = Phase::Body;
        self.pending.fetch_add(1, Ordering::AcqRel);

        debug!(
            client = self.client.id(),
            method = %request.method(),
            uri = %request.uri(),
            ?payload_size,
            "dispatching request"
        );
        emitter.emit(request);
        Ok(())
    }

    fn upgrade_h2c<E: Emitter>(&mut self, header: RequestHeader, emitter: &mut E) -> Result<(), ParseError> {
        let settings = match header.headers().get(HTTP2_SETTINGS) {
            Some(value) => decode_settings_header(value)?,
            None => return Err(ParseError::InvalidHttp2Settings),
        };
        debug!(client = self.client.id(), peer_settings = settings.len(), "upgrading to h2c");

        emitter.transmit(switching_protocols(), false);
        emitter.transmit(settings_frame(&self.options), false);

        let mut request = header.body(RequestBody::empty());
        *request.version_mut() = Version::HTTP_2;
        request.extensions_mut().insert(Arc::clone(&self.client));

        self.phase = Phase::Http2;
        emitter.upgrade(Http2Upgrade::cleartext(settings));
        emitter.emit(request);
        self.forward_rest(emitter);
        Ok(())
    }

    fn switch_to_http2<E: Emitter>(&mut self, upgrade: Http2Upgrade, emitter: &mut E) {
        self.phase = Phase::Http2;
        emitter.upgrade(upgrade);
        self.forward_rest(emitter);
    }

    /// Input already buffered behind the switch belongs to HTTP/2.
    fn forward_rest<E: Emitter>(&mut self, emitter: &mut E) {
        let rest = self.buffer.split().freeze();
        if !rest.is_empty() {
            emitter.forward(rest);
        }
    }

    /// Builds the writer for one response.
    ///
    /// The response head is completed here, before it is encoded: body framing
    /// from the producer's payload size, the keep-alive or close decision, and
    /// a preload `Link` header for every push hint.
    ///
    /// # Arguments
    ///
    /// * `head` - The response head, its framing headers are replaced
    /// * `context` - The request being answered. Without one, for example when
    ///   answering a parse error, the response is HTTP/1.0 and closes the connection
    /// * `producer` - The body, never drained for `HEAD`, 1xx, 204 and 304
    /// * `io` - Where the response is written
    ///
    /// # Returns
    ///
    /// A [`ResponseWriter`] future. With a context it holds a [`ResponseTicket`],
    /// so pipelined input stays held back until the writer is done or dropped.
    ///
    /// # Errors
    ///
    /// Returns [`SendError`] when a push hint or the head cannot be encoded.
    pub fn writer<P, W>(
        &self,
        mut head: ResponseHead,
        context: Option<&RequestContext>,
        producer: P,
        io: W,
    ) -> Result<ResponseWriter<P, W>, SendError>
    where
        P: Producer + Unpin,
        W: AsyncWrite + Unpin,
    {
        // released on every early return, the gate must not stay closed
        let ticket = context.map(|_| ResponseTicket::new(Arc::clone(&self.pending)));

        let version = context.map_or(Version::HTTP_10, RequestContext::version);
        let head_request = context.is_some_and(|context| context.method() == Method::HEAD);
        let status = head.status();
        let bodiless = status.is_informational() || status == StatusCode::NO_CONTENT || status == StatusCode::NOT_MODIFIED;

        let mut must_close = context.is_none_or(RequestContext::close_requested)
            || self.remaining_requests == 0
            || self.force_close
            || head.headers().get_all(CONNECTION).iter().any(|value| has_token(value.as_bytes(), b"close"));

        let links = head
            .push_hints()
            .iter()
            .map(|uri| HeaderValue::try_from(format!("<{uri}>; rel=preload")))
            .collect::<Result<Vec<_>, _>>()
            .map_err(SendError::invalid_body)?;
        head.extensions_mut().remove::<PushHints>();

        *head.version_mut() = version;
        let headers = head.headers_mut();
        let encoder = if bodiless {
            headers.remove(CONTENT_LENGTH);
            headers.remove(TRANSFER_ENCODING);
            PayloadEncoder::empty()
        } else {
            match producer.payload_size() {
                PayloadSize::Length(length) => {
                    headers.remove(TRANSFER_ENCODING);
                    headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
                    PayloadEncoder::fix_length(length)
                }
                PayloadSize::Empty => {
                    headers.remove(TRANSFER_ENCODING);
                    headers.insert(CONTENT_LENGTH, HeaderValue::from_static("0"));
                    PayloadEncoder::empty()
                }
                PayloadSize::Chunked if version == Version::HTTP_11 => {
                    headers.remove(CONTENT_LENGTH);
                    headers.insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
                    PayloadEncoder::chunked()
                }
                PayloadSize::Chunked => {
                    // HTTP/1.0 has no chunked framing, the end of the body is the end of the connection
                    headers.remove(CONTENT_LENGTH);
                    headers.remove(TRANSFER_ENCODING);
                    must_close = true;
                    PayloadEncoder::until_close()
                }
            }
        };
        let encoder = if head_request { PayloadEncoder::empty() } else { encoder };

        if must_close {
            headers.remove(HeaderName::from_static(KEEP_ALIVE));
            headers.insert(CONNECTION, HeaderValue::from_static("close"));
        } else {
            let keep_alive = format!(
                "timeout={}, max={}",
                self.options.connection_timeout().as_secs(),
                self.remaining_requests
            );
            headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
            headers.insert(HeaderName::from_static(KEEP_ALIVE), HeaderValue::try_from(keep_alive).map_err(SendError::invalid_body)?);
        }

        for link in links {
            headers.append(LINK, link);
        }

        let mut buffer = BytesMut::new();
        HeaderEncoder.encode(&head, &mut buffer)?;
        trace!(status = head.status().as_u16(), must_close, "encoded response head");

        let writer = ResponseWriter::new(io, buffer, producer, encoder, must_close);
        Ok(match ticket {
            Some(ticket) => writer.with_ticket(ticket),
            None => writer,
        })
    }
}

/// Marks one dispatched request as answered when dropped.
///
/// While any ticket is alive the driver does not parse past the end of the
/// current request.
#[derive(Debug)]
pub struct ResponseTicket {
    pending: Arc<AtomicUsize>,
}

impl ResponseTicket {
    fn new(pending: Arc<AtomicUsize>) -> Self {
        Self { pending }
    }
}

impl Drop for ResponseTicket {
    fn drop(&mut self) {
        // saturating, more writers than requests must not wrap the counter
        let _ = self.pending.fetch_update(Ordering::AcqRel, Ordering::Acquire, |pending| pending.checked_sub(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use http::{Response, Uri};
    use http_body_util::BodyExt;
    use indoc::indoc;

    use crate::protocol::RequestExt;
    use crate::upgrade::UpgradeKind;
    use crate::writer::{IterProducer, WriteOutcome, Yielded};

    #[derive(Default)]
    struct Recorder {
        requests: Vec<Request<RequestBody>>,
        transmitted: Vec<(Bytes, bool)>,
        upgrades: Vec<Http2Upgrade>,
        forwarded: BytesMut,
    }

    impl Emitter for Recorder {
        fn emit(&mut self, request: Request<RequestBody>) {
            self.requests.push(request);
        }

        fn transmit(&mut self, bytes: Bytes, close: bool) {
            self.transmitted.push((bytes, close));
        }

        fn upgrade(&mut self, upgrade: Http2Upgrade) {
            self.upgrades.push(upgrade);
        }

        fn forward(&mut self, bytes: Bytes) {
            self.forwarded.extend_from_slice(&bytes);
        }
    }

    fn driver(options: Options) -> Http1Driver {
        Http1Driver::new(Arc::new(options), Arc::new(ClientInfo::new(7)))
    }

    fn crlf(str: &str) -> String {
        str.replace('\n', "\r\n")
    }

    fn feed_bytewise(driver: &mut Http1Driver, bytes: &[u8], recorder: &mut Recorder) -> Result<(), ParseError> {
        for byte in bytes {
            driver.feed(std::slice::from_ref(byte), recorder)?;
        }
        Ok(())
    }

    /// Feeds `bytes` in one piece and one byte at a time, returning both recorders.
    fn feed_both_ways(options: &Options, bytes: &[u8]) -> [(Result<(), ParseError>, Recorder); 2] {
        let mut whole = Recorder::default();
        let whole_result = driver(options.clone()).feed(bytes, &mut whole);

        let mut bytewise = Recorder::default();
        let bytewise_result = feed_bytewise(&mut driver(options.clone()), bytes, &mut bytewise);

        [(whole_result, whole), (bytewise_result, bytewise)]
    }

    fn chunks(body: &'static [u8]) -> IterProducer<std::array::IntoIter<Yielded<()>, 1>, ()> {
        IterProducer::new([Yielded::Chunk(Bytes::from_static(body))])
    }

    async fn summarize(request: Request<RequestBody>) -> (Method, String, &'static str, Vec<(String, String)>, Bytes) {
        let headers = request
            .headers()
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_str().unwrap().to_string()))
            .collect();
        let (method, path, protocol) = (request.method().clone(), request.path().to_string(), request.protocol_version());
        let body = request.into_body().collect().await.unwrap().to_bytes();
        (method, path, protocol, headers, body)
    }

    #[tokio::test]
    async fn simple_get() {
        let mut recorder = Recorder::default();
        let mut driver = driver(Options::default());
        driver.feed(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n", &mut recorder).unwrap();

        assert_eq!(recorder.requests.len(), 1);
        let request = recorder.requests.remove(0);
        assert_eq!(request.client().unwrap().id(), 7);
        assert_eq!(request.port(), 80);

        let (method, path, protocol, headers, body) = summarize(request).await;
        assert_eq!(method, Method::GET);
        assert_eq!(path, "/");
        assert_eq!(protocol, "1.1");
        assert_eq!(headers, vec![("host".to_string(), "localhost".to_string())]);
        assert!(body.is_empty());
        assert!(!driver.is_receiving_body());
    }

    #[tokio::test]
    async fn fragmentation_does_not_change_the_request() {
        let str = crlf(indoc! {r##"
        POST /upload?id=3 HTTP/1.1
        Host: localhost
        Cookie: a=1
        Cookie: b=2
        Content-Length: 9

        woot!test"##});

        let [(whole_result, mut whole), (bytewise_result, mut bytewise)] =
            feed_both_ways(&Options::default(), str.as_bytes());
        whole_result.unwrap();
        bytewise_result.unwrap();

        let whole = summarize(whole.requests.remove(0)).await;
        let bytewise = summarize(bytewise.requests.remove(0)).await;
        assert_eq!(whole, bytewise);
        assert_eq!(whole.1, "/upload");
        assert_eq!(&whole.4[..], b"woot!test");
        assert_eq!(whole.3.iter().filter(|(name, _)| name == "cookie").count(), 2);
    }

    #[test]
    fn header_size_violation_wherever_crossed() {
        let options = Options::default().with_max_header_size(64);
        let str = crlf(indoc! {r##"
        GET / HTTP/1.1
        Host: localhost
        X-Padding: aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa

        "##});

        for (result, recorder) in feed_both_ways(&options, str.as_bytes()) {
            let error = result.unwrap_err();
            assert_eq!(error.status(), StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE);
            assert_eq!(error.to_string(), "Bad Request: header size violation");
            assert!(recorder.requests.is_empty());
        }
    }

    #[test]
    fn obsolete_line_folding_is_rejected() {
        for (result, recorder) in feed_both_ways(&Options::default(), b"GET / HTTP/1.1\r\nHost: \r\n localhost\r\n\r\n") {
            let error = result.unwrap_err();
            assert_eq!(error, ParseError::ObsoleteLineFolding);
            assert_eq!(error.status(), StatusCode::BAD_REQUEST);
            assert!(recorder.requests.is_empty());
        }
    }

    #[test]
    fn errors_persist() {
        let mut recorder = Recorder::default();
        let mut driver = driver(Options::default());

        let error = driver.feed(b"GARBAGE\r\n\r\n", &mut recorder).unwrap_err();
        assert_eq!(error, ParseError::InvalidRequestLine);
        assert_eq!(driver.feed(b"GET / HTTP/1.1\r\n\r\n", &mut recorder).unwrap_err(), error);
        assert!(recorder.requests.is_empty());
    }

    #[tokio::test]
    async fn chunked_body_keeps_trailers_out() {
        let str = crlf(indoc! {r##"
        POST / HTTP/1.1
        Transfer-Encoding: chunked

        5
        woot!
        4
        test
        0
        My-Trailer: 1

        "##});

        for (result, mut recorder) in feed_both_ways(&Options::default(), str.as_bytes()) {
            result.unwrap();
            let request = recorder.requests.remove(0);
            assert!(!request.headers().contains_key("my-trailer"));
            assert_eq!(&request.into_body().collect().await.unwrap().to_bytes()[..], b"woot!test");
        }
    }

    #[tokio::test]
    async fn chunk_size_line_needs_a_digit() {
        for body in ["\r\n\r\n", ";ext\r\n\r\n"] {
            let str = format!("POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n{body}");

            for (result, mut recorder) in feed_both_ways(&Options::default(), str.as_bytes()) {
                let error = result.unwrap_err();
                assert_eq!(error, ParseError::invalid_chunk("invalid chunk size"));
                assert_eq!(error.status(), StatusCode::BAD_REQUEST);

                let request = recorder.requests.remove(0);
                assert_eq!(request.into_body().collect().await.unwrap_err(), error);
            }
        }
    }

    #[tokio::test]
    async fn pipelined_requests_wait_for_the_response() {
        let str = crlf(indoc! {r##"
        POST /first HTTP/1.1
        Content-Length: 5

        helloPOST /second HTTP/1.1
        Content-Length: 3

        abc"##});

        let mut recorder = Recorder::default();
        let mut driver = driver(Options::default());
        driver.feed(str.as_bytes(), &mut recorder).unwrap();

        assert_eq!(recorder.requests.len(), 1);
        assert_eq!(driver.pending_responses(), 1);
        assert!(!driver.is_receiving_body());

        let first = recorder.requests.remove(0);
        let context = first.context();
        assert_eq!(&first.into_body().collect().await.unwrap().to_bytes()[..], b"hello");

        let mut output = Vec::new();
        let writer = driver.writer(Response::new(()), Some(&context), chunks(b"ok"), &mut output).unwrap();

        driver.feed(&[], &mut recorder).unwrap();
        assert!(recorder.requests.is_empty());

        writer.await.unwrap();
        assert_eq!(driver.pending_responses(), 0);
        driver.feed(&[], &mut recorder).unwrap();

        let second = recorder.requests.remove(0);
        assert_eq!(second.uri().path(), "/second");
        assert_eq!(&second.into_body().collect().await.unwrap().to_bytes()[..], b"abc");
    }

    #[test]
    fn held_back_input_is_bounded() {
        let mut recorder = Recorder::default();
        let mut driver = driver(Options::default().with_max_header_size(64).with_max_body_size(16));
        driver.feed(b"GET /first HTTP/1.1\r\n\r\n", &mut recorder).unwrap();
        assert_eq!(driver.pending_responses(), 1);

        driver.feed(&[b'a'; 80], &mut recorder).unwrap();
        let error = driver.feed(&[b'a'; 1], &mut recorder).unwrap_err();
        assert_eq!(error, ParseError::too_large_header(81, 80));
        assert_eq!(error.status(), StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE);
        assert_eq!(recorder.requests.len(), 1);
    }

    #[tokio::test]
    async fn raised_cap_admits_larger_bodies() {
        let bodies = [
            "POST / HTTP/1.1\r\nContent-Length: 26\r\n\r\nabcdefghijklmnopqrstuvwxyz",
            "POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n1A\r\nabcdefghijklmnopqrstuvwxyz\r\n0\r\n\r\n",
        ];

        for str in bodies {
            let (head, body) = str.split_at(str.find("\r\n\r\n").unwrap() + 4);
            let mut recorder = Recorder::default();
            let mut driver = driver(Options::default().with_max_body_size(4));

            driver.feed(head.as_bytes(), &mut recorder).unwrap();
            let request = recorder.requests.remove(0);
            request.body().increase_max_size(26);

            feed_bytewise(&mut driver, body.as_bytes(), &mut recorder).unwrap();
            assert_eq!(&request.into_body().collect().await.unwrap().to_bytes()[..], b"abcdefghijklmnopqrstuvwxyz");
        }
    }

    #[tokio::test]
    async fn body_over_cap_fails_request_and_connection() {
        let mut recorder = Recorder::default();
        let mut driver = driver(Options::default().with_max_body_size(4));

        let error = driver
            .feed(b"POST / HTTP/1.1\r\nContent-Length: 26\r\n\r\nabcdefghijklmnopqrstuvwxyz", &mut recorder)
            .unwrap_err();
        assert_eq!(error, ParseError::too_large_body(4));
        assert_eq!(error.status(), StatusCode::PAYLOAD_TOO_LARGE);

        let request = recorder.requests.remove(0);
        assert_eq!(request.into_body().collect().await.unwrap_err(), ParseError::too_large_body(4));
    }

    #[tokio::test]
    async fn truncated_body_is_incomplete() {
        let mut recorder = Recorder::default();
        let mut driver = driver(Options::default());
        driver.feed(b"POST / HTTP/1.1\r\nContent-Length: 10\r\n\r\nabc", &mut recorder).unwrap();
        assert!(driver.is_receiving_body());

        assert_eq!(driver.end_of_input(), Err(ParseError::IncompleteBody));
        let request = recorder.requests.remove(0);
        assert_eq!(request.into_body().collect().await.unwrap_err(), ParseError::IncompleteBody);
    }

    #[test]
    fn h2c_upgrade_switches_framing() {
        let str = crlf(indoc! {r##"
        GET /path HTTP/1.1
        Host: foo.bar
        Connection: upgrade
        Upgrade: h2c
        http2-settings: c29tZXNldHRpbmdz

        "##});
        let mut input = str.into_bytes();
        input.extend_from_slice(PREFACE);

        let mut recorder = Recorder::default();
        let mut driver = driver(Options::default());
        driver.feed(&input, &mut recorder).unwrap();

        assert_eq!(recorder.transmitted.len(), 2);
        assert!(recorder.transmitted[0].0.starts_with(b"HTTP/1.1 101 Switching Protocols\r\n"));
        assert_eq!(recorder.transmitted[1], (settings_frame(&Options::default()), false));

        let request = &recorder.requests[0];
        assert_eq!(request.version(), Version::HTTP_2);
        assert_eq!(request.protocol_version(), "2.0");
        assert_eq!(request.host(), Some("foo.bar"));
        assert_eq!(request.path(), "/path");

        assert_eq!(recorder.upgrades[0].kind(), UpgradeKind::Cleartext);
        assert_eq!(recorder.upgrades[0].peer_settings().unwrap().len(), 2);
        assert_eq!(&recorder.forwarded[..], PREFACE);
        assert!(driver.is_upgraded());

        driver.feed(b"\x00\x00\x00", &mut recorder).unwrap();
        assert_eq!(recorder.forwarded.len(), PREFACE.len() + 3);
        assert_eq!(recorder.requests.len(), 1);
    }

    #[test]
    fn invalid_h2c_settings_are_rejected() {
        let str = crlf(indoc! {r##"
        GET / HTTP/1.1
        Connection: upgrade, http2-settings
        Upgrade: h2c
        http2-settings: AAMAAAB

        "##});

        let mut recorder = Recorder::default();
        let error = driver(Options::default()).feed(str.as_bytes(), &mut recorder).unwrap_err();
        assert_eq!(error, ParseError::InvalidHttp2Settings);
        assert!(recorder.transmitted.is_empty());
    }

    #[test]
    fn disabled_upgrade_serves_http1() {
        let str = crlf(indoc! {r##"
        GET / HTTP/1.1
        Connection: upgrade
        Upgrade: h2c
        http2-settings: c29tZXNldHRpbmdz

        "##});

        let mut recorder = Recorder::default();
        driver(Options::default().with_http2_upgrade(false)).feed(str.as_bytes(), &mut recorder).unwrap();
        assert!(recorder.upgrades.is_empty());
        assert_eq!(recorder.requests[0].version(), Version::HTTP_11);
    }

    #[test]
    fn prior_knowledge_preface() {
        let mut recorder = Recorder::default();
        let mut driver = driver(Options::default());
        feed_bytewise(&mut driver, PREFACE, &mut recorder).unwrap();

        assert_eq!(recorder.transmitted, vec![(settings_frame(&Options::default()), false)]);
        assert!(recorder.requests.is_empty());
        assert_eq!(recorder.upgrades, vec![Http2Upgrade::prior_knowledge()]);
        assert_eq!(recorder.upgrades[0].kind(), UpgradeKind::PriorKnowledge);

        driver.feed(b"\x00\x00\x12\x04", &mut recorder).unwrap();
        assert_eq!(&recorder.forwarded[..], b"\x00\x00\x12\x04");
    }

    #[tokio::test]
    async fn keep_alive_response_head() {
        let mut recorder = Recorder::default();
        let mut driver = driver(Options::default().with_connection_timeout(Duration::from_secs(60)));
        driver.feed(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n", &mut recorder).unwrap();
        let context = recorder.requests[0].context();

        let mut head = Response::new(());
        head.push(Uri::from_static("/style.css"));

        let mut output = Vec::new();
        let outcome = driver.writer(head, Some(&context), chunks(b"hello"), &mut output).unwrap().await.unwrap();
        assert_eq!(outcome, WriteOutcome::Written { must_close: false });

        let output = String::from_utf8(output).unwrap();
        assert!(output.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(output.contains("connection: keep-alive\r\n"));
        assert!(output.contains("keep-alive: timeout=60, max=999\r\n"));
        assert!(output.contains("transfer-encoding: chunked\r\n"));
        assert!(output.contains("link: </style.css>; rel=preload\r\n"));
        assert!(output.ends_with("\r\n\r\n5\r\nhello\r\n0\r\n\r\n"));
    }

    #[tokio::test]
    async fn http10_unknown_length_closes() {
        let mut recorder = Recorder::default();
        let mut driver = driver(Options::default());
        driver.feed(b"GET / HTTP/1.0\r\nConnection: keep-alive\r\n\r\n", &mut recorder).unwrap();
        let context = recorder.requests[0].context();
        assert!(!context.close_requested());

        let mut output = Vec::new();
        let outcome = driver.writer(Response::new(()), Some(&context), chunks(b"hello"), &mut output).unwrap().await.unwrap();
        assert!(outcome.must_close());

        let output = String::from_utf8(output).unwrap();
        assert!(output.starts_with("HTTP/1.0 200 OK\r\n"));
        assert!(output.contains("connection: close\r\n"));
        assert!(!output.contains("transfer-encoding"));
        assert!(output.ends_with("\r\n\r\nhello"));
    }

    #[tokio::test]
    async fn head_response_announces_length_without_body() {
        let mut recorder = Recorder::default();
        let mut driver = driver(Options::default());
        driver.feed(b"HEAD / HTTP/1.1\r\n\r\n", &mut recorder).unwrap();
        let context = recorder.requests[0].context();

        let producer = chunks(b"hello").with_payload_size(PayloadSize::Length(5));
        let mut output = Vec::new();
        driver.writer(Response::new(()), Some(&context), producer, &mut output).unwrap().await.unwrap();

        let output = String::from_utf8(output).unwrap();
        assert!(output.contains("content-length: 5\r\n"));
        assert!(output.ends_with("\r\n\r\n"));
    }

    #[tokio::test]
    async fn no_content_drops_framing() {
        let mut recorder = Recorder::default();
        let mut driver = driver(Options::default());
        driver.feed(b"DELETE /item HTTP/1.1\r\n\r\n", &mut recorder).unwrap();
        let context = recorder.requests[0].context();

        let head = Response::builder().status(StatusCode::NO_CONTENT).body(()).unwrap();
        let mut output = Vec::new();
        driver.writer(head, Some(&context), chunks(b"ignored"), &mut output).unwrap().await.unwrap();

        let output = String::from_utf8(output).unwrap();
        assert!(output.starts_with("HTTP/1.1 204 No Content\r\n"));
        assert!(!output.contains("transfer-encoding"));
        assert!(!output.contains("content-length"));
        assert!(output.ends_with("\r\n\r\n"));
    }

    #[tokio::test]
    async fn close_decisions() {
        let mut recorder = Recorder::default();
        let mut driver = driver(Options::default());
        driver.feed(b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n", &mut recorder).unwrap();
        let context = recorder.requests[0].context();

        let mut output = Vec::new();
        let writer = driver.writer(Response::new(()), Some(&context), chunks(b"bye"), &mut output).unwrap();
        assert!(writer.must_close());
        writer.await.unwrap();
        assert!(String::from_utf8(output).unwrap().contains("connection: close\r\n"));

        // answering without a request, as for a parse error
        let mut output = Vec::new();
        let head = Response::builder().status(StatusCode::BAD_REQUEST).body(()).unwrap();
        let producer = chunks(b"bad").with_payload_size(PayloadSize::Length(3));
        let outcome = driver.writer(head, None, producer, &mut output).unwrap().await.unwrap();
        assert!(outcome.must_close());
        assert!(String::from_utf8(output).unwrap().starts_with("HTTP/1.0 400 Bad Request\r\n"));
        assert_eq!(driver.pending_responses(), 0);
    }

    #[tokio::test]
    async fn conflicting_framing_closes_after_response() {
        let str = crlf(indoc! {r##"
        POST / HTTP/1.1
        Content-Length: 3
        Transfer-Encoding: chunked

        3
        abc
        0

        "##});

        let mut recorder = Recorder::default();
        let mut driver = driver(Options::default());
        driver.feed(str.as_bytes(), &mut recorder).unwrap();
        let request = recorder.requests.remove(0);
        let context = request.context();
        assert_eq!(&request.into_body().collect().await.unwrap().to_bytes()[..], b"abc");

        let writer = driver.writer(Response::new(()), Some(&context), chunks(b"ok"), Vec::new()).unwrap();
        assert!(writer.must_close());
    }

    #[tokio::test]
    async fn request_budget_is_enforced() {
        let mut recorder = Recorder::default();
        let mut driver = driver(Options::default().with_max_requests_per_connection(1));
        driver.feed(b"GET /a HTTP/1.1\r\n\r\nGET /b HTTP/1.1\r\n\r\n", &mut recorder).unwrap();
        assert_eq!(driver.remaining_requests(), 0);
        let context = recorder.requests[0].context();

        let outcome = driver.writer(Response::new(()), Some(&context), chunks(b"a"), Vec::new()).unwrap().await.unwrap();
        assert!(outcome.must_close());

        driver.feed(&[], &mut recorder).unwrap();
        assert_eq!(recorder.requests.len(), 1);
    }
}
