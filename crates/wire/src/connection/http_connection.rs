use std::collections::VecDeque;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use http::header::{CONNECTION, CONTENT_TYPE, EXPECT};
use http::{HeaderValue, Request, Response, StatusCode};
use http_body::Body;
use http_body_util::{Empty, Full};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::select;
use tracing::{debug, error, info, warn};

use crate::driver::{Emitter, Http1Driver};
use crate::handler::Handler;
use crate::options::Options;
use crate::protocol::body::RequestBody;
use crate::protocol::{
    BoxError, ClientInfo, HttpError, ParseError, RequestContext, RequestExt, ResponseHead, SendError,
};
use crate::upgrade::Http2Upgrade;
use crate::writer::{BodyProducer, WriteOutcome};

const READ_BUFFER_SIZE: usize = 8 * 1024;
const CONTINUE: &[u8] = b"HTTP/1.1 100 Continue\r\n\r\n";

/// How a connection ended.
#[derive(Debug)]
pub enum Processed<R, W> {
    /// The connection is done and its socket can be dropped.
    Closed,
    /// The client switched to HTTP/2. The socket is handed back for HTTP/2 framing.
    Upgraded(Http2Handoff<R, W>),
}

/// Everything HTTP/2 framing needs to take over a connection.
#[derive(Debug)]
pub struct Http2Handoff<R, W> {
    pub upgrade: Http2Upgrade,
    /// The upgrade request, answered on stream 1. `None` after a preface.
    pub request: Option<Request<RequestBody>>,
    /// Bytes received after the switch, not parsed yet.
    pub buffered: BytesMut,
    pub reader: R,
    pub writer: W,
}

/// Collects what the driver emits during one feed.
#[derive(Debug, Default)]
struct Inbox {
    requests: VecDeque<Request<RequestBody>>,
    transmit: BytesMut,
    close_after_transmit: bool,
    upgrade: Option<Http2Upgrade>,
    forwarded: BytesMut,
}

impl Emitter for Inbox {
    fn emit(&mut self, request: Request<RequestBody>) {
        self.requests.push_back(request);
    }

    fn transmit(&mut self, bytes: Bytes, close: bool) {
        self.transmit.extend_from_slice(&bytes);
        self.close_after_transmit |= close;
    }

    fn upgrade(&mut self, upgrade: Http2Upgrade) {
        self.upgrade = Some(upgrade);
    }

    fn forward(&mut self, bytes: Bytes) {
        self.forwarded.extend_from_slice(&bytes);
    }
}

/// An HTTP/1.x connection that serves requests until it has to close.
///
/// `HttpConnection` drives the full connection lifecycle:
/// - reading the socket into the [`Http1Driver`]
/// - running the handler while the request body keeps streaming in
/// - answering `Expect: 100-continue`
/// - writing responses, keeping the connection alive when allowed
/// - answering parse errors with their status code before closing
///
/// # Type Parameters
///
/// * `R`: The async readable stream type
/// * `W`: The async writable stream type
#[derive(Debug)]
pub struct HttpConnection<R, W> {
    reader: R,
    writer: W,
    options: Arc<Options>,
    driver: Http1Driver,
    read_buf: BytesMut,
}

impl<R, W> HttpConnection<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W, options: Arc<Options>, client: Arc<ClientInfo>) -> Self {
        Self {
            reader,
            writer,
            driver: Http1Driver::new(Arc::clone(&options), client),
            options,
            read_buf: BytesMut::with_capacity(READ_BUFFER_SIZE),
        }
    }

    pub async fn process<H>(mut self, handler: Arc<H>) -> Result<Processed<R, W>, HttpError>
    where
        H: Handler<RequestBody>,
        H::RespBody: Body<Data = Bytes> + Send + Unpin + 'static,
        <H::RespBody as Body>::Error: Into<BoxError>,
    {
        let mut inbox = Inbox::default();

        loop {
            if !inbox.transmit.is_empty() {
                let bytes = inbox.transmit.split();
                self.writer.write_all(&bytes).await.map_err(SendError::pipe_broken)?;
                self.writer.flush().await.map_err(SendError::pipe_broken)?;
                if inbox.close_after_transmit {
                    return Ok(Processed::Closed);
                }
            }

            if let Some(upgrade) = inbox.upgrade.take() {
                info!(kind = ?upgrade.kind(), "connection switched to http2");
                return Ok(Processed::Upgraded(Http2Handoff {
                    upgrade,
                    request: inbox.requests.pop_front(),
                    buffered: inbox.forwarded.split(),
                    reader: self.reader,
                    writer: self.writer,
                }));
            }

            if let Some(request) = inbox.requests.pop_front() {
                let outcome = self.serve(request, &handler, &mut inbox).await?;
                if outcome.must_close() {
                    info!("response requires close, break this connection down");
                    return Ok(Processed::Closed);
                }
                if let Err(e) = self.driver.feed(&[], &mut inbox) {
                    return Err(self.fail(e).await);
                }
                continue;
            }

            let read = tokio::time::timeout(self.options.connection_timeout(), self.read()).await;
            let Ok(read) = read else {
                info!(timeout = ?self.options.connection_timeout(), "connection idle, closing");
                return Ok(Processed::Closed);
            };

            match read? {
                Some(bytes) => {
                    if let Err(e) = self.driver.feed(&bytes, &mut inbox) {
                        return Err(self.fail(e).await);
                    }
                }
                None => {
                    info!("cant read more request, break this connection down");
                    return Ok(Processed::Closed);
                }
            }
        }
    }

    async fn serve<H>(
        &mut self,
        request: Request<RequestBody>,
        handler: &Arc<H>,
        inbox: &mut Inbox,
    ) -> Result<WriteOutcome, HttpError>
    where
        H: Handler<RequestBody>,
        H::RespBody: Body<Data = Bytes> + Send + Unpin + 'static,
        <H::RespBody as Body>::Error: Into<BoxError>,
    {
        let context = request.context();

        if self.driver.is_receiving_body() && expects_continue(&request) {
            self.writer.write_all(CONTINUE).await.map_err(SendError::pipe_broken)?;
            self.writer.flush().await.map_err(SendError::pipe_broken)?;
            info!("receive expect request header, sent continue response");
        }

        // the handler may wait on body bytes, so reading goes on while it runs
        let response = {
            let handle = handler.call(request);
            tokio::pin!(handle);

            loop {
                if !self.driver.is_receiving_body() {
                    break handle.await;
                }

                select! {
                    biased;
                    response = &mut handle => break response,
                    read = self.read() => {
                        let fed = match read? {
                            Some(bytes) => self.driver.feed(&bytes, inbox),
                            None => self.driver.end_of_input(),
                        };
                        if let Err(e) = fed {
                            return Err(self.fail(e).await);
                        }
                    }
                }
            }
        };

        // skip what the handler left unread, the next request starts after it
        while self.driver.is_receiving_body() {
            let fed = match self.read().await? {
                Some(bytes) => self.driver.feed(&bytes, inbox),
                None => self.driver.end_of_input(),
            };
            if let Err(e) = fed {
                return Err(self.fail(e).await);
            }
        }

        match response {
            Ok(response) => self.respond(response, Some(&context)).await,
            Err(e) => {
                let e: BoxError = e.into();
                error!("handle response error, cause: {}", e);
                let mut response = Response::new(Empty::<Bytes>::new());
                *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                self.respond(response, Some(&context)).await
            }
        }
    }

    async fn respond<B>(&mut self, response: Response<B>, context: Option<&RequestContext>) -> Result<WriteOutcome, HttpError>
    where
        B: Body<Data = Bytes> + Send + Unpin + 'static,
        B::Error: Into<BoxError>,
    {
        let (parts, body) = response.into_parts();
        let head = ResponseHead::from_parts(parts, ());
        let writer = self.driver.writer(head, context, BodyProducer::new(body), &mut self.writer)?;
        Ok(writer.await?)
    }

    /// Answers a parse error with its status and hands the error back.
    async fn fail(&mut self, e: ParseError) -> HttpError {
        warn!(status = e.status().as_u16(), cause = %e, "can't receive next request");

        let mut response = Response::new(Full::new(Bytes::from(e.to_string())));
        *response.status_mut() = e.status();
        let headers = response.headers_mut();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
        headers.insert(CONNECTION, HeaderValue::from_static("close"));

        if let Err(send_error) = self.respond(response, None).await {
            debug!(cause = %send_error, "failed to send error response");
        }
        e.into()
    }

    /// Reads the next bytes from the socket, `None` once the peer closed.
    async fn read(&mut self) -> Result<Option<BytesMut>, HttpError> {
        self.read_buf.reserve(READ_BUFFER_SIZE);
        let n = self.reader.read_buf(&mut self.read_buf).await?;
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(self.read_buf.split()))
    }
}

fn expects_continue<B>(request: &Request<B>) -> bool {
    request
        .headers()
        .get(EXPECT)
        .is_some_and(|value| value.as_bytes().len() >= 4 && value.as_bytes()[..4].eq_ignore_ascii_case(b"100-"))
}
