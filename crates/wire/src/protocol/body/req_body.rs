use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::StreamExt;
use futures::channel::mpsc;
use http_body::{Body, Frame, SizeHint};
use tracing::{trace, warn};

use crate::protocol::ParseError;

type Chunk = Result<Bytes, ParseError>;

/// The body of a dispatched request.
///
/// Bytes arrive as the driver decodes them, so a handler can start consuming a
/// large upload before it has been fully received. The stream ends when the
/// decoder reaches the end of the message, or yields the [`ParseError`] that made
/// the connection fail.
///
/// Every body carries a size cap, initialised from
/// [`Options::max_body_size`](crate::options::Options::max_body_size). A handler
/// that is willing to accept more calls [`increase_max_size`](Self::increase_max_size)
/// before the bytes arrive.
#[derive(Debug)]
pub struct RequestBody {
    kind: Kind,
    max_size: Arc<AtomicU64>,
}

#[derive(Debug)]
enum Kind {
    Empty,
    Full(Option<Bytes>),
    Streaming { receiver: mpsc::UnboundedReceiver<Chunk>, length: Option<u64> },
}

impl RequestBody {
    pub fn empty() -> Self {
        Self { kind: Kind::Empty, max_size: Arc::new(AtomicU64::new(u64::MAX)) }
    }

    /// Creates a streaming body and the sender the driver feeds it through.
    ///
    /// `length` is the declared `Content-Length`, if any, used for size hints.
    pub fn channel(max_size: u64, length: Option<u64>) -> (RequestBody, BodySender) {
        let (sender, receiver) = mpsc::unbounded();
        let max_size = Arc::new(AtomicU64::new(max_size));
        let body = RequestBody { kind: Kind::Streaming { receiver, length }, max_size: Arc::clone(&max_size) };
        (body, BodySender { sender, max_size, received: 0 })
    }

    /// Raises the body size cap. Lowering is ignored, the cap never shrinks.
    pub fn increase_max_size(&self, max_size: u64) {
        self.max_size.fetch_max(max_size, Ordering::AcqRel);
    }

    pub fn max_size(&self) -> u64 {
        self.max_size.load(Ordering::Acquire)
    }
}

impl Default for RequestBody {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<Bytes> for RequestBody {
    fn from(bytes: Bytes) -> Self {
        let kind = if bytes.is_empty() { Kind::Empty } else { Kind::Full(Some(bytes)) };
        Self { kind, max_size: Arc::new(AtomicU64::new(u64::MAX)) }
    }
}

impl From<&'static str> for RequestBody {
    fn from(str: &'static str) -> Self {
        Bytes::from_static(str.as_bytes()).into()
    }
}

impl Body for RequestBody {
    type Data = Bytes;
    type Error = ParseError;

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match &mut self.get_mut().kind {
            Kind::Empty => Poll::Ready(None),
            Kind::Full(bytes) => Poll::Ready(bytes.take().map(|bytes| Ok(Frame::data(bytes)))),
            Kind::Streaming { receiver, .. } => {
                receiver.poll_next_unpin(cx).map(|chunk| chunk.map(|result| result.map(Frame::data)))
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        match &self.kind {
            Kind::Empty => true,
            Kind::Full(bytes) => bytes.is_none(),
            Kind::Streaming { .. } => false,
        }
    }

    fn size_hint(&self) -> SizeHint {
        match &self.kind {
            Kind::Empty => SizeHint::with_exact(0),
            Kind::Full(bytes) => SizeHint::with_exact(bytes.as_ref().map_or(0, |bytes| bytes.len() as u64)),
            Kind::Streaming { length: Some(length), .. } => SizeHint::with_exact(*length),
            Kind::Streaming { length: None, .. } => SizeHint::default(),
        }
    }
}

/// The driver's end of a streaming [`RequestBody`].
///
/// Dropping the sender ends the body stream.
#[derive(Debug)]
pub struct BodySender {
    sender: mpsc::UnboundedSender<Chunk>,
    max_size: Arc<AtomicU64>,
    received: u64,
}

impl BodySender {
    /// Hands a decoded chunk to the body, enforcing the current size cap.
    ///
    /// The cap is read on every chunk, so a raise made by the application takes
    /// effect for all bytes decoded afterwards. Once the cap is exceeded the body
    /// receives the error too.
    pub fn send_chunk(&mut self, bytes: Bytes) -> Result<(), ParseError> {
        self.received += bytes.len() as u64;
        let max_size = self.max_size.load(Ordering::Acquire);
        if self.received > max_size {
            warn!(received = self.received, max_size, "request body exceeds size limit");
            let error = ParseError::too_large_body(max_size);
            self.fail(error.clone());
            return Err(error);
        }

        if self.sender.unbounded_send(Ok(bytes)).is_err() {
            trace!(received = self.received, "request body dropped, discarding chunk");
        }
        Ok(())
    }

    /// Ends the body stream with `error`.
    pub fn fail(&mut self, error: ParseError) {
        // the receiver may be gone already, nothing is waiting for the error then
        let _ = self.sender.unbounded_send(Err(error));
        self.sender.close_channel();
    }

    pub fn received(&self) -> u64 {
        self.received
    }
}
