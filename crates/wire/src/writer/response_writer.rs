use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll, ready};

use bytes::{Buf, Bytes, BytesMut};
use futures::TryFutureExt;
use futures::future::{BoxFuture, try_join_all};
use tokio::io::AsyncWrite;
use tokio_util::codec::Encoder;
use tracing::{debug, trace, warn};

use crate::codec::body::PayloadEncoder;
use crate::driver::ResponseTicket;
use crate::protocol::{BoxError, PayloadItem, SendError};
use crate::utils::ensure;
use crate::writer::{Producer, Resumed, Yielded};

/// How a response write ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Every byte was written and flushed.
    Written { must_close: bool },
    /// The destination went away while the writer waited on a pending value.
    /// The resolution was dropped and nothing more was written.
    Discarded,
}

impl WriteOutcome {
    /// Whether the connection has to be closed after this response.
    pub fn must_close(&self) -> bool {
        match self {
            WriteOutcome::Written { must_close } => *must_close,
            WriteOutcome::Discarded => true,
        }
    }
}

/// Marks the destination of a writer as gone.
///
/// Cloned handles share the flag. Once closed, a writer fails its next write
/// attempt and discards any pending value when it resolves.
#[derive(Debug, Clone, Default)]
pub struct CloseSignal(Arc<AtomicBool>);

impl CloseSignal {
    pub fn close(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

enum State<T> {
    Writing,
    Suspended(BoxFuture<'static, Result<Resumed<T>, BoxError>>),
    Flushing,
    Done,
}

/// Writes one response: the encoded head followed by the producer's body.
///
/// The writer is a future. Each poll flushes pending output first and pulls
/// the next body element only once the output buffer is empty. A partial write
/// leaves the rest buffered until the socket is writable again. A pending value
/// yielded by the producer suspends the writer without touching the socket.
pub struct ResponseWriter<P: Producer, W> {
    io: W,
    buffer: BytesMut,
    producer: P,
    encoder: PayloadEncoder,
    state: State<P::Value>,
    output_completed: bool,
    must_close: bool,
    closed: CloseSignal,
    ticket: Option<ResponseTicket>,
}

impl<P, W> ResponseWriter<P, W>
where
    P: Producer + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Creates a writer. Most callers go through
    /// [`Http1Driver::writer`](crate::driver::Http1Driver::writer), which also
    /// completes and encodes the head.
    ///
    /// # Arguments
    ///
    /// * `io` - The destination
    /// * `head` - The encoded response head, written before any body bytes
    /// * `producer` - The body
    /// * `encoder` - Frames the body the way the head announced
    /// * `must_close` - Reported back through [`WriteOutcome::must_close`]
    pub fn new(io: W, head: BytesMut, producer: P, encoder: PayloadEncoder, must_close: bool) -> Self {
        Self {
            io,
            buffer: head,
            producer,
            encoder,
            state: State::Writing,
            output_completed: false,
            must_close,
            closed: CloseSignal::default(),
            ticket: None,
        }
    }

    pub(crate) fn with_ticket(mut self, ticket: ResponseTicket) -> Self {
        self.ticket = Some(ticket);
        self
    }

    /// A handle that marks the destination of this writer as gone.
    pub fn close_signal(&self) -> CloseSignal {
        self.closed.clone()
    }

    /// Whether the head announced `Connection: close`.
    pub fn must_close(&self) -> bool {
        self.must_close
    }

    fn pull(&mut self) -> Result<(), SendError> {
        if self.encoder.is_empty() {
            return self.complete();
        }

        let Some(value) = self.producer.current().map_err(SendError::producer)? else {
            return self.complete();
        };

        match value {
            Yielded::Chunk(bytes) => {
                ensure!(!bytes.is_empty(), SendError::invalid_yield("empty chunk"));
                trace!(size = bytes.len(), "buffering body chunk");
                self.encoder.encode(PayloadItem::Chunk(bytes), &mut self.buffer)?;
                self.producer.advance().map_err(SendError::producer)
            }
            Yielded::Await(pending) => {
                self.state = State::Suspended(Box::pin(pending.map_ok(Resumed::One)));
                Ok(())
            }
            Yielded::AwaitAll(group) => {
                ensure!(!group.is_empty(), SendError::EmptyGroup);
                self.state = State::Suspended(Box::pin(try_join_all(group).map_ok(Resumed::All)));
                Ok(())
            }
            Yielded::Invalid(kind) => Err(SendError::invalid_yield(kind)),
        }
    }

    /// Buffers the end of the body, the terminating chunk under chunked framing.
    fn complete(&mut self) -> Result<(), SendError> {
        self.encoder.encode(PayloadItem::<Bytes>::Eof, &mut self.buffer)?;
        self.output_completed = true;
        Ok(())
    }

    fn finish(&mut self, result: Result<WriteOutcome, SendError>) -> Poll<Result<WriteOutcome, SendError>> {
        self.state = State::Done;
        drop(self.ticket.take());
        if let Err(e) = &result {
            warn!(cause = %e, "response write failed");
        }
        Poll::Ready(result)
    }
}

impl<P, W> Future for ResponseWriter<P, W>
where
    P: Producer + Unpin,
    W: AsyncWrite + Unpin,
{
    type Output = Result<WriteOutcome, SendError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        loop {
            match &mut this.state {
                State::Writing => {
                    while this.buffer.has_remaining() {
                        if this.closed.is_closed() {
                            return this.finish(Err(SendError::pipe_broken(io::ErrorKind::BrokenPipe)));
                        }

                        match Pin::new(&mut this.io).poll_write(cx, &this.buffer) {
                            Poll::Ready(Ok(0)) => {
                                return this.finish(Err(SendError::pipe_broken(io::ErrorKind::WriteZero)));
                            }
                            Poll::Ready(Ok(n)) => {
                                this.buffer.advance(n);
                                if this.buffer.has_remaining() {
                                    trace!(written = n, remaining = this.buffer.len(), "partial write");
                                }
                            }
                            Poll::Ready(Err(e)) => return this.finish(Err(SendError::pipe_broken(e))),
                            Poll::Pending => return Poll::Pending,
                        }
                    }

                    if this.output_completed {
                        this.state = State::Flushing;
                    } else if let Err(e) = this.pull() {
                        return this.finish(Err(e));
                    }
                }

                State::Suspended(pending) => {
                    let resolution = ready!(pending.as_mut().poll(cx));
                    if this.closed.is_closed() {
                        debug!("destination gone while waiting on a pending value, discarding it");
                        return this.finish(Ok(WriteOutcome::Discarded));
                    }

                    this.state = State::Writing;
                    let resumed = match resolution {
                        Ok(value) => this.producer.send(value),
                        Err(e) => this.producer.throw(e),
                    };
                    if let Err(e) = resumed {
                        return this.finish(Err(SendError::producer(e)));
                    }
                }

                State::Flushing => match ready!(Pin::new(&mut this.io).poll_flush(cx)) {
                    Ok(()) => {
                        trace!(must_close = this.must_close, "response written");
                        let must_close = this.must_close;
                        return this.finish(Ok(WriteOutcome::Written { must_close }));
                    }
                    Err(e) => return this.finish(Err(SendError::pipe_broken(e))),
                },

                State::Done => {
                    return Poll::Ready(Err(SendError::io(io::Error::other("response writer polled after completion"))));
                }
            }
        }
    }
}

impl<P: Producer, W> fmt::Debug for ResponseWriter<P, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.state {
            State::Writing => "Writing",
            State::Suspended(_) => "Suspended",
            State::Flushing => "Flushing",
            State::Done => "Done",
        };
        f.debug_struct("ResponseWriter")
            .field("state", &state)
            .field("buffered", &self.buffer.len())
            .field("encoder", &self.encoder)
            .field("output_completed", &self.output_completed)
            .field("must_close", &self.must_close)
            .finish_non_exhaustive()
    }
}
