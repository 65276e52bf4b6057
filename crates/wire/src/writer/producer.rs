//! The lazy body producer drained by a [`ResponseWriter`](super::ResponseWriter).
//!
//! A producer behaves like a suspended coroutine: it exposes its currently
//! yielded value, can be advanced past a chunk, and can be resumed with the
//! outcome of a pending value it asked the writer to wait for.

use std::fmt;
use std::mem;

use bytes::Bytes;
use futures::FutureExt;
use futures::future::BoxFuture;
use http_body::Body;
use http_body_util::BodyExt;

use crate::protocol::{BoxError, PayloadSize};

/// An asynchronous value a producer waits on.
pub type Pending<T> = BoxFuture<'static, Result<T, BoxError>>;

/// A value yielded by a [`Producer`].
pub enum Yielded<T> {
    /// Bytes to write. Must not be empty.
    Chunk(Bytes),
    /// Suspend until the value resolves, then resume with [`Resumed::One`].
    Await(Pending<T>),
    /// Suspend until every value resolves, then resume with [`Resumed::All`].
    /// The first failure wins. The group must not be empty.
    AwaitAll(Vec<Pending<T>>),
    /// Something the writer cannot handle, named for the error message.
    Invalid(&'static str),
}

impl<T> fmt::Debug for Yielded<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Yielded::Chunk(bytes) => f.debug_tuple("Chunk").field(bytes).finish(),
            Yielded::Await(_) => f.write_str("Await(..)"),
            Yielded::AwaitAll(group) => write!(f, "AwaitAll({} pending)", group.len()),
            Yielded::Invalid(kind) => f.debug_tuple("Invalid").field(kind).finish(),
        }
    }
}

/// The resolution fed back into a producer after a suspension.
#[derive(Debug)]
pub enum Resumed<T> {
    One(T),
    All(Vec<T>),
}

/// A resumable response body.
///
/// The writer drives a producer with this loop:
///
/// - [`current`](Self::current) takes the yielded value, `None` once the
///   producer is exhausted
/// - after a chunk, [`advance`](Self::advance) moves to the next value
/// - after a suspension, [`send`](Self::send) or [`throw`](Self::throw) resumes
///   the producer, which then holds its next value
///
/// Any method may fail. The writer treats a failure as fatal for the response.
pub trait Producer {
    /// What pending values resolve to.
    type Value: Send + 'static;

    /// Takes the currently yielded value.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(_))`: the value to handle next
    /// - `Ok(None)`: the producer is exhausted, the body is complete
    /// - `Err(_)`: the producer failed
    fn current(&mut self) -> Result<Option<Yielded<Self::Value>>, BoxError>;

    /// Moves past a chunk that was taken with [`current`](Self::current).
    fn advance(&mut self) -> Result<(), BoxError>;

    /// Resumes a suspended producer with the resolution it waited for.
    fn send(&mut self, value: Resumed<Self::Value>) -> Result<(), BoxError>;

    /// Injects the failure of a pending value. A producer that recovers returns
    /// `Ok` and holds its next value, otherwise it returns the error.
    fn throw(&mut self, error: BoxError) -> Result<(), BoxError>;

    /// How the body is framed. An unknown length means chunked.
    fn payload_size(&self) -> PayloadSize {
        PayloadSize::Chunked
    }
}

/// A producer over an iterator of yielded values.
///
/// Resumed values are discarded and injected errors are not recovered from.
pub struct IterProducer<I, T> {
    iter: I,
    current: Option<Yielded<T>>,
    payload_size: PayloadSize,
}

impl<I, T> IterProducer<I, T>
where
    I: Iterator<Item = Yielded<T>>,
{
    pub fn new(iter: impl IntoIterator<IntoIter = I>) -> Self {
        let mut iter = iter.into_iter();
        let current = iter.next();
        Self { iter, current, payload_size: PayloadSize::Chunked }
    }

    /// Declares the body length up front, so the response is not chunked.
    #[must_use]
    pub fn with_payload_size(mut self, payload_size: PayloadSize) -> Self {
        self.payload_size = payload_size;
        self
    }
}

impl<I, T> fmt::Debug for IterProducer<I, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IterProducer")
            .field("current", &self.current)
            .field("payload_size", &self.payload_size)
            .finish_non_exhaustive()
    }
}

impl<I, T> Producer for IterProducer<I, T>
where
    I: Iterator<Item = Yielded<T>>,
    T: Send + 'static,
{
    type Value = T;

    fn current(&mut self) -> Result<Option<Yielded<T>>, BoxError> {
        Ok(self.current.take())
    }

    fn advance(&mut self) -> Result<(), BoxError> {
        self.current = self.iter.next();
        Ok(())
    }

    fn send(&mut self, _value: Resumed<T>) -> Result<(), BoxError> {
        self.advance()
    }

    fn throw(&mut self, error: BoxError) -> Result<(), BoxError> {
        Err(error)
    }

    fn payload_size(&self) -> PayloadSize {
        self.payload_size
    }
}

/// The outcome of waiting on the next frame of a body.
pub struct NextFrame<B> {
    body: B,
    data: Option<Bytes>,
}

impl<B> fmt::Debug for NextFrame<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NextFrame").field("data", &self.data).finish_non_exhaustive()
    }
}

/// A producer over any [`http_body::Body`].
///
/// Frames that are ready are yielded as chunks directly. When the body has to
/// wait, the producer yields a pending value that owns the body until the next
/// data frame arrives. Trailer frames and empty data frames are skipped.
pub struct BodyProducer<B> {
    state: BodyState<B>,
    payload_size: PayloadSize,
}

enum BodyState<B> {
    Idle(B),
    Polling,
    Ready(Bytes, B),
    Done,
}

impl<B> BodyProducer<B>
where
    B: Body<Data = Bytes> + Send + Unpin + 'static,
    B::Error: Into<BoxError>,
{
    pub fn new(body: B) -> Self {
        let payload_size = PayloadSize::from_exact(body.size_hint().exact());
        Self { state: BodyState::Idle(body), payload_size }
    }
}

impl<B> fmt::Debug for BodyProducer<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.state {
            BodyState::Idle(_) => "Idle",
            BodyState::Polling => "Polling",
            BodyState::Ready(..) => "Ready",
            BodyState::Done => "Done",
        };
        f.debug_struct("BodyProducer").field("state", &state).field("payload_size", &self.payload_size).finish()
    }
}

async fn next_frame<B>(mut body: B) -> Result<NextFrame<B>, BoxError>
where
    B: Body<Data = Bytes> + Unpin,
    B::Error: Into<BoxError>,
{
    loop {
        match body.frame().await {
            Some(Ok(frame)) => match frame.into_data() {
                Ok(data) if !data.is_empty() => return Ok(NextFrame { body, data: Some(data) }),
                _ => {}
            },
            Some(Err(e)) => return Err(e.into()),
            None => return Ok(NextFrame { body, data: None }),
        }
    }
}

impl<B> Producer for BodyProducer<B>
where
    B: Body<Data = Bytes> + Send + Unpin + 'static,
    B::Error: Into<BoxError>,
{
    type Value = NextFrame<B>;

    fn current(&mut self) -> Result<Option<Yielded<NextFrame<B>>>, BoxError> {
        loop {
            match mem::replace(&mut self.state, BodyState::Polling) {
                BodyState::Ready(data, body) => {
                    self.state = BodyState::Idle(body);
                    return Ok(Some(Yielded::Chunk(data)));
                }
                BodyState::Idle(body) if body.is_end_stream() => self.state = BodyState::Done,
                BodyState::Idle(mut body) => {
                    let polled = body.frame().now_or_never();
                    match polled {
                        Some(Some(Ok(frame))) => {
                            self.state = match frame.into_data() {
                                Ok(data) if !data.is_empty() => BodyState::Ready(data, body),
                                _ => BodyState::Idle(body),
                            };
                        }
                        Some(Some(Err(e))) => {
                            self.state = BodyState::Done;
                            return Err(e.into());
                        }
                        Some(None) => self.state = BodyState::Done,
                        None => return Ok(Some(Yielded::Await(Box::pin(next_frame(body))))),
                    }
                }
                BodyState::Done => {
                    self.state = BodyState::Done;
                    return Ok(None);
                }
                BodyState::Polling => return Err("body frame is still pending".into()),
            }
        }
    }

    fn advance(&mut self) -> Result<(), BoxError> {
        Ok(())
    }

    fn send(&mut self, value: Resumed<NextFrame<B>>) -> Result<(), BoxError> {
        let Resumed::One(NextFrame { body, data }) = value else {
            self.state = BodyState::Done;
            return Err("body producer resumed with a group".into());
        };

        self.state = match data {
            Some(data) => BodyState::Ready(data, body),
            None => BodyState::Done,
        };
        Ok(())
    }

    fn throw(&mut self, error: BoxError) -> Result<(), BoxError> {
        self.state = BodyState::Done;
        Err(error)
    }

    fn payload_size(&self) -> PayloadSize {
        self.payload_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::body::RequestBody;
    use http_body_util::{Empty, Full, StreamBody};
    use futures::stream;
    use http_body::Frame;

    #[test]
    fn full_body_yields_without_suspending() {
        let mut producer = BodyProducer::new(Full::new(Bytes::from_static(b"hello")));
        assert_eq!(producer.payload_size(), PayloadSize::Length(5));

        let Some(Yielded::Chunk(bytes)) = producer.current().unwrap() else {
            panic!("expected chunk");
        };
        assert_eq!(bytes, Bytes::from_static(b"hello"));
        producer.advance().unwrap();
        assert!(producer.current().unwrap().is_none());
    }

    #[test]
    fn empty_body_is_exhausted() {
        let mut producer = BodyProducer::new(Empty::<Bytes>::new());
        assert_eq!(producer.payload_size(), PayloadSize::Empty);
        assert!(producer.current().unwrap().is_none());
    }

    #[tokio::test]
    async fn streaming_body_suspends_until_data() {
        let (body, mut sender) = RequestBody::channel(1024, None);
        let mut producer = BodyProducer::new(body);
        assert_eq!(producer.payload_size(), PayloadSize::Chunked);

        let Some(Yielded::Await(pending)) = producer.current().unwrap() else {
            panic!("expected pending frame");
        };
        sender.send_chunk(Bytes::from_static(b"late")).unwrap();
        producer.send(Resumed::One(pending.await.unwrap())).unwrap();

        let Some(Yielded::Chunk(bytes)) = producer.current().unwrap() else {
            panic!("expected chunk");
        };
        assert_eq!(bytes, Bytes::from_static(b"late"));
        producer.advance().unwrap();

        drop(sender);
        // the channel end is ready now, no suspension needed
        assert!(producer.current().unwrap().is_none());
    }

    #[test]
    fn skips_trailers_and_empty_frames() {
        let frames: Vec<Result<Frame<Bytes>, BoxError>> = vec![
            Ok(Frame::data(Bytes::new())),
            Ok(Frame::data(Bytes::from_static(b"a"))),
            Ok(Frame::trailers(http::HeaderMap::new())),
        ];
        let mut producer = BodyProducer::new(StreamBody::new(stream::iter(frames)));

        let Some(Yielded::Chunk(bytes)) = producer.current().unwrap() else {
            panic!("expected chunk");
        };
        assert_eq!(bytes, Bytes::from_static(b"a"));
        producer.advance().unwrap();
        assert!(producer.current().unwrap().is_none());
    }

    #[test]
    fn body_error_fails_producer() {
        let frames: Vec<Result<Frame<Bytes>, BoxError>> = vec![Err("boom".into())];
        let mut producer = BodyProducer::new(StreamBody::new(stream::iter(frames)));
        assert_eq!(producer.current().unwrap_err().to_string(), "boom");
    }

    #[test]
    fn iter_producer_walks_values() {
        let mut producer = IterProducer::<_, ()>::new(vec![
            Yielded::Chunk(Bytes::from_static(b"a")),
            Yielded::Invalid("integer"),
        ]);

        assert!(matches!(producer.current().unwrap(), Some(Yielded::Chunk(_))));
        producer.advance().unwrap();
        assert!(matches!(producer.current().unwrap(), Some(Yielded::Invalid("integer"))));
        producer.advance().unwrap();
        assert!(producer.current().unwrap().is_none());
        assert!(producer.throw("nope".into()).is_err());
    }
}
