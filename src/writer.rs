//! The response interface shared by transports and the compression wrapper.

use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use std::future::{Future, poll_fn};
use std::io;
use std::task::{Context, Poll};

/// Result of handing bytes to a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    /// The bytes were taken and more may follow right away.
    Accepted,
    /// The bytes were taken, but the downstream buffer is saturated. Wait for
    /// [`ResponseWriter::drained`] before writing more.
    Full,
    /// The response is no longer writable; the bytes were discarded.
    Closed,
}

impl WriteStatus {
    /// Returns `true` if the caller may keep writing without waiting.
    pub fn is_accepted(self) -> bool {
        self == WriteStatus::Accepted
    }

    /// Returns `true` if the response can no longer be written to.
    pub fn is_closed(self) -> bool {
        self == WriteStatus::Closed
    }
}

/// An outgoing HTTP response that is written incrementally.
///
/// Headers may be changed until they are sent, which happens no later than
/// the first byte reaching the client. `write` never blocks: backpressure is
/// reported through [`WriteStatus::Full`] and released through
/// [`poll_drain`](ResponseWriter::poll_drain).
///
/// Writing to an ended or closed response is not an error; such calls return
/// [`WriteStatus::Closed`].
pub trait ResponseWriter {
    /// Returns the response status.
    fn status(&self) -> StatusCode;

    /// Sets the response status.
    fn set_status(&mut self, status: StatusCode);

    /// Returns the response headers.
    fn headers(&self) -> &HeaderMap;

    /// Returns the response headers for modification.
    fn headers_mut(&mut self) -> &mut HeaderMap;

    /// Returns `true` once the head has been handed to the client.
    fn headers_sent(&self) -> bool;

    /// Writes a chunk of the body.
    fn write(&mut self, chunk: Bytes) -> WriteStatus;

    /// Pushes out anything buffered along the way.
    fn flush(&mut self);

    /// Finishes the body.
    ///
    /// Ending twice is harmless; the second call returns
    /// [`WriteStatus::Closed`].
    fn end(&mut self) -> WriteStatus;

    /// Resolves once a write that returned [`WriteStatus::Full`] may be
    /// followed by more writes.
    ///
    /// Ready immediately when nothing is waiting to drain.
    fn poll_drain(&mut self, cx: &mut Context<'_>) -> Poll<()>;

    /// Resolves if the client goes away before the body is complete.
    fn poll_closed(&mut self, cx: &mut Context<'_>) -> Poll<()>;

    /// Returns `true` if the client went away before the body was complete.
    fn is_closed(&self) -> bool;

    /// Tears the response down with an error.
    fn abort(&mut self, error: io::Error);

    /// Writes a last chunk and finishes the body.
    fn end_with(&mut self, chunk: Bytes) -> WriteStatus {
        if self.write(chunk).is_closed() {
            return WriteStatus::Closed;
        }
        self.end()
    }

    /// Waits until the response can take more writes.
    fn drained(&mut self) -> impl Future<Output = ()> + '_
    where
        Self: Sized,
    {
        poll_fn(move |cx| self.poll_drain(cx))
    }

    /// Waits until the client goes away.
    fn closed(&mut self) -> impl Future<Output = ()> + '_
    where
        Self: Sized,
    {
        poll_fn(move |cx| self.poll_closed(cx))
    }
}
