//! An in-memory response transport.
//!
//! [`channel`] returns a [`ChannelWriter`], the application-facing end that
//! implements [`ResponseWriter`], and a [`Receiver`] that hands the committed
//! head and body chunks to the server. The writer buffers up to a high-water
//! mark before reporting [`WriteStatus::Full`]; the drain signal fires once the
//! server has taken everything.

use crate::writer::{ResponseWriter, WriteStatus};
use bytes::Bytes;
use http::response::Parts;
use http::{HeaderMap, Response, StatusCode};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

/// Default buffered byte count above which writes report backpressure.
pub const DEFAULT_HIGH_WATER_MARK: usize = 16 * 1024;

/// Creates a connected writer/receiver pair.
pub fn channel(high_water_mark: usize) -> (ChannelWriter, Receiver) {
    let shared = Arc::new(Mutex::new(Shared::default()));
    let writer = ChannelWriter {
        shared: Arc::clone(&shared),
        status: StatusCode::OK,
        headers: HeaderMap::new(),
        committed: false,
        ended: false,
        high_water_mark,
    };
    (writer, Receiver { shared })
}

#[derive(Default)]
struct Shared {
    head: Option<Parts>,
    chunks: VecDeque<Bytes>,
    buffered: usize,
    ended: bool,
    closed: bool,
    error: Option<io::Error>,
    needs_drain: bool,
    head_waker: Option<Waker>,
    body_waker: Option<Waker>,
    drain_waker: Option<Waker>,
    close_waker: Option<Waker>,
}

impl Shared {
    fn is_finished(&self) -> bool {
        self.ended && self.chunks.is_empty() && self.error.is_none()
    }
}

fn wake(slot: &mut Option<Waker>) {
    if let Some(waker) = slot.take() {
        waker.wake();
    }
}

fn register(slot: &mut Option<Waker>, cx: &Context<'_>) {
    if !slot.as_ref().is_some_and(|w| w.will_wake(cx.waker())) {
        *slot = Some(cx.waker().clone());
    }
}

/// Application-facing end of a [`channel`].
///
/// The head is committed on the first write, flush or end. Dropping the
/// writer ends the response.
pub struct ChannelWriter {
    shared: Arc<Mutex<Shared>>,
    status: StatusCode,
    headers: HeaderMap,
    committed: bool,
    ended: bool,
    high_water_mark: usize,
}

impl ChannelWriter {
    fn commit(&mut self) {
        if self.committed {
            return;
        }
        self.committed = true;

        let (mut parts, ()) = Response::new(()).into_parts();
        parts.status = self.status;
        parts.headers = self.headers.clone();

        let mut shared = self.shared.lock();
        shared.head = Some(parts);
        wake(&mut shared.head_waker);
    }
}

impl ResponseWriter for ChannelWriter {
    fn status(&self) -> StatusCode {
        self.status
    }

    fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn headers_sent(&self) -> bool {
        self.committed
    }

    fn write(&mut self, chunk: Bytes) -> WriteStatus {
        if self.ended || self.is_closed() {
            return WriteStatus::Closed;
        }
        self.commit();

        let mut shared = self.shared.lock();
        if !chunk.is_empty() {
            shared.buffered += chunk.len();
            shared.chunks.push_back(chunk);
            wake(&mut shared.body_waker);
        }

        if shared.buffered < self.high_water_mark {
            WriteStatus::Accepted
        } else {
            shared.needs_drain = true;
            WriteStatus::Full
        }
    }

    fn flush(&mut self) {
        if !self.ended {
            self.commit();
        }
    }

    fn end(&mut self) -> WriteStatus {
        if self.ended {
            return WriteStatus::Closed;
        }
        self.commit();
        self.ended = true;

        let mut shared = self.shared.lock();
        shared.ended = true;
        wake(&mut shared.body_waker);
        if shared.closed {
            WriteStatus::Closed
        } else {
            WriteStatus::Accepted
        }
    }

    fn poll_drain(&mut self, cx: &mut Context<'_>) -> Poll<()> {
        let mut shared = self.shared.lock();
        if !shared.needs_drain || shared.closed || shared.ended {
            return Poll::Ready(());
        }
        if shared.buffered == 0 {
            shared.needs_drain = false;
            return Poll::Ready(());
        }
        register(&mut shared.drain_waker, cx);
        Poll::Pending
    }

    fn poll_closed(&mut self, cx: &mut Context<'_>) -> Poll<()> {
        let mut shared = self.shared.lock();
        if shared.closed {
            return Poll::Ready(());
        }
        register(&mut shared.close_waker, cx);
        Poll::Pending
    }

    fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    fn abort(&mut self, error: io::Error) {
        if self.ended {
            return;
        }
        self.commit();
        self.ended = true;

        let mut shared = self.shared.lock();
        shared.error = Some(error);
        shared.ended = true;
        shared.chunks.clear();
        shared.buffered = 0;
        wake(&mut shared.body_waker);
        wake(&mut shared.drain_waker);
    }
}

impl Drop for ChannelWriter {
    fn drop(&mut self) {
        self.end();
    }
}

/// Server-facing end of a [`channel`].
///
/// Dropping the receiver before the body is complete closes the channel, which
/// the writer observes through [`ResponseWriter::poll_closed`].
pub struct Receiver {
    shared: Arc<Mutex<Shared>>,
}

impl Receiver {
    /// Resolves with the response head once the writer commits it.
    ///
    /// The head is handed out only once.
    pub fn poll_head(&mut self, cx: &mut Context<'_>) -> Poll<Parts> {
        let mut shared = self.shared.lock();
        match shared.head.take() {
            Some(parts) => Poll::Ready(parts),
            None => {
                register(&mut shared.head_waker, cx);
                Poll::Pending
            }
        }
    }

    /// Resolves with the next body chunk, an error, or `None` at the end.
    pub fn poll_data(&mut self, cx: &mut Context<'_>) -> Poll<Option<io::Result<Bytes>>> {
        let mut shared = self.shared.lock();
        if let Some(error) = shared.error.take() {
            return Poll::Ready(Some(Err(error)));
        }
        if let Some(chunk) = shared.chunks.pop_front() {
            shared.buffered -= chunk.len();
            if shared.buffered == 0 {
                wake(&mut shared.drain_waker);
            }
            return Poll::Ready(Some(Ok(chunk)));
        }
        if shared.ended {
            return Poll::Ready(None);
        }
        register(&mut shared.body_waker, cx);
        Poll::Pending
    }

    /// Returns `true` once every chunk has been taken and the writer ended.
    pub fn is_end_stream(&self) -> bool {
        self.shared.lock().is_finished()
    }

    /// Number of bytes written but not yet taken.
    pub fn buffered(&self) -> usize {
        self.shared.lock().buffered
    }

    fn close(&self) {
        let mut shared = self.shared.lock();
        if shared.closed || shared.is_finished() {
            return;
        }
        shared.closed = true;
        shared.chunks.clear();
        shared.buffered = 0;
        wake(&mut shared.drain_waker);
        wake(&mut shared.close_waker);
    }
}

impl Drop for Receiver {
    fn drop(&mut self) {
        self.close();
    }
}
