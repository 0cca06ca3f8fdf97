use crate::channel::Receiver;
use bytes::Bytes;
use http_body::{Body, Frame};
use std::error::Error as StdError;
use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

/// A response body fed by a [`ChannelWriter`](crate::ChannelWriter).
///
/// Polling the body also polls the handler that is still writing it, so no
/// executor is needed to keep the response moving. Dropping the body before
/// the end closes the writer.
pub struct ChannelBody<F> {
    handler: Option<Pin<Box<F>>>,
    receiver: Receiver,
}

impl<F> ChannelBody<F> {
    pub(crate) fn new(handler: Option<Pin<Box<F>>>, receiver: Receiver) -> Self {
        Self { handler, receiver }
    }

    /// Number of bytes written by the handler but not yet polled.
    pub fn buffered(&self) -> usize {
        self.receiver.buffered()
    }
}

impl<F> fmt::Debug for ChannelBody<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelBody")
            .field("handler_running", &self.handler.is_some())
            .field("buffered", &self.receiver.buffered())
            .finish()
    }
}

impl<F, E> Body for ChannelBody<F>
where
    F: Future<Output = Result<(), E>>,
    E: Into<Box<dyn StdError + Send + Sync>>,
{
    type Data = Bytes;
    type Error = io::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = &mut *self;

        if let Some(handler) = this.handler.as_mut() {
            if let Poll::Ready(result) = handler.as_mut().poll(cx) {
                this.handler = None;
                if let Err(e) = result {
                    return Poll::Ready(Some(Err(io::Error::other(e))));
                }
            }
        }

        match ready!(this.receiver.poll_data(cx)) {
            Some(Ok(chunk)) => Poll::Ready(Some(Ok(Frame::data(chunk)))),
            Some(Err(e)) => Poll::Ready(Some(Err(e))),
            None => Poll::Ready(None),
        }
    }

    fn is_end_stream(&self) -> bool {
        self.handler.is_none() && self.receiver.is_end_stream()
    }
}
