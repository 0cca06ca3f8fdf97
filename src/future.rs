use crate::body::ChannelBody;
use crate::channel::Receiver;
use http::Response;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Future for [`Dispatch`](crate::Dispatch) responses.
///
/// Drives the handler until it commits the response head. The handler keeps
/// running inside the returned [`ChannelBody`].
pub struct ResponseFuture<F> {
    handler: Option<Pin<Box<F>>>,
    receiver: Option<Receiver>,
}

impl<F> ResponseFuture<F> {
    pub(crate) fn new(handler: F, receiver: Receiver) -> Self {
        Self {
            handler: Some(Box::pin(handler)),
            receiver: Some(receiver),
        }
    }
}

impl<F> fmt::Debug for ResponseFuture<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseFuture")
            .field("handler_running", &self.handler.is_some())
            .field("head_received", &self.receiver.is_none())
            .finish()
    }
}

impl<F, E> Future for ResponseFuture<F>
where
    F: Future<Output = Result<(), E>>,
{
    type Output = Result<Response<ChannelBody<F>>, E>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;

        if let Some(handler) = this.handler.as_mut() {
            if let Poll::Ready(result) = handler.as_mut().poll(cx) {
                this.handler = None;
                // A handler that fails before writing anything fails the request
                if let Err(e) = result {
                    this.receiver = None;
                    return Poll::Ready(Err(e));
                }
            }
        }

        let Some(mut receiver) = this.receiver.take() else {
            panic!("`ResponseFuture` polled after completion");
        };
        match receiver.poll_head(cx) {
            Poll::Pending => {
                this.receiver = Some(receiver);
                Poll::Pending
            }
            Poll::Ready(parts) => {
                let body = ChannelBody::new(this.handler.take(), receiver);
                Poll::Ready(Ok(Response::from_parts(parts, body)))
            }
        }
    }
}
