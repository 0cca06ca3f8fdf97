use crate::body::ChannelBody;
use crate::channel::{ChannelWriter, DEFAULT_HIGH_WATER_MARK, channel};
use crate::future::ResponseFuture;
use http::{Request, Response};
use std::task::{Context, Poll};
use tower::Service;

/// Adapts a writer-style handler into an ordinary `Request -> Response`
/// service.
///
/// The handler is called with the request and a [`ChannelWriter`]. The
/// returned response resolves as soon as the handler commits its head, and its
/// body streams whatever the handler writes afterwards.
#[derive(Debug, Clone)]
pub struct Dispatch<S> {
    inner: S,
    high_water_mark: usize,
}

impl<S> Dispatch<S> {
    /// Wraps a handler with the default high-water mark.
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
        }
    }

    /// Sets how many unread bytes a response buffers before writes report
    /// [`WriteStatus::Full`](crate::WriteStatus::Full).
    pub fn high_water_mark(mut self, bytes: usize) -> Self {
        self.high_water_mark = bytes;
        self
    }

    /// Returns a reference to the inner service.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Consumes this service, returning the inner service.
    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S, ReqBody> Service<Request<ReqBody>> for Dispatch<S>
where
    S: Service<(Request<ReqBody>, ChannelWriter), Response = ()>,
{
    type Response = Response<ChannelBody<S::Future>>;
    type Error = S::Error;
    type Future = ResponseFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let (writer, receiver) = channel(self.high_water_mark);
        tracing::trace!(high_water_mark = self.high_water_mark, "dispatching request");
        ResponseFuture::new(self.inner.call((req, writer)), receiver)
    }
}
