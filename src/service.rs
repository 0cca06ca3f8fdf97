use crate::filter::RequestHead;
use crate::interceptor::CompressionWriter;
use crate::options::Options;
use crate::writer::ResponseWriter;
use http::Request;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::Service;

/// A Tower service that hands the inner service a compressing response writer.
///
/// The wrapped service is called with the request and a
/// [`CompressionWriter`] in place of the original writer `W`.
#[derive(Debug, Clone)]
pub struct CompressionService<S> {
    inner: S,
    options: Arc<Options>,
}

impl<S> CompressionService<S> {
    /// Creates a new compression service wrapping the given inner service.
    pub fn new(inner: S, options: Arc<Options>) -> Self {
        Self { inner, options }
    }

    /// Returns the configuration responses are compressed with.
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Returns a reference to the inner service.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Returns a mutable reference to the inner service.
    pub fn inner_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    /// Consumes this service, returning the inner service.
    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S, ReqBody, W> Service<(Request<ReqBody>, W)> for CompressionService<S>
where
    W: ResponseWriter,
    S: Service<(Request<ReqBody>, CompressionWriter<W>)>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, (req, writer): (Request<ReqBody>, W)) -> Self::Future {
        // Only the request head is needed to decide later
        let head = RequestHead::from_request(&req);
        let writer = CompressionWriter::new(writer, head, Arc::clone(&self.options));
        self.inner.call((req, writer))
    }
}
