//! The response interceptor.
//!
//! [`CompressionWriter`] wraps the server's [`ResponseWriter`] and decides,
//! once per response, whether the body is compressed. Until that decision the
//! body is held back so that no byte reaches the client before the headers
//! are final:
//!
//! ```text
//! Buffering ──(threshold reached or end)──▶ PassThrough ─┐
//!     │                                                   ├──(end)──▶ Ended
//!     └───────────────────────────────────▶ Compressing ─┘
//! ```
//!
//! `Ended` is also entered directly when the client goes away or a compressor
//! fails.

use crate::codec::Encoding;
use crate::compressor::Compressor;
use crate::error::CompressionError;
use crate::filter::{self, RequestHead};
use crate::negotiate::negotiate;
use crate::options::Options;
use crate::writer::{ResponseWriter, WriteStatus};
use bytes::{Bytes, BytesMut};
use http::header::{self, HeaderValue};
use http::{HeaderMap, Method, StatusCode};
use std::io;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

/// Where a response is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Body bytes are held back until the threshold or the end is reached.
    Buffering,
    /// Bytes go to the transport unchanged.
    PassThrough,
    /// Bytes go through a compressor.
    Compressing,
    /// Nothing more reaches the transport.
    Ended,
}

/// Per-response interception state.
#[derive(Debug)]
pub struct InterceptorState {
    phase: Phase,
    pending: Vec<Bytes>,
    pending_len: usize,
    encoding: Option<Encoding>,
    headers: Option<HeaderMap>,
}

impl InterceptorState {
    fn new() -> Self {
        Self {
            phase: Phase::Buffering,
            pending: Vec::new(),
            pending_len: 0,
            encoding: None,
            headers: None,
        }
    }

    /// Returns the current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Returns the encoding chosen for the response, if it is compressed.
    pub fn encoding(&self) -> Option<Encoding> {
        self.encoding
    }

    /// Returns the response headers as they stood when the decision was made.
    pub fn headers(&self) -> Option<&HeaderMap> {
        self.headers.as_ref()
    }

    /// Returns the number of bytes held back while buffering.
    pub fn pending_len(&self) -> usize {
        self.pending_len
    }

    fn push(&mut self, chunk: Bytes) {
        self.pending_len += chunk.len();
        self.pending.push(chunk);
    }

    /// Leaves `Buffering`, handing back the held chunks in write order.
    fn decide(
        &mut self,
        phase: Phase,
        encoding: Option<Encoding>,
        headers: HeaderMap,
    ) -> Vec<Bytes> {
        debug_assert_eq!(self.phase, Phase::Buffering);
        debug_assert!(matches!(phase, Phase::PassThrough | Phase::Compressing));
        self.phase = phase;
        self.encoding = encoding;
        self.headers = Some(headers);
        self.pending_len = 0;
        std::mem::take(&mut self.pending)
    }

    fn end(&mut self) {
        self.phase = Phase::Ended;
        self.pending.clear();
        self.pending_len = 0;
    }
}

/// A response writer that compresses the body when the client and the
/// response allow it.
///
/// Created by [`CompressionService`](crate::CompressionService) for every
/// request. Dropping a writer that has not ended ends it.
pub struct CompressionWriter<W: ResponseWriter> {
    inner: W,
    request: RequestHead,
    options: Arc<Options>,
    state: InterceptorState,
    compressor: Option<Compressor>,
    error: Option<CompressionError>,
    close_seen: bool,
    awaiting_drain: bool,
}

impl<W: ResponseWriter> CompressionWriter<W> {
    /// Wraps `inner` for the request described by `request`.
    pub fn new(inner: W, request: RequestHead, options: Arc<Options>) -> Self {
        Self {
            inner,
            request,
            options,
            state: InterceptorState::new(),
            compressor: None,
            error: None,
            close_seen: false,
            awaiting_drain: false,
        }
    }

    /// Returns the interception state.
    pub fn state(&self) -> &InterceptorState {
        &self.state
    }

    /// Returns a reference to the wrapped writer.
    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    /// Takes the compression error that ended the response, if any.
    ///
    /// The error is handed out once.
    pub fn take_error(&mut self) -> Option<CompressionError> {
        self.error.take()
    }

    /// Makes the decision. `final_len` is known when called from `end`.
    fn decide(&mut self, final_len: Option<usize>) -> WriteStatus {
        let eligible = filter::is_eligible(
            &self.request,
            self.inner.headers(),
            &*self.options.filter,
        );

        let encoding = if eligible {
            filter::add_vary_accept_encoding(self.inner.headers_mut());
            self.choose_encoding(final_len)
        } else {
            None
        };

        match encoding {
            Some(encoding) => self.start_compressing(encoding),
            None => self.start_pass_through(final_len),
        }
    }

    fn choose_encoding(&self, final_len: Option<usize>) -> Option<Encoding> {
        let threshold = self.options.threshold;

        if final_len == Some(0) {
            tracing::trace!("not compressing: empty body");
            return None;
        }
        if final_len.is_some_and(|len| len < threshold) {
            tracing::trace!(threshold, "not compressing: body below threshold");
            return None;
        }
        if filter::declared_content_length(self.inner.headers())
            .is_some_and(|len| len == 0 || len < threshold)
        {
            tracing::trace!(threshold, "not compressing: content-length below threshold");
            return None;
        }

        let encoding = negotiate(
            self.request.accept_encoding(),
            self.options.codecs.supported(),
        );
        if encoding.is_none() {
            tracing::trace!("not compressing: no acceptable encoding");
        }
        encoding
    }

    /// Whether framing headers may be added for this response.
    fn may_frame_body(&self) -> bool {
        let status = self.inner.status();
        *self.request.method() != Method::HEAD
            && !status.is_informational()
            && status != StatusCode::NO_CONTENT
            && status != StatusCode::NOT_MODIFIED
    }

    fn start_pass_through(&mut self, final_len: Option<usize>) -> WriteStatus {
        let may_frame = self.may_frame_body();
        let headers = self.inner.headers_mut();
        if may_frame && !headers.contains_key(header::CONTENT_LENGTH) {
            match final_len {
                Some(len) if !headers.contains_key(header::TRANSFER_ENCODING) => {
                    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
                }
                Some(_) => {}
                None => {
                    headers.insert(
                        header::TRANSFER_ENCODING,
                        HeaderValue::from_static("chunked"),
                    );
                }
            }
        }

        let snapshot = self.inner.headers().clone();
        let pending = self.state.decide(Phase::PassThrough, None, snapshot);

        let mut status = WriteStatus::Accepted;
        for chunk in pending {
            status = self.inner.write(chunk);
            if status.is_closed() {
                self.on_closed();
                break;
            }
        }
        status
    }

    fn start_compressing(&mut self, encoding: Encoding) -> WriteStatus {
        let settings = self.options.encoder_settings(encoding);
        let encoder = match self.options.codecs.encoder(encoding, &settings) {
            Ok(encoder) => encoder,
            Err(source) => return self.fail(CompressionError::Codec { encoding, source }),
        };
        let always_flush = filter::wants_immediate_flush(self.inner.headers());

        let headers = self.inner.headers_mut();
        headers.insert(
            header::CONTENT_ENCODING,
            HeaderValue::from_static(encoding.content_encoding()),
        );
        // Compressed size is unknown, and ranges no longer line up
        headers.remove(header::CONTENT_LENGTH);
        headers.remove(header::ACCEPT_RANGES);
        headers.insert(
            header::TRANSFER_ENCODING,
            HeaderValue::from_static("chunked"),
        );

        tracing::debug!(
            encoding = %encoding,
            threshold = self.options.threshold,
            always_flush,
            "compressing response"
        );

        let snapshot = self.inner.headers().clone();
        let pending = self
            .state
            .decide(Phase::Compressing, Some(encoding), snapshot);
        let mut compressor = Compressor::new(encoding, encoder, always_flush);

        let mut output = BytesMut::new();
        for chunk in pending {
            match compressor.encode(&chunk) {
                Ok(compressed) => output.extend_from_slice(&compressed),
                Err(e) => return self.fail(e),
            }
        }
        self.compressor = Some(compressor);
        self.forward(output.freeze())
    }

    fn compress(&mut self, chunk: &[u8]) -> WriteStatus {
        let Some(compressor) = self.compressor.as_mut() else {
            return WriteStatus::Closed;
        };
        match compressor.encode(chunk) {
            Ok(output) => self.forward(output),
            Err(e) => self.fail(e),
        }
    }

    /// Hands compressor output to the transport.
    ///
    /// A write that produced no output still reports `Full` until the
    /// transport has drained.
    fn forward(&mut self, output: Bytes) -> WriteStatus {
        let status = if output.is_empty() {
            if self.inner.is_closed() {
                WriteStatus::Closed
            } else if self.awaiting_drain {
                WriteStatus::Full
            } else {
                WriteStatus::Accepted
            }
        } else {
            let status = self.inner.write(output);
            self.awaiting_drain = status == WriteStatus::Full;
            status
        };
        if status.is_closed() {
            self.on_closed();
        }
        status
    }

    fn fail(&mut self, error: CompressionError) -> WriteStatus {
        tracing::warn!(
            encoding = %error.encoding(),
            error = %error,
            "response compression failed"
        );
        self.compressor = None;
        self.state.end();
        self.inner.abort(error.to_io());
        if self.error.is_none() {
            self.error = Some(error);
        }
        WriteStatus::Closed
    }

    fn on_closed(&mut self) {
        if self.close_seen {
            return;
        }
        self.close_seen = true;
        if self.state.phase != Phase::Ended {
            tracing::debug!(phase = ?self.state.phase, "client went away before the response ended");
        }
        self.compressor = None;
        self.state.end();
    }
}

impl<W: ResponseWriter> ResponseWriter for CompressionWriter<W> {
    fn status(&self) -> StatusCode {
        self.inner.status()
    }

    fn set_status(&mut self, status: StatusCode) {
        self.inner.set_status(status);
    }

    fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        self.inner.headers_mut()
    }

    fn headers_sent(&self) -> bool {
        self.inner.headers_sent()
    }

    fn write(&mut self, chunk: Bytes) -> WriteStatus {
        match self.state.phase {
            Phase::Ended => WriteStatus::Closed,
            Phase::Buffering => {
                if self.inner.is_closed() {
                    self.on_closed();
                    return WriteStatus::Closed;
                }
                if chunk.is_empty() {
                    return WriteStatus::Accepted;
                }
                self.state.push(chunk);
                if self.state.pending_len < self.options.threshold {
                    return WriteStatus::Accepted;
                }
                self.decide(None)
            }
            Phase::PassThrough => {
                let status = self.inner.write(chunk);
                if status.is_closed() {
                    self.on_closed();
                }
                status
            }
            Phase::Compressing => self.compress(&chunk),
        }
    }

    fn flush(&mut self) {
        match self.state.phase {
            Phase::Buffering | Phase::Ended => {}
            Phase::PassThrough => self.inner.flush(),
            Phase::Compressing => {
                let Some(compressor) = self.compressor.as_mut() else {
                    return;
                };
                match compressor.flush() {
                    Ok(output) => {
                        if !self.forward(output).is_closed() {
                            self.inner.flush();
                        }
                    }
                    Err(e) => {
                        self.fail(e);
                    }
                }
            }
        }
    }

    fn end(&mut self) -> WriteStatus {
        if self.state.phase == Phase::Buffering {
            if self.inner.is_closed() {
                self.on_closed();
                return WriteStatus::Closed;
            }
            let len = self.state.pending_len;
            self.decide(Some(len));
        }

        match self.state.phase {
            // decide() never leaves the state in Buffering
            Phase::Buffering | Phase::Ended => WriteStatus::Closed,
            Phase::PassThrough => {
                self.state.end();
                self.inner.end()
            }
            Phase::Compressing => {
                let Some(mut compressor) = self.compressor.take() else {
                    self.state.end();
                    return self.inner.end();
                };
                match compressor.finish() {
                    Ok(output) => {
                        if !output.is_empty() && self.inner.write(output).is_closed() {
                            self.on_closed();
                            return WriteStatus::Closed;
                        }
                        tracing::trace!(encoding = %compressor.encoding(), "compressed response ended");
                        self.state.end();
                        self.inner.end()
                    }
                    Err(e) => self.fail(e),
                }
            }
        }
    }

    fn end_with(&mut self, chunk: Bytes) -> WriteStatus {
        // While buffering, the final chunk counts towards a known length
        if self.state.phase == Phase::Buffering && !self.inner.is_closed() {
            if !chunk.is_empty() {
                self.state.push(chunk);
            }
            return self.end();
        }
        if self.write(chunk).is_closed() {
            return WriteStatus::Closed;
        }
        self.end()
    }

    fn poll_drain(&mut self, cx: &mut Context<'_>) -> Poll<()> {
        match self.state.phase {
            Phase::Buffering | Phase::Ended => Poll::Ready(()),
            Phase::PassThrough | Phase::Compressing => {
                ready!(self.inner.poll_drain(cx));
                self.awaiting_drain = false;
                Poll::Ready(())
            }
        }
    }

    fn poll_closed(&mut self, cx: &mut Context<'_>) -> Poll<()> {
        ready!(self.inner.poll_closed(cx));
        self.on_closed();
        Poll::Ready(())
    }

    fn is_closed(&self) -> bool {
        self.close_seen || self.inner.is_closed()
    }

    fn abort(&mut self, error: io::Error) {
        self.compressor = None;
        self.state.end();
        self.inner.abort(error);
    }
}

impl<W: ResponseWriter> Drop for CompressionWriter<W> {
    fn drop(&mut self) {
        if self.state.phase != Phase::Ended {
            self.end();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{DEFAULT_HIGH_WATER_MARK, channel};
    use crate::codec::{CodecFactory, EncoderSettings};
    use compression_codecs::EncodeV2;
    use http::header::{
        ACCEPT_ENCODING, ACCEPT_RANGES, CACHE_CONTROL, CONTENT_ENCODING, CONTENT_LENGTH,
        CONTENT_TYPE, TRANSFER_ENCODING, VARY,
    };
    use std::io::Read;
    use std::task::Waker;

    /// Records everything the interceptor does to the transport.
    #[derive(Default)]
    struct MockWriter {
        status: StatusCode,
        headers: HeaderMap,
        sent: Option<HeaderMap>,
        chunks: Vec<Bytes>,
        flushes: usize,
        end_calls: usize,
        ended: bool,
        closed: bool,
        aborted: Option<String>,
        full_after: Option<usize>,
    }

    impl MockWriter {
        fn send_head(&mut self) {
            if self.sent.is_none() {
                self.sent = Some(self.headers.clone());
            }
        }

        fn body(&self) -> Vec<u8> {
            self.chunks.iter().flat_map(|c| c.iter().copied()).collect()
        }

        fn sent(&self) -> &HeaderMap {
            self.sent.as_ref().expect("head was not sent")
        }
    }

    impl ResponseWriter for MockWriter {
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
            self.sent.is_some()
        }

        fn write(&mut self, chunk: Bytes) -> WriteStatus {
            if self.ended || self.closed {
                return WriteStatus::Closed;
            }
            self.send_head();
            self.chunks.push(chunk);
            let written: usize = self.chunks.iter().map(Bytes::len).sum();
            match self.full_after {
                Some(limit) if written >= limit => WriteStatus::Full,
                _ => WriteStatus::Accepted,
            }
        }

        fn flush(&mut self) {
            self.send_head();
            self.flushes += 1;
        }

        fn end(&mut self) -> WriteStatus {
            self.end_calls += 1;
            if self.ended || self.closed {
                return WriteStatus::Closed;
            }
            self.send_head();
            self.ended = true;
            WriteStatus::Accepted
        }

        fn poll_drain(&mut self, _cx: &mut Context<'_>) -> Poll<()> {
            Poll::Ready(())
        }

        fn poll_closed(&mut self, _cx: &mut Context<'_>) -> Poll<()> {
            if self.closed {
                Poll::Ready(())
            } else {
                Poll::Pending
            }
        }

        fn is_closed(&self) -> bool {
            self.closed
        }

        fn abort(&mut self, error: io::Error) {
            self.send_head();
            self.ended = true;
            self.aborted = Some(error.to_string());
        }
    }

    struct FailingCodecs;

    impl CodecFactory for FailingCodecs {
        fn supported(&self) -> &[Encoding] {
            &[Encoding::Gzip]
        }

        fn encoder(
            &self,
            _encoding: Encoding,
            _settings: &EncoderSettings,
        ) -> io::Result<Box<dyn EncodeV2 + Send>> {
            Err(io::Error::other("no encoder available"))
        }
    }

    fn options(threshold: usize) -> Options {
        Options::builder().threshold(threshold).build().unwrap()
    }

    fn writer_with(
        method: Method,
        accept: Option<&'static str>,
        options: Options,
    ) -> CompressionWriter<MockWriter> {
        let mut headers = HeaderMap::new();
        if let Some(accept) = accept {
            headers.insert(ACCEPT_ENCODING, HeaderValue::from_static(accept));
        }
        let mut writer = CompressionWriter::new(
            MockWriter::default(),
            RequestHead::new(method, headers),
            Arc::new(options),
        );
        writer
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        writer
    }

    fn writer(accept: Option<&'static str>, threshold: usize) -> CompressionWriter<MockWriter> {
        writer_with(Method::GET, accept, options(threshold))
    }

    #[cfg(feature = "gzip")]
    fn gunzip(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        flate2::read::GzDecoder::new(data)
            .read_to_end(&mut out)
            .unwrap();
        out
    }

    #[test]
    #[cfg(feature = "gzip")]
    fn test_compresses_and_rewrites_headers() {
        let mut w = writer(Some("gzip"), 0);
        w.headers_mut()
            .insert(CONTENT_LENGTH, HeaderValue::from_static("12"));
        w.headers_mut()
            .insert(ACCEPT_RANGES, HeaderValue::from_static("bytes"));

        assert_eq!(
            w.write(Bytes::from_static(b"hello, world")),
            WriteStatus::Accepted
        );
        assert_eq!(w.end(), WriteStatus::Accepted);

        assert_eq!(w.state().phase(), Phase::Ended);
        assert_eq!(w.state().encoding(), Some(Encoding::Gzip));

        let mock = w.get_ref();
        let sent = mock.sent();
        assert_eq!(sent.get(CONTENT_ENCODING).unwrap(), "gzip");
        assert_eq!(sent.get(TRANSFER_ENCODING).unwrap(), "chunked");
        assert_eq!(sent.get(VARY).unwrap(), "accept-encoding");
        assert!(sent.get(CONTENT_LENGTH).is_none());
        assert!(sent.get(ACCEPT_RANGES).is_none());
        assert_eq!(gunzip(&mock.body()), b"hello, world");
    }

    #[test]
    fn test_head_request_not_compressed() {
        let mut w = writer_with(Method::HEAD, Some("gzip, br"), options(0));
        w.write(Bytes::from_static(b"hello, world"));
        w.end();

        let sent = w.get_ref().sent();
        assert!(sent.get(CONTENT_ENCODING).is_none());
        assert!(sent.get(VARY).is_none());
        assert_eq!(w.state().phase(), Phase::Ended);
    }

    #[test]
    fn test_unknown_encoding_passes_through() {
        let mut w = writer(Some("compress, sdch"), 0);
        w.write(Bytes::from_static(b"hello, "));
        w.write(Bytes::from_static(b"world"));
        w.end();

        let mock = w.get_ref();
        assert!(mock.sent().get(CONTENT_ENCODING).is_none());
        assert_eq!(mock.sent().get(VARY).unwrap(), "accept-encoding");
        assert_eq!(mock.body(), b"hello, world");
        assert_eq!(w.state().encoding(), None);
    }

    #[test]
    fn test_existing_content_encoding_kept() {
        let mut w = writer(Some("gzip"), 0);
        w.headers_mut()
            .insert(CONTENT_ENCODING, HeaderValue::from_static("x-custom"));
        w.end_with(Bytes::from_static(b"already encoded"));

        let mock = w.get_ref();
        assert_eq!(mock.sent().get(CONTENT_ENCODING).unwrap(), "x-custom");
        assert!(mock.sent().get(VARY).is_none());
        assert_eq!(mock.body(), b"already encoded");
    }

    #[test]
    fn test_no_transform_not_compressed() {
        let mut w = writer(Some("gzip"), 0);
        w.headers_mut()
            .insert(CACHE_CONTROL, HeaderValue::from_static("no-transform"));
        w.end_with(Bytes::from_static(b"hello, world"));

        let sent = w.get_ref().sent();
        assert!(sent.get(CONTENT_ENCODING).is_none());
        assert!(sent.get(VARY).is_none());
    }

    #[test]
    fn test_filtered_content_type_has_no_vary() {
        let mut w = writer(Some("gzip"), 0);
        w.headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("image/png"));
        w.end_with(Bytes::from_static(b"\x89PNG"));

        let sent = w.get_ref().sent();
        assert!(sent.get(CONTENT_ENCODING).is_none());
        assert!(sent.get(VARY).is_none());
    }

    #[test]
    fn test_no_accept_encoding_still_varies() {
        let mut w = writer(None, 1000);
        w.write(Bytes::from_static(b"hello, world"));
        w.end();

        let mock = w.get_ref();
        assert_eq!(mock.sent().get(VARY).unwrap(), "accept-encoding");
        assert!(mock.sent().get(CONTENT_ENCODING).is_none());
        assert_eq!(mock.body(), b"hello, world");
    }

    #[test]
    fn test_empty_body_never_compressed() {
        let mut w = writer(Some("gzip"), 0);
        assert_eq!(w.end(), WriteStatus::Accepted);

        let sent = w.get_ref().sent();
        assert!(sent.get(CONTENT_ENCODING).is_none());
        assert_eq!(sent.get(CONTENT_LENGTH).unwrap(), "0");
        assert_eq!(sent.get(VARY).unwrap(), "accept-encoding");
    }

    #[test]
    fn test_buffers_below_threshold() {
        let mut w = writer(Some("gzip"), 16);
        assert_eq!(w.write(Bytes::from_static(b"hello")), WriteStatus::Accepted);
        assert_eq!(w.write(Bytes::new()), WriteStatus::Accepted);
        assert_eq!(w.write(Bytes::from_static(b", ")), WriteStatus::Accepted);

        assert_eq!(w.state().phase(), Phase::Buffering);
        assert_eq!(w.state().pending_len(), 7);
        assert!(!w.headers_sent());
        assert!(w.get_ref().chunks.is_empty());

        // flushing while buffering does not force the decision
        w.flush();
        assert_eq!(w.state().phase(), Phase::Buffering);
        assert_eq!(w.get_ref().flushes, 0);
    }

    #[test]
    fn test_end_below_threshold_keeps_length() {
        let mut w = writer(Some("gzip"), 1024);
        w.write(Bytes::from_static(b"hello, "));
        w.write(Bytes::from_static(b"world"));
        w.end();

        let mock = w.get_ref();
        assert_eq!(w.state().phase(), Phase::Ended);
        assert_eq!(mock.sent().get(CONTENT_LENGTH).unwrap(), "12");
        assert!(mock.sent().get(TRANSFER_ENCODING).is_none());
        assert!(mock.sent().get(CONTENT_ENCODING).is_none());
        assert_eq!(
            mock.chunks,
            vec![Bytes::from_static(b"hello, "), Bytes::from_static(b"world")]
        );
    }

    #[test]
    #[cfg(feature = "gzip")]
    fn test_threshold_crossing_decides_once() {
        let mut w = writer(Some("gzip"), 8);
        w.write(Bytes::from_static(b"abcd"));
        assert_eq!(w.state().phase(), Phase::Buffering);
        w.write(Bytes::from_static(b"efgh"));
        assert_eq!(w.state().phase(), Phase::Compressing);
        assert_eq!(w.state().pending_len(), 0);
        assert!(w.headers_sent());

        // headers changed after the decision do not undo it
        w.headers_mut().remove(CONTENT_ENCODING);
        w.write(Bytes::from_static(b"ijkl"));
        assert_eq!(w.state().encoding(), Some(Encoding::Gzip));
        assert_eq!(
            w.state().headers().unwrap().get(CONTENT_ENCODING).unwrap(),
            "gzip"
        );
        w.end();

        assert_eq!(gunzip(&w.get_ref().body()), b"abcdefghijkl");
    }

    #[test]
    fn test_unbounded_pass_through_is_chunked() {
        let mut w = writer(None, 4);
        w.write(Bytes::from_static(b"abcdef"));
        assert_eq!(w.state().phase(), Phase::PassThrough);

        let sent = w.get_ref().sent();
        assert_eq!(sent.get(TRANSFER_ENCODING).unwrap(), "chunked");
        assert!(sent.get(CONTENT_LENGTH).is_none());
    }

    #[test]
    fn test_declared_length_below_threshold() {
        let mut w = writer(Some("gzip"), 4);
        w.headers_mut()
            .insert(CONTENT_LENGTH, HeaderValue::from_static("2"));
        w.write(Bytes::from_static(b"abcdef"));

        let sent = w.get_ref().sent();
        assert!(sent.get(CONTENT_ENCODING).is_none());
        assert_eq!(sent.get(CONTENT_LENGTH).unwrap(), "2");
    }

    #[test]
    fn test_pass_through_returns_transport_status() {
        let mut w = writer(None, 0);
        w.inner.full_after = Some(4);
        assert_eq!(w.write(Bytes::from_static(b"ab")), WriteStatus::Accepted);
        assert_eq!(w.write(Bytes::from_static(b"cd")), WriteStatus::Full);
    }

    #[test]
    #[cfg(feature = "gzip")]
    fn test_compressing_reports_full_until_drained() {
        let (inner, mut receiver) = channel(1024);
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("gzip"));
        let mut w = CompressionWriter::new(
            inner,
            RequestHead::new(Method::GET, headers),
            Arc::new(options(0)),
        );
        w.headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));

        // xorshift noise so the encoder emits output right away
        let mut state: u32 = 0x9e37_79b9;
        let noise: Vec<u8> = (0..64 * 1024)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                state as u8
            })
            .collect();

        assert_eq!(w.write(Bytes::from(noise)), WriteStatus::Full);
        // the encoder keeps this byte, but the transport is still over its limit
        assert_eq!(w.write(Bytes::from_static(b"x")), WriteStatus::Full);

        let mut cx = Context::from_waker(Waker::noop());
        assert!(w.poll_drain(&mut cx).is_pending());
        while let Poll::Ready(Some(Ok(_))) = receiver.poll_data(&mut cx) {}
        assert!(w.poll_drain(&mut cx).is_ready());
        assert_eq!(w.write(Bytes::from_static(b"y")), WriteStatus::Accepted);
    }

    #[test]
    #[cfg(feature = "gzip")]
    fn test_close_during_final_write_is_seen() {
        let (inner, receiver) = channel(DEFAULT_HIGH_WATER_MARK);
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("gzip"));
        let mut w = CompressionWriter::new(
            inner,
            RequestHead::new(Method::GET, headers),
            Arc::new(options(0)),
        );
        w.headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        w.write(Bytes::from_static(b"hello"));
        assert_eq!(w.state().phase(), Phase::Compressing);

        drop(receiver);
        // finishing produces the gzip trailer, which hits the closed transport
        assert_eq!(w.end(), WriteStatus::Closed);
        assert!(w.close_seen);
        assert_eq!(w.state().phase(), Phase::Ended);
    }

    #[test]
    fn test_end_twice_is_harmless() {
        let mut w = writer(Some("gzip"), 0);
        w.write(Bytes::from_static(b"hello"));
        assert_eq!(w.end(), WriteStatus::Accepted);
        assert_eq!(w.end(), WriteStatus::Closed);
        assert_eq!(w.write(Bytes::from_static(b"late")), WriteStatus::Closed);
        w.flush();
        assert_eq!(w.get_ref().end_calls, 1);
    }

    #[test]
    fn test_closed_while_buffering() {
        let mut w = writer(Some("gzip"), 1024);
        w.write(Bytes::from_static(b"hello"));
        w.inner.closed = true;

        let mut cx = Context::from_waker(Waker::noop());
        assert!(w.poll_closed(&mut cx).is_ready());
        assert_eq!(w.state().phase(), Phase::Ended);
        assert_eq!(w.state().pending_len(), 0);
        assert!(w.is_closed());

        assert_eq!(w.write(Bytes::from_static(b"more")), WriteStatus::Closed);
        assert_eq!(w.end(), WriteStatus::Closed);
        assert!(w.get_ref().chunks.is_empty());
        assert_eq!(w.get_ref().end_calls, 0);
    }

    #[test]
    #[cfg(feature = "gzip")]
    fn test_closed_while_compressing() {
        let mut w = writer(Some("gzip"), 0);
        w.write(Bytes::from_static(b"hello"));
        w.inner.closed = true;

        assert_eq!(w.write(Bytes::from(vec![b'x'; 64 * 1024])), WriteStatus::Closed);
        assert_eq!(w.state().phase(), Phase::Ended);
        assert_eq!(w.end(), WriteStatus::Closed);
    }

    #[test]
    fn test_codec_failure_is_reported_once() {
        let options = Options::builder()
            .threshold(0)
            .codecs(FailingCodecs)
            .build()
            .unwrap();
        let mut w = writer_with(Method::GET, Some("gzip"), options);

        assert_eq!(w.write(Bytes::from_static(b"hello")), WriteStatus::Closed);
        assert_eq!(w.state().phase(), Phase::Ended);
        assert_eq!(
            w.get_ref().aborted.as_deref(),
            Some("failed to create gzip encoder")
        );

        let error = w.take_error().expect("error should be recorded");
        assert_eq!(error.encoding(), Encoding::Gzip);
        assert!(w.take_error().is_none());
        assert_eq!(w.end(), WriteStatus::Closed);
    }

    #[test]
    #[cfg(feature = "gzip")]
    fn test_flush_while_compressing() {
        let mut w = writer(Some("gzip"), 0);
        w.write(Bytes::from_static(b"event one"));
        let before = w.get_ref().body().len();
        w.flush();

        let mock = w.get_ref();
        assert_eq!(mock.flushes, 1);
        assert!(mock.body().len() > before);

        // everything written so far is decodable after a flush
        let body = mock.body();
        let mut decoder = flate2::read::GzDecoder::new(&body[..]);
        let mut buf = [0u8; 9];
        decoder.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"event one");
    }

    #[test]
    #[cfg(feature = "gzip")]
    fn test_event_stream_flushes_every_write() {
        let mut w = writer(Some("gzip"), 0);
        w.headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));

        w.write(Bytes::from_static(b"data: 1\n\n"));
        let first = w.get_ref().chunks.len();
        w.write(Bytes::from_static(b"data: 2\n\n"));
        assert!(first >= 1);
        assert!(w.get_ref().chunks.len() > first);
    }

    #[test]
    #[cfg(feature = "gzip")]
    fn test_end_with_counts_towards_length() {
        let mut w = writer(Some("gzip"), 10);
        w.write(Bytes::from_static(b"hello"));
        w.end_with(Bytes::from_static(b", world"));

        let mock = w.get_ref();
        assert_eq!(mock.sent().get(CONTENT_ENCODING).unwrap(), "gzip");
        assert_eq!(gunzip(&mock.body()), b"hello, world");
    }

    #[test]
    fn test_drop_ends_response() {
        let (inner, mut receiver) = channel(DEFAULT_HIGH_WATER_MARK);
        let mut w = CompressionWriter::new(
            inner,
            RequestHead::new(Method::GET, HeaderMap::new()),
            Arc::new(options(1024)),
        );
        w.headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        w.write(Bytes::from_static(b"unfinished"));
        drop(w);

        let mut cx = Context::from_waker(Waker::noop());
        let Poll::Ready(parts) = receiver.poll_head(&mut cx) else {
            panic!("head should be committed on drop");
        };
        assert_eq!(parts.headers.get(CONTENT_LENGTH).unwrap(), "10");
        assert!(matches!(
            receiver.poll_data(&mut cx),
            Poll::Ready(Some(Ok(chunk))) if chunk == "unfinished"
        ));
        assert!(receiver.is_end_stream());
    }

    #[test]
    fn test_abort_ends_interceptor() {
        let mut w = writer(Some("gzip"), 1024);
        w.write(Bytes::from_static(b"hello"));
        w.abort(io::Error::other("handler failed"));

        assert_eq!(w.state().phase(), Phase::Ended);
        assert_eq!(w.get_ref().aborted.as_deref(), Some("handler failed"));
        assert_eq!(w.write(Bytes::from_static(b"more")), WriteStatus::Closed);
    }
}
