//! Streaming HTTP response compression for Tower.
//!
//! Handlers write their response incrementally through a [`ResponseWriter`].
//! [`CompressionLayer`] swaps that writer for a [`CompressionWriter`], which
//! holds the body back until it reaches a size threshold (or ends), then
//! decides once whether to compress it with Brotli, Zstd, Gzip or Deflate
//! based on the client's `Accept-Encoding` header and the response headers.
//! Backpressure from the transport is passed straight through.
//!
//! # Example
//!
//! ```ignore
//! use http_stream_compression::{CompressionLayer, Dispatch, Options, ResponseWriter};
//! use tower::ServiceBuilder;
//!
//! let options = Options::builder().threshold("1kb").build()?;
//! let service = ServiceBuilder::new()
//!     .layer_fn(Dispatch::new)
//!     .layer(CompressionLayer::new(options))
//!     .service_fn(|(req, mut res): (Request<_>, CompressionWriter<ChannelWriter>)| async move {
//!         res.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
//!         if res.write(Bytes::from("hello, ")) == WriteStatus::Full {
//!             res.drained().await;
//!         }
//!         res.end_with(Bytes::from("world"));
//!         Ok::<_, Infallible>(())
//!     });
//! ```
//!
//! # Compression Rules
//!
//! The middleware will **not** compress responses when:
//! - The request method is `HEAD`
//! - `Content-Encoding` header is already set
//! - `Cache-Control` contains `no-transform`
//! - `Content-Range` header is present (range responses)
//! - The filter rejects the response (by default, a `Content-Type` outside
//!   the compressible list)
//! - The body, or its declared `Content-Length`, is below the threshold
//!   (default: 1024 bytes)
//! - No supported `Accept-Encoding` is present in the request
//!
//! The middleware will **always flush** after each chunk when:
//! - `X-Accel-Buffering: no` header is present
//! - `Content-Type` is `text/event-stream`
//! - `Content-Type` starts with `application/grpc-web`
//!
//! # Response Modifications
//!
//! `Vary` includes `Accept-Encoding` whenever the response passed the filter.
//! When compression is applied:
//! - `Content-Encoding` header is set to the codec used
//! - `Content-Length` header is removed (compressed size is unknown)
//! - `Accept-Ranges` header is removed
//! - `Transfer-Encoding: chunked` is set

#![deny(missing_docs)]

mod body;
mod channel;
mod codec;
mod compressor;
mod dispatch;
mod error;
mod filter;
mod future;
mod interceptor;
mod layer;
pub mod negotiate;
mod options;
mod service;
mod writer;

pub use body::ChannelBody;
pub use channel::{ChannelWriter, DEFAULT_HIGH_WATER_MARK, Receiver, channel};
pub use codec::{CodecFactory, EncoderSettings, Encoding, StandardCodecs};
pub use dispatch::Dispatch;
pub use error::{CompressionError, ConfigError};
pub use filter::{CompressibleTypes, FilterFn, RequestHead};
pub use future::ResponseFuture;
pub use interceptor::{CompressionWriter, InterceptorState, Phase};
pub use layer::{CompressionLayer, compression};
pub use options::{DEFAULT_THRESHOLD, Options, OptionsBuilder, Threshold, parse_size};
pub use service::CompressionService;
pub use writer::{ResponseWriter, WriteStatus};

pub use compression_codecs::EncodeV2;
pub use compression_core::Level;
