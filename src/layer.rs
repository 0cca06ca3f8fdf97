use crate::options::Options;
use crate::service::CompressionService;
use std::sync::Arc;
use tower::Layer;

/// A Tower layer that compresses HTTP response bodies.
///
/// Services wrapped by this layer are called with a request and a
/// [`CompressionWriter`](crate::CompressionWriter), which compresses the
/// body based on the client's Accept-Encoding header and the response
/// headers.
#[derive(Debug, Clone, Default)]
pub struct CompressionLayer {
    options: Arc<Options>,
}

impl CompressionLayer {
    /// Creates a new compression layer with the given options.
    ///
    /// Use [`CompressionLayer::default`] for the default settings.
    pub fn new(options: Options) -> Self {
        Self {
            options: Arc::new(options),
        }
    }

    /// Returns the configuration shared by every wrapped service.
    pub fn options(&self) -> &Options {
        &self.options
    }
}

impl From<Options> for CompressionLayer {
    fn from(options: Options) -> Self {
        Self::new(options)
    }
}

impl<S> Layer<S> for CompressionLayer {
    type Service = CompressionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CompressionService::new(inner, Arc::clone(&self.options))
    }
}

/// Creates a [`CompressionLayer`] from validated options.
pub fn compression(options: Options) -> CompressionLayer {
    CompressionLayer::new(options)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_services_share_options() {
        let layer = compression(Options::builder().threshold("2kb").build().unwrap());
        let a = layer.layer(());
        let b = layer.layer(());
        assert_eq!(a.options().threshold(), 2048);
        assert!(std::ptr::eq(a.options(), b.options()));
    }

    #[test]
    fn test_default_layer() {
        assert_eq!(
            CompressionLayer::default().options().threshold(),
            crate::DEFAULT_THRESHOLD
        );
    }
}
