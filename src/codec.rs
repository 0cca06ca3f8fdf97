#[cfg(feature = "brotli")]
use compression_codecs::brotli::{BrotliEncoder, params::EncoderParams as BrotliParams};
#[cfg(feature = "deflate")]
use compression_codecs::deflate::DeflateEncoder;
#[cfg(feature = "gzip")]
use compression_codecs::gzip::GzipEncoder;
#[cfg(feature = "zstd")]
use compression_codecs::zstd::ZstdEncoder;
use compression_codecs::EncodeV2;
use compression_core::Level;
use std::fmt;
use std::io;

use crate::error::ConfigError;

/// A content coding the middleware can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    /// Brotli compression.
    Brotli,
    /// Zstd compression.
    Zstd,
    /// Gzip compression.
    Gzip,
    /// Deflate compression.
    Deflate,
}

impl Encoding {
    /// Returns the Content-Encoding header value for this encoding.
    pub fn content_encoding(&self) -> &'static str {
        match self {
            Encoding::Brotli => "br",
            Encoding::Zstd => "zstd",
            Encoding::Gzip => "gzip",
            Encoding::Deflate => "deflate",
        }
    }

    /// Maps an `Accept-Encoding` token to an encoding, accepting common aliases.
    ///
    /// Tokens are compared case-insensitively.
    pub fn from_token(token: &str) -> Option<Encoding> {
        let token = token.trim();
        if token.eq_ignore_ascii_case("br") || token.eq_ignore_ascii_case("brotli") {
            Some(Encoding::Brotli)
        } else if token.eq_ignore_ascii_case("zstd") {
            Some(Encoding::Zstd)
        } else if token.eq_ignore_ascii_case("gzip") || token.eq_ignore_ascii_case("x-gzip") {
            Some(Encoding::Gzip)
        } else if token.eq_ignore_ascii_case("deflate") {
            Some(Encoding::Deflate)
        } else {
            None
        }
    }

    /// Inclusive range of precise levels the encoder accepts.
    fn level_range(&self) -> (i32, i32) {
        match self {
            Encoding::Brotli => (0, 11),
            Encoding::Zstd => (1, 22),
            Encoding::Gzip | Encoding::Deflate => (0, 9),
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.content_encoding())
    }
}

/// Per-encoding settings handed to the codec factory.
#[derive(Debug, Clone, Copy, Default)]
pub struct EncoderSettings {
    level: Option<Level>,
    window_size: Option<i32>,
}

impl EncoderSettings {
    /// Creates settings that use the encoder's defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the compression level.
    pub fn level(mut self, level: Level) -> Self {
        self.level = Some(level);
        self
    }

    /// Sets the window size as a base-2 logarithm (brotli only).
    pub fn window_size(mut self, window_size: i32) -> Self {
        self.window_size = Some(window_size);
        self
    }

    /// Returns the configured level, if any.
    pub fn get_level(&self) -> Option<Level> {
        self.level
    }

    /// Returns the configured window size, if any.
    pub fn get_window_size(&self) -> Option<i32> {
        self.window_size
    }

    /// Checks the settings against the limits of `encoding`.
    pub fn validate(&self, encoding: Encoding) -> Result<(), ConfigError> {
        if let Some(Level::Precise(level)) = self.level {
            let (min, max) = encoding.level_range();
            if !(min..=max).contains(&level) {
                return Err(ConfigError::InvalidLevel {
                    encoding,
                    level,
                    min,
                    max,
                });
            }
        }

        if let Some(size) = self.window_size {
            if encoding != Encoding::Brotli {
                return Err(ConfigError::WindowSizeUnsupported(encoding));
            }
            let (min, max) = (10, 24);
            if !(min..=max).contains(&size) {
                return Err(ConfigError::InvalidWindowSize {
                    encoding,
                    size,
                    min,
                    max,
                });
            }
        }

        Ok(())
    }
}

/// Produces streaming encoders for negotiated encodings.
///
/// The middleware asks the factory once per compressed response. A factory is
/// shared across requests, so implementations must be thread-safe.
pub trait CodecFactory: Send + Sync {
    /// Encodings this factory can produce, most preferred first.
    fn supported(&self) -> &[Encoding];

    /// Validates settings for `encoding` ahead of time.
    fn validate(&self, encoding: Encoding, settings: &EncoderSettings) -> Result<(), ConfigError> {
        if !self.supported().contains(&encoding) {
            return Err(ConfigError::UnsupportedEncoding(encoding));
        }
        settings.validate(encoding)
    }

    /// Creates a new encoder for `encoding`.
    fn encoder(
        &self,
        encoding: Encoding,
        settings: &EncoderSettings,
    ) -> io::Result<Box<dyn EncodeV2 + Send>>;
}

/// Codec factory backed by the encoders compiled into this crate.
#[derive(Debug, Clone)]
pub struct StandardCodecs {
    preference: Vec<Encoding>,
}

impl StandardCodecs {
    /// Creates a factory preferring brotli, then zstd, gzip and deflate.
    ///
    /// Encodings whose cargo feature is disabled are left out.
    pub fn new() -> Self {
        Self::with_preference([
            Encoding::Brotli,
            Encoding::Zstd,
            Encoding::Gzip,
            Encoding::Deflate,
        ])
    }

    /// Creates a factory with an explicit server preference order.
    ///
    /// Encodings that are not compiled in are dropped, as are duplicates.
    pub fn with_preference<I>(preference: I) -> Self
    where
        I: IntoIterator<Item = Encoding>,
    {
        let mut ordered = Vec::new();
        for encoding in preference {
            if is_compiled_in(encoding) && !ordered.contains(&encoding) {
                ordered.push(encoding);
            }
        }
        Self {
            preference: ordered,
        }
    }
}

impl Default for StandardCodecs {
    fn default() -> Self {
        Self::new()
    }
}

impl CodecFactory for StandardCodecs {
    fn supported(&self) -> &[Encoding] {
        &self.preference
    }

    #[allow(unused_variables)]
    fn encoder(
        &self,
        encoding: Encoding,
        settings: &EncoderSettings,
    ) -> io::Result<Box<dyn EncodeV2 + Send>> {
        let level = settings.get_level().unwrap_or(Level::Default);
        match encoding {
            #[cfg(feature = "brotli")]
            Encoding::Brotli => {
                let mut params = BrotliParams::default().quality(level);
                if let Some(window_size) = settings.get_window_size() {
                    params = params.window_size(window_size);
                }
                Ok(Box::new(BrotliEncoder::new(params)))
            }
            #[cfg(feature = "zstd")]
            Encoding::Zstd => Ok(Box::new(ZstdEncoder::new(zstd_level(level)))),
            #[cfg(feature = "gzip")]
            Encoding::Gzip => Ok(Box::new(GzipEncoder::new(level.into()))),
            #[cfg(feature = "deflate")]
            Encoding::Deflate => Ok(Box::new(DeflateEncoder::new(level.into()))),
            #[allow(unreachable_patterns)]
            other => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("{other} support is not compiled in"),
            )),
        }
    }
}

fn is_compiled_in(encoding: Encoding) -> bool {
    match encoding {
        Encoding::Brotli => cfg!(feature = "brotli"),
        Encoding::Zstd => cfg!(feature = "zstd"),
        Encoding::Gzip => cfg!(feature = "gzip"),
        Encoding::Deflate => cfg!(feature = "deflate"),
    }
}

#[cfg(feature = "zstd")]
fn zstd_level(level: Level) -> i32 {
    match level {
        Level::Fastest => 1,
        Level::Best => 19,
        Level::Precise(level) => level,
        _ => 3, // level 3 is a good default
    }
}
