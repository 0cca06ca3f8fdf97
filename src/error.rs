use crate::codec::Encoding;
use std::io;
use thiserror::Error;

/// Errors raised while building [`Options`](crate::Options).
///
/// These are reported before any request is handled.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The threshold could not be parsed as a byte size.
    #[error("invalid threshold {0:?}: expected a byte count such as 1024 or \"1kb\"")]
    InvalidThreshold(String),

    /// A compression level outside the range supported by the encoding.
    #[error("invalid {encoding} level {level}: expected {min}..={max}")]
    InvalidLevel {
        /// Encoding the level was configured for.
        encoding: Encoding,
        /// The rejected level.
        level: i32,
        /// Smallest accepted level.
        min: i32,
        /// Largest accepted level.
        max: i32,
    },

    /// A window size outside the range supported by the encoding.
    #[error("invalid {encoding} window size {size}: expected {min}..={max}")]
    InvalidWindowSize {
        /// Encoding the window size was configured for.
        encoding: Encoding,
        /// The rejected window size.
        size: i32,
        /// Smallest accepted window size.
        min: i32,
        /// Largest accepted window size.
        max: i32,
    },

    /// A window size was configured for an encoding that has no such knob.
    #[error("{0} does not accept a window size")]
    WindowSizeUnsupported(Encoding),

    /// Settings were given for an encoding the codec factory cannot produce.
    #[error("{0} is not supported by the configured codecs")]
    UnsupportedEncoding(Encoding),
}

/// Errors raised by a compressor while a response is being written.
#[derive(Debug, Error)]
pub enum CompressionError {
    /// The codec factory could not produce an encoder.
    #[error("failed to create {encoding} encoder")]
    Codec {
        /// Encoding that was negotiated.
        encoding: Encoding,
        /// Underlying failure.
        #[source]
        source: io::Error,
    },

    /// The encoder failed while compressing, flushing or finishing.
    #[error("{encoding} compression failed")]
    Encode {
        /// Encoding in use.
        encoding: Encoding,
        /// Underlying failure.
        #[source]
        source: io::Error,
    },
}

impl CompressionError {
    /// Returns the encoding the failure happened in.
    pub fn encoding(&self) -> Encoding {
        match self {
            CompressionError::Codec { encoding, .. } | CompressionError::Encode { encoding, .. } => {
                *encoding
            }
        }
    }

    /// Converts the error into an `io::Error` suitable for a transport.
    pub(crate) fn to_io(&self) -> io::Error {
        let source = match self {
            CompressionError::Codec { source, .. } | CompressionError::Encode { source, .. } => {
                source
            }
        };
        io::Error::new(source.kind(), self.to_string())
    }
}
