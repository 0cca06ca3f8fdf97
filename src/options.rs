//! Middleware configuration.

use crate::codec::{CodecFactory, EncoderSettings, Encoding, StandardCodecs};
use crate::error::ConfigError;
use crate::filter::{CompressibleTypes, FilterFn, RequestHead};
use http::HeaderMap;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Default minimum body size for compression.
pub const DEFAULT_THRESHOLD: usize = 1024;

/// A threshold as given by the user, either a byte count or a size string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Threshold {
    /// Exact number of bytes.
    Bytes(usize),
    /// Human readable size such as `"1kb"` or `"1.5mb"`.
    Size(String),
}

impl Threshold {
    /// Resolves the threshold to a byte count.
    pub fn to_bytes(&self) -> Result<usize, ConfigError> {
        match self {
            Threshold::Bytes(bytes) => Ok(*bytes),
            Threshold::Size(size) => {
                parse_size(size).ok_or_else(|| ConfigError::InvalidThreshold(size.clone()))
            }
        }
    }
}

impl From<usize> for Threshold {
    fn from(bytes: usize) -> Self {
        Threshold::Bytes(bytes)
    }
}

impl From<&str> for Threshold {
    fn from(size: &str) -> Self {
        Threshold::Size(size.to_owned())
    }
}

impl From<String> for Threshold {
    fn from(size: String) -> Self {
        Threshold::Size(size)
    }
}

/// Parses a size string like "10mb", "512kb" or "1024" into bytes.
///
/// Units are 1024-based and case-insensitive; a bare number is bytes.
pub fn parse_size(s: &str) -> Option<usize> {
    let s = s.trim().to_ascii_lowercase();
    if s.is_empty() {
        return None;
    }

    if let Ok(bytes) = s.parse::<usize>() {
        return Some(bytes);
    }

    const UNITS: [(&str, u32); 6] = [
        ("pb", 5),
        ("tb", 4),
        ("gb", 3),
        ("mb", 2),
        ("kb", 1),
        ("b", 0),
    ];
    let (num_str, exponent) = UNITS
        .iter()
        .find_map(|(suffix, exp)| s.strip_suffix(suffix).map(|n| (n, *exp)))?;

    let num: f64 = num_str.trim().parse().ok()?;
    if !num.is_finite() || num < 0.0 {
        return None;
    }
    let bytes = (num * 1024f64.powi(exponent as i32)).floor();
    if bytes > usize::MAX as f64 {
        return None;
    }
    Some(bytes as usize)
}

/// Validated, immutable middleware configuration.
///
/// Build one with [`Options::builder`]. Cloning is cheap.
#[derive(Clone)]
pub struct Options {
    pub(crate) threshold: usize,
    pub(crate) filter: Arc<FilterFn>,
    pub(crate) codecs: Arc<dyn CodecFactory>,
    pub(crate) encoders: HashMap<Encoding, EncoderSettings>,
}

impl Options {
    /// Creates a builder starting from the defaults.
    pub fn builder() -> OptionsBuilder {
        OptionsBuilder::new()
    }

    /// Returns the threshold in bytes.
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Returns the codec factory responses are compressed with.
    pub fn codecs(&self) -> &dyn CodecFactory {
        self.codecs.as_ref()
    }

    /// Returns the settings configured for `encoding`, or the defaults.
    pub fn encoder_settings(&self, encoding: Encoding) -> EncoderSettings {
        self.encoders.get(&encoding).copied().unwrap_or_default()
    }

    /// Runs the configured filter predicate.
    pub fn filter(&self, request: &RequestHead, headers: &HeaderMap) -> bool {
        (self.filter)(request, headers)
    }
}

impl Default for Options {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            filter: CompressibleTypes::default().into_filter(),
            codecs: Arc::new(StandardCodecs::new()),
            encoders: HashMap::new(),
        }
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("threshold", &self.threshold)
            .field("encodings", &self.codecs.supported())
            .field("encoders", &self.encoders)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Options`].
pub struct OptionsBuilder {
    threshold: Threshold,
    filter: Option<Arc<FilterFn>>,
    types: CompressibleTypes,
    codecs: Arc<dyn CodecFactory>,
    encoders: HashMap<Encoding, EncoderSettings>,
}

impl OptionsBuilder {
    /// Creates a builder with the default settings.
    pub fn new() -> Self {
        Self {
            threshold: Threshold::Bytes(DEFAULT_THRESHOLD),
            filter: None,
            types: CompressibleTypes::default(),
            codecs: Arc::new(StandardCodecs::new()),
            encoders: HashMap::new(),
        }
    }

    /// Sets the minimum body size for compression.
    ///
    /// Accepts a byte count or a size string such as `"1kb"`.
    pub fn threshold(mut self, threshold: impl Into<Threshold>) -> Self {
        self.threshold = threshold.into();
        self
    }

    /// Replaces the default content-type check with a custom predicate.
    pub fn filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&RequestHead, &HeaderMap) -> bool + Send + Sync + 'static,
    {
        let filter: Arc<FilterFn> = Arc::new(filter);
        self.filter = Some(filter);
        self
    }

    /// Sets the content types the default filter allows.
    ///
    /// Ignored when a custom [`filter`](Self::filter) is set.
    pub fn compressible_types(mut self, types: CompressibleTypes) -> Self {
        self.types = types;
        self
    }

    /// Configures the encoder settings for one encoding.
    pub fn encoder(mut self, encoding: Encoding, settings: EncoderSettings) -> Self {
        self.encoders.insert(encoding, settings);
        self
    }

    /// Uses a different codec factory.
    pub fn codecs<C>(mut self, codecs: C) -> Self
    where
        C: CodecFactory + 'static,
    {
        self.codecs = Arc::new(codecs);
        self
    }

    /// Validates the configuration.
    pub fn build(self) -> Result<Options, ConfigError> {
        let threshold = self.threshold.to_bytes()?;

        for (encoding, settings) in &self.encoders {
            self.codecs.validate(*encoding, settings)?;
        }

        let filter = match self.filter {
            Some(filter) => filter,
            None => self.types.into_filter(),
        };

        Ok(Options {
            threshold,
            filter,
            codecs: self.codecs,
            encoders: self.encoders,
        })
    }
}

impl Default for OptionsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for OptionsBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OptionsBuilder")
            .field("threshold", &self.threshold)
            .field("types", &self.types)
            .field("encoders", &self.encoders)
            .finish_non_exhaustive()
    }
}
