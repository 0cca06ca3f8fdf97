//! Decides whether a response may be compressed at all.

use http::{HeaderMap, Method, Request, header};
use std::sync::Arc;

/// Signature of a compression filter: request head and response headers in,
/// "may compress" out.
pub type FilterFn = dyn Fn(&RequestHead, &HeaderMap) -> bool + Send + Sync;

/// The parts of a request the middleware looks at.
#[derive(Debug, Clone)]
pub struct RequestHead {
    method: Method,
    headers: HeaderMap,
}

impl RequestHead {
    /// Creates a request head from a method and headers.
    pub fn new(method: Method, headers: HeaderMap) -> Self {
        Self { method, headers }
    }

    /// Captures the head of `request`.
    pub fn from_request<B>(request: &Request<B>) -> Self {
        Self::new(request.method().clone(), request.headers().clone())
    }

    /// Returns the request method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the request headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Returns the raw `Accept-Encoding` value, if any.
    pub fn accept_encoding(&self) -> Option<&str> {
        self.headers
            .get(header::ACCEPT_ENCODING)
            .and_then(|v| v.to_str().ok())
    }
}

/// Content types the default filter allows to be compressed.
///
/// Patterns are `type/subtype` and may use `*` for either half. A subtype of
/// the form `*+suffix` matches structured syntax suffixes such as
/// `application/vnd.api+json`.
#[derive(Debug, Clone)]
pub struct CompressibleTypes {
    patterns: Vec<String>,
}

impl CompressibleTypes {
    /// Creates an allow-list from the given patterns.
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            patterns: patterns
                .into_iter()
                .map(|p| normalize(p.into()))
                .collect(),
        }
    }

    /// Adds a pattern to the allow-list.
    pub fn with(mut self, pattern: impl Into<String>) -> Self {
        self.patterns.push(normalize(pattern.into()));
        self
    }

    /// Checks whether `content_type` (parameters allowed) is on the list.
    pub fn matches(&self, content_type: &str) -> bool {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();
        let Some((ty, subtype)) = essence.split_once('/') else {
            return false;
        };

        self.patterns.iter().any(|pattern| {
            let Some((p_ty, p_subtype)) = pattern.split_once('/') else {
                return false;
            };
            let type_matches = p_ty == "*" || p_ty == ty;
            let subtype_matches = p_subtype == "*"
                || p_subtype == subtype
                || p_subtype
                    .strip_prefix('*')
                    .is_some_and(|suffix| suffix.starts_with('+') && subtype.ends_with(suffix));
            type_matches && subtype_matches
        })
    }

    /// Filter predicate that compresses responses whose `Content-Type` is on
    /// the list. Responses without a `Content-Type` are left alone.
    pub fn into_filter(self) -> Arc<FilterFn> {
        Arc::new(move |_req: &RequestHead, headers: &HeaderMap| {
            headers
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|ct| self.matches(ct))
        })
    }
}

impl Default for CompressibleTypes {
    fn default() -> Self {
        Self::new([
            "text/*",
            "*/*+json",
            "*/*+xml",
            "application/json",
            "application/javascript",
            "application/x-javascript",
            "application/ecmascript",
            "application/xml",
            "application/wasm",
            "application/x-ndjson",
            "application/x-www-form-urlencoded",
            "application/graphql",
            "application/vnd.ms-fontobject",
            "font/ttf",
            "font/otf",
            "image/bmp",
            "image/x-icon",
        ])
    }
}

fn normalize(pattern: String) -> String {
    pattern.trim().to_ascii_lowercase()
}

/// Runs the eligibility rules in order; the first failing rule wins.
pub(crate) fn is_eligible(request: &RequestHead, headers: &HeaderMap, filter: &FilterFn) -> bool {
    if *request.method() == Method::HEAD {
        tracing::trace!("not compressing: HEAD request");
        return false;
    }
    if has_content_encoding(headers) {
        tracing::trace!("not compressing: already encoded");
        return false;
    }
    if has_no_transform(headers) {
        tracing::trace!("not compressing: cache-control no-transform");
        return false;
    }
    if has_content_range(headers) {
        tracing::trace!("not compressing: range response");
        return false;
    }
    if !filter(request, headers) {
        tracing::trace!("not compressing: filtered");
        return false;
    }
    true
}

/// Checks if Content-Encoding header is already present.
fn has_content_encoding(headers: &HeaderMap) -> bool {
    headers.contains_key(header::CONTENT_ENCODING)
}

/// Checks if Content-Range header is present (range response).
fn has_content_range(headers: &HeaderMap) -> bool {
    headers.contains_key(header::CONTENT_RANGE)
}

/// Checks for a `no-transform` cache directive.
fn has_no_transform(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::CACHE_CONTROL)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|directive| directive.trim().eq_ignore_ascii_case("no-transform"))
}

/// Adds Accept-Encoding to the Vary header if not already present.
pub(crate) fn add_vary_accept_encoding(headers: &mut HeaderMap) {
    for vary in headers.get_all(header::VARY) {
        if let Ok(vary_str) = vary.to_str() {
            let covered = vary_str.split(',').any(|v| {
                let v = v.trim();
                v.eq_ignore_ascii_case("*") || v.eq_ignore_ascii_case("accept-encoding")
            });
            if covered {
                return;
            }
        }
    }

    headers.append(
        header::VARY,
        header::HeaderValue::from_static("accept-encoding"),
    );
}

/// Checks whether every write should be flushed through the compressor.
pub(crate) fn wants_immediate_flush(headers: &HeaderMap) -> bool {
    let accel_off = headers
        .get("x-accel-buffering")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("no"));
    let streaming = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| {
            ct.starts_with("text/event-stream") || ct.starts_with("application/grpc-web")
        });
    accel_off || streaming
}

/// Returns the Content-Length the application declared, if it parses.
pub(crate) fn declared_content_length(headers: &HeaderMap) -> Option<usize> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<usize>().ok())
}
