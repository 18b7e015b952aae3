//! Fluent request description.
//!
//! A [`ProbeRequest`] carries everything specific to one probe: method,
//! URL, headers, body, and its two timeouts (start = time-to-first-byte,
//! finish = overall deadline enforced by the watchdog). Harness defaults
//! fill whatever is left unset at launch.
//!
//! Header conversion errors are recorded and surfaced by `launch`, keeping
//! the builder chain infallible at the call site.

use std::time::Duration;

use bytes::Bytes;
use http::{
    Method, Version,
    header::{HeaderMap, HeaderName, HeaderValue},
};
use serde::Serialize;
use serde_json::Value;

/// Request body as supplied by the caller.
#[derive(Debug, Clone)]
pub(crate) enum Payload {
    Empty,
    Bytes(Bytes),
    /// Encoded with the harness codec at launch.
    Json(Value),
}

/// Description of one request to launch.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use wireprobe::ProbeRequest;
///
/// let request = ProbeRequest::get("http://localhost:8080/hello")
///     .name("hello greeting")
///     .header("x-woog", "blah")
///     .finish_timeout(Duration::from_secs(4));
/// let _ = request;
/// ```
#[derive(Debug, Clone)]
pub struct ProbeRequest {
    pub(crate) name: Option<String>,
    pub(crate) method: Method,
    pub(crate) url: String,
    pub(crate) version: Option<Version>,
    pub(crate) headers: HeaderMap,
    pub(crate) payload: Payload,
    pub(crate) start_timeout: Option<Duration>,
    pub(crate) finish_timeout: Option<Duration>,
    pub(crate) invalid: Option<String>,
}

impl ProbeRequest {
    /// A request with the given method and absolute URL.
    #[must_use]
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            name: None,
            method,
            url: url.into(),
            version: None,
            headers: HeaderMap::new(),
            payload: Payload::Empty,
            start_timeout: None,
            finish_timeout: None,
            invalid: None,
        }
    }

    /// A GET request.
    #[must_use]
    pub fn get(url: impl Into<String>) -> Self { Self::new(Method::GET, url) }

    /// A POST request.
    #[must_use]
    pub fn post(url: impl Into<String>) -> Self { Self::new(Method::POST, url) }

    /// A PUT request.
    #[must_use]
    pub fn put(url: impl Into<String>) -> Self { Self::new(Method::PUT, url) }

    /// A DELETE request.
    #[must_use]
    pub fn delete(url: impl Into<String>) -> Self { Self::new(Method::DELETE, url) }

    /// Name used in results, reports, and logs. Defaults to
    /// `"<METHOD> <url>"`.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Add a request header.
    ///
    /// Invalid names or values do not panic here; the error is reported
    /// when the request is launched.
    #[must_use]
    pub fn header<K, V>(mut self, name: K, value: V) -> Self
    where
        K: TryInto<HeaderName>,
        K::Error: std::fmt::Display,
        V: TryInto<HeaderValue>,
        V::Error: std::fmt::Display,
    {
        match (name.try_into(), value.try_into()) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
            }
            (Err(e), _) => self.record_invalid(format!("invalid header name: {e}")),
            (_, Err(e)) => self.record_invalid(format!("invalid header value: {e}")),
        }
        self
    }

    /// Preferred HTTP version for this request.
    #[must_use]
    pub fn version(mut self, version: Version) -> Self {
        self.version = Some(version);
        self
    }

    /// Raw body bytes.
    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.payload = Payload::Bytes(body.into());
        self
    }

    /// UTF-8 text body.
    #[must_use]
    pub fn body_text(mut self, body: impl Into<String>) -> Self {
        self.payload = Payload::Bytes(Bytes::from(body.into()));
        self
    }

    /// JSON body, encoded with the harness codec at launch. The codec's
    /// content type is applied unless a `content-type` header is set
    /// explicitly.
    #[must_use]
    pub fn json<T: Serialize>(mut self, body: &T) -> Self {
        match serde_json::to_value(body) {
            Ok(value) => self.payload = Payload::Json(value),
            Err(e) => self.record_invalid(format!("unserialisable JSON body: {e}")),
        }
        self
    }

    /// Bound on time-to-first-byte, enforced by the transport.
    #[must_use]
    pub fn start_timeout(mut self, limit: Duration) -> Self {
        self.start_timeout = Some(limit);
        self
    }

    /// Overall request-through-completion deadline, enforced by the
    /// watchdog.
    #[must_use]
    pub fn finish_timeout(mut self, limit: Duration) -> Self {
        self.finish_timeout = Some(limit);
        self
    }

    pub(crate) fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("{} {}", self.method, self.url))
    }

    fn record_invalid(&mut self, reason: String) {
        // Keep the first problem; later ones are usually knock-on noise.
        if self.invalid.is_none() {
            self.invalid = Some(reason);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_name_is_method_and_url() {
        let request = ProbeRequest::get("http://localhost/hello");
        assert_eq!(request.display_name(), "GET http://localhost/hello");
    }

    #[test]
    fn invalid_header_is_deferred_not_panicking() {
        let request = ProbeRequest::get("http://localhost/").header("bad header\n", "x");
        assert!(request.invalid.is_some());
    }

    #[test]
    fn first_builder_error_wins() {
        let request = ProbeRequest::get("http://localhost/")
            .header("bad name\n", "x")
            .header("also-bad\n", "y");
        let reason = request.invalid.expect("invalid");
        assert!(reason.contains("invalid header name"), "{reason}");
    }
}
