//! Messages exchanged with the framing layer.
//!
//! The framing layer owns the socket and the HTTP wire format. It hands the
//! dispatch core fully decoded requests (or an HTTP/2 settings observation)
//! and consumes the responses the core schedules. Nothing in this module
//! touches raw bytes.

use bytes::Bytes;
use http::{
    header::{self, HeaderMap, HeaderValue},
    Method, StatusCode, Version,
};
use thiserror::Error;

/// Extension header correlating a response with an HTTP/2 stream when the
/// exchange is tunnelled over an HTTP/1.1 framing layer.
pub const STREAM_ID_HEADER: &str = "x-http2-stream-id";

/// Content type attached to generated error bodies.
pub const ERROR_CONTENT_TYPE: &str = "text/plain; charset=UTF-8";

/// A message delivered by the framing layer.
#[derive(Debug)]
pub enum InboundMessage {
    /// The peer's HTTP/2 settings, observed during the upgrade handshake.
    Settings(Http2Settings),
    /// A fully decoded request.
    Request(HttpRequest),
}

/// HTTP/2 settings observed from the peer.
///
/// The dispatch core only cares that settings arrived; the values are kept
/// for logging.
#[derive(Clone, Copy, Debug, Default)]
pub struct Http2Settings {
    pub header_table_size: Option<u32>,
    pub max_concurrent_streams: Option<u32>,
    pub initial_window_size: Option<u32>,
    pub max_frame_size: Option<u32>,
}

/// Failure recorded by the framing layer while decoding a request.
///
/// A request carrying one is still delivered so the core can answer it with
/// `400 Bad Request` in wire order.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct DecoderFailure {
    message: String,
}

impl DecoderFailure {
    /// Record a decode failure with a human-readable cause.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A decoded request, immutable once delivered.
#[derive(Debug)]
pub struct HttpRequest {
    method: Method,
    uri: String,
    version: Version,
    headers: HeaderMap,
    payload: Bytes,
    decoder_failure: Option<DecoderFailure>,
}

impl HttpRequest {
    /// Build a request as the framing layer would deliver it.
    #[must_use]
    pub fn new(method: Method, uri: impl Into<String>) -> Self {
        Self {
            method,
            uri: uri.into(),
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
            payload: Bytes::new(),
            decoder_failure: None,
        }
    }

    /// Set the HTTP version the request arrived with.
    #[must_use]
    pub fn with_version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    /// Append a header.
    #[must_use]
    pub fn with_header(mut self, name: header::HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Attach the payload buffer.
    #[must_use]
    pub fn with_payload(mut self, payload: Bytes) -> Self {
        self.payload = payload;
        self
    }

    /// Mark the request as having failed wire-level decoding.
    #[must_use]
    pub fn with_decoder_failure(mut self, failure: DecoderFailure) -> Self {
        self.decoder_failure = Some(failure);
        self
    }

    #[must_use]
    pub fn method(&self) -> &Method { &self.method }

    #[must_use]
    pub fn uri(&self) -> &str { &self.uri }

    #[must_use]
    pub fn version(&self) -> Version { self.version }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap { &self.headers }

    /// The request payload. Cloning the returned handle shares the
    /// underlying buffer; it does not copy.
    #[must_use]
    pub fn payload(&self) -> &Bytes { &self.payload }

    /// Consume the request, keeping only the payload buffer.
    #[must_use]
    pub fn into_payload(self) -> Bytes { self.payload }

    /// The framing layer's decode failure, if any.
    #[must_use]
    pub fn decoder_failure(&self) -> Option<&DecoderFailure> { self.decoder_failure.as_ref() }

    /// The `x-http2-stream-id` extension header, if the request carried one.
    #[must_use]
    pub fn stream_id(&self) -> Option<HeaderValue> { self.headers.get(STREAM_ID_HEADER).cloned() }

    /// Whether the connection should stay open after this exchange.
    ///
    /// HTTP/1.1 defaults to keep-alive unless the `Connection` header names
    /// `close`; HTTP/1.0 requires an explicit `keep-alive` token.
    #[must_use]
    pub fn is_keep_alive(&self) -> bool {
        if connection_header_contains(&self.headers, "close") {
            return false;
        }
        if self.version == Version::HTTP_10 {
            return connection_header_contains(&self.headers, "keep-alive");
        }
        true
    }
}

fn connection_header_contains(headers: &HeaderMap, token: &str) -> bool {
    headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|candidate| candidate.trim().eq_ignore_ascii_case(token))
}

/// A response scheduled for the wire.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl HttpResponse {
    /// Build a response with the given status and body.
    #[must_use]
    pub fn new(status: StatusCode, body: Bytes) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body,
        }
    }

    /// Build an error response whose body is `"<code> <reason-phrase>"`.
    #[must_use]
    pub fn error(status: StatusCode) -> Self {
        let reason = status.canonical_reason().unwrap_or("Unknown");
        let body = format!("{} {reason}", status.as_u16());
        let mut res = Self::new(status, Bytes::from(body));
        res.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(ERROR_CONTENT_TYPE),
        );
        res
    }

    #[must_use]
    pub fn status(&self) -> StatusCode { self.status }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap { &self.headers }

    pub fn headers_mut(&mut self) -> &mut HeaderMap { &mut self.headers }

    #[must_use]
    pub fn body(&self) -> &Bytes { &self.body }

    /// Add the headers a keep-alive connection requires: an explicit
    /// `Content-Length` and `Connection: keep-alive`.
    pub(crate) fn add_keep_alive_headers(&mut self) {
        let length = HeaderValue::from(self.body.len() as u64);
        self.headers.insert(header::CONTENT_LENGTH, length);
        self.headers
            .insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    }
}

#[cfg(test)]
mod tests {
    use http::header::{HeaderValue, CONNECTION, CONTENT_TYPE};
    use rstest::rstest;

    use super::*;

    fn get(uri: &str) -> HttpRequest { HttpRequest::new(Method::GET, uri) }

    #[rstest]
    #[case(None, Version::HTTP_11, true)]
    #[case(Some("close"), Version::HTTP_11, false)]
    #[case(Some("Close"), Version::HTTP_11, false)]
    #[case(Some("keep-alive, Upgrade"), Version::HTTP_11, true)]
    #[case(None, Version::HTTP_10, false)]
    #[case(Some("keep-alive"), Version::HTTP_10, true)]
    fn keep_alive_detection(
        #[case] connection: Option<&str>,
        #[case] version: Version,
        #[case] expected: bool,
    ) {
        let mut req = get("/").with_version(version);
        if let Some(value) = connection {
            req = req.with_header(CONNECTION, HeaderValue::from_str(value).unwrap());
        }
        assert_eq!(req.is_keep_alive(), expected);
    }

    #[test]
    fn error_body_is_code_and_reason() {
        let res = HttpResponse::error(StatusCode::NOT_FOUND);
        assert_eq!(res.body().as_ref(), b"404 Not Found");
        assert_eq!(res.headers().get(CONTENT_TYPE).unwrap(), ERROR_CONTENT_TYPE);
    }

    #[test]
    fn keep_alive_headers_carry_content_length() {
        let mut res = HttpResponse::new(StatusCode::OK, Bytes::from_static(b"hi"));
        res.add_keep_alive_headers();
        assert_eq!(
            res.headers().get(http::header::CONTENT_LENGTH).unwrap(),
            "2"
        );
        assert_eq!(res.headers().get(CONNECTION).unwrap(), "keep-alive");
    }
}
