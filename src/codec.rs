//! Pluggable request/response marshaling attached to services.
//!
//! A [`ServiceCodec`] translates between the HTTP layer and a service's
//! invocation objects. The dispatcher drives it in three places: turning a
//! routed request into an [`InvocationContext`], turning a handler result
//! back into response bytes, and rendering handler failures.

use std::any::Any;

use bytes::Bytes;

use crate::{
    error::{BoxError, DispatchError},
    invocation::{InvocationContext, InvocationPromise},
    message::{HttpRequest, HttpResponse},
    protocol::SessionProtocol,
};

/// Everything a codec sees when decoding a routed request.
///
/// `payload` shares the request's buffer; cloning it does not copy. The
/// dispatcher retains its own handle until the invocation completes.
pub struct DecodeRequest<'a> {
    /// Protocol of the session the request arrived on.
    pub session_protocol: SessionProtocol,
    /// Hostname the request was routed by, already stripped of its port.
    pub hostname: &'a str,
    /// Request path with the query string removed.
    pub path: &'a str,
    /// Path relative to the service mapping.
    pub mapped_path: &'a str,
    /// The request payload.
    pub payload: Bytes,
    /// The full request, for codecs that need headers or the method.
    pub request: &'a HttpRequest,
}

/// Outcome of [`ServiceCodec::decode_request`].
pub enum DecodeResult {
    /// The request decoded into an invocation.
    Success(InvocationContext),
    /// The request was malformed at the codec level.
    Failure {
        /// A complete response to send instead of the generated `400`.
        error_response: Option<HttpResponse>,
        /// What went wrong, for the promise and the log.
        cause: BoxError,
    },
    /// The request was well-formed but no service operation matched.
    NotFound,
}

/// Request/response marshaling for one service.
pub trait ServiceCodec: Send + Sync {
    /// Decode a routed request into an invocation context.
    ///
    /// The promise is the one the invocation will complete; codecs that
    /// answer without a handler may complete it here and still return
    /// [`DecodeResult::Success`].
    fn decode_request(&self, request: DecodeRequest<'_>, promise: &InvocationPromise)
        -> DecodeResult;

    /// Encode a handler's result object into a response body.
    ///
    /// # Errors
    ///
    /// An encoding failure is answered with `500 Internal Server Error`.
    fn encode_response(
        &self,
        ctx: &InvocationContext,
        result: Box<dyn Any + Send>,
    ) -> Result<Bytes, BoxError>;

    /// Encode a handler failure into a response body.
    ///
    /// # Errors
    ///
    /// An encoding failure is answered with `500 Internal Server Error`.
    fn encode_failure_response(
        &self,
        ctx: &InvocationContext,
        cause: &DispatchError,
    ) -> Result<Bytes, BoxError>;

    /// Whether a failure response carries a classified error status.
    ///
    /// When `false`, failures are delivered inside a `200 OK` and the
    /// error is conveyed in the encoded body alone, for RPC protocols
    /// whose transport must not surface application failures.
    fn failure_response_fails_session(&self, _ctx: &InvocationContext) -> bool { true }
}
