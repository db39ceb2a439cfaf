//! Dispatch error taxonomy and status classification.
//!
//! Every failure a service invocation can produce funnels into
//! [`DispatchError`]; [`status_for`] maps it to the HTTP status the
//! response writer uses when the codec declares that failures fail the
//! session. Transport errors never become responses; they close the
//! connection, passing through a filter that keeps routine peer
//! disconnects out of the warn log.

use std::{sync::LazyLock, time::Duration};

use http::StatusCode;
use log::{debug, warn};
use regex::Regex;
use thiserror::Error;

/// Boxed error type carried across the handler boundary.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Terminal failure of a dispatched request.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The per-request deadline elapsed before the handler completed.
    #[error("request timed out after {timeout:?}: {context}")]
    RequestTimeout {
        /// The deadline that elapsed.
        timeout: Duration,
        /// Invocation identity, for the log line.
        context: String,
    },

    /// The codec inspected the request and no service accepted it.
    #[error("no service accepted the request")]
    ServiceNotFound,

    /// The codec could not decode the request into an invocation.
    #[error("failed to decode the request into an invocation")]
    RequestDecode {
        /// The codec's cause, when it supplied one.
        cause: Option<BoxError>,
        /// Length of the codec-supplied error body, zero when absent.
        error_response_len: usize,
    },

    /// The handler panicked while being invoked.
    #[error("service handler panicked: {0}")]
    HandlerPanic(String),

    /// The handler completed with an application failure.
    #[error("service failed: {0}")]
    Service(BoxError),
}

/// Status code a classified failure response carries.
///
/// A timeout maps to `503 Service Unavailable`; everything else is a
/// `500 Internal Server Error`.
#[must_use]
pub fn status_for(cause: &DispatchError) -> StatusCode {
    match cause {
        DispatchError::RequestTimeout { .. } => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

static IGNORABLE_ERROR_MESSAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)connection.*(reset|closed|abort|broken)|broken.*pipe")
        .expect("ignorable-error pattern is valid")
});

/// Returns `true` for causes that describe a routine peer disconnect.
#[must_use]
pub fn is_ignorable(cause: &str) -> bool { IGNORABLE_ERROR_MESSAGE.is_match(cause) }

/// Log an unexpected transport-level failure.
///
/// Benign connection-reset noise goes to the debug log; anything else is
/// warned about with the connection label.
pub(crate) fn log_unexpected(label: &str, cause: &dyn std::fmt::Display) {
    let rendered = cause.to_string();
    if is_ignorable(&rendered) {
        debug!("ignorable connection error: conn={label}, cause={rendered}");
    } else {
        warn!("unexpected connection error: conn={label}, cause={rendered}");
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("Connection reset by peer", true)]
    #[case("connection closed before message completed", true)]
    #[case("An established connection was aborted", true)]
    #[case("Broken pipe (os error 32)", true)]
    #[case("the connection looks broken", true)]
    #[case("invalid frame length", false)]
    #[case("permission denied", false)]
    fn ignorable_pattern(#[case] message: &str, #[case] expected: bool) {
        assert_eq!(is_ignorable(message), expected);
    }

    #[test]
    fn timeout_classifies_as_service_unavailable() {
        let cause = DispatchError::RequestTimeout {
            timeout: Duration::from_millis(100),
            context: "svc".into(),
        };
        assert_eq!(status_for(&cause), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[rstest]
    #[case(DispatchError::ServiceNotFound)]
    #[case(DispatchError::HandlerPanic("boom".into()))]
    #[case(DispatchError::Service("oops".into()))]
    fn everything_else_is_internal_error(#[case] cause: DispatchError) {
        assert_eq!(status_for(&cause), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
