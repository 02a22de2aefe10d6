use std::time::Duration;

use debt_limit::Reason;

/// Body message sent to clients whose request was rate limited.
pub const RATE_LIMITED_MESSAGE: &str = "too many requests, rate limited";

/// Errors produced by the Tower Debt middleware stack.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LimitError {
    /// The limiter refused the request.
    ///
    /// When the `axum` feature is enabled, this converts to `429 Too Many Requests`,
    /// with a `Retry-After` header if the limiter knows when capacity returns.
    #[error("too many requests, rate limited: {reason}")]
    RateLimited {
        /// Why the limiter said no.
        reason: Reason,
    },

    /// An unexpected error occurred in the inner service.
    ///
    /// The string contains the `Display` representation of the inner error.
    /// When the `axum` feature is enabled, this converts to `500 Internal Server Error`.
    #[error("Internal service error: {0}")]
    Inner(String),
}

impl LimitError {
    /// How long the client should wait before retrying, when known.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { reason } => reason.retry_after(),
            Self::Inner(_) => None,
        }
    }
}

impl From<Reason> for LimitError {
    fn from(reason: Reason) -> Self {
        Self::RateLimited { reason }
    }
}

#[cfg(feature = "axum")]
impl axum::response::IntoResponse for LimitError {
    fn into_response(self) -> axum::response::Response {
        use std::collections::HashMap;

        use axum::Json;
        use axum::http::StatusCode;

        match self {
            Self::RateLimited { reason } => {
                let body = Json(HashMap::from([("message", RATE_LIMITED_MESSAGE)]));
                let mut response = (StatusCode::TOO_MANY_REQUESTS, body).into_response();
                if let Some(retry_after) = reason.retry_after() {
                    // Whole seconds, rounded up so clients never retry too early.
                    let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
                    let val = axum::http::HeaderValue::from(secs.max(1));
                    response
                        .headers_mut()
                        .insert(axum::http::header::RETRY_AFTER, val);
                }
                response
            }
            Self::Inner(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()).into_response(),
        }
    }
}
