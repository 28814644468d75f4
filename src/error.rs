//! Error types for the evaluation pipeline.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Additional context from judge-provider errors for debugging.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    /// HTTP status code from the judge endpoint.
    pub http_status: Option<u16>,
    /// Provider-specific error code (e.g. "rate_limit_exceeded").
    pub provider_code: Option<String>,
    /// Request ID from the provider (x-request-id header).
    pub request_id: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.provider_code = Some(code.into());
        self
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }
}

/// Errors that can occur anywhere in the evaluation pipeline.
///
/// Each variant maps to one stage of one sub-request. Failures stay contained
/// to that sub-request's slot in the response; only `Validation` aborts the
/// whole request, and it is raised before any I/O.
#[derive(Debug, Error)]
pub enum EvalError {
    /// Request carried no media URL - permanent, raised before any I/O.
    #[error("invalid request: {message}")]
    Validation { message: String },

    /// Video byte size exceeds the absolute ceiling - raised before decode.
    #[error("video too large: {byte_size} bytes exceeds the {ceiling}-byte ceiling")]
    SizeRejected { byte_size: u64, ceiling: u64 },

    /// Media download failed after exhausting retries.
    #[error("fetch failed for {url}: {message}")]
    Fetch {
        url: String,
        message: String,
        retryable: bool,
    },

    /// Frame extraction failed (corrupt container, zero decodable frames).
    #[error("extraction failed: {message}")]
    Extraction { message: String },

    /// Judge call failed, or the judge returned an empty verdict.
    #[error("judge error: {message}")]
    Judge {
        message: String,
        retryable: bool,
        context: Option<ErrorContext>,
    },

    /// Configuration error (missing API key, etc.).
    #[error("configuration error: {0}")]
    Config(String),
}

impl EvalError {
    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a size rejection.
    pub fn size_rejected(byte_size: u64, ceiling: u64) -> Self {
        Self::SizeRejected { byte_size, ceiling }
    }

    /// Create a fetch error.
    pub fn fetch(url: impl Into<String>, message: impl Into<String>, retryable: bool) -> Self {
        Self::Fetch {
            url: url.into(),
            message: message.into(),
            retryable,
        }
    }

    /// Create an extraction error.
    pub fn extraction(message: impl Into<String>) -> Self {
        Self::Extraction {
            message: message.into(),
        }
    }

    /// Create a judge error.
    pub fn judge(message: impl Into<String>, retryable: bool) -> Self {
        Self::Judge {
            message: message.into(),
            retryable,
            context: None,
        }
    }

    /// Create a judge error with context.
    pub fn judge_with_context(
        message: impl Into<String>,
        retryable: bool,
        context: ErrorContext,
    ) -> Self {
        Self::Judge {
            message: message.into(),
            retryable,
            context: Some(context),
        }
    }

    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Whether a retry could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Validation { .. } => false,
            Self::SizeRejected { .. } => false,
            Self::Fetch { retryable, .. } => *retryable,
            Self::Extraction { .. } => false,
            Self::Judge { retryable, .. } => *retryable,
            Self::Config(_) => false,
        }
    }

    /// Stable error kind for logging and user-visible reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation_error",
            Self::SizeRejected { .. } => "size_rejected",
            Self::Fetch { .. } => "fetch_error",
            Self::Extraction { .. } => "extraction_error",
            Self::Judge { .. } => "judge_error",
            Self::Config(_) => "config_error",
        }
    }

    /// Get the error context if available.
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Self::Judge { context, .. } => context.as_ref(),
            _ => None,
        }
    }

    /// Get the request ID if available.
    pub fn request_id(&self) -> Option<&str> {
        self.context().and_then(|c| c.request_id.as_deref())
    }
}

/// User-visible failure slot in an evaluation response.
///
/// Carries the stable kind plus a readable message, never raw internals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub kind: String,
    pub message: String,
}

impl From<&EvalError> for ErrorReport {
    fn from(err: &EvalError) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        assert_eq!(EvalError::validation("no url").kind(), "validation_error");
        assert_eq!(EvalError::size_rejected(10, 5).kind(), "size_rejected");
        assert_eq!(EvalError::fetch("u", "boom", true).kind(), "fetch_error");
        assert_eq!(EvalError::extraction("boom").kind(), "extraction_error");
        assert_eq!(EvalError::judge("boom", false).kind(), "judge_error");
        assert_eq!(EvalError::config("boom").kind(), "config_error");
    }

    #[test]
    fn retryability_follows_variant_flags() {
        assert!(EvalError::fetch("u", "timeout", true).is_retryable());
        assert!(!EvalError::fetch("u", "404", false).is_retryable());
        assert!(EvalError::judge("503", true).is_retryable());
        assert!(!EvalError::validation("no url").is_retryable());
        assert!(!EvalError::size_rejected(10, 5).is_retryable());
        assert!(!EvalError::extraction("corrupt").is_retryable());
    }

    #[test]
    fn report_carries_kind_and_message() {
        let err = EvalError::size_rejected(300, 200);
        let report = ErrorReport::from(&err);
        assert_eq!(report.kind, "size_rejected");
        assert!(report.message.contains("300"));
        assert!(report.message.contains("200"));
    }

    #[test]
    fn judge_context_round_trip() {
        let ctx = ErrorContext::new()
            .with_status(429)
            .with_code("rate_limit_exceeded")
            .with_request_id("abc123");
        let err = EvalError::judge_with_context("rate limited", true, ctx);
        let ctx = err.context().expect("context");
        assert_eq!(ctx.http_status, Some(429));
        assert_eq!(ctx.provider_code.as_deref(), Some("rate_limit_exceeded"));
        assert_eq!(err.request_id(), Some("abc123"));
    }
}
