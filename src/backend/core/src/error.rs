//! Error handling for the backpressure and reliability core.
//!
//! This module provides:
//! - A single error type with context and chaining
//! - HTTP status code mapping so a boundary layer can answer 408/503/500 distinctly
//! - Machine-readable error codes
//! - User-friendly messages vs detailed internal messages
//! - Error logging with tracing integration
//! - Metrics integration for error tracking
//!
//! # Usage
//!
//! ```rust,ignore
//! use sma_core::error::{SmaError, Result, ErrorContext};
//!
//! fn load() -> Result<String> {
//!     std::fs::read_to_string("sma.toml").context("Failed to read configuration")
//! }
//! ```

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::{error, warn};

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for core operations.
pub type Result<T> = std::result::Result<T, SmaError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes for API responses.
///
/// These codes are stable and can be used by clients for programmatic error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Admission Errors (1000-1099)
    QueueTimeout,
    RequestTimeout,
    OperationFailed,
    ShuttingDown,
    TimeLimitExceeded,

    // Retry Errors (1100-1199)
    JobNotFound,
    JobHandlerFailed,
    JobExhausted,
    HandlerNotRegistered,

    // Serialization Errors (2200-2299)
    SerializationError,
    DeserializationError,

    // Validation Errors (4100-4199)
    ValidationError,

    // Configuration Errors (5000-5099)
    ConfigurationError,
    MissingConfiguration,
    InvalidConfiguration,

    // Internal Errors (9000-9099)
    InternalError,
}

impl ErrorCode {
    /// Get the numeric code for this error.
    pub const fn numeric_code(&self) -> u32 {
        match self {
            Self::QueueTimeout => 1000,
            Self::RequestTimeout => 1001,
            Self::OperationFailed => 1002,
            Self::ShuttingDown => 1003,
            Self::TimeLimitExceeded => 1004,

            Self::JobNotFound => 1100,
            Self::JobHandlerFailed => 1101,
            Self::JobExhausted => 1102,
            Self::HandlerNotRegistered => 1103,

            Self::SerializationError => 2200,
            Self::DeserializationError => 2201,

            Self::ValidationError => 4100,

            Self::ConfigurationError => 5000,
            Self::MissingConfiguration => 5001,
            Self::InvalidConfiguration => 5002,

            Self::InternalError => 9000,
        }
    }

    /// Get the HTTP status code for this error.
    pub const fn http_status(&self) -> StatusCode {
        match self {
            // Request Timeout (408)
            Self::RequestTimeout => StatusCode::REQUEST_TIMEOUT,

            // Service Unavailable (503)
            Self::QueueTimeout | Self::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,

            // Gateway Timeout (504)
            Self::TimeLimitExceeded => StatusCode::GATEWAY_TIMEOUT,

            // Not Found (404)
            Self::JobNotFound => StatusCode::NOT_FOUND,

            // Unprocessable Entity (422)
            Self::ValidationError => StatusCode::UNPROCESSABLE_ENTITY,

            // Internal Server Error (500)
            Self::OperationFailed
            | Self::JobHandlerFailed
            | Self::JobExhausted
            | Self::HandlerNotRegistered
            | Self::SerializationError
            | Self::DeserializationError
            | Self::ConfigurationError
            | Self::MissingConfiguration
            | Self::InvalidConfiguration
            | Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Check if this error is retryable.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::QueueTimeout
                | Self::RequestTimeout
                | Self::ShuttingDown
                | Self::TimeLimitExceeded
                | Self::JobHandlerFailed
        )
    }

    /// Get the error category for grouping.
    pub const fn category(&self) -> &'static str {
        match self.numeric_code() {
            1000..=1099 => "admission",
            1100..=1199 => "retry",
            2200..=2299 => "serialization",
            4100..=4199 => "validation",
            5000..=5099 => "configuration",
            9000..=9099 => "internal",
            _ => "unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Severity
// ═══════════════════════════════════════════════════════════════════════════════

/// Severity level for errors (affects logging and alerting).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// User errors (bad input, unknown ids)
    Low,
    /// Operational issues (overload, timeouts)
    Medium,
    /// System errors (failed work, bad configuration)
    High,
    /// Critical errors requiring immediate attention
    Critical,
}

impl ErrorSeverity {
    /// Get severity based on error code.
    pub const fn from_code(code: &ErrorCode) -> Self {
        match code {
            ErrorCode::ValidationError | ErrorCode::JobNotFound => Self::Low,

            ErrorCode::QueueTimeout
            | ErrorCode::RequestTimeout
            | ErrorCode::ShuttingDown
            | ErrorCode::TimeLimitExceeded
            | ErrorCode::JobHandlerFailed => Self::Medium,

            ErrorCode::OperationFailed
            | ErrorCode::JobExhausted
            | ErrorCode::HandlerNotRegistered
            | ErrorCode::SerializationError
            | ErrorCode::DeserializationError
            | ErrorCode::ConfigurationError
            | ErrorCode::MissingConfiguration
            | ErrorCode::InvalidConfiguration => Self::High,

            ErrorCode::InternalError => Self::Critical,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Details
// ═══════════════════════════════════════════════════════════════════════════════

/// Additional structured details about an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Additional context key-value pairs
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,

    /// Related entity ID (job, operation, etc.)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,

    /// Related entity type
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,

    /// Retry information
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

impl ErrorDetails {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity(mut self, entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after_secs = Some(seconds);
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The main error type of the crate.
///
/// Operations submitted to the admission controller return this type too, so
/// an operation's own failure travels to the caller unchanged.
#[derive(Error, Debug)]
pub struct SmaError {
    /// Machine-readable error code
    code: ErrorCode,

    /// User-friendly error message (safe to expose to clients)
    user_message: Cow<'static, str>,

    /// Detailed internal message (for logging only)
    internal_message: Option<String>,

    /// Additional structured details
    details: ErrorDetails,

    /// The source error that caused this error
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl fmt::Display for SmaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.user_message)?;
        if let Some(ref internal) = self.internal_message {
            write!(f, " (internal: {})", internal)?;
        }
        Ok(())
    }
}

impl SmaError {
    // ─────────────────────────────────────────────────────────────────────────
    // Constructors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a new error with code and user message.
    pub fn new(code: ErrorCode, user_message: impl Into<Cow<'static, str>>) -> Self {
        let error = Self {
            code,
            user_message: user_message.into(),
            internal_message: None,
            details: ErrorDetails::default(),
            source: None,
        };
        error.record_metrics();
        error
    }

    /// Create an error with both user and internal messages.
    pub fn with_internal(
        code: ErrorCode,
        user_message: impl Into<Cow<'static, str>>,
        internal_message: impl Into<String>,
    ) -> Self {
        let mut error = Self::new(code, user_message);
        error.internal_message = Some(internal_message.into());
        error
    }

    /// Create an internal error (500).
    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::InternalError,
            "An internal error occurred",
            message,
        )
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::ValidationError, message)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Builder Methods
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a source error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Add error details.
    pub fn with_details(mut self, details: ErrorDetails) -> Self {
        self.details = details;
        self
    }

    /// Add internal message.
    pub fn with_internal_message(mut self, message: impl Into<String>) -> Self {
        self.internal_message = Some(message.into());
        self
    }

    /// Add context to details.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.details.context.insert(key.into(), v);
        }
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Get the user-friendly message.
    pub fn user_message(&self) -> &str {
        &self.user_message
    }

    /// Get the internal message (if any).
    pub fn internal_message(&self) -> Option<&str> {
        self.internal_message.as_deref()
    }

    /// Get the error details.
    pub fn details(&self) -> &ErrorDetails {
        &self.details
    }

    /// Get the HTTP status code.
    pub fn http_status(&self) -> StatusCode {
        self.code.http_status()
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    /// Get the error severity.
    pub fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::from_code(&self.code)
    }

    /// True when the admission controller gave up waiting for a slot.
    pub fn is_queue_timeout(&self) -> bool {
        self.code == ErrorCode::QueueTimeout
    }

    /// True when an admitted operation ran past its deadline.
    pub fn is_request_timeout(&self) -> bool {
        self.code == ErrorCode::RequestTimeout
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Logging
    // ─────────────────────────────────────────────────────────────────────────

    /// Log this error with appropriate severity.
    pub fn log(&self) {
        let code = self.code.to_string();
        let category = self.code.category();
        let status = self.http_status().as_u16();

        match self.severity() {
            ErrorSeverity::Critical => {
                error!(
                    error_code = %code,
                    category = category,
                    http_status = status,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    details = ?self.details,
                    source = ?self.source,
                    "CRITICAL ERROR"
                );
            }
            ErrorSeverity::High => {
                error!(
                    error_code = %code,
                    category = category,
                    http_status = status,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    "High severity error"
                );
            }
            ErrorSeverity::Medium => {
                warn!(
                    error_code = %code,
                    category = category,
                    http_status = status,
                    user_message = %self.user_message,
                    "Medium severity error"
                );
            }
            ErrorSeverity::Low => {
                tracing::debug!(
                    error_code = %code,
                    category = category,
                    http_status = status,
                    user_message = %self.user_message,
                    "Low severity error"
                );
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Metrics
    // ─────────────────────────────────────────────────────────────────────────

    fn record_metrics(&self) {
        counter!(
            "sma_errors_total",
            "code" => self.code.to_string(),
            "category" => self.code.category().to_string(),
            "severity" => format!("{:?}", self.severity()),
            "retryable" => self.is_retryable().to_string(),
        )
        .increment(1);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// API Response
// ═══════════════════════════════════════════════════════════════════════════════

/// Error response for API clients.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Whether the request was successful (always false for errors)
    pub success: bool,

    /// Error information
    pub error: ErrorInfo,
}

/// Detailed error information for API responses.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Machine-readable error code
    pub code: ErrorCode,

    /// Numeric error code
    pub numeric_code: u32,

    /// User-friendly error message
    pub message: String,

    /// Additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<ErrorDetails>,

    /// Timestamp
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl From<&SmaError> for ErrorResponse {
    fn from(error: &SmaError) -> Self {
        Self {
            success: false,
            error: ErrorInfo {
                code: error.code,
                numeric_code: error.code.numeric_code(),
                message: error.user_message.to_string(),
                details: if error.details.context.is_empty()
                    && error.details.entity_id.is_none()
                    && error.details.retry_after_secs.is_none()
                {
                    None
                } else {
                    Some(error.details.clone())
                },
                timestamp: chrono::Utc::now(),
            },
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Axum Integration
// ═══════════════════════════════════════════════════════════════════════════════

impl IntoResponse for SmaError {
    fn into_response(self) -> Response {
        self.log();

        let status = self.http_status();
        let retry_after = self.details.retry_after_secs;
        let body = ErrorResponse::from(&self);

        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Context Extension Trait
// ═══════════════════════════════════════════════════════════════════════════════

/// Extension trait for adding context to errors.
pub trait ErrorContext<T> {
    /// Add context to an error.
    fn context(self, message: impl Into<String>) -> Result<T>;

    /// Add context with error code.
    fn with_error_code(self, code: ErrorCode) -> Result<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| SmaError::internal(message.into()).with_source(e))
    }

    fn with_error_code(self, code: ErrorCode) -> Result<T> {
        self.map_err(|e| SmaError::new(code, e.to_string()).with_source(e))
    }
}

impl<T> ErrorContext<T> for Option<T> {
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.ok_or_else(|| SmaError::new(ErrorCode::JobNotFound, message.into()))
    }

    fn with_error_code(self, code: ErrorCode) -> Result<T> {
        self.ok_or_else(|| SmaError::new(code, "Resource not found"))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// From Implementations for Common Error Types
// ═══════════════════════════════════════════════════════════════════════════════

impl From<serde_json::Error> for SmaError {
    fn from(error: serde_json::Error) -> Self {
        let code = if error.is_syntax() || error.is_data() || error.is_eof() {
            ErrorCode::DeserializationError
        } else {
            ErrorCode::SerializationError
        };

        Self::with_internal(code, "Failed to process JSON data", error.to_string())
            .with_source(error)
    }
}

impl From<tokio::time::error::Elapsed> for SmaError {
    fn from(error: tokio::time::error::Elapsed) -> Self {
        Self::with_internal(
            ErrorCode::TimeLimitExceeded,
            "Time limit exceeded",
            error.to_string(),
        )
        .with_source(error)
    }
}

impl From<anyhow::Error> for SmaError {
    fn from(error: anyhow::Error) -> Self {
        match error.downcast::<SmaError>() {
            Ok(sma_error) => sma_error,
            Err(error) => Self::with_internal(
                ErrorCode::InternalError,
                "An internal error occurred",
                error.to_string(),
            ),
        }
    }
}

impl From<config::ConfigError> for SmaError {
    fn from(error: config::ConfigError) -> Self {
        let (code, user_msg) = match &error {
            config::ConfigError::NotFound(_) => (
                ErrorCode::MissingConfiguration,
                "Required configuration not found",
            ),
            config::ConfigError::PathParse(_) | config::ConfigError::FileParse { .. } => (
                ErrorCode::InvalidConfiguration,
                "Configuration file is invalid",
            ),
            _ => (
                ErrorCode::ConfigurationError,
                "Configuration error occurred",
            ),
        };

        Self::with_internal(code, user_msg, error.to_string())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Convenience Constructors for Domain Errors
// ═══════════════════════════════════════════════════════════════════════════════

impl SmaError {
    // ─────────────────────────────────────────────────────────────────────────
    // Admission Errors
    // ─────────────────────────────────────────────────────────────────────────

    /// The operation waited in the admission queue past its deadline.
    pub fn queue_timeout(waited_ms: u64, queue_timeout_ms: u64) -> Self {
        Self::new(
            ErrorCode::QueueTimeout,
            "Service temporarily overloaded, please retry",
        )
        .with_internal_message(format!(
            "Queued for {}ms without a free slot (queue timeout {}ms)",
            waited_ms, queue_timeout_ms
        ))
        .with_details(
            ErrorDetails::new()
                .with_context("waited_ms", waited_ms)
                .with_context("queue_timeout_ms", queue_timeout_ms)
                .with_retry_after(queue_timeout_ms.div_ceil(1000).max(1)),
        )
    }

    /// The admitted operation did not finish within the request timeout.
    pub fn request_timeout(timeout_ms: u64) -> Self {
        Self::new(ErrorCode::RequestTimeout, "Request timed out")
            .with_internal_message(format!("Operation exceeded {}ms", timeout_ms))
            .with_context("timeout_ms", timeout_ms)
    }

    /// The operation itself failed.
    pub fn operation_failed(reason: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::OperationFailed,
            "The operation failed",
            reason.into(),
        )
    }

    /// The admission controller no longer accepts work.
    pub fn shutting_down() -> Self {
        Self::new(ErrorCode::ShuttingDown, "Service is shutting down")
            .with_details(ErrorDetails::new().with_retry_after(5))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Retry Errors
    // ─────────────────────────────────────────────────────────────────────────

    /// No retry job with this id.
    pub fn job_not_found(job_id: impl fmt::Display) -> Self {
        let id = job_id.to_string();
        Self::new(ErrorCode::JobNotFound, format!("Retry job not found: {}", id))
            .with_details(ErrorDetails::new().with_entity("retry_job", id))
    }

    /// A retry attempt failed. The message becomes the job's `last_error`.
    pub fn job_handler_failed(job_id: impl fmt::Display, message: impl Into<String>) -> Self {
        Self::with_internal(ErrorCode::JobHandlerFailed, "Job handler failed", message.into())
            .with_details(ErrorDetails::new().with_entity("retry_job", job_id.to_string()))
    }

    /// A retry job used up its attempts.
    pub fn job_exhausted(job_id: impl fmt::Display, attempts: u32) -> Self {
        Self::new(ErrorCode::JobExhausted, "Retry attempts exhausted")
            .with_internal_message(format!("Job gave up after {} attempts", attempts))
            .with_details(ErrorDetails::new().with_entity("retry_job", job_id.to_string()))
    }

    /// No handler registered for a job kind.
    pub fn handler_not_registered(kind: impl fmt::Display) -> Self {
        let kind = kind.to_string();
        Self::new(
            ErrorCode::HandlerNotRegistered,
            format!("No job handler registered for kind: {}", kind),
        )
        .with_context("kind", kind)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidConfiguration, message.into())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_http_status() {
        assert_eq!(
            ErrorCode::RequestTimeout.http_status(),
            StatusCode::REQUEST_TIMEOUT
        );
        assert_eq!(
            ErrorCode::QueueTimeout.http_status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ErrorCode::OperationFailed.http_status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(ErrorCode::JobNotFound.http_status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_error_code_is_retryable() {
        assert!(ErrorCode::QueueTimeout.is_retryable());
        assert!(ErrorCode::RequestTimeout.is_retryable());
        assert!(!ErrorCode::ValidationError.is_retryable());
        assert!(!ErrorCode::JobNotFound.is_retryable());
    }

    #[test]
    fn test_error_code_category() {
        assert_eq!(ErrorCode::QueueTimeout.category(), "admission");
        assert_eq!(ErrorCode::JobExhausted.category(), "retry");
        assert_eq!(ErrorCode::InvalidConfiguration.category(), "configuration");
    }

    #[test]
    fn test_queue_timeout_carries_retry_after() {
        let error = SmaError::queue_timeout(10_000, 10_000);
        assert!(error.is_queue_timeout());
        assert_eq!(error.details().retry_after_secs, Some(10));
        assert_eq!(error.user_message(), "Service temporarily overloaded, please retry");
    }

    #[test]
    fn test_queue_timeout_retry_after_rounds_up() {
        let error = SmaError::queue_timeout(250, 250);
        assert_eq!(error.details().retry_after_secs, Some(1));
    }

    #[test]
    fn test_request_timeout() {
        let error = SmaError::request_timeout(30_000);
        assert!(error.is_request_timeout());
        assert!(!error.is_queue_timeout());
        assert_eq!(error.http_status(), StatusCode::REQUEST_TIMEOUT);
    }

    #[tokio::test]
    async fn test_elapsed_is_not_request_timeout() {
        let elapsed = tokio::time::timeout(
            std::time::Duration::from_millis(1),
            std::future::pending::<()>(),
        )
        .await
        .unwrap_err();

        let error = SmaError::from(elapsed);
        assert_eq!(error.code(), ErrorCode::TimeLimitExceeded);
        assert!(!error.is_request_timeout());
        assert_eq!(error.http_status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn test_error_context() {
        let error = SmaError::new(ErrorCode::ValidationError, "Invalid input")
            .with_context("field", "max_attempts")
            .with_context("reason", "must be positive");

        assert!(error.details().context.contains_key("field"));
        assert!(error.details().context.contains_key("reason"));
    }

    #[test]
    fn test_error_response_serialization() {
        let error = SmaError::validation("max_attempts must be at least 1");
        let response = ErrorResponse::from(&error);

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("VALIDATION_ERROR"));
        assert!(json.contains("max_attempts must be at least 1"));
    }

    #[test]
    fn test_into_response_sets_retry_after() {
        let response = SmaError::queue_timeout(3_000, 3_000).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            response.headers().get(header::RETRY_AFTER).unwrap(),
            "3"
        );

        let response = SmaError::request_timeout(100).into_response();
        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
        assert!(response.headers().get(header::RETRY_AFTER).is_none());
    }

    #[test]
    fn test_error_severity() {
        assert_eq!(
            ErrorSeverity::from_code(&ErrorCode::ValidationError),
            ErrorSeverity::Low
        );
        assert_eq!(
            ErrorSeverity::from_code(&ErrorCode::QueueTimeout),
            ErrorSeverity::Medium
        );
        assert_eq!(
            ErrorSeverity::from_code(&ErrorCode::OperationFailed),
            ErrorSeverity::High
        );
        assert_eq!(
            ErrorSeverity::from_code(&ErrorCode::InternalError),
            ErrorSeverity::Critical
        );
    }

    #[test]
    fn test_option_context() {
        let missing: Option<u32> = None;
        let error = missing.context("job 42").unwrap_err();
        assert_eq!(error.code(), ErrorCode::JobNotFound);
    }

    #[test]
    fn test_error_display() {
        let error = SmaError::operation_failed("upstream returned 502");

        let display = format!("{}", error);
        assert!(display.contains("OperationFailed"));
        assert!(display.contains("The operation failed"));
        assert!(display.contains("upstream returned 502"));
    }
}
