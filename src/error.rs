//! Error types for the analytics subsystem.
//!
//! All fallible operations return [`AnalyticsResult`]. Errors carry a
//! structured [`ErrorContext`] so batch logs can be correlated back to a
//! specific site and indicator.

use std::fmt;

/// Result type for analytics operations.
pub type AnalyticsResult<T> = Result<T, AnalyticsError>;

/// Structured context attached to every error.
///
/// Provides additional information about where and why an error occurred.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    /// The operation being performed (e.g., "compute_one", "resolve_site")
    pub operation: Option<String>,
    /// The site the operation was running against
    pub site_code: Option<String>,
    /// The indicator involved, if any
    pub indicator_id: Option<String>,
    /// Additional details about the error
    pub details: Option<String>,
    /// Whether this error is retryable
    pub retryable: bool,
}

impl ErrorContext {
    /// Create a new error context with an operation name.
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: Some(operation.into()),
            ..Default::default()
        }
    }

    /// Set the site code.
    pub fn with_site(mut self, site_code: impl Into<String>) -> Self {
        self.site_code = Some(site_code.into());
        self
    }

    /// Set the indicator id.
    pub fn with_indicator(mut self, indicator_id: impl Into<String>) -> Self {
        self.indicator_id = Some(indicator_id.into());
        self
    }

    /// Set additional details.
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Mark this error as retryable.
    pub fn retryable(mut self) -> Self {
        self.retryable = true;
        self
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(ref op) = self.operation {
            parts.push(format!("operation={}", op));
        }
        if let Some(ref site) = self.site_code {
            parts.push(format!("site={}", site));
        }
        if let Some(ref ind) = self.indicator_id {
            parts.push(format!("indicator={}", ind));
        }
        if let Some(ref details) = self.details {
            parts.push(format!("details={}", details));
        }
        if self.retryable {
            parts.push("retryable=true".to_string());
        }
        write!(f, "[{}]", parts.join(", "))
    }
}

/// Error type for the analytics subsystem.
///
/// The taxonomy separates errors by how callers should react: `SiteNotFound`
/// and `UnknownIndicator` are surfaced immediately, `ConnectionError` and
/// `Timeout` are retried at the next scheduling tick, and
/// `ComputationError` is isolated per indicator inside a batch.
#[derive(Debug, thiserror::Error)]
pub enum AnalyticsError {
    /// Unknown site code, or the site has been deactivated.
    #[error("Site not found: {code} {context}")]
    SiteNotFound { code: String, context: ErrorContext },

    /// A connection pool could not be created or used.
    #[error("Connection error: {message} {context}")]
    ConnectionError {
        message: String,
        context: ErrorContext,
    },

    /// Indicator id not present in the catalog.
    #[error("Unknown indicator: {id} {context}")]
    UnknownIndicator { id: String, context: ErrorContext },

    /// Indicator exists but has been disabled by an operator.
    #[error("Indicator disabled: {id} {context}")]
    IndicatorDisabled { id: String, context: ErrorContext },

    /// A specific indicator's query or logic failed for one site.
    #[error("Indicator computation failed: {message} {context}")]
    ComputationError {
        message: String,
        context: ErrorContext,
    },

    /// The result cache could not be read or written.
    #[error("Cache error: {message} {context}")]
    CacheError {
        message: String,
        context: ErrorContext,
    },

    /// A required backend capability is not configured.
    #[error("Not implemented: {message} {context}")]
    NotImplemented {
        message: String,
        context: ErrorContext,
    },

    /// SQL query execution errors against the administrative database.
    #[error("Query error: {message} {context}")]
    QueryError {
        message: String,
        context: ErrorContext,
    },

    /// Input validation failed before execution.
    #[error("Validation error: {message} {context}")]
    Validation {
        message: String,
        context: ErrorContext,
    },

    /// Configuration or initialization error.
    #[error("Configuration error: {message} {context}")]
    ConfigurationError {
        message: String,
        context: ErrorContext,
    },

    /// An operation exceeded its deadline.
    #[error("Timeout: {message} {context}")]
    Timeout {
        message: String,
        context: ErrorContext,
    },

    /// Internal/unexpected errors.
    #[error("Internal error: {message} {context}")]
    Internal {
        message: String,
        context: ErrorContext,
    },
}

impl AnalyticsError {
    /// Create a site-not-found error.
    pub fn site_not_found(code: impl Into<String>) -> Self {
        Self::SiteNotFound {
            code: code.into(),
            context: ErrorContext::default(),
        }
    }

    /// Create a connection error. Connection errors are retryable at the
    /// next natural scheduling tick.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::ConnectionError {
            message: message.into(),
            context: ErrorContext::default().retryable(),
        }
    }

    /// Create a connection error with full context.
    pub fn connection_with_context(message: impl Into<String>, context: ErrorContext) -> Self {
        Self::ConnectionError {
            message: message.into(),
            context: context.retryable(),
        }
    }

    /// Create an unknown-indicator error.
    pub fn unknown_indicator(id: impl Into<String>) -> Self {
        Self::UnknownIndicator {
            id: id.into(),
            context: ErrorContext::default(),
        }
    }

    /// Create an indicator-disabled error.
    pub fn indicator_disabled(id: impl Into<String>) -> Self {
        Self::IndicatorDisabled {
            id: id.into(),
            context: ErrorContext::default(),
        }
    }

    /// Create a computation error.
    pub fn computation(message: impl Into<String>) -> Self {
        Self::ComputationError {
            message: message.into(),
            context: ErrorContext::default(),
        }
    }

    /// Create a computation error with context.
    pub fn computation_with_context(message: impl Into<String>, context: ErrorContext) -> Self {
        Self::ComputationError {
            message: message.into(),
            context,
        }
    }

    /// Create a cache error.
    pub fn cache(message: impl Into<String>) -> Self {
        Self::CacheError {
            message: message.into(),
            context: ErrorContext::default(),
        }
    }

    /// Create a not-implemented error.
    pub fn not_implemented(message: impl Into<String>) -> Self {
        Self::NotImplemented {
            message: message.into(),
            context: ErrorContext::default(),
        }
    }

    /// Create a query error.
    pub fn query(message: impl Into<String>) -> Self {
        Self::QueryError {
            message: message.into(),
            context: ErrorContext::default(),
        }
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            context: ErrorContext::default(),
        }
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::ConfigurationError {
            message: message.into(),
            context: ErrorContext::default(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
            context: ErrorContext::default().retryable(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            context: ErrorContext::default(),
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        self.context().retryable
    }

    /// Get the error context.
    pub fn context(&self) -> &ErrorContext {
        match self {
            Self::SiteNotFound { context, .. }
            | Self::ConnectionError { context, .. }
            | Self::UnknownIndicator { context, .. }
            | Self::IndicatorDisabled { context, .. }
            | Self::ComputationError { context, .. }
            | Self::CacheError { context, .. }
            | Self::NotImplemented { context, .. }
            | Self::QueryError { context, .. }
            | Self::Validation { context, .. }
            | Self::ConfigurationError { context, .. }
            | Self::Timeout { context, .. }
            | Self::Internal { context, .. } => context,
        }
    }

    fn context_mut(&mut self) -> &mut ErrorContext {
        match self {
            Self::SiteNotFound { context, .. }
            | Self::ConnectionError { context, .. }
            | Self::UnknownIndicator { context, .. }
            | Self::IndicatorDisabled { context, .. }
            | Self::ComputationError { context, .. }
            | Self::CacheError { context, .. }
            | Self::NotImplemented { context, .. }
            | Self::QueryError { context, .. }
            | Self::Validation { context, .. }
            | Self::ConfigurationError { context, .. }
            | Self::Timeout { context, .. }
            | Self::Internal { context, .. } => context,
        }
    }

    /// Add or update the operation in the error context.
    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.context_mut().operation = Some(operation.into());
        self
    }

    /// Add or update the site code in the error context.
    pub fn with_site(mut self, site_code: impl Into<String>) -> Self {
        self.context_mut().site_code = Some(site_code.into());
        self
    }

    /// Add or update the indicator id in the error context.
    pub fn with_indicator(mut self, indicator_id: impl Into<String>) -> Self {
        self.context_mut().indicator_id = Some(indicator_id.into());
        self
    }
}

#[cfg(feature = "postgres-repo")]
impl From<diesel::result::Error> for AnalyticsError {
    fn from(err: diesel::result::Error) -> Self {
        match err {
            diesel::result::Error::NotFound => AnalyticsError::query("Record not found"),
            diesel::result::Error::DatabaseError(kind, info) => {
                let message = info.message().to_string();
                let context =
                    ErrorContext::default().with_details(format!("db_error_kind={:?}", kind));

                // Serialization failures clear up on a rerun.
                let is_retryable = matches!(
                    kind,
                    diesel::result::DatabaseErrorKind::SerializationFailure
                );

                let context = if is_retryable {
                    context.retryable()
                } else {
                    context
                };

                AnalyticsError::QueryError { message, context }
            }
            diesel::result::Error::DeserializationError(e) => {
                AnalyticsError::internal(format!("Deserialization error: {}", e))
            }
            diesel::result::Error::SerializationError(e) => {
                AnalyticsError::internal(format!("Serialization error: {}", e))
            }
            other => AnalyticsError::query(other.to_string()),
        }
    }
}

#[cfg(feature = "postgres-repo")]
impl From<diesel::r2d2::PoolError> for AnalyticsError {
    fn from(err: diesel::r2d2::PoolError) -> Self {
        AnalyticsError::connection_with_context(
            err.to_string(),
            ErrorContext::default().with_details("pool_error"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_display() {
        let ctx = ErrorContext::new("compute_one")
            .with_site("KIG001")
            .with_indicator("tx_curr");
        let rendered = ctx.to_string();
        assert!(rendered.contains("operation=compute_one"));
        assert!(rendered.contains("site=KIG001"));
        assert!(rendered.contains("indicator=tx_curr"));
    }

    #[test]
    fn test_connection_errors_are_retryable() {
        assert!(AnalyticsError::connection("refused").is_retryable());
        assert!(AnalyticsError::timeout("deadline").is_retryable());
        assert!(!AnalyticsError::site_not_found("XX").is_retryable());
        assert!(!AnalyticsError::computation("bad query").is_retryable());
    }

    #[test]
    fn test_with_site_and_indicator() {
        let err = AnalyticsError::computation("boom")
            .with_site("KIG001")
            .with_indicator("tx_new")
            .with_operation("compute_all");
        let ctx = err.context();
        assert_eq!(ctx.site_code.as_deref(), Some("KIG001"));
        assert_eq!(ctx.indicator_id.as_deref(), Some("tx_new"));
        assert_eq!(ctx.operation.as_deref(), Some("compute_all"));
    }
}
