//! Error taxonomy for price aggregation
//!
//! Every [`OracleError`] knows whether it is worth retrying and how long the
//! caller should wait first. Retry loops ask the error; they never match on
//! codes themselves.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, OracleError>;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

const RATE_LIMIT_FALLBACK: Duration = Duration::from_millis(5_000);
const SERVER_ERROR_DELAY: Duration = Duration::from_millis(3_000);
const BASE_NETWORK_DELAY: Duration = Duration::from_millis(1_000);
const ROUND_RETRY_DELAY: Duration = Duration::from_millis(2_000);

/// Top-level family an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorDomain {
    Network,
    Api,
    Validation,
    Configuration,
    Aggregation,
}

impl fmt::Display for ErrorDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorDomain::Network => "network",
            ErrorDomain::Api => "api",
            ErrorDomain::Validation => "validation",
            ErrorDomain::Configuration => "configuration",
            ErrorDomain::Aggregation => "aggregation",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetworkKind {
    Timeout,
    ConnectionFailed,
    Unreachable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiKind {
    RateLimited,
    Unauthorized,
    NotFound,
    ServerError,
    InvalidResponse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidationKind {
    MissingField,
    InvalidData,
    OutOfRange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigKind {
    NoProviders,
    ProviderNotFound,
    InvalidProvider,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregationKind {
    RoundsExhausted,
    ZeroWeight,
    NoPrices,
}

/// Flat code for logs and metrics export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NetworkTimeout,
    NetworkConnectionFailed,
    NetworkUnreachable,
    ApiRateLimited,
    ApiUnauthorized,
    ApiNotFound,
    ApiServerError,
    ApiInvalidResponse,
    ValidationMissingField,
    ValidationInvalidData,
    ValidationOutOfRange,
    ConfigNoProviders,
    ConfigProviderNotFound,
    ConfigInvalidProvider,
    AggregationRoundsExhausted,
    AggregationZeroWeight,
    AggregationNoPrices,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            ErrorCode::NetworkTimeout => "NETWORK_TIMEOUT",
            ErrorCode::NetworkConnectionFailed => "NETWORK_CONNECTION_FAILED",
            ErrorCode::NetworkUnreachable => "NETWORK_UNREACHABLE",
            ErrorCode::ApiRateLimited => "API_RATE_LIMITED",
            ErrorCode::ApiUnauthorized => "API_UNAUTHORIZED",
            ErrorCode::ApiNotFound => "API_NOT_FOUND",
            ErrorCode::ApiServerError => "API_SERVER_ERROR",
            ErrorCode::ApiInvalidResponse => "API_INVALID_RESPONSE",
            ErrorCode::ValidationMissingField => "VALIDATION_MISSING_FIELD",
            ErrorCode::ValidationInvalidData => "VALIDATION_INVALID_DATA",
            ErrorCode::ValidationOutOfRange => "VALIDATION_OUT_OF_RANGE",
            ErrorCode::ConfigNoProviders => "CONFIG_NO_PROVIDERS",
            ErrorCode::ConfigProviderNotFound => "CONFIG_PROVIDER_NOT_FOUND",
            ErrorCode::ConfigInvalidProvider => "CONFIG_INVALID_PROVIDER",
            ErrorCode::AggregationRoundsExhausted => "AGGREGATION_ROUNDS_EXHAUSTED",
            ErrorCode::AggregationZeroWeight => "AGGREGATION_ZERO_WEIGHT",
            ErrorCode::AggregationNoPrices => "AGGREGATION_NO_PRICES",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

/// Where an error happened, carried for observability.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
    pub operation: String,
    pub exchange: Option<String>,
    pub severity: Severity,
    pub http_status: Option<u16>,
    /// Server-requested wait, parsed from `Retry-After`.
    pub retry_after: Option<Duration>,
}

impl ErrorContext {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            ..Self::default()
        }
    }

    pub fn with_exchange(mut self, exchange: impl Into<String>) -> Self {
        self.exchange = Some(exchange.into());
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    pub fn with_retry_after(mut self, retry_after: Option<Duration>) -> Self {
        self.retry_after = retry_after;
        self
    }
}

/// Errors raised while fetching, validating and aggregating prices.
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("{message}")]
    Network {
        kind: NetworkKind,
        message: String,
        context: ErrorContext,
        #[source]
        cause: Option<BoxError>,
    },

    #[error("{message}")]
    Api {
        kind: ApiKind,
        message: String,
        context: ErrorContext,
        #[source]
        cause: Option<BoxError>,
    },

    #[error("{message}")]
    Validation {
        kind: ValidationKind,
        message: String,
        context: ErrorContext,
    },

    #[error("{message}")]
    Configuration {
        kind: ConfigKind,
        message: String,
        context: ErrorContext,
    },

    #[error("{message}")]
    Aggregation {
        kind: AggregationKind,
        message: String,
        context: ErrorContext,
    },
}

impl OracleError {
    pub fn network(kind: NetworkKind, message: impl Into<String>, context: ErrorContext) -> Self {
        Self::Network {
            kind,
            message: message.into(),
            context,
            cause: None,
        }
    }

    pub fn api(kind: ApiKind, message: impl Into<String>, context: ErrorContext) -> Self {
        Self::Api {
            kind,
            message: message.into(),
            context,
            cause: None,
        }
    }

    pub fn validation(
        kind: ValidationKind,
        message: impl Into<String>,
        context: ErrorContext,
    ) -> Self {
        Self::Validation {
            kind,
            message: message.into(),
            context,
        }
    }

    pub fn configuration(kind: ConfigKind, message: impl Into<String>, context: ErrorContext) -> Self {
        Self::Configuration {
            kind,
            message: message.into(),
            context: context.with_severity(Severity::Critical),
        }
    }

    pub fn aggregation(
        kind: AggregationKind,
        message: impl Into<String>,
        context: ErrorContext,
    ) -> Self {
        Self::Aggregation {
            kind,
            message: message.into(),
            context: context.with_severity(Severity::High),
        }
    }

    /// Attach the underlying failure. Only network and API errors wrap a cause.
    pub fn with_cause(mut self, error: impl std::error::Error + Send + Sync + 'static) -> Self {
        match &mut self {
            Self::Network { cause, .. } | Self::Api { cause, .. } => {
                *cause = Some(Box::new(error));
            }
            _ => {}
        }
        self
    }

    /// Rewrite the message, keeping code and context.
    pub fn map_message(mut self, f: impl FnOnce(&str) -> String) -> Self {
        match &mut self {
            Self::Network { message, .. }
            | Self::Api { message, .. }
            | Self::Validation { message, .. }
            | Self::Configuration { message, .. }
            | Self::Aggregation { message, .. } => {
                *message = f(message);
            }
        }
        self
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Network { kind, .. } => match kind {
                NetworkKind::Timeout => ErrorCode::NetworkTimeout,
                NetworkKind::ConnectionFailed => ErrorCode::NetworkConnectionFailed,
                NetworkKind::Unreachable => ErrorCode::NetworkUnreachable,
            },
            Self::Api { kind, .. } => match kind {
                ApiKind::RateLimited => ErrorCode::ApiRateLimited,
                ApiKind::Unauthorized => ErrorCode::ApiUnauthorized,
                ApiKind::NotFound => ErrorCode::ApiNotFound,
                ApiKind::ServerError => ErrorCode::ApiServerError,
                ApiKind::InvalidResponse => ErrorCode::ApiInvalidResponse,
            },
            Self::Validation { kind, .. } => match kind {
                ValidationKind::MissingField => ErrorCode::ValidationMissingField,
                ValidationKind::InvalidData => ErrorCode::ValidationInvalidData,
                ValidationKind::OutOfRange => ErrorCode::ValidationOutOfRange,
            },
            Self::Configuration { kind, .. } => match kind {
                ConfigKind::NoProviders => ErrorCode::ConfigNoProviders,
                ConfigKind::ProviderNotFound => ErrorCode::ConfigProviderNotFound,
                ConfigKind::InvalidProvider => ErrorCode::ConfigInvalidProvider,
            },
            Self::Aggregation { kind, .. } => match kind {
                AggregationKind::RoundsExhausted => ErrorCode::AggregationRoundsExhausted,
                AggregationKind::ZeroWeight => ErrorCode::AggregationZeroWeight,
                AggregationKind::NoPrices => ErrorCode::AggregationNoPrices,
            },
        }
    }

    pub fn domain(&self) -> ErrorDomain {
        match self {
            Self::Network { .. } => ErrorDomain::Network,
            Self::Api { .. } => ErrorDomain::Api,
            Self::Validation { .. } => ErrorDomain::Validation,
            Self::Configuration { .. } => ErrorDomain::Configuration,
            Self::Aggregation { .. } => ErrorDomain::Aggregation,
        }
    }

    pub fn context(&self) -> &ErrorContext {
        match self {
            Self::Network { context, .. }
            | Self::Api { context, .. }
            | Self::Validation { context, .. }
            | Self::Configuration { context, .. }
            | Self::Aggregation { context, .. } => context,
        }
    }

    pub fn exchange(&self) -> Option<&str> {
        self.context().exchange.as_deref()
    }

    /// Server-requested wait, if the upstream sent one.
    pub fn retry_after(&self) -> Option<Duration> {
        self.context().retry_after
    }

    pub fn is_retryable(&self) -> bool {
        self.retry_delay().is_some()
    }

    /// Suggested wait before retrying, or `None` when retrying cannot help.
    pub fn retry_delay(&self) -> Option<Duration> {
        match self.code() {
            ErrorCode::NetworkTimeout => Some(BASE_NETWORK_DELAY * 2),
            ErrorCode::NetworkConnectionFailed => Some(BASE_NETWORK_DELAY * 3),
            ErrorCode::NetworkUnreachable => Some(BASE_NETWORK_DELAY),
            ErrorCode::ApiRateLimited => Some(self.retry_after().unwrap_or(RATE_LIMIT_FALLBACK)),
            ErrorCode::ApiServerError => Some(SERVER_ERROR_DELAY),
            ErrorCode::AggregationRoundsExhausted => Some(ROUND_RETRY_DELAY),
            ErrorCode::ApiUnauthorized
            | ErrorCode::ApiNotFound
            | ErrorCode::ApiInvalidResponse
            | ErrorCode::ValidationMissingField
            | ErrorCode::ValidationInvalidData
            | ErrorCode::ValidationOutOfRange
            | ErrorCode::ConfigNoProviders
            | ErrorCode::ConfigProviderNotFound
            | ErrorCode::ConfigInvalidProvider
            | ErrorCode::AggregationZeroWeight
            | ErrorCode::AggregationNoPrices => None,
        }
    }
}

/// Untyped failure as observed at the transport boundary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawFailure {
    pub message: String,
    pub status: Option<u16>,
    pub retry_after: Option<String>,
}

impl RawFailure {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    /// Non-2xx response. The message deliberately omits the body so that
    /// upstream text cannot trip the message markers.
    pub fn status(status: u16, retry_after: Option<String>) -> Self {
        Self {
            message: format!("HTTP status {}", status),
            status: Some(status),
            retry_after,
        }
    }
}

/// Parse a `Retry-After` header given in seconds.
///
/// The HTTP-date form is ignored; callers fall back to the default delay.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let seconds: f64 = value.trim().parse().ok()?;
    if !seconds.is_finite() || seconds < 0.0 {
        return None;
    }
    Some(Duration::from_millis((seconds * 1000.0).round() as u64))
}

const TIMEOUT_MARKERS: &[&str] = &["timed out", "timeout", "etimedout"];
const CONNECTION_MARKERS: &[&str] = &[
    "econnrefused",
    "connection refused",
    "connection failed",
    "failed to connect",
    "connection reset",
    "econnreset",
];
const UNREACHABLE_MARKERS: &[&str] = &["enotfound", "unreachable", "dns error"];
const RATE_LIMIT_MARKERS: &[&str] = &["rate limit", "too many requests", "too many visits"];

fn contains_any(haystack: &str, markers: &[&str]) -> bool {
    markers.iter().any(|marker| haystack.contains(marker))
}

/// Map a raw failure into a typed error.
///
/// First match wins: timeout, connection, unreachable, rate limit markers in
/// the message, then the HTTP status.
pub fn classify(raw: &RawFailure, context: ErrorContext) -> OracleError {
    let lowered = raw.message.to_ascii_lowercase();
    let label = context.exchange.clone().unwrap_or_else(|| context.operation.clone());
    let message = format!("{}: {}", label, raw.message);
    let context = match raw.status {
        Some(status) => context.with_status(status),
        None => context,
    };

    if contains_any(&lowered, TIMEOUT_MARKERS) {
        return OracleError::network(NetworkKind::Timeout, message, context);
    }
    if contains_any(&lowered, CONNECTION_MARKERS) {
        return OracleError::network(NetworkKind::ConnectionFailed, message, context);
    }
    if contains_any(&lowered, UNREACHABLE_MARKERS) {
        return OracleError::network(NetworkKind::Unreachable, message, context);
    }
    if raw.status == Some(429) || contains_any(&lowered, RATE_LIMIT_MARKERS) {
        let retry_after = raw.retry_after.as_deref().and_then(parse_retry_after);
        let context = context
            .with_retry_after(retry_after)
            .with_severity(Severity::Low);
        return OracleError::api(ApiKind::RateLimited, message, context);
    }

    match raw.status {
        Some(status) if status >= 500 => OracleError::api(ApiKind::ServerError, message, context),
        Some(404) => OracleError::api(ApiKind::NotFound, message, context),
        Some(401) | Some(403) => OracleError::api(
            ApiKind::Unauthorized,
            message,
            context.with_severity(Severity::High),
        ),
        _ => OracleError::api(ApiKind::InvalidResponse, message, context),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ErrorContext {
        ErrorContext::new("get_price").with_exchange("Binance")
    }

    #[test]
    fn timeout_marker_wins_over_status() {
        let raw = RawFailure {
            message: "request timed out after 10000ms".to_string(),
            status: Some(503),
            retry_after: None,
        };
        let err = classify(&raw, ctx());
        assert_eq!(err.code(), ErrorCode::NetworkTimeout);
        assert_eq!(err.retry_delay(), Some(Duration::from_millis(2_000)));
    }

    #[test]
    fn connection_refused_is_retryable_with_longer_delay() {
        let err = classify(&RawFailure::message("connect ECONNREFUSED 127.0.0.1:443"), ctx());
        assert_eq!(err.code(), ErrorCode::NetworkConnectionFailed);
        assert_eq!(err.retry_delay(), Some(Duration::from_millis(3_000)));
    }

    #[test]
    fn rate_limit_uses_retry_after_header() {
        let err = classify(&RawFailure::status(429, Some("7".to_string())), ctx());
        assert_eq!(err.code(), ErrorCode::ApiRateLimited);
        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
        assert_eq!(err.retry_delay(), Some(Duration::from_secs(7)));
    }

    #[test]
    fn rate_limit_without_header_falls_back() {
        let err = classify(&RawFailure::message("EAPI:Rate limit exceeded"), ctx());
        assert_eq!(err.code(), ErrorCode::ApiRateLimited);
        assert_eq!(err.retry_delay(), Some(Duration::from_millis(5_000)));
    }

    #[test]
    fn status_table() {
        let cases = [
            (500, ErrorCode::ApiServerError, true),
            (502, ErrorCode::ApiServerError, true),
            (404, ErrorCode::ApiNotFound, false),
            (401, ErrorCode::ApiUnauthorized, false),
            (403, ErrorCode::ApiUnauthorized, false),
            (400, ErrorCode::ApiInvalidResponse, false),
        ];
        for (status, code, retryable) in cases {
            let err = classify(&RawFailure::status(status, None), ctx());
            assert_eq!(err.code(), code, "status {}", status);
            assert_eq!(err.is_retryable(), retryable, "status {}", status);
            assert_eq!(err.context().http_status, Some(status));
        }
    }

    #[test]
    fn context_carries_exchange_and_operation() {
        let err = classify(&RawFailure::status(500, None), ctx());
        assert_eq!(err.exchange(), Some("Binance"));
        assert_eq!(err.context().operation, "get_price");
        assert!(err.to_string().starts_with("Binance:"));
    }

    #[test]
    fn retry_after_parsing() {
        assert_eq!(parse_retry_after("2"), Some(Duration::from_secs(2)));
        assert_eq!(parse_retry_after(" 1.5 "), Some(Duration::from_millis(1_500)));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
        assert_eq!(parse_retry_after("-1"), None);
    }

    #[test]
    fn terminal_errors_are_not_retryable() {
        let err = OracleError::validation(ValidationKind::OutOfRange, "too high", ctx());
        assert!(!err.is_retryable());
        let err = OracleError::configuration(ConfigKind::NoProviders, "none", ErrorContext::new("x"));
        assert!(!err.is_retryable());
        assert_eq!(err.context().severity, Severity::Critical);
    }

    #[test]
    fn map_message_keeps_code() {
        let err = classify(&RawFailure::status(500, None), ctx()).map_message(|m| format!("{m} (pair BTCUSDT)"));
        assert_eq!(err.code(), ErrorCode::ApiServerError);
        assert!(err.to_string().ends_with("(pair BTCUSDT)"));
    }
}
