//! Error classification, severity, and retry/backoff policy (C6).
//!
//! Grounded on `original_source/src/retrovue/importers/plex/error_handling.py`:
//! same taxonomy, same severity table, same per-kind retry attempts/base
//! delays, same jitter formula.

use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    Authentication,
    FileAccess,
    Validation,
    Database,
    Parsing,
    Timeout,
    Unknown,
}

impl ErrorKind {
    /// Best-effort classification from a free-text message, the way the
    /// Python original keyword-matches on `str(exception)`.
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();
        let any = |keywords: &[&str]| keywords.iter().any(|k| lower.contains(k));

        if any(&["connection", "network", "unreachable"]) {
            ErrorKind::Network
        } else if any(&["auth", "token", "unauthorized", "forbidden"]) {
            ErrorKind::Authentication
        } else if any(&["file", "path", "permission", "not found", "access denied"]) {
            ErrorKind::FileAccess
        } else if any(&["database", "sql", "constraint", "integrity"]) {
            ErrorKind::Database
        } else if any(&["validation", "invalid", "format", "codec"]) {
            ErrorKind::Validation
        } else if any(&["parse", "json", "xml", "decode"]) {
            ErrorKind::Parsing
        } else if lower.contains("timeout") {
            ErrorKind::Timeout
        } else {
            ErrorKind::Unknown
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            ErrorKind::Authentication => ErrorSeverity::Critical,
            ErrorKind::Database | ErrorKind::Network => ErrorSeverity::High,
            ErrorKind::FileAccess | ErrorKind::Timeout => ErrorSeverity::Medium,
            ErrorKind::Validation | ErrorKind::Parsing => ErrorSeverity::Low,
            ErrorKind::Unknown => ErrorSeverity::Medium,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            ErrorKind::Network => RetryPolicy::new(5, 2.0),
            ErrorKind::Timeout => RetryPolicy::new(3, 5.0),
            ErrorKind::Database => RetryPolicy::new(3, 1.0),
            ErrorKind::FileAccess => RetryPolicy::new(2, 1.0),
            ErrorKind::Unknown => RetryPolicy::new(2, 2.0),
            ErrorKind::Authentication | ErrorKind::Validation | ErrorKind::Parsing => {
                RetryPolicy::new(1, 0.0)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// Exponential backoff with jitter, capped at 60s, keyed by [`ErrorKind`].
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    const EXPONENT_BASE: f64 = 2.0;

    fn new(max_attempts: u32, base_delay_secs: f64) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::from_secs_f64(base_delay_secs),
            max_delay: Duration::from_secs(60),
        }
    }

    /// Delay before the given 1-based attempt. `attempt <= 1` never waits.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exponent = (attempt - 1) as i32;
        let raw = self.base_delay.as_secs_f64() * Self::EXPONENT_BASE.powi(exponent);
        let capped = raw.min(self.max_delay.as_secs_f64());
        let jitter = rand::rng().random_range(0.5..1.5);
        Duration::from_secs_f64((capped * jitter).min(self.max_delay.as_secs_f64()))
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorContext {
    pub operation: String,
    pub item_title: Option<String>,
    pub server_id: Option<i64>,
    pub library_id: Option<i64>,
    pub file_path: Option<String>,
}

impl ErrorContext {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            item_title: None,
            server_id: None,
            library_id: None,
            file_path: None,
        }
    }

    pub fn with_item_title(mut self, title: impl Into<String>) -> Self {
        self.item_title = Some(title.into());
        self
    }

    pub fn with_library(mut self, server_id: i64, library_id: i64) -> Self {
        self.server_id = Some(server_id);
        self.library_id = Some(library_id);
        self
    }

    pub fn with_file_path(mut self, path: impl Into<String>) -> Self {
        self.file_path = Some(path.into());
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub severity: ErrorSeverity,
    pub message: String,
    pub context: ErrorContext,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

#[derive(Debug, Default, Serialize)]
pub struct ErrorSummary {
    pub total: usize,
    pub by_kind: Vec<(ErrorKind, usize)>,
    pub by_severity: Vec<(ErrorSeverity, usize)>,
}

/// Records handled errors and answers aggregate questions about them.
///
/// Classification/severity/retry policy are pure functions on [`ErrorKind`];
/// this struct only owns the append-only log, the way the Python
/// `ErrorHandler.error_records` list does.
#[derive(Debug, Default)]
pub struct ErrorHandler {
    records: Vec<ErrorRecord>,
}

impl ErrorHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify and record an error. Returns the record so callers can log
    /// or act on its severity immediately.
    pub fn handle(&mut self, message: impl Into<String>, context: ErrorContext) -> ErrorRecord {
        let message = message.into();
        let kind = ErrorKind::classify(&message);
        let severity = kind.severity();
        let record = ErrorRecord {
            kind,
            severity,
            message,
            context,
            timestamp: OffsetDateTime::now_utc(),
        };
        if severity >= ErrorSeverity::High {
            tracing::error!(kind = ?record.kind, op = %record.context.operation, "{}", record.message);
        } else {
            tracing::warn!(kind = ?record.kind, op = %record.context.operation, "{}", record.message);
        }
        self.records.push(record.clone());
        record
    }

    /// Aggregate recorded errors since `since`.
    pub fn summary_since(&self, since: OffsetDateTime) -> ErrorSummary {
        let mut summary = ErrorSummary::default();
        let mut by_kind: Vec<(ErrorKind, usize)> = Vec::new();
        let mut by_severity: Vec<(ErrorSeverity, usize)> = Vec::new();

        for record in self.records.iter().filter(|r| r.timestamp >= since) {
            summary.total += 1;
            match by_kind.iter_mut().find(|(k, _)| *k == record.kind) {
                Some((_, count)) => *count += 1,
                None => by_kind.push((record.kind, 1)),
            }
            match by_severity.iter_mut().find(|(s, _)| *s == record.severity) {
                Some((_, count)) => *count += 1,
                None => by_severity.push((record.severity, 1)),
            }
        }
        summary.by_kind = by_kind;
        summary.by_severity = by_severity;
        summary
    }

    pub fn records(&self) -> &[ErrorRecord] {
        &self.records
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_by_keyword() {
        assert_eq!(
            ErrorKind::classify("connection refused by peer"),
            ErrorKind::Network
        );
        assert_eq!(
            ErrorKind::classify("unauthorized: bad token"),
            ErrorKind::Authentication
        );
        assert_eq!(
            ErrorKind::classify("unsupported codec in stream"),
            ErrorKind::Validation
        );
        assert_eq!(ErrorKind::classify("flux capacitor exploded"), ErrorKind::Unknown);
    }

    #[test]
    fn authentication_is_always_critical_and_not_retried() {
        assert_eq!(ErrorKind::Authentication.severity(), ErrorSeverity::Critical);
        let policy = ErrorKind::Authentication.retry_policy();
        assert_eq!(policy.max_attempts, 1);
        assert!(!policy.should_retry(1));
    }

    #[test]
    fn backoff_grows_and_is_capped() {
        let policy = ErrorKind::Network.retry_policy();
        let d2 = policy.delay_for_attempt(2).as_secs_f64();
        let d3 = policy.delay_for_attempt(3).as_secs_f64();
        // jitter is +/-50%, so only assert on the un-jittered floor/ceiling bounds
        assert!(d2 >= 2.0 * 0.5 && d2 <= 2.0 * 1.5);
        assert!(d3 >= 4.0 * 0.5 && d3 <= 4.0 * 1.5);
        let policy = ErrorKind::Timeout.retry_policy();
        let d_far = policy.delay_for_attempt(20).as_secs_f64();
        assert!(d_far <= 60.0);
    }

    #[test]
    fn first_attempt_never_waits() {
        let policy = ErrorKind::Network.retry_policy();
        assert_eq!(policy.delay_for_attempt(1), Duration::ZERO);
    }

    #[test]
    fn summary_aggregates_by_kind_and_severity() {
        let mut handler = ErrorHandler::new();
        let since = OffsetDateTime::now_utc() - time::Duration::seconds(1);
        handler.handle("connection refused", ErrorContext::new("fetch"));
        handler.handle("connection refused again", ErrorContext::new("fetch"));
        handler.handle("invalid codec", ErrorContext::new("validate"));
        let summary = handler.summary_since(since);
        assert_eq!(summary.total, 3);
        assert!(summary
            .by_kind
            .iter()
            .any(|(k, c)| *k == ErrorKind::Network && *c == 2));
    }
}
