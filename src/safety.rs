use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, warn};

use crate::error::SqlFluentError;

/// Longest raw expression accepted by the validator.
pub const MAX_RAW_EXPR_LEN: usize = 1000;

/// Default trace-log capacity (oldest entries dropped first).
pub const DEFAULT_TRACE_CAPACITY: usize = 100;

lazy_static! {
    // Characters a raw WHERE/HAVING expression may contain.
    static ref RAW_EXPR_CHARS: Regex =
        Regex::new(r#"^[A-Za-z0-9_\s.,'"()=<>!%*+\-/?:]+$"#).unwrap();

    // Statement terminators, comments and DDL have no business in a raw
    // predicate.
    static ref FORBIDDEN_PATTERNS: Regex = Regex::new(
        r"(?i)(;|--|/\*|\*/|#|`|\b(DROP|CREATE|ALTER|TRUNCATE|GRANT|REVOKE|EXEC|EXECUTE|SHUTDOWN)\b)"
    )
    .unwrap();

    // Screen for SQL keywords smuggled into what should be a plain column
    // name. Matches warn; they do not reject.
    static ref SUSPICIOUS_FIELD: Regex = Regex::new(
        r"(?i)(;|--|/\*|\b(UNION|SLEEP|BENCHMARK|LOAD_FILE|OUTFILE|INFORMATION_SCHEMA)\b)"
    )
    .unwrap();

    static ref STRING_LITERAL: Regex = Regex::new(r"'[^']*'").unwrap();
    static ref LONG_NUMBER: Regex = Regex::new(r"\b\d{5,}\b").unwrap();
}

fn parens_balanced(expr: &str) -> bool {
    let mut depth: i64 = 0;
    for c in expr.chars() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0
}

/// Strict validation applied to raw WHERE/HAVING expressions.
///
/// # Errors
/// Returns [`SqlFluentError::UnsafeExpression`] naming the violation. The
/// caller is expected to emit a `SqlInjectionAttempt` security event on
/// failure.
pub fn validate_raw_expression(expr: &str) -> Result<(), SqlFluentError> {
    if expr.trim().is_empty() {
        return Err(SqlFluentError::UnsafeExpression(
            "empty raw expression".to_string(),
        ));
    }
    if expr.len() > MAX_RAW_EXPR_LEN {
        return Err(SqlFluentError::UnsafeExpression(format!(
            "raw expression exceeds {MAX_RAW_EXPR_LEN} characters"
        )));
    }
    if !parens_balanced(expr) {
        return Err(SqlFluentError::UnsafeExpression(format!(
            "unbalanced parentheses in: {expr}"
        )));
    }
    if let Some(m) = FORBIDDEN_PATTERNS.find(expr) {
        return Err(SqlFluentError::UnsafeExpression(format!(
            "forbidden token {:?} in: {expr}",
            m.as_str()
        )));
    }
    if !RAW_EXPR_CHARS.is_match(expr) {
        return Err(SqlFluentError::UnsafeExpression(format!(
            "disallowed character in: {expr}"
        )));
    }
    Ok(())
}

/// Screen a non-raw field name for embedded SQL. Returns the matched token
/// when the name looks suspicious; the caller warns but proceeds.
#[must_use]
pub fn screen_field(field: &str) -> Option<String> {
    SUSPICIOUS_FIELD
        .find(field)
        .map(|m| m.as_str().to_string())
}

/// Mask a query for trace storage: string literals and long numeric
/// literals are replaced so traces never retain payload data.
#[must_use]
pub fn mask_query(sql: &str) -> String {
    let masked = STRING_LITERAL.replace_all(sql, "'?'");
    LONG_NUMBER.replace_all(&masked, "?").into_owned()
}

/// Classified security events emitted through the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityEventKind {
    SqlInjectionAttempt,
    InvalidIdentifier,
    ReservedWord,
    ShutdownRollbackFailed,
}

impl SecurityEventKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SecurityEventKind::SqlInjectionAttempt => "SQL_INJECTION_ATTEMPT",
            SecurityEventKind::InvalidIdentifier => "INVALID_IDENTIFIER",
            SecurityEventKind::ReservedWord => "RESERVED_WORD",
            SecurityEventKind::ShutdownRollbackFailed => "SHUTDOWN_ROLLBACK_FAILED",
        }
    }
}

/// One emitted security event.
#[derive(Debug, Clone)]
pub struct SecurityEvent {
    pub kind: SecurityEventKind,
    pub message: String,
    pub context: serde_json::Value,
}

/// Receiver for security events. Register one via
/// [`SecurityMonitor::set_sink`].
pub trait SecuritySink: Send + Sync {
    fn on_security_event(&self, event: &SecurityEvent);
}

/// Default sink: forwards events to `tracing`.
#[derive(Debug, Default)]
pub struct TracingSecuritySink;

impl SecuritySink for TracingSecuritySink {
    fn on_security_event(&self, event: &SecurityEvent) {
        warn!(
            kind = event.kind.as_str(),
            context = %event.context,
            "{}",
            event.message
        );
    }
}

/// Snapshot of the monitor's toggle and active checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityStatus {
    pub enabled: bool,
    pub events_emitted: u64,
    pub raw_expression_validation: bool,
    pub identifier_validation: bool,
    pub field_keyword_screening: bool,
}

/// Process-wide-shareable security event dispatcher.
///
/// Emission can be toggled off entirely; validation itself always runs.
pub struct SecurityMonitor {
    enabled: AtomicBool,
    emitted: AtomicU64,
    sink: RwLock<Arc<dyn SecuritySink>>,
}

impl std::fmt::Debug for SecurityMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityMonitor")
            .field("enabled", &self.enabled.load(Ordering::Relaxed))
            .field("emitted", &self.emitted.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for SecurityMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl SecurityMonitor {
    #[must_use]
    pub fn new() -> Self {
        SecurityMonitor {
            enabled: AtomicBool::new(true),
            emitted: AtomicU64::new(0),
            sink: RwLock::new(Arc::new(TracingSecuritySink)),
        }
    }

    pub fn set_sink(&self, sink: Arc<dyn SecuritySink>) {
        if let Ok(mut guard) = self.sink.write() {
            *guard = sink;
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn emit(&self, kind: SecurityEventKind, message: impl Into<String>, context: serde_json::Value) {
        if !self.is_enabled() {
            return;
        }
        self.emitted.fetch_add(1, Ordering::Relaxed);
        let event = SecurityEvent {
            kind,
            message: message.into(),
            context,
        };
        if let Ok(guard) = self.sink.read() {
            guard.on_security_event(&event);
        }
    }

    #[must_use]
    pub fn status(&self) -> SecurityStatus {
        SecurityStatus {
            enabled: self.is_enabled(),
            events_emitted: self.emitted.load(Ordering::Relaxed),
            raw_expression_validation: true,
            identifier_validation: true,
            field_keyword_screening: true,
        }
    }
}

/// One trace-log entry for an executed statement.
#[derive(Debug, Clone)]
pub struct TraceEntry {
    /// Masked query text (literals and long numbers stripped).
    pub query: String,
    pub elapsed: Duration,
    /// The originating operation, e.g. `get(users)`.
    pub caller: String,
}

/// Bounded in-memory trace of executed statements, oldest dropped first.
pub struct TraceLog {
    entries: Mutex<VecDeque<TraceEntry>>,
    capacity: usize,
    enabled: AtomicBool,
}

impl std::fmt::Debug for TraceLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceLog")
            .field("capacity", &self.capacity)
            .field("enabled", &self.enabled.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for TraceLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_TRACE_CAPACITY)
    }
}

impl TraceLog {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        TraceLog {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            capacity: capacity.max(1),
            enabled: AtomicBool::new(true),
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn record(&self, sql: &str, elapsed: Duration, caller: impl Into<String>) {
        if !self.enabled.load(Ordering::Relaxed) {
            return;
        }
        let entry = TraceEntry {
            query: mask_query(sql),
            elapsed,
            caller: caller.into(),
        };
        debug!(query = %entry.query, elapsed_us = elapsed.as_micros() as u64, caller = %entry.caller, "traced statement");
        let mut guard = match self.entries.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        if guard.len() == self.capacity {
            guard.pop_front();
        }
        guard.push_back(entry);
    }

    #[must_use]
    pub fn entries(&self) -> Vec<TraceEntry> {
        match self.entries.lock() {
            Ok(g) => g.iter().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().iter().cloned().collect(),
        }
    }

    pub fn clear(&self) {
        if let Ok(mut g) = self.entries.lock() {
            g.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_statement_terminators_and_comments() {
        for bad in [
            "1; DROP TABLE users",
            "id = 1 -- comment",
            "id = 1 /* x */",
            "id = `1`",
            "DROP TABLE users",
        ] {
            assert!(
                matches!(
                    validate_raw_expression(bad),
                    Err(SqlFluentError::UnsafeExpression(_))
                ),
                "expected rejection for {bad:?}"
            );
        }
    }

    #[test]
    fn rejects_unbalanced_parens_and_oversized_input() {
        assert!(validate_raw_expression("(id = 1").is_err());
        assert!(validate_raw_expression("id = 1)").is_err());
        let long = format!("id = {}", "1".repeat(MAX_RAW_EXPR_LEN));
        assert!(validate_raw_expression(&long).is_err());
    }

    #[test]
    fn accepts_ordinary_predicates() {
        for ok in [
            "id = ?",
            "(id = ? OR status = 'active')",
            "created_at > NOW()",
            "total_count >= 100",
        ] {
            assert!(validate_raw_expression(ok).is_ok(), "rejected {ok:?}");
        }
    }

    #[test]
    fn field_screening_flags_smuggled_sql() {
        assert!(screen_field("id").is_none());
        assert!(screen_field("id; DROP").is_some());
        assert!(screen_field("1 UNION SELECT").is_some());
    }

    #[test]
    fn masking_strips_literals_and_long_numbers() {
        let masked = mask_query("SELECT * FROM t WHERE a = 'secret' AND b = 1234567");
        assert!(!masked.contains("secret"));
        assert!(!masked.contains("1234567"));
        assert!(masked.contains("'?'"));
    }

    #[test]
    fn trace_log_is_bounded_fifo() {
        let log = TraceLog::with_capacity(2);
        log.record("q1", Duration::from_millis(1), "op1");
        log.record("q2", Duration::from_millis(1), "op2");
        log.record("q3", Duration::from_millis(1), "op3");
        let entries = log.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].query, "q2");
        assert_eq!(entries[1].query, "q3");
    }

    #[test]
    fn monitor_toggle_and_status() {
        struct Counting(std::sync::atomic::AtomicU64);
        impl SecuritySink for Counting {
            fn on_security_event(&self, _event: &SecurityEvent) {
                self.0.fetch_add(1, Ordering::Relaxed);
            }
        }
        let monitor = SecurityMonitor::new();
        let sink = Arc::new(Counting(AtomicU64::new(0)));
        monitor.set_sink(sink.clone());

        monitor.emit(
            SecurityEventKind::SqlInjectionAttempt,
            "test",
            serde_json::json!({}),
        );
        assert_eq!(sink.0.load(Ordering::Relaxed), 1);

        monitor.set_enabled(false);
        monitor.emit(
            SecurityEventKind::SqlInjectionAttempt,
            "test",
            serde_json::json!({}),
        );
        assert_eq!(sink.0.load(Ordering::Relaxed), 1);

        let status = monitor.status();
        assert!(!status.enabled);
        assert_eq!(status.events_emitted, 1);
    }
}
