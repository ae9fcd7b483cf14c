//! Error classification and retry pacing.
//!
//! Engine failures arrive as opaque text from heterogeneous CLIs, so
//! classification is pattern-based: transient infrastructure noise is
//! retried, configuration problems abort the run, and anything unrecognized
//! stops the run for a human to inspect. Never silently mark an uncertain
//! failure as done.

use std::sync::OnceLock;
use std::time::Duration;

use regex::RegexSet;

/// How an engine failure should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Transient infrastructure failure; retry with backoff.
    Retryable,
    /// Irrecoverable configuration failure; abort the entire run.
    Fatal,
    /// Unrecognized failure; stop the run and leave state for inspection.
    Unknown,
}

/// Rate-limit signals shared with the fallback manager, so both components
/// agree on one pattern table.
const RATE_LIMIT_PATTERNS: &[&str] = &[
    r"(?i)rate.?limit",
    r"(?i)too many requests",
    r"\b429\b",
    r"(?i)quota exceeded",
    r"(?i)overloaded",
    r"(?i)capacity",
    r"(?i)temporarily unavailable",
    r"(?i)resource exhausted",
];

const TRANSIENT_PATTERNS: &[&str] = &[
    r"(?i)network timeout",
    r"(?i)timed? ?out",
    r"(?i)connection (reset|refused|closed)",
    r"(?i)service unavailable",
];

const FATAL_PATTERNS: &[&str] = &[
    r"(?i)authentication",
    r"(?i)unauthorized",
    r"(?i)invalid (api.?key|credentials?)",
    r"(?i)credentials? (invalid|expired|missing)",
    r"(?i)permission denied",
    r"(?i)command not found",
    r"(?i)no such file or directory",
    r"(?i)binary not found",
];

fn rate_limit_set() -> &'static RegexSet {
    static SET: OnceLock<RegexSet> = OnceLock::new();
    SET.get_or_init(|| RegexSet::new(RATE_LIMIT_PATTERNS).expect("valid patterns"))
}

fn retryable_set() -> &'static RegexSet {
    static SET: OnceLock<RegexSet> = OnceLock::new();
    SET.get_or_init(|| {
        let all: Vec<&str> = RATE_LIMIT_PATTERNS
            .iter()
            .chain(TRANSIENT_PATTERNS.iter())
            .copied()
            .collect();
        RegexSet::new(all).expect("valid patterns")
    })
}

fn fatal_set() -> &'static RegexSet {
    static SET: OnceLock<RegexSet> = OnceLock::new();
    SET.get_or_init(|| RegexSet::new(FATAL_PATTERNS).expect("valid patterns"))
}

/// Whether the error text is a rate-limit signal.
pub fn is_rate_limit(error: &str) -> bool {
    rate_limit_set().is_match(error)
}

/// Retry policy: classification plus attempt pacing.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    retry_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, retry_delay: Duration) -> Self {
        Self {
            max_retries: max_retries.max(1),
            retry_delay,
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    /// Classify an engine error message.
    ///
    /// Fatal patterns win over retryable ones: an authentication failure
    /// mentioning a limit must still abort.
    pub fn classify(&self, error: &str) -> ErrorClass {
        if fatal_set().is_match(error) {
            ErrorClass::Fatal
        } else if retryable_set().is_match(error) {
            ErrorClass::Retryable
        } else {
            ErrorClass::Unknown
        }
    }

    /// Delay before the next attempt. Fixed spacing; the attempt number is
    /// accepted so callers don't care whether the schedule is flat.
    pub fn backoff(&self, _attempt: u32) -> Duration {
        self.retry_delay
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(30))
    }
}
