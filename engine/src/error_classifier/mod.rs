//! Error classification for task API failures
//!
//! Failure text from the task API is mapped onto four categories by ordered
//! keyword tables:
//!
//! - **permission**: the acting user may not do this. Terminal denial.
//! - **system**: the backend is unhealthy. Tolerated up to a threshold of
//!   consecutive occurrences, then the task aborts.
//! - **not_found**: informative. A denial when the failed operation was a
//!   mutation.
//! - **other**: recorded; the next decision step retries or changes course.
//!
//! Tables are checked in that order and the first hit wins, so a message
//! such as "permission denied: project not found" is a permission failure.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Category assigned to a failed dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Permission,
    System,
    NotFound,
    Other,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Permission => "permission",
            ErrorCategory::System => "system",
            ErrorCategory::NotFound => "not_found",
            ErrorCategory::Other => "other",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const PERMISSION_KEYWORDS: &[&str] = &[
    "permission",
    "denied",
    "unauthorized",
    "forbidden",
    "not allowed",
    "access denied",
    "not authorized",
    "cannot modify",
    "only lead",
    "not a member",
    "not lead",
    "no access",
    "restricted",
];

const SYSTEM_KEYWORDS: &[&str] = &[
    "internal server error",
    "system error",
    "service unavailable",
    "connection refused",
    "timeout",
    "500",
    "503",
    "502",
    "page limit exceeded",
];

const NOT_FOUND_KEYWORDS: &[&str] = &["not found", "does not exist", "no such", "unknown"];

/// Ordered keyword tables; earlier rows take priority
const TABLES: &[(ErrorCategory, &[&str])] = &[
    (ErrorCategory::Permission, PERMISSION_KEYWORDS),
    (ErrorCategory::System, SYSTEM_KEYWORDS),
    (ErrorCategory::NotFound, NOT_FOUND_KEYWORDS),
];

/// Classify failure text. Pure and total: anything unmatched is `Other`.
///
/// # Examples
///
/// ```
/// use ooda_engine::error_classifier::{classify, ErrorCategory};
///
/// assert_eq!(classify("403: Permission denied"), ErrorCategory::Permission);
/// assert_eq!(classify("503 Service Unavailable"), ErrorCategory::System);
/// assert_eq!(classify("employee emp_x not found"), ErrorCategory::NotFound);
/// assert_eq!(classify("hours must be positive"), ErrorCategory::Other);
/// ```
pub fn classify(text: &str) -> ErrorCategory {
    let lower = text.to_lowercase();
    TABLES
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| lower.contains(k)))
        .map(|(category, _)| *category)
        .unwrap_or(ErrorCategory::Other)
}

/// What the decision loop does after a classified failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureVerdict {
    /// End the task with `denied_security`
    Deny,
    /// End the task with `error_internal`
    Abort,
    /// Feed the failure back and keep looping
    Continue,
}

/// Tracks consecutive `system` failures for one task and turns categories
/// into loop decisions.
#[derive(Debug, Clone)]
pub struct FailureTracker {
    consecutive_system: u32,
    threshold: u32,
    system_seen: bool,
}

impl FailureTracker {
    pub fn new(threshold: u32) -> Self {
        Self {
            consecutive_system: 0,
            threshold: threshold.max(1),
            system_seen: false,
        }
    }

    /// Register a failure of an operation that was (or was not) mutating.
    pub fn record(&mut self, category: ErrorCategory, mutating: bool) -> FailureVerdict {
        match category {
            ErrorCategory::Permission => FailureVerdict::Deny,
            ErrorCategory::System => {
                self.consecutive_system += 1;
                self.system_seen = true;
                if self.consecutive_system >= self.threshold {
                    FailureVerdict::Abort
                } else {
                    FailureVerdict::Continue
                }
            }
            ErrorCategory::NotFound if mutating => FailureVerdict::Deny,
            ErrorCategory::NotFound | ErrorCategory::Other => FailureVerdict::Continue,
        }
    }

    /// A successful dispatch breaks the run of system failures
    pub fn record_success(&mut self) {
        self.consecutive_system = 0;
    }

    pub fn consecutive_system(&self) -> u32 {
        self.consecutive_system
    }

    /// Sticky: true once any system failure happened during the task
    pub fn system_broken(&self) -> bool {
        self.system_seen
    }
}
