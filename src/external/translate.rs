// Maps raw execution-service failures onto a small fixed set of
// human-readable categories. Raw payloads never leave this module except
// through logs.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

use super::service::{JobFailure, ServiceError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Authentication,
    RateLimited,
    RepositoryAccess,
    InvalidRequest,
    Timeout,
    ServiceUnavailable,
    Cancelled,
    Expired,
    UnexpectedResponse,
    LaunchInterrupted,
    Unknown,
}

impl ErrorCategory {
    /// Short message safe to show to an end user.
    pub fn human_message(&self) -> &'static str {
        match self {
            ErrorCategory::Authentication => {
                "The execution service rejected our credentials. Check the API key."
            }
            ErrorCategory::RateLimited => {
                "The execution service is rate limiting requests. Try again in a few minutes."
            }
            ErrorCategory::RepositoryAccess => {
                "The execution service could not access the target repository."
            }
            ErrorCategory::InvalidRequest => "The execution service rejected the job request.",
            ErrorCategory::Timeout => "The execution service did not respond in time.",
            ErrorCategory::ServiceUnavailable => "The execution service is currently unavailable.",
            ErrorCategory::Cancelled => "The job was cancelled on the execution service.",
            ErrorCategory::Expired => "The job expired before it finished.",
            ErrorCategory::UnexpectedResponse => {
                "The execution service returned a response we could not understand."
            }
            ErrorCategory::LaunchInterrupted => {
                "The launch was interrupted before the job was recorded. Start a new run."
            }
            ErrorCategory::Unknown => "The job failed for an unknown reason.",
        }
    }

    /// Whether re-invoking later may succeed without operator action.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ErrorCategory::RateLimited | ErrorCategory::Timeout | ErrorCategory::ServiceUnavailable
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Authentication => "authentication",
            ErrorCategory::RateLimited => "rate_limited",
            ErrorCategory::RepositoryAccess => "repository_access",
            ErrorCategory::InvalidRequest => "invalid_request",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::ServiceUnavailable => "service_unavailable",
            ErrorCategory::Cancelled => "cancelled",
            ErrorCategory::Expired => "expired",
            ErrorCategory::UnexpectedResponse => "unexpected_response",
            ErrorCategory::LaunchInterrupted => "launch_interrupted",
            ErrorCategory::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.human_message())
    }
}

impl std::str::FromStr for ErrorCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let category = match s {
            "authentication" => ErrorCategory::Authentication,
            "rate_limited" => ErrorCategory::RateLimited,
            "repository_access" => ErrorCategory::RepositoryAccess,
            "invalid_request" => ErrorCategory::InvalidRequest,
            "timeout" => ErrorCategory::Timeout,
            "service_unavailable" => ErrorCategory::ServiceUnavailable,
            "cancelled" => ErrorCategory::Cancelled,
            "expired" => ErrorCategory::Expired,
            "unexpected_response" => ErrorCategory::UnexpectedResponse,
            "launch_interrupted" => ErrorCategory::LaunchInterrupted,
            "unknown" => ErrorCategory::Unknown,
            other => return Err(format!("unknown error category '{other}'")),
        };
        Ok(category)
    }
}

static MESSAGE_PATTERNS: LazyLock<Vec<(Regex, ErrorCategory)>> = LazyLock::new(|| {
    let patterns: [(&str, ErrorCategory); 6] = [
        (r"(?i)unauthori[sz]ed|invalid (api )?key|forbidden|credential", ErrorCategory::Authentication),
        (r"(?i)rate.?limit|too many requests|quota", ErrorCategory::RateLimited),
        (r"(?i)repositor(y|ies)|clone|permission to access|branch .* not found", ErrorCategory::RepositoryAccess),
        (r"(?i)timed? ?out|deadline", ErrorCategory::Timeout),
        (r"(?i)unavailable|overloaded|bad gateway|connection (refused|reset)", ErrorCategory::ServiceUnavailable),
        (r"(?i)invalid|malformed|validation", ErrorCategory::InvalidRequest),
    ];
    patterns
        .into_iter()
        .filter_map(|(pattern, category)| Regex::new(pattern).ok().map(|re| (re, category)))
        .collect()
});

/// Translator from raw service errors to categories.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorTranslator;

impl ErrorTranslator {
    pub fn new() -> Self {
        Self
    }

    pub fn categorize_service_error(&self, error: &ServiceError) -> ErrorCategory {
        match error {
            ServiceError::NotConfigured(_) => ErrorCategory::Authentication,
            ServiceError::Timeout => ErrorCategory::Timeout,
            ServiceError::Transport(_) => ErrorCategory::ServiceUnavailable,
            ServiceError::UnexpectedResponse(_) => ErrorCategory::UnexpectedResponse,
            ServiceError::Http {
                status,
                code,
                message,
            } => self
                .categorize_status(*status)
                .or_else(|| code.as_deref().and_then(|c| self.categorize_code(c)))
                .unwrap_or_else(|| self.categorize_message(message)),
        }
    }

    pub fn categorize_job_failure(&self, failure: &JobFailure) -> ErrorCategory {
        failure
            .code
            .as_deref()
            .and_then(|c| self.categorize_code(c))
            .unwrap_or_else(|| self.categorize_message(&failure.message))
    }

    fn categorize_status(&self, status: u16) -> Option<ErrorCategory> {
        match status {
            401 | 403 => Some(ErrorCategory::Authentication),
            404 => Some(ErrorCategory::RepositoryAccess),
            408 | 504 => Some(ErrorCategory::Timeout),
            429 => Some(ErrorCategory::RateLimited),
            400 | 409 | 422 => Some(ErrorCategory::InvalidRequest),
            500..=599 => Some(ErrorCategory::ServiceUnavailable),
            _ => None,
        }
    }

    fn categorize_code(&self, code: &str) -> Option<ErrorCategory> {
        let normalized = code.to_ascii_lowercase();
        let category = match normalized.as_str() {
            "unauthorized" | "unauthenticated" | "forbidden" | "invalid_api_key" => {
                ErrorCategory::Authentication
            }
            "rate_limited" | "rate_limit_exceeded" | "too_many_requests" => ErrorCategory::RateLimited,
            "repository_not_found" | "repo_access_denied" | "clone_failed" => {
                ErrorCategory::RepositoryAccess
            }
            "timeout" | "deadline_exceeded" => ErrorCategory::Timeout,
            "unavailable" | "internal" | "internal_error" => ErrorCategory::ServiceUnavailable,
            "cancelled" | "canceled" => ErrorCategory::Cancelled,
            "expired" => ErrorCategory::Expired,
            "invalid_request" | "invalid_argument" => ErrorCategory::InvalidRequest,
            _ => return None,
        };
        Some(category)
    }

    fn categorize_message(&self, message: &str) -> ErrorCategory {
        MESSAGE_PATTERNS
            .iter()
            .find(|(re, _)| re.is_match(message))
            .map(|(_, category)| *category)
            .unwrap_or(ErrorCategory::Unknown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_wins_over_message() {
        let translator = ErrorTranslator::new();
        let error = ServiceError::Http {
            status: 429,
            code: None,
            message: "repository clone failed".to_string(),
        };
        assert_eq!(
            translator.categorize_service_error(&error),
            ErrorCategory::RateLimited
        );
    }

    #[test]
    fn test_job_failure_code_and_message_fallback() {
        let translator = ErrorTranslator::new();
        let by_code = JobFailure {
            code: Some("CLONE_FAILED".to_string()),
            message: "whatever".to_string(),
        };
        assert_eq!(
            translator.categorize_job_failure(&by_code),
            ErrorCategory::RepositoryAccess
        );

        let by_message = JobFailure {
            code: None,
            message: "Agent run timed out after 45m".to_string(),
        };
        assert_eq!(
            translator.categorize_job_failure(&by_message),
            ErrorCategory::Timeout
        );

        let unknown = JobFailure {
            code: Some("E_WAT".to_string()),
            message: "segfault in worker 7".to_string(),
        };
        assert_eq!(
            translator.categorize_job_failure(&unknown),
            ErrorCategory::Unknown
        );
    }

    #[test]
    fn test_human_messages_do_not_leak_raw_text() {
        let translator = ErrorTranslator::new();
        let error = ServiceError::Http {
            status: 500,
            code: None,
            message: "stack trace: at worker.rs:42 secret=abc".to_string(),
        };
        let category = translator.categorize_service_error(&error);
        assert!(!category.human_message().contains("secret"));
        assert_eq!(category, ErrorCategory::ServiceUnavailable);
    }
}
