use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

static STATUS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(401|403|429)\b").unwrap());

/// Why a wrapped tool call did not run (or did not finish).
///
/// Surfaced to the agent as the tool's execution error. None of these are
/// retried by the authorizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    /// The call matched a deny rule, or the default mode refused it.
    PolicyViolation { tool: String, rule: Option<String> },
    /// Nobody answered the approval request in time.
    ApprovalTimeout,
    /// The user pressed deny.
    ApprovalDenied,
    /// The conversation was torn down while the call was waiting.
    Cancelled,
    /// An approval for this tool call is already outstanding.
    AlreadyPending,
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolError::PolicyViolation { tool, rule: Some(rule) } => {
                write!(f, "Permission denied: {} is blocked by rule {}", tool, rule)
            }
            ToolError::PolicyViolation { tool, rule: None } => {
                write!(f, "Permission denied: {} is not allowed in this conversation", tool)
            }
            ToolError::ApprovalTimeout => write!(f, "Tool approval timed out."),
            ToolError::ApprovalDenied => write!(f, "Tool execution denied."),
            ToolError::Cancelled => write!(f, "Tool call cancelled: conversation closed."),
            ToolError::AlreadyPending => {
                write!(f, "An approval for this tool call is already pending.")
            }
        }
    }
}

impl std::error::Error for ToolError {}

/// Coarse class of an agent-runtime error, derived from its message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Bad or expired credentials for the active model's provider.
    Auth,
    /// 429 and quota-style throttling.
    RateLimit,
    Timeout,
    /// Connection refused, DNS failure, reset, etc.
    Network,
    Other,
}

impl ErrorClass {
    pub fn classify(message: &str) -> Self {
        let lower = message.to_ascii_lowercase();
        let any = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));
        let status = STATUS_RE.find(&lower).map(|m| m.as_str());

        if matches!(status, Some("401" | "403")) || any(&["unauthorized", "forbidden", "invalid api key", "authentication", "api key"]) {
            ErrorClass::Auth
        } else if status == Some("429") || any(&["rate limit", "rate_limit", "ratelimit", "too many requests", "quota", "overloaded"]) {
            ErrorClass::RateLimit
        } else if any(&["timeout", "timed out", "deadline exceeded"]) {
            ErrorClass::Timeout
        } else if any(&[
            "network",
            "connection refused",
            "connection reset",
            "econnrefused",
            "econnreset",
            "enotfound",
            "dns",
            "socket hang up",
            "fetch failed",
        ]) {
            ErrorClass::Network
        } else {
            ErrorClass::Other
        }
    }

    /// Whether falling back to the default model is worth trying.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, ErrorClass::Other)
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorClass::Auth => "auth",
            ErrorClass::RateLimit => "rate limit",
            ErrorClass::Timeout => "timeout",
            ErrorClass::Network => "network",
            ErrorClass::Other => "other",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_common_messages() {
        assert_eq!(ErrorClass::classify("HTTP 401 Unauthorized"), ErrorClass::Auth);
        assert_eq!(ErrorClass::classify("429 Too Many Requests"), ErrorClass::RateLimit);
        assert_eq!(ErrorClass::classify("request timed out after 60s"), ErrorClass::Timeout);
        assert_eq!(ErrorClass::classify("connect ECONNREFUSED 127.0.0.1"), ErrorClass::Network);
        assert_eq!(ErrorClass::classify("context length exceeded"), ErrorClass::Other);
        assert_eq!(ErrorClass::classify("listening on port 4010"), ErrorClass::Other);
    }

    #[test]
    fn only_other_is_unrecoverable() {
        assert!(ErrorClass::Auth.is_recoverable());
        assert!(ErrorClass::Network.is_recoverable());
        assert!(!ErrorClass::Other.is_recoverable());
    }

    #[test]
    fn denied_message_matches_user_text() {
        assert_eq!(ToolError::ApprovalDenied.to_string(), "Tool execution denied.");
    }
}
