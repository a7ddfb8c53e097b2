//! Shared error type for the fluent client and drivers.

use thiserror::Error;

/// Convenience alias used across the workspace.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced while driving a browser session.
///
/// Variants carry rendered strings rather than sources so a latched failure
/// can be cloned into every chain handle waiting downstream of it.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Malformed call arguments, raised before anything is enqueued.
    #[error("invalid usage: {0}")]
    Usage(String),

    /// Declared API surface without an implementation behind it. Permanent;
    /// retrying can never succeed.
    #[error("not implemented: {0}")]
    NotImplemented(&'static str),

    #[error("browser not available: {0}")]
    BrowserNotAvailable(String),

    #[error("browser launch failed: {0}")]
    Launch(String),

    #[error("connection failed: {url}: {reason}")]
    Connect { url: String, reason: String },

    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    #[error("CDP error: {0}")]
    Cdp(String),

    #[error("navigation failed: {url}: {reason}")]
    Navigation { url: String, reason: String },

    #[error("JavaScript evaluation failed: {0}")]
    Evaluation(String),

    #[error("element not found: {0}")]
    ElementNotFound(String),

    #[error("timeout after {ms}ms: {what}")]
    Timeout { what: String, ms: u64 },

    /// Writing a screenshot or PDF payload to disk failed.
    #[error("capture failed: {0}")]
    Capture(String),
}

impl Error {
    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage(message.into())
    }

    pub fn cdp(message: impl Into<String>) -> Self {
        Self::Cdp(message.into())
    }

    /// Whether this failure can never succeed on retry.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Usage(_) | Self::NotImplemented(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_is_cloneable() {
        let err = Error::Timeout { what: "wait(#id)".into(), ms: 10000 };
        let copy = err.clone();
        assert_eq!(copy.to_string(), "timeout after 10000ms: wait(#id)");
    }

    #[test]
    fn test_permanence_classification() {
        assert!(Error::NotImplemented("back").is_permanent());
        assert!(Error::usage("bad selector").is_permanent());
        assert!(!Error::cdp("boom").is_permanent());
    }

    #[test]
    fn test_messages() {
        assert_eq!(
            Error::NotImplemented("hover").to_string(),
            "not implemented: hover"
        );
        assert_eq!(
            Error::Connect { url: "ws://x".into(), reason: "refused".into() }.to_string(),
            "connection failed: ws://x: refused"
        );
    }
}
