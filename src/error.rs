//! Error types for rule management and response synthesis.

use thiserror::Error;

/// Errors raised while adding, replacing or removing rules.
#[derive(Debug, Error)]
pub enum RuleError {
    /// The rule pattern is not a valid regular expression.
    #[error("invalid pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// Another rule already uses this name.
    #[error("a rule named {0:?} already exists")]
    DuplicateName(String),

    /// A response template carries a status outside 100..=599.
    #[error("invalid status code {0}")]
    InvalidStatus(u16),

    /// No rule with this name is registered.
    #[error("no rule named {0:?}")]
    NotFound(String),
}

/// Errors that abort the handling of a single request.
///
/// All of them render as a bare `500 Internal Server Error`; the detail only
/// reaches the log.
#[derive(Debug, Error)]
pub enum ResponseError {
    /// The inbound request body could not be read.
    #[error("failed to read request body: {0}")]
    BodyRead(String),

    /// The response body template failed to parse or render.
    #[error("template error: {0}")]
    Template(#[from] handlebars::RenderError),

    /// The response payload could not be serialized.
    #[error("failed to encode response: {0}")]
    Encode(#[from] serde_json::Error),

    /// The upstream request could not be built or sent.
    #[error("proxy request to {url} failed: {reason}")]
    Proxy { url: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_error_message() {
        let source = regex::Regex::new("(").unwrap_err();
        let err = RuleError::Pattern {
            pattern: "(".to_string(),
            source,
        };
        assert!(err.to_string().starts_with("invalid pattern \"(\""));
    }

    #[test]
    fn test_proxy_error_message() {
        let err = ResponseError::Proxy {
            url: "http://upstream".to_string(),
            reason: "connection refused".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "proxy request to http://upstream failed: connection refused"
        );
    }
}
