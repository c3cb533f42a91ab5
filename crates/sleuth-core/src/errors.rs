use std::time::Duration;

/// Typed errors from the collaborator agent.
/// Classifies errors as fatal (don't retry), retryable, or operational.
#[derive(Clone, Debug, thiserror::Error)]
pub enum AgentError {
    // Fatal
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("context window exceeded: {0}")]
    ContextWindowExceeded(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    // Retryable
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },
    #[error("server error {status}: {body}")]
    ServerError { status: u16, body: String },
    #[error("agent overloaded")]
    Overloaded,
    #[error("network error: {0}")]
    Network(String),

    // Operational
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("timeout after {0:?}")]
    Timeout(Duration),
    #[error("cancelled")]
    Cancelled,
    #[error("context compaction failed: {0}")]
    Compaction(String),
}

impl AgentError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::ServerError { .. } | Self::Overloaded | Self::Network(_)
        )
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationFailed(_)
                | Self::ContextWindowExceeded(_)
                | Self::InvalidRequest(_)
                | Self::Compaction(_)
        )
    }

    pub fn suggested_delay(&self) -> Option<Duration> {
        if let Self::RateLimited { retry_after } = self {
            *retry_after
        } else {
            None
        }
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::AuthenticationFailed(_) => "authentication_failed",
            Self::ContextWindowExceeded(_) => "context_window_exceeded",
            Self::InvalidRequest(_) => "invalid_request",
            Self::RateLimited { .. } => "rate_limited",
            Self::ServerError { .. } => "server_error",
            Self::Overloaded => "overloaded",
            Self::Network(_) => "network_error",
            Self::MalformedResponse(_) => "malformed_response",
            Self::Timeout(_) => "timeout",
            Self::Cancelled => "cancelled",
            Self::Compaction(_) => "compaction",
        }
    }

    /// Classify an HTTP status code into the appropriate error variant.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => Self::AuthenticationFailed(body),
            400 if body.contains("context_length_exceeded") => Self::ContextWindowExceeded(body),
            400 | 404 | 422 => Self::InvalidRequest(body),
            429 => Self::RateLimited { retry_after: None },
            503 | 529 => Self::Overloaded,
            500..=599 => Self::ServerError { status, body },
            _ => Self::InvalidRequest(format!("unexpected status {status}: {body}")),
        }
    }
}

/// Hard failures of the compaction engine. Any of these must stop the agent
/// call they were guarding.
#[derive(Clone, Debug, thiserror::Error)]
pub enum CompactionError {
    #[error("token counting failed: {0}")]
    Count(String),
    #[error("token count mismatch, messages={messages}, counts={counts}")]
    CountMismatch { messages: usize, counts: usize },
    #[error("summarization failed: {0}")]
    Summarize(#[source] AgentError),
    #[error("summarizer returned an empty summary")]
    EmptySummary,
}

impl From<CompactionError> for AgentError {
    fn from(e: CompactionError) -> Self {
        match e {
            CompactionError::Summarize(AgentError::Cancelled) => AgentError::Cancelled,
            other => AgentError::Compaction(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(AgentError::RateLimited { retry_after: None }.is_retryable());
        assert!(AgentError::ServerError { status: 500, body: "err".into() }.is_retryable());
        assert!(AgentError::Overloaded.is_retryable());
        assert!(AgentError::Network("reset".into()).is_retryable());
        assert!(!AgentError::Cancelled.is_retryable());
        assert!(!AgentError::MalformedResponse("x".into()).is_retryable());
    }

    #[test]
    fn fatal_classification() {
        assert!(AgentError::AuthenticationFailed("bad key".into()).is_fatal());
        assert!(AgentError::InvalidRequest("bad".into()).is_fatal());
        assert!(AgentError::Compaction("mismatch".into()).is_fatal());
        assert!(!AgentError::Timeout(Duration::from_secs(1)).is_fatal());
    }

    #[test]
    fn from_status_mapping() {
        assert!(AgentError::from_status(401, "unauthorized".into()).is_fatal());
        assert!(matches!(
            AgentError::from_status(400, "context_length_exceeded".into()),
            AgentError::ContextWindowExceeded(_)
        ));
        assert!(AgentError::from_status(429, "slow down".into()).is_retryable());
        assert!(matches!(AgentError::from_status(503, String::new()), AgentError::Overloaded));
        assert!(AgentError::from_status(502, "bad gateway".into()).is_retryable());
        assert_eq!(AgentError::from_status(418, "teapot".into()).error_kind(), "invalid_request");
    }

    #[test]
    fn suggested_delay_only_for_rate_limit() {
        let rl = AgentError::RateLimited {
            retry_after: Some(Duration::from_secs(3)),
        };
        assert_eq!(rl.suggested_delay(), Some(Duration::from_secs(3)));
        assert_eq!(AgentError::Overloaded.suggested_delay(), None);
    }

    #[test]
    fn compaction_error_converts() {
        let err: AgentError = CompactionError::CountMismatch { messages: 3, counts: 2 }.into();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("messages=3, counts=2"));

        let cancelled: AgentError = CompactionError::Summarize(AgentError::Cancelled).into();
        assert!(matches!(cancelled, AgentError::Cancelled));
    }
}
