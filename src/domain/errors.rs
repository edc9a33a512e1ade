use derive_more::Display;

/// Error taxonomy of the synchronization core.
///
/// `Clone` so a failure can be shared by every waiter of a de-duplicated request.
#[derive(Debug, Clone, PartialEq, Display)]
pub enum ChartError {
    #[display(fmt = "Network Error: {}", _0)]
    Network(String),
    /// Server answered 409: the requested state is not built yet.
    #[display(fmt = "Conflict: {}", _0)]
    Conflict(String),
    #[display(fmt = "HTTP {}: {}", status, detail)]
    Http { status: u16, detail: String },
    #[display(fmt = "Decode Error: {}", _0)]
    Decode(String),
    #[display(fmt = "Push Channel Error: {}", _0)]
    PushChannel(String),
    #[display(fmt = "Replay Error: {}", _0)]
    Replay(String),
    #[display(fmt = "Cancelled")]
    Cancelled,
}

impl std::error::Error for ChartError {}

/// How a failure is treated by the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retried with backoff, invisible until attempts are exhausted.
    TransientNetwork,
    /// Retried a bounded number of times, then degrades the feature.
    ProtocolConflict,
    /// Surfaced to the UI.
    Terminal,
}

impl ChartError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ChartError::Network(_) | ChartError::Decode(_) => ErrorClass::TransientNetwork,
            ChartError::Http { status, .. } if *status >= 500 || *status == 429 => ErrorClass::TransientNetwork,
            ChartError::Conflict(_) => ErrorClass::ProtocolConflict,
            ChartError::Http { .. }
            | ChartError::PushChannel(_)
            | ChartError::Replay(_)
            | ChartError::Cancelled => ErrorClass::Terminal,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, ChartError::Conflict(_))
    }

    /// Human readable text for the status banner.
    pub fn detail(&self) -> String {
        match self {
            ChartError::Http { detail, .. } => detail.clone(),
            ChartError::Network(msg)
            | ChartError::Conflict(msg)
            | ChartError::Decode(msg)
            | ChartError::PushChannel(msg)
            | ChartError::Replay(msg) => msg.clone(),
            ChartError::Cancelled => "cancelled".to_string(),
        }
    }
}

impl From<serde_json::Error> for ChartError {
    fn from(err: serde_json::Error) -> Self {
        ChartError::Decode(err.to_string())
    }
}

/// Pull a readable message out of an error response body.
///
/// Accepts `{"detail": "..."}`, `{"detail": {"message": "..."}}`,
/// `{"message": "..."}` and `{"error": "..."}`; anything else is returned trimmed.
pub fn extract_error_detail(body: &str) -> String {
    let trimmed = body.trim();
    let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) else {
        return trimmed.to_string();
    };

    let candidates = [
        value.get("detail").and_then(|d| d.as_str()),
        value.get("detail").and_then(|d| d.get("message")).and_then(|m| m.as_str()),
        value.get("message").and_then(|m| m.as_str()),
        value.get("error").and_then(|e| e.as_str()),
    ];

    candidates
        .into_iter()
        .flatten()
        .next()
        .map(str::to_string)
        .unwrap_or_else(|| trimmed.to_string())
}

pub type ChartResult<T> = Result<T, ChartError>;
