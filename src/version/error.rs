use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Request timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    #[error("Rate limited: retry after {retry_after_secs:?} seconds")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Registry server error {status}: {body}")]
    Server { status: u16, body: String },

    #[error("Access denied ({status}): {body}")]
    Forbidden { status: u16, body: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Request rejected ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Registry unreachable after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<RegistryError>,
    },
}

impl RegistryError {
    /// Whether the failure may clear up on its own and is worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            RegistryError::Network(e) => !e.is_decode() && !e.is_builder(),
            RegistryError::Timeout { .. }
            | RegistryError::RateLimited { .. }
            | RegistryError::Server { .. } => true,
            RegistryError::Forbidden { .. }
            | RegistryError::NotFound(_)
            | RegistryError::Rejected { .. }
            | RegistryError::InvalidResponse(_)
            | RegistryError::InvalidRequest(_)
            | RegistryError::RetriesExhausted { .. } => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl EngineError {
    pub fn is_validation(&self) -> bool {
        matches!(self, EngineError::Validation(_))
    }

    /// True when the registry stayed unreachable through every retry.
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            EngineError::Registry(RegistryError::RetriesExhausted { .. })
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(RegistryError::Timeout { timeout_ms: 10 }, true)]
    #[case(RegistryError::RateLimited { retry_after_secs: None }, true)]
    #[case(RegistryError::Server { status: 503, body: String::new() }, true)]
    #[case(RegistryError::Forbidden { status: 403, body: String::new() }, false)]
    #[case(RegistryError::NotFound("app/1.0.0".to_string()), false)]
    #[case(RegistryError::Rejected { status: 400, body: String::new() }, false)]
    #[case(RegistryError::InvalidResponse("bad json".to_string()), false)]
    fn is_transient_classifies_failures(#[case] error: RegistryError, #[case] expected: bool) {
        assert_eq!(error.is_transient(), expected);
    }

    #[test]
    fn exhausted_retries_are_not_transient_and_mark_unreachable() {
        let error = RegistryError::RetriesExhausted {
            attempts: 5,
            last: Box::new(RegistryError::Server {
                status: 502,
                body: "bad gateway".to_string(),
            }),
        };
        assert!(!error.is_transient());
        assert!(EngineError::from(error).is_unreachable());
    }
}
