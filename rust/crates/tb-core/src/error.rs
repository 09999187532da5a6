use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum TbError {
    #[error("lead not found: {0}")]
    LeadNotFound(Uuid),

    #[error("connection not found: {0}")]
    ConnectionNotFound(Uuid),

    #[error("duplicate lead: {0}")]
    DuplicateLead(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("form catalog error: {0}")]
    FormCatalog(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("auth error: {0}")]
    Auth(String),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("scorer error: {0}")]
    Scorer(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("internal error: {0}")]
    Internal(String),
}

impl TbError {
    /// Whether the failure is scoped to one provider connection. Such
    /// failures leave that provider empty for the pass and never abort the
    /// reconciliation run.
    pub fn is_provider_scoped(&self) -> bool {
        matches!(
            self,
            Self::Auth(_) | Self::Provider(_) | Self::DeadlineExceeded
        )
    }
}

pub type TbResult<T> = Result<T, TbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_scoped_failures_are_recoverable() {
        assert!(TbError::Auth("revoked".into()).is_provider_scoped());
        assert!(TbError::Provider("timeout".into()).is_provider_scoped());
        assert!(TbError::DeadlineExceeded.is_provider_scoped());

        // Run-level failures abort the pass.
        assert!(!TbError::Storage("down".into()).is_provider_scoped());
        assert!(!TbError::FormCatalog("down".into()).is_provider_scoped());
    }
}
