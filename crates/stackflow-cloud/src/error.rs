//! Error types for descriptor validation, graph building and provisioning

use thiserror::Error;

/// Stackflow cloud errors
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("Invalid descriptor '{descriptor}' (field '{field}'): {message}")]
    Validation {
        descriptor: String,
        field: String,
        message: String,
    },

    #[error("Dependency cycle detected involving '{member}'")]
    Cycle { member: String },

    #[error("Transient provider error: {0}")]
    TransientProvider(String),

    #[error("Permanent provider error: {0}")]
    PermanentProvider(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Scheduler stuck: pending resources {0:?} can never become eligible")]
    Stuck(Vec<String>),

    #[error("Invalid transition for '{name}': {from} -> {to}")]
    InvalidTransition {
        name: String,
        from: String,
        to: String,
    },

    #[error("Operation not supported: {0}")]
    Unsupported(String),

    #[error("Ledger error: {0}")]
    StateError(String),

    #[error("Lock acquisition failed: {0}")]
    LockError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl CloudError {
    pub fn validation(
        descriptor: impl Into<String>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Validation {
            descriptor: descriptor.into(),
            field: field.into(),
            message: message.into(),
        }
    }

    /// Whether a failed attempt may be retried within the node's budget.
    ///
    /// Timeouts count as transient until the budget runs out.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientProvider(_) | Self::Timeout(_))
    }
}

pub type Result<T> = std::result::Result<T, CloudError>;
