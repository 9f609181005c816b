//! Error types for signing provisioning.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProvisionError>;

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("Missing required configuration: {0}")]
    MissingConfig(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Developer portal authentication failed: {0}")]
    Authentication(String),

    #[error("Certificate mismatch: {0}")]
    CertificateMismatch(String),

    #[error("Provisioning failed: {0}")]
    Provisioning(String),

    #[error("Project state error: {0}")]
    ProjectState(String),

    #[error("Keychain operation failed: {0}")]
    KeychainOperation(String),

    #[error("App Store Connect API error: {0}")]
    AppStoreConnectApi(String),

    #[error("Command execution failed: {0}")]
    CommandExecution(String),

    #[error("Missing dependency: {0}")]
    MissingDependency(String),

    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Property list error: {0}")]
    Plist(#[from] plist::Error),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl ProvisionError {
    /// Taxonomy bucket used when reporting a failed run.
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            Self::MissingConfig(_) | Self::InvalidConfig(_) => "configuration",
            Self::Authentication(_) => "authentication",
            Self::CertificateMismatch(_) => "certificate-mismatch",
            Self::Provisioning(_) | Self::AppStoreConnectApi(_) => "provisioning",
            Self::ProjectState(_) | Self::Plist(_) => "project-state",
            Self::KeychainOperation(_) => "install",
            Self::CommandExecution(_)
            | Self::MissingDependency(_)
            | Self::Io(_)
            | Self::Json(_)
            | Self::Reqwest(_)
            | Self::Other(_) => "internal",
        }
    }
}
