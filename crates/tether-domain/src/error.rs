use thiserror::Error;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Invalid device profile: {0}")]
    ProfileInvalid(String),

    #[error("Credentials forbidden for identity: {0}")]
    CredentialForbidden(String),

    #[error("Invalid resource path: {0}")]
    InvalidPath(String),

    #[error("Cannot coerce value \"{value}\" to {resource_type}: {reason}")]
    Coercion {
        value: String,
        resource_type: String,
        reason: String,
    },

    #[error("Unsupported resource type: {0}")]
    UnsupportedResourceType(String),

    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Collaborator error: {0}")]
    CollaboratorError(#[from] anyhow::Error),
}

pub type DomainResult<T> = Result<T, DomainError>;
