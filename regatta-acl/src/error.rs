use thiserror::Error;

/// Error kinds surfaced to RPC callers.
///
/// Variants map one-to-one onto the wire-level error classes: callers switch
/// on the kind, validation messages additionally carry a substring
/// identifying the offending field or rule.
#[derive(Debug, Error)]
pub enum AclError {
    #[error("Permission denied")]
    PermissionDenied,

    #[error("ACL token not found")]
    TokenNotFound,

    #[error("ACL token expired")]
    TokenExpired,

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("no cluster leader")]
    NoLeader,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AclError {
    pub fn validation(msg: impl Into<String>) -> Self {
        AclError::Validation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        AclError::Conflict(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        AclError::NotFound(what.into())
    }

    /// Whether the error is a 400-class input problem, as opposed to an
    /// authorization or infrastructure failure.
    pub fn is_validation(&self) -> bool {
        matches!(self, AclError::Validation(_))
    }

    pub fn is_permission_denied(&self) -> bool {
        matches!(self, AclError::PermissionDenied)
    }
}

/// Failures of the token resolution path (§ token resolver contract).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("ACL token not found")]
    TokenNotFound,

    #[error("ACL token expired")]
    TokenExpired,

    #[error("Permission denied")]
    PermissionDenied,
}

impl From<ResolveError> for AclError {
    fn from(value: ResolveError) -> Self {
        match value {
            ResolveError::TokenNotFound => AclError::TokenNotFound,
            ResolveError::TokenExpired => AclError::TokenExpired,
            ResolveError::PermissionDenied => AclError::PermissionDenied,
        }
    }
}
