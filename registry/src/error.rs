//! Error types for registry operations, and the predicates protocol
//! frontends use to classify them.

use std::error::Error as StdError;

use http::StatusCode;

use backend_driver::{BackendError, BackendErrorKind};

/// Result type for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Error type for registry facade operations.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Tag, manifest, or file missing.
    #[error("not found: {0}")]
    NotFound(String),

    /// Caller-supplied digest disagrees with the computed or fetched one.
    #[error("file digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    /// The request itself is invalid.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Malformed digest string.
    #[error("invalid digest: {0}")]
    InvalidDigest(String),

    /// A manifest could not be assembled or decoded.
    #[error("invalid manifest: {0}")]
    InvalidManifest(#[from] oci_spec::OciSpecError),

    /// Failure reported by the destination repository.
    #[error("backend: {0}")]
    Backend(#[from] BackendError),

    /// Landing-zone I/O failure.
    #[error("landing zone I/O: {0}")]
    Io(#[from] std::io::Error),

    /// The facade was misconfigured.
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Whether any error in the chain reports a missing tag, manifest, file,
/// or blob.
pub fn is_not_found(err: &(dyn StdError + 'static)) -> bool {
    let mut current: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(err) = current {
        if let Some(registry) = err.downcast_ref::<RegistryError>() {
            if matches!(registry, RegistryError::NotFound(_)) {
                return true;
            }
        }
        if let Some(backend) = err.downcast_ref::<BackendError>() {
            if backend.kind() == BackendErrorKind::NotFound {
                return true;
            }
        }
        current = err.source();
    }
    false
}

/// Whether any error in the chain is an HTTP response with exactly
/// `code`.
///
/// Only typed backend errors match; an error that merely embeds another
/// error's string form never does.
pub fn has_status(err: &(dyn StdError + 'static), code: StatusCode) -> bool {
    let mut current: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(err) = current {
        if let Some(backend) = err.downcast_ref::<BackendError>() {
            if backend.status() == Some(code) {
                return true;
            }
        }
        current = err.source();
    }
    false
}
