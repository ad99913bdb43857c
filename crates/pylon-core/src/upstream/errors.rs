use thiserror::Error;

/// Errors produced by the upstream router.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum UpstreamerError {
    /// A `v/<version>` path prefix did not carry a numeric version.
    #[error("invalid api version in path: {0}")]
    InvalidApiVersion(String),
}
