//! Error taxonomy for synchronization passes
//!
//! Only `UpstreamUnavailable` is fatal to a pass. Every other kind is
//! contained at its originating unit of work: the repository or dependency
//! it belongs to is skipped and the pass continues.

use thiserror::Error;

/// Errors raised while synchronizing repositories and dependencies.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The initial repository listing call failed. Nothing downstream can
    /// run without the full repository set, so the whole pass aborts.
    #[error("repository listing unavailable: {0}")]
    UpstreamUnavailable(String),

    /// The commit-activity probe for one repository failed. The repository
    /// is skipped for this pass (fail-closed).
    #[error("activity check failed for {repo}: {reason}")]
    ActivityCheckFailed { repo: String, reason: String },

    /// The manifest was fetched but is not valid structured data. The
    /// repository's dependency processing is abandoned for this pass.
    #[error("manifest for {repo} could not be parsed: {reason}")]
    ManifestUnparseable { repo: String, reason: String },

    /// The registry lookup for one dependency failed. That dependency is
    /// skipped; siblings continue.
    #[error("version resolution failed for {name}: {reason}")]
    VersionResolutionFailed { name: String, reason: String },

    /// A create/update against the durable store failed. That unit's work
    /// is abandoned; siblings and subsequent units continue.
    #[error("store operation failed: {0}")]
    StoreOperationFailed(String),
}

impl From<rusqlite::Error> for SyncError {
    fn from(err: rusqlite::Error) -> Self {
        SyncError::StoreOperationFailed(err.to_string())
    }
}
