use std::path::PathBuf;

use thiserror::Error;

/// Failure taxonomy for the brain and its subsystems.
///
/// Policy is fail fast and loud: callers should treat any of these as fatal
/// to the current operation, not to the process. Graceful degradation is
/// limited to the two documented cases (`suggest_fix` returning a
/// zero-confidence result, `add_relationships` skipping unresolved names),
/// neither of which surfaces through this type.
#[derive(Debug, Error)]
pub enum BrainError {
    /// A Brain method was called before `initialize()`.
    #[error("brain not initialized; call initialize() first")]
    NotInitialized,

    /// A memory entry reached the store without an embedding attached.
    #[error("memory entry '{id}' has no embedding")]
    MissingEmbedding { id: String },

    /// A filesystem failure other than missing-file-on-load.
    #[error("storage I/O failure at {path}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A persisted document exists but does not decode.
    #[error("corrupt persisted state at {path}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The embedding provider failed. Propagated unmodified, no retry.
    #[error("embedding provider failure")]
    Provider(#[source] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, BrainError>;
