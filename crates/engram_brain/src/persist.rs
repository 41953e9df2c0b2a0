//! Snapshot persistence shared by the three subsystems.
//!
//! Each subsystem owns one JSON document under the storage directory, loaded
//! fully at init and rewritten fully on every mutation. A missing file is
//! not an error (fresh state); any other I/O failure surfaces as
//! `BrainError::Storage`, and a document that exists but does not decode as
//! `BrainError::Corrupt`.

use std::path::Path;

use engram_core::{BrainError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Read and decode a persisted document. Returns `Ok(None)` when the file
/// does not exist so call sites can observe "not found" without errors.
pub async fn load_document<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(BrainError::Storage {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };

    let doc = serde_json::from_slice(&bytes).map_err(|e| BrainError::Corrupt {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(Some(doc))
}

/// Serialize and write a document, creating the parent directory if needed.
pub async fn save_document<T: Serialize>(path: &Path, document: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| BrainError::Storage {
                path: parent.to_path_buf(),
                source: e,
            })?;
    }

    let json = serde_json::to_vec_pretty(document).map_err(|e| BrainError::Storage {
        path: path.to_path_buf(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
    })?;

    tokio::fs::write(path, json)
        .await
        .map_err(|e| BrainError::Storage {
            path: path.to_path_buf(),
            source: e,
        })
}
