//! Incremental resume: which collections a previous run already wrote.
//!
//! The collections file doubles as the checkpoint. A collection line is only
//! written after all of its items are published, so an ID found here means
//! the collection is complete.

use serde_json::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ResumeError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}:{line}: not a JSON object: {source}")]
    MalformedLine {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// Collection IDs present in an existing collections file. A missing file
/// yields an empty set.
pub async fn load_processed_ids(path: &Path) -> Result<HashSet<String>, ResumeError> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashSet::new()),
        Err(source) => {
            return Err(ResumeError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let mut ids = HashSet::new();
    for (index, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record: Value =
            serde_json::from_str(line).map_err(|source| ResumeError::MalformedLine {
                path: path.to_path_buf(),
                line: index + 1,
                source,
            })?;
        if let Some(id) = record.get("id").and_then(Value::as_str) {
            ids.insert(id.to_string());
        }
    }

    Ok(ids)
}
