//! Plain-text lists of item URLs, one per line.

use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum ItemListError {
    #[error("Failed to read item list {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}:{line}: '{url}' is not an absolute URL: {source}")]
    InvalidUrl {
        path: PathBuf,
        line: usize,
        url: String,
        #[source]
        source: url::ParseError,
    },
}

/// Item URLs in file order. Surrounding whitespace and blank lines are
/// ignored.
pub async fn load_item_list(path: &Path) -> Result<Vec<String>, ItemListError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ItemListError::Io {
            path: path.to_path_buf(),
            source,
        })?;

    let mut urls = Vec::new();
    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let url = Url::parse(line).map_err(|source| ItemListError::InvalidUrl {
            path: path.to_path_buf(),
            line: index + 1,
            url: line.to_string(),
            source,
        })?;
        urls.push(url.to_string());
    }

    Ok(urls)
}
