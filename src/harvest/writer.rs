//! Line-delimited JSON output.
//!
//! [`JsonlAppender`] opens its file in append-create mode and only ever adds
//! whole lines. Items of the collection in progress go through a
//! [`CollectionStage`] first: they land in a staging file next to the items
//! file and are appended to it in one go once the collection is complete.
//! A run that dies mid-collection therefore leaves no orphan item lines in
//! the permanent items file.

use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};

#[derive(Error, Debug)]
pub enum WriterError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> WriterError + '_ {
    move |source| WriterError::Io {
        path: path.to_path_buf(),
        source,
    }
}

pub struct JsonlAppender {
    path: PathBuf,
    writer: BufWriter<File>,
    lines: usize,
}

impl JsonlAppender {
    /// Opens `path` for appending, creating it if needed. Existing lines are
    /// never touched.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, WriterError> {
        let path = path.into();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(io_error(&path))?;
        Ok(Self::from_file(path, file))
    }

    async fn create_truncated(path: PathBuf) -> Result<Self, WriterError> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .await
            .map_err(io_error(&path))?;
        Ok(Self::from_file(path, file))
    }

    fn from_file(path: PathBuf, file: File) -> Self {
        Self {
            path,
            writer: BufWriter::new(file),
            lines: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lines appended through this handle.
    pub fn lines_written(&self) -> usize {
        self.lines
    }

    /// Serializes `record` onto a single line.
    pub async fn append<T: Serialize>(&mut self, record: &T) -> Result<(), WriterError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        self.writer
            .write_all(&line)
            .await
            .map_err(io_error(&self.path))?;
        self.lines += 1;
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<(), WriterError> {
        self.writer.flush().await.map_err(io_error(&self.path))
    }

    async fn append_file(&mut self, source: &Path, lines: usize) -> Result<(), WriterError> {
        let mut input = File::open(source).await.map_err(io_error(source))?;
        tokio::io::copy(&mut input, &mut self.writer)
            .await
            .map_err(io_error(&self.path))?;
        self.lines += lines;
        Ok(())
    }
}

/// Staged item lines for the collection currently being harvested.
pub struct CollectionStage {
    file: JsonlAppender,
}

impl CollectionStage {
    /// `items.json` + `LINZ_a` → `items.json.LINZ_a.staging`, in the same
    /// directory as the items file.
    pub fn staging_path(items_path: &Path, collection_id: &str) -> PathBuf {
        let file_name = items_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "items".to_string());
        let safe_id: String = collection_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        items_path.with_file_name(format!("{}.{}.staging", file_name, safe_id))
    }

    /// Starts an empty stage. Leftovers from an interrupted run are truncated.
    pub async fn begin(items_path: &Path, collection_id: &str) -> Result<Self, WriterError> {
        let path = Self::staging_path(items_path, collection_id);
        Ok(Self {
            file: JsonlAppender::create_truncated(path).await?,
        })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn staged(&self) -> usize {
        self.file.lines_written()
    }

    pub async fn stage<T: Serialize>(&mut self, record: &T) -> Result<(), WriterError> {
        self.file.append(record).await
    }

    /// Appends every staged line to `items`, then removes the staging file.
    /// Returns the number of lines published.
    pub async fn publish(self, items: &mut JsonlAppender) -> Result<usize, WriterError> {
        let Self { mut file } = self;
        file.flush().await?;
        let staged = file.lines_written();
        let path = file.path().to_path_buf();
        drop(file);

        items.append_file(&path, staged).await?;
        items.flush().await?;
        tokio::fs::remove_file(&path)
            .await
            .map_err(io_error(&path))?;
        Ok(staged)
    }

    /// Drops every staged line.
    pub async fn discard(self) -> Result<(), WriterError> {
        let path = self.file.path().to_path_buf();
        drop(self.file);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(WriterError::Io { path, source }),
        }
    }
}
