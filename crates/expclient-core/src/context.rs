//! Model-definition context: the local directory uploaded alongside a new
//! experiment, flattened into named file entries.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{ClientError, Result};

/// Upper bound on the summed size of all file contents.
pub const MAX_CONTEXT_BYTES: u64 = 96 * 1024 * 1024;

/// Directory names never uploaded.
const IGNORED_DIRS: &[&str] = &[".git", "__pycache__", ".ipynb_checkpoints"];

/// Kind of a context entry. Encoded on the wire as the tar type byte
/// (`'0'` for regular files, `'5'` for directories).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum EntryType {
    File,
    Directory,
}

impl From<EntryType> for u8 {
    fn from(t: EntryType) -> u8 {
        match t {
            EntryType::File => b'0',
            EntryType::Directory => b'5',
        }
    }
}

impl TryFrom<u8> for EntryType {
    type Error = String;

    fn try_from(v: u8) -> std::result::Result<Self, Self::Error> {
        match v {
            b'0' => Ok(EntryType::File),
            b'5' => Ok(EntryType::Directory),
            other => Err(format!("unknown context entry type {other}")),
        }
    }
}

/// One file or directory of the context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextEntry {
    /// Path relative to the context root, `/`-separated.
    pub path: String,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    /// UTF-8 file content; empty for directories.
    pub content: String,
    /// Modification time, seconds since the epoch.
    pub mtime: i64,
}

/// A packaged model-definition directory.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Context {
    pub entries: Vec<ContextEntry>,
}

impl Context {
    /// Read every file and directory under `root`, sorted by path.
    pub fn from_local(root: &Path) -> Result<Self> {
        if !root.is_dir() {
            return Err(ClientError::InvalidContext(format!(
                "{} is not a directory",
                root.display()
            )));
        }

        let mut entries = vec![];
        let mut total: u64 = 0;

        // Symlinks upload as their targets. Loops surface as walk errors.
        let walker = WalkDir::new(root)
            .min_depth(1)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| {
                !(e.file_type().is_dir()
                    && e.file_name()
                        .to_str()
                        .is_some_and(|name| IGNORED_DIRS.contains(&name)))
            });

        for entry in walker {
            let entry = entry.map_err(|e| ClientError::InvalidContext(e.to_string()))?;
            let rel = entry.path().strip_prefix(root).unwrap_or(entry.path());
            let path = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");

            let metadata = entry
                .metadata()
                .map_err(|e| ClientError::InvalidContext(e.to_string()))?;
            let mtime = metadata
                .modified()
                .map(|t| DateTime::<Utc>::from(t).timestamp())
                .unwrap_or_default();

            if metadata.is_dir() {
                entries.push(ContextEntry {
                    path,
                    entry_type: EntryType::Directory,
                    content: String::new(),
                    mtime,
                });
                continue;
            }
            if !metadata.is_file() {
                return Err(ClientError::InvalidContext(format!(
                    "{path} is not a regular file"
                )));
            }

            total += metadata.len();
            if total > MAX_CONTEXT_BYTES {
                return Err(ClientError::ContextTooLarge {
                    size: total,
                    limit: MAX_CONTEXT_BYTES,
                });
            }

            let bytes = std::fs::read(entry.path())?;
            let content = String::from_utf8(bytes).map_err(|_| {
                ClientError::InvalidContext(format!("{path} is not valid UTF-8"))
            })?;
            entries.push(ContextEntry {
                path,
                entry_type: EntryType::File,
                content,
                mtime,
            });
        }

        debug!(
            root = %root.display(),
            entries = entries.len(),
            bytes = total,
            "Packaged model definition"
        );
        Ok(Self { entries })
    }

    pub fn total_bytes(&self) -> usize {
        self.entries.iter().map(|e| e.content.len()).sum()
    }
}
