//! Pending-namespace checkpoint file and the safe list.
//!
//! Both files hold one namespace per line. Blank lines are ignored and lines
//! are compared after trimming surrounding whitespace.

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

async fn read_names(path: &Path) -> Result<Vec<String>, CheckpointError> {
    let contents =
        tokio::fs::read_to_string(path)
            .await
            .map_err(|source| CheckpointError::Read {
                path: path.to_path_buf(),
                source,
            })?;

    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

/// Durable list of namespaces still to purge.
#[derive(Debug, Clone)]
pub struct CheckpointFile {
    path: PathBuf,
}

impl CheckpointFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Pending namespaces in file order.
    pub async fn load(&self) -> Result<Vec<String>, CheckpointError> {
        read_names(&self.path).await
    }

    /// Remove every line naming `namespace`. Returns whether anything was removed.
    ///
    /// The file is rewritten through a sibling temp file and a rename, so an
    /// interrupted rewrite leaves the previous contents in place.
    pub async fn remove(&self, namespace: &str) -> Result<bool, CheckpointError> {
        let names = self.load().await?;
        let remaining: Vec<&str> = names
            .iter()
            .map(String::as_str)
            .filter(|name| *name != namespace.trim())
            .collect();

        if remaining.len() == names.len() {
            return Ok(false);
        }

        let mut contents = remaining.join("\n");
        if !contents.is_empty() {
            contents.push('\n');
        }

        let tmp = self.temp_path();
        let write_err = |source| CheckpointError::Write {
            path: self.path.clone(),
            source,
        };
        tokio::fs::write(&tmp, contents).await.map_err(write_err)?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(write_err)?;

        tracing::debug!(namespace = %namespace, remaining = remaining.len(), "Checkpoint updated");
        Ok(true)
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

/// Namespaces that must never be purged.
#[derive(Debug, Clone, Default)]
pub struct SafeList {
    names: HashSet<String>,
}

impl SafeList {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, CheckpointError> {
        Ok(read_names(path.as_ref()).await?.into_iter().collect())
    }

    pub fn contains(&self, namespace: &str) -> bool {
        self.names.contains(namespace.trim())
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl FromIterator<String> for SafeList {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self {
            names: iter.into_iter().collect(),
        }
    }
}
