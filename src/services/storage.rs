//! Filesystem media storage.
//!
//! Files live under a public root directory (served statically by whatever
//! fronts the pipeline); references handed back to the pipeline are web
//! paths relative to that root, e.g. `/generated_images/<id>/image_1.png`.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;

use super::MediaStorage;
use crate::error::ServiceError;

/// Media storage rooted at a local directory.
#[derive(Debug, Clone)]
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a relative path below the root, refusing `..` and absolute paths.
    fn resolve(&self, relative: &str) -> Result<PathBuf, ServiceError> {
        let relative = Path::new(relative.trim_start_matches('/'));
        let safe = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !safe || relative.as_os_str().is_empty() {
            return Err(ServiceError::Io(std::io::Error::new(
                ErrorKind::InvalidInput,
                format!("refusing storage path '{}'", relative.display()),
            )));
        }
        Ok(self.root.join(relative))
    }
}

/// Web path of a relative storage path.
pub fn web_path(relative: &str) -> String {
    format!("/{}", relative.trim_start_matches('/'))
}

#[async_trait]
impl MediaStorage for FsStorage {
    async fn write(&self, path: &str, bytes: &[u8]) -> Result<String, ServiceError> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, bytes).await?;
        tracing::debug!(path = %target.display(), bytes = bytes.len(), "Media written");
        Ok(web_path(path))
    }

    async fn delete(&self, path: &str) -> Result<(), ServiceError> {
        let target = self.resolve(path)?;
        match tokio::fs::remove_dir_all(&target).await {
            Ok(()) => {
                tracing::debug!(path = %target.display(), "Media directory deleted");
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
