//! Directory-backed artifact sources and destinations.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::exec::{ArtifactDestination, ArtifactError, ArtifactReader, ArtifactSource};

/// Exposes a directory tree as an artifact source.
pub struct DirArtifactSource {
    root: PathBuf,
}

impl DirArtifactSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl ArtifactSource for DirArtifactSource {
    async fn stream_to(&self, dest: &dyn ArtifactDestination) -> Result<(), ArtifactError> {
        // Iterative walk; directories are re-created implicitly by the
        // destination when it writes files.
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let file_type = entry.file_type().await?;

                if file_type.is_dir() {
                    pending.push(path);
                } else if file_type.is_file() {
                    let rel = path
                        .strip_prefix(&self.root)
                        .expect("walk stays under the root")
                        .to_string_lossy()
                        .into_owned();
                    let file = tokio::fs::File::open(&path).await?;
                    dest.stream_in(&rel, Box::new(file)).await?;
                }
            }
        }

        Ok(())
    }

    async fn stream_file(&self, path: &str) -> Result<ArtifactReader, ArtifactError> {
        let full = self.root.join(path);
        match tokio::fs::File::open(&full).await {
            Ok(file) => Ok(Box::new(file)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(ArtifactError::FileNotFound(path.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }
}

/// Writes streamed artifacts into a directory tree.
pub struct DirArtifactDestination {
    root: PathBuf,
}

impl DirArtifactDestination {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ArtifactDestination for DirArtifactDestination {
    async fn stream_in(&self, path: &str, mut contents: ArtifactReader) -> Result<(), ArtifactError> {
        let full = self.root.join(path);
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(&full).await?;
        tokio::io::copy(&mut contents, &mut file).await?;
        Ok(())
    }
}
