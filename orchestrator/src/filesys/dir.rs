//! Directory operations

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use tokio::fs;

use crate::errors::OrchestratorError;
use crate::filesys::file::File;

/// A directory wrapper with path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dir {
    path: PathBuf,
}

impl Dir {
    /// Create a new directory reference
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Get the directory path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if the directory exists
    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    /// Create the directory (and parents)
    pub async fn create(&self) -> Result<(), OrchestratorError> {
        fs::create_dir_all(&self.path).await?;
        Ok(())
    }

    /// Delete the directory and all contents
    pub async fn delete(&self) -> Result<(), OrchestratorError> {
        if self.exists().await {
            fs::remove_dir_all(&self.path).await?;
        }
        Ok(())
    }

    /// List file names in the directory, sorted
    pub async fn list_file_names(&self) -> Result<Vec<String>, OrchestratorError> {
        let mut names = Vec::new();
        let mut entries = fs::read_dir(&self.path).await?;

        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                names.push(entry.file_name().to_string_lossy().to_string());
            }
        }

        names.sort();
        Ok(names)
    }

    /// List subdirectories, sorted by path
    pub async fn list_dirs(&self) -> Result<Vec<PathBuf>, OrchestratorError> {
        let mut dirs = Vec::new();
        let mut entries = fs::read_dir(&self.path).await?;

        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                dirs.push(entry.path());
            }
        }

        dirs.sort();
        Ok(dirs)
    }

    /// Get a file within this directory
    pub fn file(&self, name: &str) -> File {
        File::new(self.path.join(name))
    }

    /// Get a subdirectory
    pub fn subdir(&self, name: &str) -> Dir {
        Dir::new(self.path.join(name))
    }

    /// Recursively copy this directory into `dest`. Returns the number of files copied.
    pub async fn copy_to(&self, dest: &Dir) -> Result<u64, OrchestratorError> {
        copy_tree(self.path.clone(), dest.path.clone()).await
    }

    /// Replace `dest` with a copy of this directory
    pub async fn replace(&self, dest: &Dir) -> Result<u64, OrchestratorError> {
        dest.delete().await?;
        self.copy_to(dest).await
    }
}

fn copy_tree(
    src: PathBuf,
    dest: PathBuf,
) -> Pin<Box<dyn Future<Output = Result<u64, OrchestratorError>> + Send>> {
    Box::pin(async move {
        fs::create_dir_all(&dest).await?;
        let mut copied = 0;
        let mut entries = fs::read_dir(&src).await?;

        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            let target = dest.join(entry.file_name());
            if file_type.is_dir() {
                copied += copy_tree(entry.path(), target).await?;
            } else if file_type.is_file() {
                fs::copy(entry.path(), &target).await?;
                copied += 1;
            }
        }

        Ok(copied)
    })
}
