use std::{
    io,
    path::{Path, PathBuf},
};

use anyhow::Context;
use shared::{domain::UserId, error::BotError};
use tokio::fs;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageVariant {
    /// The photo as uploaded.
    Original,
    /// The image renders read from and write to.
    Working,
}

/// Per-user image files under one directory. Every call goes to disk.
#[derive(Debug, Clone)]
pub struct ImageStore {
    dir: PathBuf,
}

impl ImageStore {
    pub async fn open(dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("failed to create image directory '{}'", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, user_id: UserId, variant: ImageVariant) -> PathBuf {
        let file_name = match variant {
            ImageVariant::Original => format!("{user_id}.jpg"),
            ImageVariant::Working => format!("{user_id}_last.jpg"),
        };
        self.dir.join(file_name)
    }

    pub async fn has_original(&self, user_id: UserId) -> bool {
        fs::try_exists(self.path_for(user_id, ImageVariant::Original))
            .await
            .unwrap_or(false)
    }

    /// Replaces the original photo and resets the working copy to it.
    pub async fn save_original(&self, user_id: UserId, bytes: &[u8]) -> Result<(), BotError> {
        let original = self.path_for(user_id, ImageVariant::Original);
        fs::write(&original, bytes)
            .await
            .map_err(|error| io_error("write", &original, error))?;
        self.reset_working(user_id).await
    }

    pub async fn reset_working(&self, user_id: UserId) -> Result<(), BotError> {
        let original = self.path_for(user_id, ImageVariant::Original);
        let working = self.path_for(user_id, ImageVariant::Working);
        fs::copy(&original, &working)
            .await
            .map_err(|error| io_error("copy", &original, error))?;
        Ok(())
    }

    pub async fn read_working(&self, user_id: UserId) -> Result<Vec<u8>, BotError> {
        let working = self.path_for(user_id, ImageVariant::Working);
        fs::read(&working)
            .await
            .map_err(|error| io_error("read", &working, error))
    }

    pub async fn open_original(&self, user_id: UserId) -> Result<Vec<u8>, BotError> {
        let original = self.path_for(user_id, ImageVariant::Original);
        fs::read(&original)
            .await
            .map_err(|error| io_error("read", &original, error))
    }
}

fn io_error(op: &str, path: &Path, error: io::Error) -> BotError {
    if error.kind() == io::ErrorKind::NotFound {
        BotError::MissingOriginal
    } else {
        BotError::Internal(format!("failed to {op} '{}': {error}", path.display()))
    }
}

#[cfg(test)]
#[path = "tests/images_tests.rs"]
mod tests;
