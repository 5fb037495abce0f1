//! Uploaded post images on the local file system.

use postwall_common::model::post::{ImagePath, InvalidImagePathError, POST_IMAGE_DIR};
use rand::{Rng, distr::Alphanumeric};
use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tokio::{fs, io::AsyncWriteExt};
use tracing::{info, warn};

const SUFFIX_LEN: usize = 7;
const MAX_NAME_ATTEMPTS: usize = 100;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("File name {0:?} has no usable characters")]
    InvalidFileName(String),
    #[error("No free file name found for {0:?}")]
    NameExhausted(String),
    #[error(transparent)]
    ImagePath(#[from] InvalidImagePathError),
    #[error("Writing uploaded file failed: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct MediaStorage {
    root: PathBuf,
}

impl MediaStorage {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn path_of(&self, image: &ImagePath) -> PathBuf {
        self.root.join(image.get())
    }

    /// Writes `contents` below `posts/` and returns where it ended up. A taken
    /// name gets a random suffix instead of being overwritten.
    pub async fn store_post_image(
        &self,
        original_name: &str,
        contents: &[u8],
    ) -> Result<ImagePath, MediaError> {
        let file_name = sanitize_file_name(original_name)
            .ok_or_else(|| MediaError::InvalidFileName(original_name.to_owned()))?;

        let directory = self.root.join(POST_IMAGE_DIR);
        fs::create_dir_all(&directory).await?;

        let mut candidate = file_name.clone();
        for _ in 0..MAX_NAME_ATTEMPTS {
            let image = ImagePath::for_file_name(&candidate)?;
            let created = fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(self.path_of(&image))
                .await;

            match created {
                Ok(mut file) => {
                    file.write_all(contents).await?;
                    file.flush().await?;
                    info!(path = %image, bytes = contents.len(), "Stored uploaded image");
                    return Ok(image);
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                    candidate = with_random_suffix(&file_name);
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(MediaError::NameExhausted(file_name))
    }

    /// Deletes a stored image. A failure is only logged.
    pub async fn remove(&self, image: &ImagePath) {
        match fs::remove_file(self.path_of(image)).await {
            Ok(()) => info!(path = %image, "Removed stored image"),
            Err(err) => warn!(path = %image, error = %err, "Removing stored image failed"),
        }
    }
}

/// Reduces an uploaded file name to a safe base name: whitespace becomes `_`,
/// anything but (Unicode) letters, digits, `-`, `_` and `.` is dropped.
#[must_use]
pub fn sanitize_file_name(name: &str) -> Option<String> {
    let base_name = name.rsplit(['/', '\\']).next().unwrap_or_default().trim();

    let sanitized: String = base_name
        .chars()
        .filter_map(|c| {
            if c.is_whitespace() {
                Some('_')
            } else if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') {
                Some(c)
            } else {
                None
            }
        })
        .collect();

    match sanitized.as_str() {
        "" | "." | ".." => None,
        _ => Some(sanitized),
    }
}

fn with_random_suffix(file_name: &str) -> String {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(SUFFIX_LEN)
        .map(char::from)
        .collect();

    match file_name.rsplit_once('.') {
        Some((stem, extension)) if !stem.is_empty() => format!("{stem}_{suffix}.{extension}"),
        _ => format!("{file_name}_{suffix}"),
    }
}
