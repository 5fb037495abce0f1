use crate::model::{
    Id,
    group::{Group, GroupMarker},
    user::{User, UserMarker},
};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use thiserror::Error;
use time::UtcDateTime;

/// Directory below the media root that post images are stored in.
pub const POST_IMAGE_DIR: &str = "posts";

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct PostMarker;

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct Post {
    pub id: Id<PostMarker>,
    pub author: User,
    pub text: PostText,
    pub group: Option<Group>,
    pub image: Option<ImagePath>,
    pub created_at: UtcDateTime,
}

/// The author-editable part of a post.
#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
pub struct PostContent {
    pub text: PostText,
    pub group: Option<Id<GroupMarker>>,
    pub image: Option<ImagePath>,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
pub struct CreatePost {
    pub author: Id<UserMarker>,
    pub content: PostContent,
}

/// Post body; never empty once surrounding whitespace is stripped.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub struct PostText(String);

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Error)]
#[error("The post text is empty")]
pub struct InvalidPostTextError;

impl PostText {
    pub fn new(text: &str) -> Result<Self, InvalidPostTextError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            Err(InvalidPostTextError)
        } else {
            Ok(Self(trimmed.to_owned()))
        }
    }

    #[must_use]
    pub fn get(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for PostText {
    type Error = InvalidPostTextError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl Display for PostText {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Media-root relative location of an uploaded image, e.g. `posts/small.gif`.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub struct ImagePath(String);

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Error)]
#[error("The image path is invalid: {0:?}")]
pub struct InvalidImagePathError(String);

impl ImagePath {
    pub fn new(path: String) -> Result<Self, InvalidImagePathError> {
        let valid = path
            .strip_prefix(POST_IMAGE_DIR)
            .and_then(|rest| rest.strip_prefix('/'))
            .is_some_and(|file_name| {
                !file_name.is_empty()
                    && !file_name.contains('/')
                    && !file_name.contains('\\')
                    && file_name != "."
                    && file_name != ".."
            });

        if valid {
            Ok(Self(path))
        } else {
            Err(InvalidImagePathError(path))
        }
    }

    /// Builds the path of a file stored in the post image directory.
    pub fn for_file_name(file_name: &str) -> Result<Self, InvalidImagePathError> {
        Self::new(format!("{POST_IMAGE_DIR}/{file_name}"))
    }

    #[must_use]
    pub fn get(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn file_name(&self) -> &str {
        self.0
            .rsplit_once('/')
            .map_or(self.0.as_str(), |(_, name)| name)
    }
}

impl TryFrom<String> for ImagePath {
    type Error = InvalidImagePathError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl Display for ImagePath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
