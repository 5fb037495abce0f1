//! The post creation / edit form.
//!
//! The form exposes exactly two editable fields: a required free-text `text`
//! and an optional single choice `group`. An `image` may be uploaded along
//! with them.

use crate::server::{ServerError, media::sanitize_file_name};
use axum::{
    body::Bytes,
    extract::{FromRequest, Multipart, Request},
};
use postwall_common::model::{
    Id,
    group::{Group, GroupMarker},
    post::{Post, PostText},
};

pub const REQUIRED: &str = "This field is required.";
pub const INVALID_CHOICE: &str = "Select a valid choice. That choice is not one of the available choices.";
pub const INVALID_IMAGE: &str = "Upload a valid image. The file you uploaded was either not an image or a corrupted image.";
pub const EMPTY_FILE: &str = "The submitted file is empty.";

#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum FieldKind {
    /// Free text.
    Text,
    /// One value out of `choices`.
    Choice,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct Choice {
    pub value: String,
    pub label: String,
    pub selected: bool,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct FormField {
    pub name: &'static str,
    pub label: &'static str,
    pub kind: FieldKind,
    pub required: bool,
    pub value: String,
    pub choices: Vec<Choice>,
    pub errors: Vec<&'static str>,
}

impl FormField {
    #[must_use]
    pub fn is_text(&self) -> bool {
        self.kind == FieldKind::Text
    }
}

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct PostForm {
    pub text: FormField,
    pub group: FormField,
    pub image_errors: Vec<&'static str>,
    /// Link to the image a post being edited already has.
    pub current_image: Option<String>,
}

impl PostForm {
    /// A form showing `text` and with the group whose id is `selected_group` chosen.
    #[must_use]
    pub fn new(groups: &[Group], text: &str, selected_group: &str) -> Self {
        let selected_group = selected_group.trim();
        let empty_choice = Choice {
            value: String::new(),
            label: "---------".to_owned(),
            selected: selected_group.is_empty(),
        };
        let group_choices = groups.iter().map(|group| {
            let value = group.id.to_string();
            Choice {
                selected: value == selected_group,
                label: group.title.get().to_owned(),
                value,
            }
        });

        Self {
            text: FormField {
                name: "text",
                label: "Text",
                kind: FieldKind::Text,
                required: true,
                value: text.to_owned(),
                choices: Vec::new(),
                errors: Vec::new(),
            },
            group: FormField {
                name: "group",
                label: "Group",
                kind: FieldKind::Choice,
                required: false,
                value: selected_group.to_owned(),
                choices: std::iter::once(empty_choice).chain(group_choices).collect(),
                errors: Vec::new(),
            },
            image_errors: Vec::new(),
            current_image: None,
        }
    }

    #[must_use]
    pub fn blank(groups: &[Group]) -> Self {
        Self::new(groups, "", "")
    }

    /// Pre-filled with what `post` currently holds.
    #[must_use]
    pub fn for_post(post: &Post, groups: &[Group]) -> Self {
        let selected_group = post
            .group
            .as_ref()
            .map(|group| group.id.to_string())
            .unwrap_or_default();

        Self {
            current_image: post.image.as_ref().map(|image| format!("/media/{image}")),
            ..Self::new(groups, post.text.get(), &selected_group)
        }
    }

    /// The editable fields, in display order.
    #[must_use]
    pub fn fields(&self) -> [&FormField; 2] {
        [&self.text, &self.group]
    }

    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.fields().iter().any(|field| !field.errors.is_empty()) || !self.image_errors.is_empty()
    }
}

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct UploadedImage {
    pub file_name: String,
    pub content_type: String,
    pub contents: Bytes,
}

/// A submitted post form as it came in, not yet validated.
#[derive(Clone, Eq, PartialEq, Debug, Default, Hash)]
pub struct PostSubmission {
    pub text: String,
    pub group: String,
    pub image: Option<UploadedImage>,
}

/// A submission that passed validation.
#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct ValidPost {
    pub text: PostText,
    pub group: Option<Id<GroupMarker>>,
    pub image: Option<UploadedImage>,
}

impl PostSubmission {
    /// Checks the submission against the existing `groups`. On failure the
    /// returned form carries the submitted values and the errors.
    pub fn validate(self, groups: &[Group]) -> Result<ValidPost, PostForm> {
        let mut form = PostForm::new(groups, &self.text, &self.group);

        let text = PostText::new(&self.text).ok();
        if text.is_none() {
            form.text.errors.push(REQUIRED);
        }

        let group = match self.group.trim() {
            "" => Some(None),
            value => value
                .parse::<Id<GroupMarker>>()
                .ok()
                .filter(|id| groups.iter().any(|group| group.id == *id))
                .map(Some),
        };
        if group.is_none() {
            form.group.errors.push(INVALID_CHOICE);
        }

        if let Some(image) = &self.image {
            if image.contents.is_empty() {
                form.image_errors.push(EMPTY_FILE);
            } else if !image.content_type.starts_with("image/")
                || sanitize_file_name(&image.file_name).is_none()
                || imagesize::blob_size(&image.contents).is_err()
            {
                form.image_errors.push(INVALID_IMAGE);
            }
        }

        match (text, group) {
            (Some(text), Some(group)) if !form.has_errors() => Ok(ValidPost {
                text,
                group,
                image: self.image,
            }),
            _ => Err(form),
        }
    }
}

impl<S> FromRequest<S> for PostSubmission
where
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request(request: Request, state: &S) -> Result<Self, Self::Rejection> {
        let mut multipart = Multipart::from_request(request, state).await?;
        let mut submission = PostSubmission::default();

        while let Some(field) = multipart.next_field().await? {
            match field.name() {
                Some("text") => submission.text = field.text().await?,
                Some("group") => submission.group = field.text().await?,
                Some("image") => {
                    let file_name = field.file_name().unwrap_or_default().to_owned();
                    let content_type = field.content_type().unwrap_or_default().to_owned();
                    let contents = field.bytes().await?;

                    // Browsers send an empty, unnamed part when no file was picked.
                    if !file_name.is_empty() || !contents.is_empty() {
                        submission.image = Some(UploadedImage {
                            file_name,
                            content_type,
                            contents,
                        });
                    }
                }
                _ => {}
            }
        }

        Ok(submission)
    }
}
