//! Page templates and the view models they are rendered from.

use crate::server::{Result, feed::Page, forms::PostForm};
use askama::Template;
use axum::response::Html;
use postwall_common::model::{Id, group::Group, post::Post, post::PostMarker, user::User};
use time::{format_description::BorrowedFormatItem, macros::format_description};
use url::form_urlencoded;

const DATE_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[day] [month repr:long] [year]");

pub fn render<T: Template>(template: &T) -> Result<Html<String>> {
    Ok(Html(template.render()?))
}

#[must_use]
pub fn profile_url(user: &User) -> String {
    let username: String = form_urlencoded::byte_serialize(user.username.get().as_bytes()).collect();
    format!("/profile/{username}/")
}

#[must_use]
pub fn group_url(group: &Group) -> String {
    format!("/group/{}/", group.slug)
}

#[must_use]
pub fn post_url(post_id: Id<PostMarker>) -> String {
    format!("/posts/{post_id}/")
}

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct GroupLink {
    pub title: String,
    pub url: String,
}

impl From<&Group> for GroupLink {
    fn from(group: &Group) -> Self {
        Self {
            title: group.title.get().to_owned(),
            url: group_url(group),
        }
    }
}

/// What a listing or detail page shows of a post.
#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct PostCard {
    pub id: Id<PostMarker>,
    pub url: String,
    pub text: String,
    pub author: String,
    pub author_url: String,
    pub group: Option<GroupLink>,
    pub image_url: Option<String>,
    pub created_at: String,
}

impl From<Post> for PostCard {
    fn from(post: Post) -> Self {
        Self {
            id: post.id,
            url: post_url(post.id),
            text: post.text.get().to_owned(),
            author_url: profile_url(&post.author),
            author: post.author.username.into_inner(),
            group: post.group.as_ref().map(GroupLink::from),
            image_url: post.image.map(|image| format!("/media/{image}")),
            created_at: post.created_at.format(DATE_FORMAT).unwrap_or_default(),
        }
    }
}

#[derive(Template)]
#[template(path = "posts/index.html")]
pub struct IndexTemplate {
    pub page: Page<PostCard>,
}

#[derive(Template)]
#[template(path = "posts/group_list.html")]
pub struct GroupListTemplate {
    pub title: String,
    pub description: String,
    pub page: Page<PostCard>,
}

#[derive(Template)]
#[template(path = "posts/profile.html")]
pub struct ProfileTemplate {
    pub author: String,
    pub author_url: String,
    pub post_count: u64,
    /// Whether the signed-in visitor follows the author.
    pub following: bool,
    /// Signed in and not looking at their own profile.
    pub can_follow: bool,
    pub page: Page<PostCard>,
}

#[derive(Template)]
#[template(path = "posts/post_detail.html")]
pub struct PostDetailTemplate {
    pub post: PostCard,
    pub post_count: u64,
    pub can_edit: bool,
}

#[derive(Template)]
#[template(path = "posts/create_post.html")]
pub struct PostFormTemplate {
    pub form: PostForm,
    /// Set when an existing post is edited.
    pub post_id: Option<Id<PostMarker>>,
    pub action: String,
}

impl PostFormTemplate {
    #[must_use]
    pub fn create(form: PostForm) -> Self {
        Self {
            form,
            post_id: None,
            action: "/create/".to_owned(),
        }
    }

    #[must_use]
    pub fn edit(form: PostForm, post_id: Id<PostMarker>) -> Self {
        Self {
            form,
            post_id: Some(post_id),
            action: format!("/posts/{post_id}/edit/"),
        }
    }
}

#[derive(Template)]
#[template(path = "posts/follow.html")]
pub struct FollowTemplate {
    pub page: Page<PostCard>,
}

#[derive(Template)]
#[template(path = "core/404.html")]
pub struct NotFoundTemplate;

#[derive(Template)]
#[template(path = "core/error.html")]
pub struct ErrorTemplate {
    pub status: u16,
    pub reason: &'static str,
}
