use crate::server::{
    Result, ServerError, ServerRouter, found,
    auth::{AuthenticatedUser, MaybeUser},
    forms::{PostForm, PostSubmission, UploadedImage, ValidPost},
    media::MediaStorage,
    views::{self, PostCard, PostDetailTemplate, PostFormTemplate, post_url, profile_url},
};
use axum::{
    extract::State,
    response::{Html, IntoResponse, Response},
};
use axum_extra::routing::{RouterExt, TypedPath};
use postwall_common::model::{
    Id,
    post::{CreatePost, ImagePath, Post, PostContent, PostMarker},
    user::User,
};
use postwall_db::client::{DbClient, FeedScope};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info};

pub fn routes() -> ServerRouter {
    ServerRouter::new()
        .typed_get(post_detail)
        .typed_get(create_post_form)
        .typed_post(create_post)
        .typed_get(edit_post_form)
        .typed_post(edit_post)
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/posts/{post_id}/", rejection(ServerError))]
struct PostDetailPath {
    post_id: Id<PostMarker>,
}

async fn post_detail(
    PostDetailPath { post_id }: PostDetailPath,
    State(db): State<Arc<DbClient>>,
    MaybeUser(viewer): MaybeUser,
) -> Result<Html<String>> {
    let post = fetch_post(&db, post_id).await?;
    let post_count = db.count_posts(FeedScope::Author(post.author.id)).await?;
    let can_edit = viewer.is_some_and(|viewer| viewer.id == post.author.id);

    views::render(&PostDetailTemplate {
        post: PostCard::from(post),
        post_count,
        can_edit,
    })
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/create/", rejection(ServerError))]
struct CreatePostPath();

async fn create_post_form(
    CreatePostPath(): CreatePostPath,
    State(db): State<Arc<DbClient>>,
    _: AuthenticatedUser,
) -> Result<Html<String>> {
    let groups = db.fetch_groups().await?;
    views::render(&PostFormTemplate::create(PostForm::blank(&groups)))
}

async fn create_post(
    CreatePostPath(): CreatePostPath,
    State(db): State<Arc<DbClient>>,
    State(media): State<Arc<MediaStorage>>,
    AuthenticatedUser { user }: AuthenticatedUser,
    submission: PostSubmission,
) -> Result<Response> {
    let groups = db.fetch_groups().await?;
    let post = match submission.validate(&groups) {
        Ok(post) => post,
        Err(form) => {
            debug!(user_id = %user.id, "Rejected invalid post submission");
            return Ok(views::render(&PostFormTemplate::create(form))?.into_response());
        }
    };

    let ValidPost { text, group, image } = post;
    let author = user.id;
    let post_id = save_with_image(&media, image.as_ref(), None, |image| async move {
        let post = CreatePost {
            author,
            content: PostContent { text, group, image },
        };
        Ok::<_, ServerError>(db.create_post(&post).await?)
    })
    .await?;

    info!(%post_id, user_id = %user.id, "Created post");
    Ok(found(&profile_url(&user)))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/posts/{post_id}/edit/", rejection(ServerError))]
struct EditPostPath {
    post_id: Id<PostMarker>,
}

async fn edit_post_form(
    EditPostPath { post_id }: EditPostPath,
    State(db): State<Arc<DbClient>>,
    AuthenticatedUser { user }: AuthenticatedUser,
) -> Result<Response> {
    let post = fetch_post(&db, post_id).await?;
    if !is_author(&user, &post) {
        return Ok(found(&post_url(post_id)));
    }

    let groups = db.fetch_groups().await?;
    let form = PostForm::for_post(&post, &groups);
    Ok(views::render(&PostFormTemplate::edit(form, post_id))?.into_response())
}

async fn edit_post(
    EditPostPath { post_id }: EditPostPath,
    State(db): State<Arc<DbClient>>,
    State(media): State<Arc<MediaStorage>>,
    AuthenticatedUser { user }: AuthenticatedUser,
    submission: PostSubmission,
) -> Result<Response> {
    let post = fetch_post(&db, post_id).await?;
    if !is_author(&user, &post) {
        debug!(%post_id, user_id = %user.id, "Refused edit by non-author");
        return Ok(found(&post_url(post_id)));
    }

    let groups = db.fetch_groups().await?;
    let edited = match submission.validate(&groups) {
        Ok(edited) => edited,
        Err(mut form) => {
            form.current_image = PostForm::for_post(&post, &groups).current_image;
            return Ok(views::render(&PostFormTemplate::edit(form, post_id))?.into_response());
        }
    };

    // Without a new upload the post keeps its image.
    let ValidPost { text, group, image } = edited;
    save_with_image(&media, image.as_ref(), post.image, |image| async move {
        let content = PostContent { text, group, image };
        if db.update_post(post_id, &content).await? {
            Ok::<_, ServerError>(())
        } else {
            Err(ServerError::PostByIdNotFound(post_id))
        }
    })
    .await?;

    info!(%post_id, user_id = %user.id, "Edited post");
    Ok(found(&post_url(post_id)))
}

async fn fetch_post(db: &DbClient, post_id: Id<PostMarker>) -> Result<Post> {
    db.fetch_post(post_id)
        .await?
        .ok_or(ServerError::PostByIdNotFound(post_id))
}

fn is_author(user: &User, post: &Post) -> bool {
    post.author.id == user.id
}

/// Stores `upload` if there is one and hands its path (or `current`) to
/// `save`. A freshly stored file is deleted again when `save` fails.
async fn save_with_image<T, F, Fut>(
    media: &MediaStorage,
    upload: Option<&UploadedImage>,
    current: Option<ImagePath>,
    save: F,
) -> Result<T>
where
    F: FnOnce(Option<ImagePath>) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let Some(upload) = upload else {
        return save(current).await;
    };

    let stored = media
        .store_post_image(&upload.file_name, &upload.contents)
        .await?;
    let saved = save(Some(stored.clone())).await;
    if saved.is_err() {
        media.remove(&stored).await;
    }

    saved
}
