use crate::server::{
    Result, ServerError, ServerRouter, found, auth::AuthenticatedUser, views::profile_url,
};
use axum::{extract::State, response::Response};
use axum_extra::routing::{RouterExt, TypedPath};
use postwall_common::model::{
    follow::Follow,
    user::{User, Username},
};
use postwall_db::client::DbClient;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info};

pub fn routes() -> ServerRouter {
    ServerRouter::new()
        .typed_post(follow)
        .typed_post(unfollow)
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/profile/{username}/follow/", rejection(ServerError))]
struct FollowPath {
    username: Username,
}

/// Following twice, or following yourself, changes nothing.
async fn follow(
    FollowPath { username }: FollowPath,
    State(db): State<Arc<DbClient>>,
    AuthenticatedUser { user }: AuthenticatedUser,
) -> Result<Response> {
    let author = fetch_author(&db, username).await?;
    let follow = Follow {
        user: user.id,
        author: author.id,
    };

    if db.create_follow(follow).await? {
        info!(user_id = %user.id, author_id = %author.id, "Followed author");
    } else {
        debug!(user_id = %user.id, author_id = %author.id, "Follow was a no-op");
    }

    Ok(found(&profile_url(&author)))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/profile/{username}/unfollow/", rejection(ServerError))]
struct UnfollowPath {
    username: Username,
}

async fn unfollow(
    UnfollowPath { username }: UnfollowPath,
    State(db): State<Arc<DbClient>>,
    AuthenticatedUser { user }: AuthenticatedUser,
) -> Result<Response> {
    let author = fetch_author(&db, username).await?;
    let follow = Follow {
        user: user.id,
        author: author.id,
    };

    if db.delete_follow(follow).await? {
        info!(user_id = %user.id, author_id = %author.id, "Unfollowed author");
    }

    Ok(found(&profile_url(&author)))
}

async fn fetch_author(db: &DbClient, username: Username) -> Result<User> {
    db.fetch_user_by_username(&username)
        .await?
        .ok_or_else(|| ServerError::UserByUsernameNotFound(username.into_inner()))
}
