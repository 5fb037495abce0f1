use crate::server::{
    Result, ServerError, ServerRouter, Settings,
    auth::{AuthenticatedUser, MaybeUser},
    cache::PageCache,
    feed::{self, PageQuery, paginate},
    query::Query,
    views::{
        self, FollowTemplate, GroupListTemplate, IndexTemplate, PostCard, ProfileTemplate,
        profile_url,
    },
};
use axum::{extract::State, response::Html};
use axum_extra::routing::{RouterExt, TypedPath};
use postwall_common::model::{follow::Follow, group::GroupSlug, user::Username};
use postwall_db::client::{DbClient, FeedScope};
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

pub fn routes() -> ServerRouter {
    ServerRouter::new()
        .typed_get(index)
        .typed_get(group_list)
        .typed_get(profile)
        .typed_get(follow_index)
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/", rejection(ServerError))]
struct IndexPath();

/// All posts. The rendered page is cached per resolved page number.
async fn index(
    IndexPath(): IndexPath,
    Query(query): Query<PageQuery>,
    State(db): State<Arc<DbClient>>,
    State(cache): State<Arc<PageCache>>,
    State(settings): State<Arc<Settings>>,
) -> Result<Html<String>> {
    let position = feed::locate(&db, FeedScope::All, query.requested()).await?;
    let key = format!("index_page:{}", position.number);

    if let Some(body) = cache.get(&key).await {
        debug!(%key, "Serving cached index page");
        return Ok(Html(body));
    }

    let page = feed::fetch_page(&db, FeedScope::All, position).await?;
    let Html(body) = views::render(&IndexTemplate {
        page: page.map(PostCard::from),
    })?;

    cache
        .set(key, body.clone(), settings.index_cache_ttl)
        .await;
    Ok(Html(body))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/group/{slug}/", rejection(ServerError))]
struct GroupListPath {
    slug: GroupSlug,
}

async fn group_list(
    GroupListPath { slug }: GroupListPath,
    Query(query): Query<PageQuery>,
    State(db): State<Arc<DbClient>>,
) -> Result<Html<String>> {
    let group = db
        .fetch_group_by_slug(&slug)
        .await?
        .ok_or_else(|| ServerError::GroupBySlugNotFound(slug.to_string()))?;

    let page = paginate(&db, FeedScope::Group(group.id), query.requested()).await?;

    views::render(&GroupListTemplate {
        title: group.title.get().to_owned(),
        description: group.description,
        page: page.map(PostCard::from),
    })
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/profile/{username}/", rejection(ServerError))]
struct ProfilePath {
    username: Username,
}

async fn profile(
    ProfilePath { username }: ProfilePath,
    Query(query): Query<PageQuery>,
    State(db): State<Arc<DbClient>>,
    MaybeUser(viewer): MaybeUser,
) -> Result<Html<String>> {
    let author = db
        .fetch_user_by_username(&username)
        .await?
        .ok_or_else(|| ServerError::UserByUsernameNotFound(username.into_inner()))?;

    let page = paginate(&db, FeedScope::Author(author.id), query.requested()).await?;

    let following = match &viewer {
        Some(viewer) => {
            db.is_following(Follow {
                user: viewer.id,
                author: author.id,
            })
            .await?
        }
        None => false,
    };

    views::render(&ProfileTemplate {
        author_url: profile_url(&author),
        author: author.username.get().to_owned(),
        post_count: page.total,
        following,
        can_follow: viewer.is_some_and(|viewer| viewer.id != author.id),
        page: page.map(PostCard::from),
    })
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/follow/", rejection(ServerError))]
struct FollowIndexPath();

/// Posts by every author the signed-in user follows.
async fn follow_index(
    FollowIndexPath(): FollowIndexPath,
    Query(query): Query<PageQuery>,
    State(db): State<Arc<DbClient>>,
    AuthenticatedUser { user }: AuthenticatedUser,
) -> Result<Html<String>> {
    let page = paginate(&db, FeedScope::FollowedBy(user.id), query.requested()).await?;

    views::render(&FollowTemplate {
        page: page.map(PostCard::from),
    })
}
