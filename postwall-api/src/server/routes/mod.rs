use crate::server::ServerRouter;
use axum::Router;

mod feeds;
mod follow;
mod posts;

pub fn routes() -> ServerRouter {
    Router::new()
        .merge(feeds::routes())
        .merge(posts::routes())
        .merge(follow::routes())
}
