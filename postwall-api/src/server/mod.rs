use axum::{
    Router,
    extract::{
        FromRef, Request,
        multipart::{MultipartError, MultipartRejection},
        rejection::{PathRejection, QueryRejection},
    },
    handler::HandlerWithoutStateExt,
    http::{StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use cache::PageCache;
use media::{MediaError, MediaStorage};
use postwall_common::model::{Id, auth::AuthTokenHashError, post::PostMarker};
use postwall_db::client::{DbClient, DbError};
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::{debug, error};
use url::form_urlencoded;
use views::{ErrorTemplate, NotFoundTemplate};

mod auth;
pub mod cache;
mod feed;
mod forms;
pub mod media;
mod query;
mod routes;
mod views;

#[cfg(test)]
mod test_util;

pub type ServerRouter = Router<ServerState>;

/// Knobs the handlers read at request time.
#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct Settings {
    /// Where anonymous visitors of restricted pages are sent.
    pub login_url: String,
    pub index_cache_ttl: Duration,
}

impl Settings {
    #[must_use]
    pub fn login_redirect(&self, next: &str) -> String {
        let query = form_urlencoded::Serializer::new(String::new())
            .append_pair("next", next)
            .finish();
        format!("{}?{query}", self.login_url)
    }
}

#[derive(Clone, FromRef)]
pub struct ServerState {
    pub db_client: Arc<DbClient>,
    pub page_cache: Arc<PageCache>,
    pub media: Arc<MediaStorage>,
    pub settings: Arc<Settings>,
}

/// The complete application: pages, uploaded media and the not-found fallback.
pub fn app(state: ServerState) -> Router {
    let media_files =
        ServeDir::new(state.media.root()).not_found_service(fallback.into_service());

    routes::routes()
        .nest_service("/media", media_files)
        .fallback(fallback)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn fallback(request: Request) -> ServerError {
    ServerError::UnknownRoute(request.into_parts().0.uri)
}

pub type Result<T, E = ServerError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Unknown route requested: {0}")]
    UnknownRoute(Uri),
    #[error("Path rejected: {0}")]
    PathRejection(#[from] PathRejection),
    #[error("Query string rejected: {0}")]
    QueryRejection(#[from] QueryRejection),
    #[error("Multipart request rejected: {0}")]
    MultipartRejection(#[from] MultipartRejection),
    #[error("Multipart body could not be read: {0}")]
    Multipart(#[from] MultipartError),
    #[error("Login required, redirecting to {0}")]
    LoginRequired(String),
    #[error("The auth token could not be hashed: {0}")]
    AuthTokenHash(#[from] AuthTokenHashError),
    #[error(transparent)]
    Database(#[from] DbError),
    #[error(transparent)]
    Media(#[from] MediaError),
    #[error("Template could not be rendered: {0}")]
    Template(#[from] askama::Error),
    #[error("Post with id {0} was not found.")]
    PostByIdNotFound(Id<PostMarker>),
    #[error("Group with slug {0:?} was not found.")]
    GroupBySlugNotFound(String),
    #[error("User with username {0:?} was not found.")]
    UserByUsernameNotFound(String),
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::UnknownRoute(_)
            | ServerError::PathRejection(_)
            | ServerError::PostByIdNotFound(_)
            | ServerError::GroupBySlugNotFound(_)
            | ServerError::UserByUsernameNotFound(_) => StatusCode::NOT_FOUND,
            ServerError::LoginRequired(_) => StatusCode::FOUND,
            ServerError::QueryRejection(rejection) => rejection.status(),
            ServerError::MultipartRejection(rejection) => rejection.status(),
            ServerError::Multipart(err) => err.status(),
            ServerError::AuthTokenHash(_)
            | ServerError::Database(_)
            | ServerError::Media(_)
            | ServerError::Template(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();

        if let ServerError::LoginRequired(location) = &self {
            debug!(%location, "Anonymous request to a restricted page");
            return found(location);
        }

        if status.is_server_error() {
            error!(error = %self, %status, "Replying with error");
        } else {
            debug!(error = %self, %status, "Replying with error");
        }

        let page = if status == StatusCode::NOT_FOUND {
            views::render(&NotFoundTemplate)
        } else {
            views::render(&ErrorTemplate {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("Error"),
            })
        };

        match page {
            Ok(html) => (status, html).into_response(),
            Err(err) => {
                error!(error = %err, "Error page could not be rendered");
                status.into_response()
            }
        }
    }
}

/// `302 Found` to `location`, the conventional answer to a form submission.
pub fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
}
