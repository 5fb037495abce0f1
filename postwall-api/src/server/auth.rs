use crate::server::{Result, ServerError, Settings};
use axum::{
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use headers::{Authorization, Cookie, HeaderMapExt, authorization::Bearer};
use postwall_common::model::{auth::AuthToken, user::User};
use postwall_db::client::DbClient;
use std::sync::Arc;
use time::UtcDateTime;
use tracing::debug;

/// Holds the session token of browser clients.
pub const SESSION_COOKIE: &str = "postwall_session";

/// A signed-in user. Anonymous requests are sent to the login page.
#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct AuthenticatedUser {
    pub user: User,
}

/// The signed-in user, if any.
#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct MaybeUser(pub Option<User>);

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    Arc<DbClient>: FromRef<S>,
    Arc<Settings>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let MaybeUser(user) = MaybeUser::from_request_parts(parts, state).await?;

        match user {
            Some(user) => Ok(Self { user }),
            None => {
                let next = parts.uri.path_and_query().map_or("/", |path| path.as_str());
                let location = Arc::<Settings>::from_ref(state).login_redirect(next);
                Err(ServerError::LoginRequired(location))
            }
        }
    }
}

impl<S> FromRequestParts<S> for MaybeUser
where
    Arc<DbClient>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Some(token) = request_token(parts) else {
            return Ok(Self(None));
        };

        let db = Arc::<DbClient>::from_ref(state);
        Ok(Self(resolve_user(&db, &token).await?))
    }
}

/// The token from the `Authorization` header, or else from the session cookie.
fn request_token(parts: &Parts) -> Option<AuthToken> {
    let raw_token = match parts.headers.typed_get::<Authorization<Bearer>>() {
        Some(authorization) => authorization.token().to_owned(),
        None => parts
            .headers
            .typed_get::<Cookie>()?
            .get(SESSION_COOKIE)?
            .to_owned(),
    };

    raw_token
        .parse()
        .inspect_err(|err| debug!(error = %err, "Ignoring malformed auth token"))
        .ok()
}

async fn resolve_user(db: &DbClient, token: &AuthToken) -> Result<Option<User>> {
    let token_hash = token.hash()?;

    let Some(authentication) = db.fetch_auth(&token_hash).await? else {
        debug!(user_id = %token.user_id, "Unknown auth token");
        return Ok(None);
    };

    if authentication.user != token.user_id || authentication.is_expired_at(UtcDateTime::now()) {
        debug!(user_id = %token.user_id, "Rejecting expired or mismatched auth token");
        return Ok(None);
    }

    Ok(db.fetch_user(authentication.user).await?)
}
