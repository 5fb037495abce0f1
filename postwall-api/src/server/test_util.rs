//! Drives the complete router against an in-memory database.

use crate::server::{ServerState, Settings, app, cache::PageCache, media::MediaStorage};
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use http_body_util::BodyExt;
use postwall_common::model::{
    Id,
    group::{CreateGroup, Group, GroupSlug, GroupTitle},
    post::{CreatePost, PostContent, PostMarker, PostText},
    user::{CreateUser, User, Username},
};
use postwall_db::client::DbClient;
use std::{sync::Arc, time::Duration};
use tempfile::TempDir;
use tower::ServiceExt;

pub const LOGIN_URL: &str = "/auth/login/";
/// A 2x1 GIF.
pub const SMALL_GIF: &[u8] = b"GIF89a\x02\x00\x01\x00\x80\x00\x00\x00\x00\x00\xFF\xFF\xFF!\xF9\x04\x00\x00\x00\x00\x00,\x00\x00\x00\x00\x02\x00\x01\x00\x00\x02\x02\x0C\x0A\x00;";

const BOUNDARY: &str = "postwall-test-boundary";

pub struct TestApp {
    pub db: Arc<DbClient>,
    pub cache: Arc<PageCache>,
    pub media: Arc<MediaStorage>,
    router: Router,
    // Removed on drop.
    _media_root: TempDir,
}

#[derive(Clone, Eq, PartialEq, Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub location: Option<String>,
    pub body: String,
}

impl TestResponse {
    /// Ids of the posts listed on the page, in display order.
    pub fn post_ids(&self) -> Vec<i64> {
        self.body
            .split("data-post-id=\"")
            .skip(1)
            .filter_map(|rest| rest.split('"').next()?.parse().ok())
            .collect()
    }

    pub fn lists(&self, post_id: Id<PostMarker>) -> bool {
        self.post_ids().contains(&post_id.get())
    }
}

pub enum FormPart<'a> {
    Text(&'a str, &'a str),
    File {
        name: &'a str,
        file_name: &'a str,
        content_type: &'a str,
        contents: &'a [u8],
    },
}

impl TestApp {
    pub async fn new() -> Self {
        let db = Arc::new(DbClient::connect_in_memory().await.unwrap());
        let cache = Arc::new(PageCache::new());
        let media_root = tempfile::tempdir().unwrap();
        let media = Arc::new(MediaStorage::new(media_root.path()));

        let state = ServerState {
            db_client: Arc::clone(&db),
            page_cache: Arc::clone(&cache),
            media: Arc::clone(&media),
            settings: Arc::new(Settings {
                login_url: LOGIN_URL.to_owned(),
                index_cache_ttl: Duration::from_secs(20),
            }),
        };

        Self {
            router: app(state),
            db,
            cache,
            media,
            _media_root: media_root,
        }
    }

    pub async fn add_user(&self, username: &str) -> User {
        let username = Username::new(username.to_owned()).unwrap();
        let id = self
            .db
            .create_user(&CreateUser {
                username: username.clone(),
            })
            .await
            .unwrap();

        User { id, username }
    }

    pub async fn add_group(&self, title: &str, slug: &str) -> Group {
        let title = GroupTitle::new(title.to_owned()).unwrap();
        let slug = GroupSlug::new(slug.to_owned()).unwrap();
        let id = self
            .db
            .create_group(&CreateGroup {
                title: title.clone(),
                slug: slug.clone(),
                description: String::new(),
            })
            .await
            .unwrap();

        Group {
            id,
            title,
            slug,
            description: String::new(),
        }
    }

    pub async fn add_post(&self, author: &User, text: &str, group: Option<&Group>) -> Id<PostMarker> {
        self.db
            .create_post(&CreatePost {
                author: author.id,
                content: PostContent {
                    text: PostText::new(text).unwrap(),
                    group: group.map(|group| group.id),
                    image: None,
                },
            })
            .await
            .unwrap()
    }

    /// A session token for `user`.
    pub async fn login(&self, user: &User) -> String {
        self.db
            .create_authentication(user.id, None)
            .await
            .unwrap()
            .to_string()
    }

    pub async fn get(&self, uri: &str, token: Option<&str>) -> TestResponse {
        let mut request = Request::get(uri);
        if let Some(token) = token {
            request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }

        self.send(request.body(Body::empty()).unwrap()).await
    }

    pub async fn post_form(
        &self,
        uri: &str,
        token: Option<&str>,
        parts: &[FormPart<'_>],
    ) -> TestResponse {
        let mut request = Request::post(uri).header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        );
        if let Some(token) = token {
            request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }

        self.send(request.body(Body::from(multipart_body(parts))).unwrap())
            .await
    }

    /// A form-less `POST`, as sent by the follow buttons.
    pub async fn post(&self, uri: &str, token: Option<&str>) -> TestResponse {
        let mut request = Request::post(uri);
        if let Some(token) = token {
            request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }

        self.send(request.body(Body::empty()).unwrap()).await
    }

    async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self.router.clone().oneshot(request).await.unwrap();

        let status = response.status();
        let location = response
            .headers()
            .get(header::LOCATION)
            .map(|location| location.to_str().unwrap().to_owned());
        let body = response.into_body().collect().await.unwrap().to_bytes();

        TestResponse {
            status,
            location,
            body: String::from_utf8_lossy(&body).into_owned(),
        }
    }
}

fn multipart_body(parts: &[FormPart<'_>]) -> Vec<u8> {
    let mut body = Vec::new();

    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match part {
            FormPart::Text(name, value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}")
                        .as_bytes(),
                );
            }
            FormPart::File {
                name,
                file_name,
                content_type,
                contents,
            } => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\n\
                        Content-Type: {content_type}\r\n\r\n"
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(contents);
            }
        }
        body.extend_from_slice(b"\r\n");
    }

    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}
