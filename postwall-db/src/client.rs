use crate::record::{
    AuthenticationRecord, FullPostRecord, GroupRecord, UserRecord, encode_timestamp,
};
use postwall_common::{
    model::{
        Id, ModelValidationError,
        auth::{AuthToken, AuthTokenHash, AuthTokenHashError, Authentication},
        follow::Follow,
        group::{CreateGroup, Group, GroupMarker, GroupSlug},
        post::{CreatePost, Post, PostContent, PostMarker},
        user::{CreateUser, User, UserMarker, Username},
    },
    util::PositiveDuration,
};
use sqlx::{
    QueryBuilder, Sqlite, SqlitePool,
    migrate::MigrateError,
    query, query_as, query_scalar,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::str::FromStr;
use thiserror::Error;
use time::UtcDateTime;
use tracing::{debug, info};

pub type Result<T, E = DbError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("An object in the database was invalid: {0}")]
    Data(#[from] ModelValidationError),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error("Applying migrations failed: {0}")]
    Migrate(#[from] MigrateError),
    #[error(transparent)]
    TokenHash(#[from] AuthTokenHashError),
}

/// Which posts a feed is made of.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum FeedScope {
    All,
    Group(Id<GroupMarker>),
    Author(Id<UserMarker>),
    /// Posts by every author the given user follows.
    FollowedBy(Id<UserMarker>),
}

const FULL_POST_SELECT: &str = "
    SELECT
        posts.post_id,
        posts.text,
        posts.image,
        posts.created_at,
        users.user_id,
        users.username,
        post_groups.group_id,
        post_groups.title AS group_title,
        post_groups.slug AS group_slug,
        post_groups.description AS group_description
    FROM
        posts
        JOIN users ON users.user_id = posts.author_id
        LEFT JOIN post_groups ON post_groups.group_id = posts.group_id
    ";

fn push_scope_filter(builder: &mut QueryBuilder<'_, Sqlite>, scope: FeedScope) {
    match scope {
        FeedScope::All => {}
        FeedScope::Group(group_id) => {
            builder.push(" WHERE posts.group_id = ").push_bind(group_id.get());
        }
        FeedScope::Author(author_id) => {
            builder
                .push(" WHERE posts.author_id = ")
                .push_bind(author_id.get());
        }
        FeedScope::FollowedBy(user_id) => {
            builder
                .push(
                    " WHERE posts.author_id IN \
                    (SELECT follows.author_id FROM follows WHERE follows.user_id = ",
                )
                .push_bind(user_id.get())
                .push(")");
        }
    }
}

pub struct DbClient {
    pool: SqlitePool,
}

impl DbClient {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Opens (creating if needed) the database at `url` and brings its schema up to date.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;

        let client = Self::new(pool);
        client.migrate().await?;
        info!(url, "Connected to database");

        Ok(client)
    }

    /// A private, empty database that lives as long as the client.
    pub async fn connect_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        // Every connection to `:memory:` opens a separate database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let client = Self::new(pool);
        client.migrate().await?;

        Ok(client)
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub async fn fetch_user(&self, user_id: Id<UserMarker>) -> Result<Option<User>> {
        let record = query_as::<_, UserRecord>(
            "
            SELECT
                users.user_id,
                users.username
            FROM
                users
            WHERE
                users.user_id = $1
            ",
        )
        .bind(user_id.get())
        .fetch_optional(&self.pool)
        .await?;

        let user = record.map(User::try_from).transpose()?;
        Ok(user)
    }

    pub async fn fetch_user_by_username(&self, username: &Username) -> Result<Option<User>> {
        let record = query_as::<_, UserRecord>(
            "
            SELECT
                users.user_id,
                users.username
            FROM
                users
            WHERE
                users.username = $1
            ",
        )
        .bind(username.get())
        .fetch_optional(&self.pool)
        .await?;

        let user = record.map(User::try_from).transpose()?;
        Ok(user)
    }

    pub async fn create_user(&self, user: &CreateUser) -> Result<Id<UserMarker>> {
        let user_id: i64 = query_scalar(
            "
            INSERT INTO users (username)
            VALUES ($1)
            RETURNING user_id
            ",
        )
        .bind(user.username.get())
        .fetch_one(&self.pool)
        .await?;

        debug!(user_id, username = %user.username, "Created user");
        Ok(user_id.into())
    }

    pub async fn fetch_group_by_slug(&self, slug: &GroupSlug) -> Result<Option<Group>> {
        let record = query_as::<_, GroupRecord>(
            "
            SELECT
                post_groups.group_id,
                post_groups.title,
                post_groups.slug,
                post_groups.description
            FROM
                post_groups
            WHERE
                post_groups.slug = $1
            ",
        )
        .bind(slug.get())
        .fetch_optional(&self.pool)
        .await?;

        let group = record.map(Group::try_from).transpose()?;
        Ok(group)
    }

    pub async fn fetch_group(&self, group_id: Id<GroupMarker>) -> Result<Option<Group>> {
        let record = query_as::<_, GroupRecord>(
            "
            SELECT
                post_groups.group_id,
                post_groups.title,
                post_groups.slug,
                post_groups.description
            FROM
                post_groups
            WHERE
                post_groups.group_id = $1
            ",
        )
        .bind(group_id.get())
        .fetch_optional(&self.pool)
        .await?;

        let group = record.map(Group::try_from).transpose()?;
        Ok(group)
    }

    /// Every group, ordered by title.
    pub async fn fetch_groups(&self) -> Result<Vec<Group>> {
        let records = query_as::<_, GroupRecord>(
            "
            SELECT
                post_groups.group_id,
                post_groups.title,
                post_groups.slug,
                post_groups.description
            FROM
                post_groups
            ORDER BY
                post_groups.title,
                post_groups.group_id
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        let groups = records
            .into_iter()
            .map(Group::try_from)
            .collect::<Result<_, _>>()?;
        Ok(groups)
    }

    pub async fn create_group(&self, group: &CreateGroup) -> Result<Id<GroupMarker>> {
        let group_id: i64 = query_scalar(
            "
            INSERT INTO post_groups (title, slug, description)
            VALUES ($1, $2, $3)
            RETURNING group_id
            ",
        )
        .bind(group.title.get())
        .bind(group.slug.get())
        .bind(&group.description)
        .fetch_one(&self.pool)
        .await?;

        debug!(group_id, slug = %group.slug, "Created group");
        Ok(group_id.into())
    }

    pub async fn fetch_post(&self, post_id: Id<PostMarker>) -> Result<Option<Post>> {
        let mut builder = QueryBuilder::<Sqlite>::new(FULL_POST_SELECT);
        builder.push(" WHERE posts.post_id = ").push_bind(post_id.get());

        let record = builder
            .build_query_as::<FullPostRecord>()
            .fetch_optional(&self.pool)
            .await?;

        let post = record.map(Post::try_from).transpose()?;
        Ok(post)
    }

    pub async fn create_post(&self, post: &CreatePost) -> Result<Id<PostMarker>> {
        let content = &post.content;
        let post_id: i64 = query_scalar(
            "
            INSERT INTO posts (author_id, group_id, text, image, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING post_id
            ",
        )
        .bind(post.author.get())
        .bind(content.group.map(Id::get))
        .bind(content.text.get())
        .bind(content.image.as_ref().map(|image| image.get().to_owned()))
        .bind(encode_timestamp(UtcDateTime::now()))
        .fetch_one(&self.pool)
        .await?;

        debug!(post_id, author_id = %post.author, "Created post");
        Ok(post_id.into())
    }

    /// Replaces the editable content of a post. Returns whether the post existed.
    pub async fn update_post(&self, post_id: Id<PostMarker>, content: &PostContent) -> Result<bool> {
        let result = query(
            "
            UPDATE posts
            SET
                text = $1,
                group_id = $2,
                image = $3
            WHERE
                posts.post_id = $4
            ",
        )
        .bind(content.text.get())
        .bind(content.group.map(Id::get))
        .bind(content.image.as_ref().map(|image| image.get().to_owned()))
        .bind(post_id.get())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Returns whether the post existed.
    pub async fn delete_post(&self, post_id: Id<PostMarker>) -> Result<bool> {
        let result = query("DELETE FROM posts WHERE posts.post_id = $1")
            .bind(post_id.get())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn count_posts(&self, scope: FeedScope) -> Result<u64> {
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM posts");
        push_scope_filter(&mut builder, scope);

        let count = builder
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await?;
        Ok(count.try_into().unwrap_or_default())
    }

    /// Posts in `scope`, newest first; equal timestamps keep the later insert first.
    pub async fn fetch_posts(&self, scope: FeedScope, limit: u64, offset: u64) -> Result<Vec<Post>> {
        let mut builder = QueryBuilder::<Sqlite>::new(FULL_POST_SELECT);
        push_scope_filter(&mut builder, scope);
        builder
            .push(" ORDER BY posts.created_at DESC, posts.post_id DESC LIMIT ")
            .push_bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .push(" OFFSET ")
            .push_bind(i64::try_from(offset).unwrap_or(i64::MAX));

        let records = builder
            .build_query_as::<FullPostRecord>()
            .fetch_all(&self.pool)
            .await?;

        let posts = records
            .into_iter()
            .map(Post::try_from)
            .collect::<Result<_, _>>()?;
        Ok(posts)
    }

    /// Records the follow unless it already exists or targets the follower
    /// themself. Returns whether a new relation was stored.
    pub async fn create_follow(&self, follow: Follow) -> Result<bool> {
        if follow.is_self_follow() {
            return Ok(false);
        }

        let result = query(
            "
            INSERT OR IGNORE INTO follows (user_id, author_id)
            VALUES ($1, $2)
            ",
        )
        .bind(follow.user.get())
        .bind(follow.author.get())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Returns whether a relation was removed.
    pub async fn delete_follow(&self, follow: Follow) -> Result<bool> {
        let result = query(
            "
            DELETE FROM follows
            WHERE
                follows.user_id = $1
                AND follows.author_id = $2
            ",
        )
        .bind(follow.user.get())
        .bind(follow.author.get())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn is_following(&self, follow: Follow) -> Result<bool> {
        let exists: i64 = query_scalar(
            "
            SELECT EXISTS (
                SELECT 1
                FROM follows
                WHERE
                    follows.user_id = $1
                    AND follows.author_id = $2
            )
            ",
        )
        .bind(follow.user.get())
        .bind(follow.author.get())
        .fetch_one(&self.pool)
        .await?;

        Ok(exists != 0)
    }

    /// Issues a fresh token for `user_id`. Only its hash is stored.
    pub async fn create_authentication(
        &self,
        user_id: Id<UserMarker>,
        expires_after: Option<PositiveDuration>,
    ) -> Result<AuthToken> {
        let token = AuthToken::generate_random(user_id);
        let token_hash = token.hash()?;

        query(
            "
            INSERT INTO authentications (token_hash, user_id, created_at, expires_after_seconds)
            VALUES ($1, $2, $3, $4)
            ",
        )
        .bind(token_hash.0.as_slice())
        .bind(user_id.get())
        .bind(encode_timestamp(UtcDateTime::now()))
        .bind(expires_after.map(|duration| duration.whole_seconds()))
        .execute(&self.pool)
        .await?;

        debug!(%user_id, "Issued auth token");
        Ok(token)
    }

    pub async fn fetch_auth(&self, token_hash: &AuthTokenHash) -> Result<Option<Authentication>> {
        let record = query_as::<_, AuthenticationRecord>(
            "
            SELECT
                authentications.user_id,
                authentications.token_hash,
                authentications.created_at,
                authentications.expires_after_seconds
            FROM
                authentications
            WHERE
                authentications.token_hash = $1
            ",
        )
        .bind(token_hash.0.as_slice())
        .fetch_optional(&self.pool)
        .await?;

        let authentication = record.map(Authentication::try_from).transpose()?;
        Ok(authentication)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use postwall_common::model::{
        group::GroupTitle,
        post::{ImagePath, PostText},
    };

    struct Fixture {
        db: DbClient,
        auth: Id<UserMarker>,
        sub: Id<UserMarker>,
        group: Id<GroupMarker>,
        group_2: Id<GroupMarker>,
    }

    async fn create_user(db: &DbClient, username: &str) -> Id<UserMarker> {
        db.create_user(&CreateUser {
            username: Username::new(username.to_owned()).unwrap(),
        })
        .await
        .unwrap()
    }

    async fn create_group(db: &DbClient, title: &str, slug: &str) -> Id<GroupMarker> {
        db.create_group(&CreateGroup {
            title: GroupTitle::new(title.to_owned()).unwrap(),
            slug: GroupSlug::new(slug.to_owned()).unwrap(),
            description: format!("{title} description"),
        })
        .await
        .unwrap()
    }

    async fn create_post(
        db: &DbClient,
        author: Id<UserMarker>,
        text: &str,
        group: Option<Id<GroupMarker>>,
    ) -> Id<PostMarker> {
        db.create_post(&CreatePost {
            author,
            content: PostContent {
                text: PostText::new(text).unwrap(),
                group,
                image: None,
            },
        })
        .await
        .unwrap()
    }

    async fn fixture() -> Fixture {
        let db = DbClient::connect_in_memory().await.unwrap();
        let auth = create_user(&db, "auth").await;
        let sub = create_user(&db, "sub").await;
        let group = create_group(&db, "Test group", "test_slug").await;
        let group_2 = create_group(&db, "Test group 2", "test_slug_2").await;

        Fixture {
            db,
            auth,
            sub,
            group,
            group_2,
        }
    }

    #[tokio::test]
    async fn post_round_trips_with_author_group_and_image() {
        let Fixture { db, auth, group, .. } = fixture().await;
        let post_id = db
            .create_post(&CreatePost {
                author: auth,
                content: PostContent {
                    text: PostText::new("Test post").unwrap(),
                    group: Some(group),
                    image: Some(ImagePath::for_file_name("small.gif").unwrap()),
                },
            })
            .await
            .unwrap();

        let post = db.fetch_post(post_id).await.unwrap().unwrap();
        assert_eq!(post.id, post_id);
        assert_eq!(post.author.id, auth);
        assert_eq!(post.author.username.get(), "auth");
        assert_eq!(post.text.get(), "Test post");
        assert_eq!(post.group.unwrap().slug.get(), "test_slug");
        assert_eq!(post.image.unwrap().get(), "posts/small.gif");
    }

    #[tokio::test]
    async fn feeds_are_newest_first() {
        let Fixture { db, auth, .. } = fixture().await;
        let first = create_post(&db, auth, "first", None).await;
        let second = create_post(&db, auth, "second", None).await;
        let third = create_post(&db, auth, "third", None).await;

        let ids: Vec<_> = db
            .fetch_posts(FeedScope::All, 10, 0)
            .await
            .unwrap()
            .into_iter()
            .map(|post| post.id)
            .collect();
        assert_eq!(ids, [third, second, first]);
    }

    #[tokio::test]
    async fn group_feed_only_contains_its_posts() {
        let Fixture {
            db,
            auth,
            group,
            group_2,
            ..
        } = fixture().await;
        create_post(&db, auth, "in group", Some(group)).await;
        let other = create_post(&db, auth, "in group 2", Some(group_2)).await;
        create_post(&db, auth, "no group", None).await;

        let posts = db.fetch_posts(FeedScope::Group(group), 10, 0).await.unwrap();
        assert_eq!(posts.len(), 1);
        assert!(posts.iter().all(|post| post.group.as_ref().map(|g| g.id) == Some(group)));
        assert!(posts.iter().all(|post| post.id != other));
        assert_eq!(db.count_posts(FeedScope::Group(group_2)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn author_feed_only_contains_their_posts() {
        let Fixture { db, auth, sub, .. } = fixture().await;
        create_post(&db, auth, "by auth", None).await;
        create_post(&db, sub, "by sub", None).await;
        create_post(&db, auth, "by auth again", None).await;

        let posts = db.fetch_posts(FeedScope::Author(auth), 10, 0).await.unwrap();
        assert_eq!(posts.len(), 2);
        assert!(posts.iter().all(|post| post.author.id == auth));
        assert_eq!(db.count_posts(FeedScope::Author(sub)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn limit_and_offset_split_feed() {
        let Fixture { db, auth, group, .. } = fixture().await;
        for i in 0..13 {
            create_post(&db, auth, &format!("Test post {i}"), Some(group)).await;
        }

        assert_eq!(db.count_posts(FeedScope::All).await.unwrap(), 13);
        assert_eq!(db.fetch_posts(FeedScope::All, 10, 0).await.unwrap().len(), 10);
        assert_eq!(db.fetch_posts(FeedScope::All, 10, 10).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn follow_feed_tracks_follow_state() {
        let Fixture { db, auth, sub, .. } = fixture().await;
        let not_auth = create_user(&db, "not_auth").await;
        let follow = Follow {
            user: sub,
            author: auth,
        };

        let before = create_post(&db, auth, "before following", None).await;
        assert!(
            db.fetch_posts(FeedScope::FollowedBy(sub), 10, 0)
                .await
                .unwrap()
                .is_empty()
        );

        assert!(db.create_follow(follow).await.unwrap());
        assert!(db.is_following(follow).await.unwrap());
        let after = create_post(&db, auth, "after following", None).await;

        let ids: Vec<_> = db
            .fetch_posts(FeedScope::FollowedBy(sub), 10, 0)
            .await
            .unwrap()
            .into_iter()
            .map(|post| post.id)
            .collect();
        assert_eq!(ids, [after, before]);
        assert_eq!(db.count_posts(FeedScope::FollowedBy(not_auth)).await.unwrap(), 0);

        assert!(db.delete_follow(follow).await.unwrap());
        assert!(!db.is_following(follow).await.unwrap());
        assert_eq!(db.count_posts(FeedScope::FollowedBy(sub)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn repeated_and_self_follows_are_ignored() {
        let Fixture { db, auth, sub, .. } = fixture().await;
        let follow = Follow {
            user: sub,
            author: auth,
        };

        assert!(db.create_follow(follow).await.unwrap());
        assert!(!db.create_follow(follow).await.unwrap());
        assert!(
            !db.create_follow(Follow {
                user: auth,
                author: auth,
            })
            .await
            .unwrap()
        );
        assert!(!db.delete_follow(Follow { user: auth, author: sub }).await.unwrap());
    }

    #[tokio::test]
    async fn updated_and_deleted_posts() {
        let Fixture {
            db, auth, group_2, ..
        } = fixture().await;
        let post_id = create_post(&db, auth, "draft", None).await;

        let updated = db
            .update_post(
                post_id,
                &PostContent {
                    text: PostText::new("final").unwrap(),
                    group: Some(group_2),
                    image: None,
                },
            )
            .await
            .unwrap();
        assert!(updated);

        let post = db.fetch_post(post_id).await.unwrap().unwrap();
        assert_eq!(post.text.get(), "final");
        assert_eq!(post.group.map(|group| group.id), Some(group_2));

        assert!(db.delete_post(post_id).await.unwrap());
        assert!(db.fetch_post(post_id).await.unwrap().is_none());
        assert!(!db.delete_post(post_id).await.unwrap());
        assert_eq!(db.count_posts(FeedScope::All).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn lookups_by_natural_keys() {
        let Fixture { db, auth, group, .. } = fixture().await;

        let user = db
            .fetch_user_by_username(&Username::new("auth".to_owned()).unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(user.id, auth);
        assert!(
            db.fetch_user_by_username(&Username::new("nobody".to_owned()).unwrap())
                .await
                .unwrap()
                .is_none()
        );

        let fetched = db
            .fetch_group_by_slug(&GroupSlug::new("test_slug".to_owned()).unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.id, group);
        assert_eq!(db.fetch_group(group).await.unwrap(), Some(fetched));

        let titles: Vec<_> = db
            .fetch_groups()
            .await
            .unwrap()
            .into_iter()
            .map(|group| group.title.get().to_owned())
            .collect();
        assert_eq!(titles, ["Test group", "Test group 2"]);
    }

    #[tokio::test]
    async fn duplicate_usernames_are_rejected() {
        let Fixture { db, .. } = fixture().await;
        let result = db
            .create_user(&CreateUser {
                username: Username::new("auth".to_owned()).unwrap(),
            })
            .await;

        assert!(matches!(result, Err(DbError::Sqlx(_))));
    }

    #[tokio::test]
    async fn issued_tokens_can_be_looked_up() {
        let Fixture { db, auth, .. } = fixture().await;
        let token = db.create_authentication(auth, None).await.unwrap();

        let authentication = db.fetch_auth(&token.hash().unwrap()).await.unwrap().unwrap();
        assert_eq!(authentication.user, auth);
        assert_eq!(authentication.expires_after, None);

        let unknown = AuthToken::generate_random(auth);
        assert!(db.fetch_auth(&unknown.hash().unwrap()).await.unwrap().is_none());
    }
}
