use postwall_common::{
    model::{
        ModelValidationError,
        auth::Authentication,
        group::{Group, GroupSlug, GroupTitle},
        post::{ImagePath, Post, PostText},
        user::{User, Username},
    },
    util::PositiveDuration,
};
use sqlx::FromRow;
use time::UtcDateTime;

#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, FromRow)]
pub(crate) struct UserRecord {
    pub user_id: i64,
    pub username: String,
}

#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, FromRow)]
pub(crate) struct GroupRecord {
    pub group_id: i64,
    pub title: String,
    pub slug: String,
    pub description: String,
}

/// A post joined with its author and, when set, its group.
#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, FromRow)]
pub(crate) struct FullPostRecord {
    pub post_id: i64,
    pub text: String,
    pub image: Option<String>,
    pub created_at: i64,
    pub user_id: i64,
    pub username: String,
    pub group_id: Option<i64>,
    pub group_title: Option<String>,
    pub group_slug: Option<String>,
    pub group_description: Option<String>,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, FromRow)]
pub(crate) struct AuthenticationRecord {
    pub user_id: i64,
    pub token_hash: Vec<u8>,
    pub created_at: i64,
    pub expires_after_seconds: Option<i64>,
}

/// Timestamps are stored as nanoseconds since the unix epoch.
pub(crate) fn encode_timestamp(value: UtcDateTime) -> i64 {
    i64::try_from(value.unix_timestamp_nanos()).unwrap_or(i64::MAX)
}

pub(crate) fn decode_timestamp(value: i64) -> Result<UtcDateTime, ModelValidationError> {
    UtcDateTime::from_unix_timestamp_nanos(i128::from(value))
        .map_err(|_| ModelValidationError::Timestamp(value))
}

impl TryFrom<UserRecord> for User {
    type Error = ModelValidationError;

    fn try_from(value: UserRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            id: value.user_id.into(),
            username: Username::new(value.username)?,
        })
    }
}

impl TryFrom<GroupRecord> for Group {
    type Error = ModelValidationError;

    fn try_from(value: GroupRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            id: value.group_id.into(),
            title: GroupTitle::new(value.title)?,
            slug: GroupSlug::new(value.slug)?,
            description: value.description,
        })
    }
}

impl TryFrom<FullPostRecord> for Post {
    type Error = ModelValidationError;

    fn try_from(value: FullPostRecord) -> Result<Self, Self::Error> {
        let group = match (
            value.group_id,
            value.group_title,
            value.group_slug,
            value.group_description,
        ) {
            (Some(group_id), Some(title), Some(slug), Some(description)) => {
                Some(Group::try_from(GroupRecord {
                    group_id,
                    title,
                    slug,
                    description,
                })?)
            }
            _ => None,
        };

        Ok(Self {
            id: value.post_id.into(),
            author: User {
                id: value.user_id.into(),
                username: Username::new(value.username)?,
            },
            text: PostText::new(&value.text)?,
            group,
            image: value.image.map(ImagePath::new).transpose()?,
            created_at: decode_timestamp(value.created_at)?,
        })
    }
}

impl TryFrom<AuthenticationRecord> for Authentication {
    type Error = ModelValidationError;

    fn try_from(value: AuthenticationRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            user: value.user_id.into(),
            token_hash: value.token_hash.try_into()?,
            created_at: decode_timestamp(value.created_at)?,
            expires_after: value
                .expires_after_seconds
                .map(|seconds| {
                    PositiveDuration::try_from(time::Duration::seconds(seconds))
                })
                .transpose()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_survive_storage_encoding() {
        let now = UtcDateTime::now();
        assert_eq!(decode_timestamp(encode_timestamp(now)).unwrap(), now);
    }

    #[test]
    fn post_without_complete_group_columns_has_no_group() {
        let record = FullPostRecord {
            post_id: 1,
            text: "text".to_owned(),
            image: Some("posts/small.gif".to_owned()),
            created_at: 0,
            user_id: 2,
            username: "auth".to_owned(),
            group_id: None,
            ..FullPostRecord::default()
        };

        let post = Post::try_from(record).unwrap();
        assert_eq!(post.group, None);
        assert_eq!(post.author.username.get(), "auth");
        assert_eq!(post.image.unwrap().get(), "posts/small.gif");
    }

    #[test]
    fn invalid_stored_values_are_reported() {
        let record = UserRecord {
            user_id: 1,
            username: String::new(),
        };
        assert!(matches!(
            User::try_from(record),
            Err(ModelValidationError::Username(_))
        ));
    }
}
