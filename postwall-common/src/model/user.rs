use crate::model::Id;
use serde::{
    Deserialize, Deserializer, Serialize,
    de::{Error, Unexpected},
};
use std::fmt::{Display, Formatter};
use thiserror::Error;

pub const USERNAME_MAX_LEN: usize = 150;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct UserMarker;

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
pub struct User {
    pub id: Id<UserMarker>,
    pub username: Username,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
pub struct CreateUser {
    pub username: Username,
}

/// Unique, URL-safe account name: letters, digits and `@.+-_`.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Serialize)]
#[serde(transparent)]
pub struct Username(String);

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Error)]
#[error("The username is invalid: {0:?}")]
pub struct InvalidUsernameError(String);

impl Username {
    pub fn new(username: String) -> Result<Self, InvalidUsernameError> {
        let length = username.chars().count();
        let allowed = username
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '@' | '.' | '+' | '-' | '_'));

        if (1..=USERNAME_MAX_LEN).contains(&length) && allowed {
            Ok(Username(username))
        } else {
            Err(InvalidUsernameError(username))
        }
    }

    #[must_use]
    pub fn get(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl Display for Username {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Username {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let inner = String::deserialize(deserializer)?;
        Username::new(inner)
            .map_err(|err| Error::invalid_value(Unexpected::Str(&err.0), &"Username"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn username_accepts_usual_names() {
        for name in ["auth", "not_auth", "jane.doe+blog@example", "Тестер"] {
            assert!(Username::new(name.to_owned()).is_ok(), "{name}");
        }
    }

    #[test]
    fn username_rejects_empty_long_and_slashes() {
        assert!(Username::new(String::new()).is_err());
        assert!(Username::new("a".repeat(USERNAME_MAX_LEN + 1)).is_err());
        assert!(Username::new("a/b".to_owned()).is_err());
        assert!(Username::new("with space".to_owned()).is_err());
    }

    #[test]
    fn username_deserialization_validates() {
        assert!(serde_json::from_str::<Username>("\"auth\"").is_ok());
        assert!(serde_json::from_str::<Username>("\"\"").is_err());
    }
}
