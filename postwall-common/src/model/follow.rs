use crate::model::{Id, user::UserMarker};
use serde::{Deserialize, Serialize};

/// `user` receives the posts of `author` in their follow feed.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Deserialize, Serialize)]
pub struct Follow {
    pub user: Id<UserMarker>,
    pub author: Id<UserMarker>,
}

impl Follow {
    #[must_use]
    pub fn is_self_follow(&self) -> bool {
        self.user == self.author
    }
}
