use chrono::{DateTime, Utc};
use diesel::prelude::*;

use crate::db::schema::matches;

/// A matched pair. Only `active` matches may exchange private messages.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = matches)]
pub struct ChatMatch {
    pub id: String,
    pub user1_id: String,
    pub user2_id: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl ChatMatch {
    /// The participant who isn't `user_id`, or `None` if `user_id` isn't in
    /// this match.
    pub fn other_party(&self, user_id: &str) -> Option<&str> {
        if self.user1_id == user_id {
            Some(&self.user2_id)
        } else if self.user2_id == user_id {
            Some(&self.user1_id)
        } else {
            None
        }
    }
}
