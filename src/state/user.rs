//! Users as the server lists them, e.g. a player's participants.

use serde::{Deserialize, Serialize};

/// A user known to the server.
///
/// Two users are equal when their ids are.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
}

impl User {
    /// A user known only by id.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: String::new(),
            first_name: String::new(),
            last_name: String::new(),
        }
    }

    /// Parse a JSON array of users. Every field is required.
    pub fn from_json_array(json: &str) -> serde_json::Result<Vec<User>> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "username": self.username,
            "first_name": self.first_name,
            "last_name": self.last_name
        })
    }
}

impl PartialEq for User {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for User {}
