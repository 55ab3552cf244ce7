use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::document::{CollectionPath, DocumentPath, Fields, WriteData};
use crate::error::{DispatchError, StoreError};

pub const USERS: &str = "users";
pub const CHATS: &str = "chats";
pub const PRODUCTS: &str = "products";
pub const PURCHASES: &str = "purchases";
pub const MESSAGES: &str = "messages";
pub const FAVORITES: &str = "favorites";
pub const NOTIFICATIONS: &str = "notifications";

/// Decode a document body into one of the typed views below.
pub fn decode<T: DeserializeOwned>(path: &DocumentPath, data: &Fields) -> Result<T, DispatchError> {
    serde_json::from_value(serde_json::Value::Object(data.clone())).map_err(|e| {
        DispatchError::InvalidDocument {
            path: path.clone(),
            reason: e.to_string(),
        }
    })
}

/// Treats `""` like a missing field. Whitespace is kept as given.
pub fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|s| !s.is_empty())
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Chat {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub users: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Purchase {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seller_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buyer_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buyer_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_title: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seller_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// A notification record as stored under `users/{id}/notifications`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub date: DateTime<Utc>,
    pub read: bool,
}

/// Title and body of a notification before it is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub title: String,
    pub body: String,
}

impl Notice {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
        }
    }

    /// The stored form: unread, dated by the store at commit.
    pub fn into_write(self) -> WriteData {
        WriteData::new()
            .field("title", self.title)
            .field("body", self.body)
            .server_timestamp("date")
            .field("read", false)
    }
}

pub fn notifications_of(user_id: &str) -> Result<CollectionPath, StoreError> {
    Ok(CollectionPath::root(USERS)
        .doc(user_id)?
        .collection(NOTIFICATIONS))
}
