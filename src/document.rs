//! Document addressing and write payloads.
//!
//! Paths are slash-separated alternations of collection names and document
//! ids: `users/u1` is a document, `users/u1/notifications` is a collection.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::StoreError;

pub type Fields = Map<String, Value>;

fn split_segments(raw: &str) -> Result<Vec<String>, StoreError> {
    let trimmed = raw.trim_matches('/');
    if trimmed.is_empty() {
        return Err(StoreError::InvalidPath {
            path: raw.to_string(),
            reason: "path is empty",
        });
    }
    let segments: Vec<String> = trimmed.split('/').map(str::to_string).collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(StoreError::InvalidPath {
            path: raw.to_string(),
            reason: "path has an empty segment",
        });
    }
    Ok(segments)
}

/// Rejects ids that would not survive a round trip through a path string.
pub fn check_segment(id: &str) -> Result<(), StoreError> {
    let reason = if id.is_empty() {
        "path has an empty segment"
    } else if id.contains('/') {
        "a segment may not contain '/'"
    } else {
        return Ok(());
    };
    Err(StoreError::InvalidPath {
        path: id.to_string(),
        reason,
    })
}

/// Path to a single document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DocumentPath {
    segments: Vec<String>,
}

impl DocumentPath {
    pub fn parse(raw: &str) -> Result<Self, StoreError> {
        let segments = split_segments(raw)?;
        if segments.len() % 2 != 0 {
            return Err(StoreError::InvalidPath {
                path: raw.to_string(),
                reason: "document paths need an even number of segments",
            });
        }
        Ok(Self { segments })
    }

    pub fn id(&self) -> &str {
        // Parsing guarantees at least two segments.
        self.segments.last().map(String::as_str).unwrap_or_default()
    }

    pub fn parent(&self) -> CollectionPath {
        CollectionPath {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        }
    }

    pub fn collection(&self, name: &str) -> CollectionPath {
        let mut segments = self.segments.clone();
        segments.push(name.to_string());
        CollectionPath { segments }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }
}

impl fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}

impl FromStr for DocumentPath {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for DocumentPath {
    type Error = StoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<DocumentPath> for String {
    fn from(path: DocumentPath) -> Self {
        path.to_string()
    }
}

/// Path to a collection of documents.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionPath {
    segments: Vec<String>,
}

impl CollectionPath {
    pub fn parse(raw: &str) -> Result<Self, StoreError> {
        let segments = split_segments(raw)?;
        if segments.len() % 2 != 1 {
            return Err(StoreError::InvalidPath {
                path: raw.to_string(),
                reason: "collection paths need an odd number of segments",
            });
        }
        Ok(Self { segments })
    }

    /// Top-level collection.
    pub fn root(name: &str) -> Self {
        Self {
            segments: vec![name.to_string()],
        }
    }

    /// The document `id` inside this collection; `id` must be one segment.
    pub fn doc(&self, id: &str) -> Result<DocumentPath, StoreError> {
        check_segment(id)?;
        Ok(self.child(id.to_string()))
    }

    /// A fresh document path with a random id.
    pub fn new_doc(&self) -> DocumentPath {
        self.child(uuid::Uuid::new_v4().simple().to_string())
    }

    fn child(&self, id: String) -> DocumentPath {
        let mut segments = self.segments.clone();
        segments.push(id);
        DocumentPath { segments }
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PatternSegment {
    Literal(String),
    Param(String),
}

/// A trigger path pattern such as `chats/{chatId}/messages/{messageId}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    raw: &'static str,
    segments: Vec<PatternSegment>,
}

impl PathPattern {
    pub fn new(raw: &'static str) -> Self {
        let segments = raw
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| match s.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                Some(name) => PatternSegment::Param(name.to_string()),
                None => PatternSegment::Literal(s.to_string()),
            })
            .collect();
        Self { raw, segments }
    }

    pub fn as_str(&self) -> &'static str {
        self.raw
    }

    /// Returns the captured parameters when `path` matches exactly.
    pub fn matches(&self, path: &DocumentPath) -> Option<PathParams> {
        let segments = path.segments();
        if segments.len() != self.segments.len() {
            return None;
        }
        let mut params = HashMap::new();
        for (pattern, actual) in self.segments.iter().zip(segments) {
            match pattern {
                PatternSegment::Literal(lit) if lit == actual => {}
                PatternSegment::Literal(_) => return None,
                PatternSegment::Param(name) => {
                    params.insert(name.clone(), actual.clone());
                }
            }
        }
        Some(PathParams(params))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathParams(HashMap<String, String>);

impl PathParams {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }
}

/// A field value in a write; the sentinel is replaced by the commit time.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Value(Value),
    ServerTimestamp,
}

/// Field map for a document write.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteData(BTreeMap<String, FieldValue>);

impl WriteData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.0.insert(name.to_string(), FieldValue::Value(value.into()));
        self
    }

    pub fn server_timestamp(mut self, name: &str) -> Self {
        self.0.insert(name.to_string(), FieldValue::ServerTimestamp);
        self
    }

    /// Builds a write from any struct that serializes to a JSON object.
    pub fn from_serializable<T: Serialize>(value: &T) -> Result<Self, StoreError> {
        match serde_json::to_value(value).map_err(StoreError::Encode)? {
            Value::Object(map) => Ok(Self(
                map.into_iter()
                    .map(|(k, v)| (k, FieldValue::Value(v)))
                    .collect(),
            )),
            other => Err(StoreError::Encode(<serde_json::Error as serde::ser::Error>::custom(format!(
                "expected an object, got {other}"
            )))),
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) fn resolve(self, commit_time: DateTime<Utc>) -> Fields {
        self.0
            .into_iter()
            .map(|(k, v)| {
                let v = match v {
                    FieldValue::Value(v) => v,
                    FieldValue::ServerTimestamp => Value::String(timestamp_string(commit_time)),
                };
                (k, v)
            })
            .collect()
    }
}

/// RFC 3339 with microseconds, matching the store clock's resolution.
pub fn timestamp_string(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// A document-creation event: the new document and the time it was committed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentEvent {
    pub path: DocumentPath,
    #[serde(default)]
    pub data: Fields,
    #[serde(default = "Utc::now")]
    pub create_time: DateTime<Utc>,
}

impl DocumentEvent {
    pub fn new(path: DocumentPath, data: Fields) -> Self {
        Self {
            path,
            data,
            create_time: Utc::now(),
        }
    }
}
