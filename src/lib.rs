//! Fans out notification records when marketplace documents are created.
//!
//! Four creation triggers are watched: chat messages, purchases, favorites and
//! new products. Each one resolves its recipients from the document store and
//! writes one notification per recipient under `users/{id}/notifications`.

pub mod api;
pub mod bus;
pub mod config;
pub mod dispatch;
pub mod document;
pub mod error;
pub mod models;
pub mod rules;
pub mod store;
pub mod templates;

pub use dispatch::{DispatchReport, Dispatcher};
pub use document::{CollectionPath, DocumentEvent, DocumentPath, WriteData};
pub use error::{DispatchError, StoreError};
pub use store::{EventSink, Store, StoreHandle, StoreLocation};
