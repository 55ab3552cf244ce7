//! Turns document-creation events into notification writes.
//!
//! Every rule follows the same template: match the event path, resolve the
//! recipients, format the notice, write. Only the last step differs by rule,
//! between independent point writes and one atomic batch.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, error, info, warn};

use crate::bus::Event;
use crate::document::{DocumentEvent, DocumentPath, PathParams, PathPattern};
use crate::error::{DispatchError, StoreError};
use crate::models::notifications_of;
use crate::rules::{Outgoing, Rule, WriteMode};
use crate::store::{Store, StoreHandle};
use crate::templates::Locale;

/// What one invocation wrote.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchReport {
    pub rule: &'static str,
    pub notifications: Vec<DocumentPath>,
}

#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<StoreHandle>,
    locale: Locale,
}

impl Dispatcher {
    pub fn new(store: Arc<StoreHandle>, locale: Locale) -> Self {
        Self { store, locale }
    }

    /// Paths the store should announce on the bus: one pattern per rule.
    pub fn watched() -> Vec<PathPattern> {
        Rule::ALL.iter().map(|rule| rule.pattern()).collect()
    }

    /// The rule watching `path`, with its captured parameters.
    pub fn route(path: &DocumentPath) -> Option<(Rule, PathParams)> {
        Rule::ALL
            .iter()
            .find_map(|rule| rule.pattern().matches(path).map(|params| (*rule, params)))
    }

    /// Handle one creation event. `Ok(None)` means no rule watches the path.
    ///
    /// Redelivering the same event writes the notifications again.
    pub async fn handle(
        &self,
        event: &DocumentEvent,
    ) -> Result<Option<DispatchReport>, DispatchError> {
        let Some((rule, params)) = Self::route(&event.path) else {
            debug!(path = %event.path, "No rule watches this path");
            return Ok(None);
        };

        let store = self.store.get().await?;
        let outgoing = rule.resolve(store, event, &params, self.locale).await?;
        let notifications = deliver(store, rule.write_mode(), outgoing).await?;

        info!(
            rule = rule.name(),
            path = %event.path,
            count = notifications.len(),
            "Dispatched notifications"
        );

        Ok(Some(DispatchReport {
            rule: rule.name(),
            notifications,
        }))
    }

    /// Handle bus events until the bus closes, one task per event.
    pub async fn run(self, mut rx: broadcast::Receiver<Event>) {
        info!("Dispatcher listening for document events");
        loop {
            match rx.recv().await {
                Ok(Event::DocumentCreated(event)) => {
                    let dispatcher = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = dispatcher.handle(&event).await {
                            error!(path = %event.path, "Dispatch failed: {}", e);
                        }
                    });
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "Dispatcher fell behind; events were dropped");
                }
                Err(RecvError::Closed) => {
                    info!("Event bus closed, dispatcher stopping");
                    break;
                }
            }
        }
    }
}

async fn deliver(
    store: &Store,
    mode: WriteMode,
    outgoing: Vec<Outgoing>,
) -> Result<Vec<DocumentPath>, StoreError> {
    match mode {
        WriteMode::Independent => {
            // Not atomic: an earlier write stays if a later one fails.
            let mut written = Vec::with_capacity(outgoing.len());
            for out in outgoing {
                let path = store
                    .add(&notifications_of(&out.recipient)?, out.notice.into_write())
                    .await?;
                written.push(path);
            }
            Ok(written)
        }
        WriteMode::Batch => {
            if outgoing.len() > store.max_batch_writes() {
                warn!(
                    recipients = outgoing.len(),
                    max = store.max_batch_writes(),
                    "Fan-out exceeds the batch limit; the whole batch will be rejected"
                );
            }
            let mut batch = store.batch();
            for out in outgoing {
                batch.set(
                    notifications_of(&out.recipient)?.new_doc(),
                    out.notice.into_write(),
                );
            }
            store.commit(batch).await
        }
    }
}
