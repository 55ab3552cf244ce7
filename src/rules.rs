//! The four creation triggers and how each one finds its recipients.

use tracing::{debug, warn};

use crate::document::{check_segment, CollectionPath, DocumentEvent, DocumentPath, PathParams, PathPattern};
use crate::error::DispatchError;
use crate::models::{self, non_empty, Chat, Message, Notice, Product, Purchase};
use crate::store::Store;
use crate::templates::{self, Locale};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rule {
    MessageCreated,
    PurchaseCreated,
    FavoriteCreated,
    ProductCreated,
}

/// How a rule's notifications reach the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// One point write per notification, each committed on its own.
    Independent,
    /// Every notification in a single atomic batch.
    Batch,
}

/// A notification addressed to one user, not yet written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outgoing {
    pub recipient: String,
    pub notice: Notice,
}

impl Outgoing {
    /// `source` is the document the recipient id was read from.
    fn addressed(
        source: &DocumentPath,
        recipient: impl Into<String>,
        notice: Notice,
    ) -> Result<Self, DispatchError> {
        let recipient = recipient.into();
        if let Err(e) = check_segment(&recipient) {
            return Err(DispatchError::InvalidRecipient {
                path: source.clone(),
                recipient,
                reason: e.to_string(),
            });
        }
        Ok(Self { recipient, notice })
    }
}

impl Rule {
    pub const ALL: [Rule; 4] = [
        Rule::MessageCreated,
        Rule::PurchaseCreated,
        Rule::FavoriteCreated,
        Rule::ProductCreated,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Rule::MessageCreated => "message_created",
            Rule::PurchaseCreated => "purchase_created",
            Rule::FavoriteCreated => "favorite_created",
            Rule::ProductCreated => "product_created",
        }
    }

    pub fn pattern(self) -> PathPattern {
        PathPattern::new(match self {
            Rule::MessageCreated => "chats/{chatId}/messages/{messageId}",
            Rule::PurchaseCreated => "purchases/{purchaseId}",
            Rule::FavoriteCreated => "users/{userId}/favorites/{productId}",
            Rule::ProductCreated => "products/{productId}",
        })
    }

    pub fn write_mode(self) -> WriteMode {
        match self {
            Rule::ProductCreated => WriteMode::Batch,
            _ => WriteMode::Independent,
        }
    }

    /// Work out who hears about `event` and what they are told.
    pub async fn resolve(
        self,
        store: &Store,
        event: &DocumentEvent,
        params: &PathParams,
        locale: Locale,
    ) -> Result<Vec<Outgoing>, DispatchError> {
        match self {
            Rule::MessageCreated => message_recipients(store, event, params, locale).await,
            Rule::PurchaseCreated => purchase_recipients(event, locale),
            Rule::FavoriteCreated => favorite_recipients(store, event, params, locale).await,
            Rule::ProductCreated => product_recipients(store, event, locale).await,
        }
    }
}

fn param<'a>(
    event: &DocumentEvent,
    params: &'a PathParams,
    name: &'static str,
) -> Result<&'a str, DispatchError> {
    params
        .get(name)
        .ok_or_else(|| DispatchError::InvalidDocument {
            path: event.path.clone(),
            reason: format!("path has no `{}` parameter", name),
        })
}

async fn message_recipients(
    store: &Store,
    event: &DocumentEvent,
    params: &PathParams,
    locale: Locale,
) -> Result<Vec<Outgoing>, DispatchError> {
    let chat_id = param(event, params, "chatId")?;
    let message: Message = models::decode(&event.path, &event.data)?;
    let sender = message.sender_id.ok_or(DispatchError::MissingField {
        path: event.path.clone(),
        field: "senderId",
    })?;
    let content = message.content.ok_or(DispatchError::MissingField {
        path: event.path.clone(),
        field: "content",
    })?;

    let chat_path = CollectionPath::root(models::CHATS).doc(chat_id)?;
    let chat_doc = store
        .get(&chat_path)
        .await?
        .ok_or_else(|| DispatchError::MissingDocument(chat_path.clone()))?;
    let chat: Chat = models::decode(&chat_doc.path, &chat_doc.data)?;
    let users = chat.users.ok_or(DispatchError::MissingField {
        path: chat_path.clone(),
        field: "users",
    })?;

    // Empty entries are not users; skip them like the sender.
    let mut others = users
        .into_iter()
        .filter(|user| !user.is_empty() && *user != sender);
    let recipient = others
        .next()
        .ok_or(DispatchError::NoRecipient { chat: chat_path.clone() })?;
    let skipped = others.count();
    if skipped > 0 {
        warn!(
            chat = %chat_path,
            skipped,
            "Chat has more than two participants; notifying only the first"
        );
    }

    Ok(vec![Outgoing::addressed(
        &chat_path,
        recipient,
        templates::new_message(locale, &content),
    )?])
}

fn purchase_recipients(
    event: &DocumentEvent,
    locale: Locale,
) -> Result<Vec<Outgoing>, DispatchError> {
    let purchase: Purchase = models::decode(&event.path, &event.data)?;
    let seller = non_empty(purchase.seller_id.as_deref()).ok_or(DispatchError::MissingField {
        path: event.path.clone(),
        field: "sellerId",
    })?;
    let buyer = non_empty(purchase.buyer_id.as_deref()).ok_or(DispatchError::MissingField {
        path: event.path.clone(),
        field: "buyerId",
    })?;

    // Both ids are checked here, before the seller's write goes out.
    Ok(vec![
        Outgoing::addressed(
            &event.path,
            seller,
            templates::new_sale(locale, non_empty(purchase.buyer_name.as_deref())),
        )?,
        Outgoing::addressed(
            &event.path,
            buyer,
            templates::purchase_completed(locale, non_empty(purchase.product_title.as_deref())),
        )?,
    ])
}

async fn favorite_recipients(
    store: &Store,
    event: &DocumentEvent,
    params: &PathParams,
    locale: Locale,
) -> Result<Vec<Outgoing>, DispatchError> {
    let user_id = param(event, params, "userId")?;
    let product_id = param(event, params, "productId")?;

    let product_path = CollectionPath::root(models::PRODUCTS).doc(product_id)?;
    let product_doc = store
        .get(&product_path)
        .await?
        .ok_or_else(|| DispatchError::MissingDocument(product_path.clone()))?;
    let product: Product = models::decode(&product_doc.path, &product_doc.data)?;
    let seller = non_empty(product.seller_id.as_deref()).ok_or(DispatchError::MissingField {
        path: product_path.clone(),
        field: "sellerId",
    })?;

    debug!(user = user_id, product = %product_path, "Product favorited");

    Ok(vec![Outgoing::addressed(
        &product_path,
        seller,
        templates::product_favorited(locale),
    )?])
}

async fn product_recipients(
    store: &Store,
    event: &DocumentEvent,
    locale: Locale,
) -> Result<Vec<Outgoing>, DispatchError> {
    let product: Product = models::decode(&event.path, &event.data)?;
    let notice = templates::product_published(locale, non_empty(product.title.as_deref()));

    let users = store.list(&CollectionPath::root(models::USERS)).await?;

    users
        .iter()
        .map(|user| Outgoing::addressed(&user.path, user.path.id(), notice.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{DocumentPath, Fields, WriteData};
    use crate::store::DEFAULT_MAX_BATCH_WRITES;
    use serde_json::json;

    fn event(path: &str, data: serde_json::Value) -> DocumentEvent {
        let data: Fields = serde_json::from_value(data).unwrap();
        DocumentEvent::new(DocumentPath::parse(path).unwrap(), data)
    }

    async fn resolve(store: &Store, event: &DocumentEvent) -> Result<Vec<Outgoing>, DispatchError> {
        let (rule, params) = Rule::ALL
            .iter()
            .find_map(|rule| rule.pattern().matches(&event.path).map(|p| (*rule, p)))
            .unwrap();
        rule.resolve(store, event, &params, Locale::En).await
    }

    async fn store_with_chat(users: serde_json::Value) -> Store {
        let store = Store::in_memory(DEFAULT_MAX_BATCH_WRITES).await.unwrap();
        store
            .set(
                &DocumentPath::parse("chats/c1").unwrap(),
                WriteData::new().field("users", users),
            )
            .await
            .unwrap();
        store
    }

    #[test]
    fn patterns_do_not_overlap() {
        let paths = [
            "chats/c/messages/m",
            "purchases/p",
            "users/u/favorites/p",
            "products/p",
        ];
        for path in paths {
            let path = DocumentPath::parse(path).unwrap();
            let hits = Rule::ALL
                .iter()
                .filter(|rule| rule.pattern().matches(&path).is_some())
                .count();
            assert_eq!(hits, 1, "{path}");
        }
        let inbox = DocumentPath::parse("users/u/notifications/n").unwrap();
        assert!(Rule::ALL.iter().all(|r| r.pattern().matches(&inbox).is_none()));
    }

    #[test]
    fn only_new_products_are_batched() {
        for rule in Rule::ALL {
            let expected = if rule == Rule::ProductCreated {
                WriteMode::Batch
            } else {
                WriteMode::Independent
            };
            assert_eq!(rule.write_mode(), expected, "{}", rule.name());
        }
    }

    #[tokio::test]
    async fn group_chat_notifies_first_other_participant() {
        let store = store_with_chat(json!(["a", "b", "c"])).await;
        let ev = event("chats/c1/messages/m1", json!({"senderId": "b", "content": "hi"}));
        let out = resolve(&store, &ev).await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].recipient, "a");
    }

    #[tokio::test]
    async fn chat_of_only_the_sender_has_no_recipient() {
        let store = store_with_chat(json!(["a", "a"])).await;
        let ev = event("chats/c1/messages/m1", json!({"senderId": "a", "content": "hi"}));
        let err = resolve(&store, &ev).await.unwrap_err();
        assert!(matches!(err, DispatchError::NoRecipient { .. }));
    }

    #[tokio::test]
    async fn empty_participant_ids_are_skipped() {
        let store = store_with_chat(json!(["", "a", "b"])).await;
        let ev = event("chats/c1/messages/m1", json!({"senderId": "a", "content": "hi"}));
        let out = resolve(&store, &ev).await.unwrap();
        assert_eq!(out[0].recipient, "b");

        let store = store_with_chat(json!(["a", ""])).await;
        let err = resolve(&store, &ev).await.unwrap_err();
        assert!(matches!(err, DispatchError::NoRecipient { .. }));
    }

    #[tokio::test]
    async fn participant_id_with_slash_is_rejected() {
        let store = store_with_chat(json!(["a", "x/y"])).await;
        let ev = event("chats/c1/messages/m1", json!({"senderId": "a", "content": "hi"}));
        let err = resolve(&store, &ev).await.unwrap_err();
        assert!(
            matches!(err, DispatchError::InvalidRecipient { ref recipient, .. } if recipient == "x/y")
        );
    }

    #[tokio::test]
    async fn chat_without_users_field_fails() {
        let store = Store::in_memory(DEFAULT_MAX_BATCH_WRITES).await.unwrap();
        store
            .set(
                &DocumentPath::parse("chats/c1").unwrap(),
                WriteData::new().field("title", "empty"),
            )
            .await
            .unwrap();
        let ev = event("chats/c1/messages/m1", json!({"senderId": "a", "content": "hi"}));
        let err = resolve(&store, &ev).await.unwrap_err();
        assert!(matches!(err, DispatchError::MissingField { field: "users", .. }));
    }

    #[tokio::test]
    async fn message_without_sender_fails_before_lookup() {
        let store = Store::in_memory(DEFAULT_MAX_BATCH_WRITES).await.unwrap();
        let ev = event("chats/c1/messages/m1", json!({"content": "hi"}));
        let err = resolve(&store, &ev).await.unwrap_err();
        assert!(matches!(err, DispatchError::MissingField { field: "senderId", .. }));
    }

    #[tokio::test]
    async fn purchase_needs_both_parties() {
        let store = Store::in_memory(DEFAULT_MAX_BATCH_WRITES).await.unwrap();
        let ev = event("purchases/p1", json!({"sellerId": "s", "buyerId": ""}));
        let err = resolve(&store, &ev).await.unwrap_err();
        assert!(matches!(err, DispatchError::MissingField { field: "buyerId", .. }));
    }

    #[tokio::test]
    async fn purchase_rejects_buyer_id_with_slash() {
        let store = Store::in_memory(DEFAULT_MAX_BATCH_WRITES).await.unwrap();
        let ev = event("purchases/p1", json!({"sellerId": "s", "buyerId": "b/c"}));
        let err = resolve(&store, &ev).await.unwrap_err();
        assert!(matches!(err, DispatchError::InvalidRecipient { .. }));
    }

    #[tokio::test]
    async fn whitespace_buyer_name_is_interpolated() {
        let store = Store::in_memory(DEFAULT_MAX_BATCH_WRITES).await.unwrap();
        let ev = event(
            "purchases/p1",
            json!({"sellerId": "s", "buyerId": "b", "buyerName": "  "}),
        );
        let out = resolve(&store, &ev).await.unwrap();
        assert_eq!(out[0].notice.body, "   bought your product.");
    }

    #[tokio::test]
    async fn purchase_addresses_seller_then_buyer() {
        let store = Store::in_memory(DEFAULT_MAX_BATCH_WRITES).await.unwrap();
        let ev = event(
            "purchases/p1",
            json!({"sellerId": "s", "buyerId": "b", "buyerName": "", "productTitle": "Lamp"}),
        );
        let out = resolve(&store, &ev).await.unwrap();
        assert_eq!(out[0].recipient, "s");
        assert_eq!(out[0].notice.body, "someone bought your product.");
        assert_eq!(out[1].recipient, "b");
        assert_eq!(out[1].notice.body, "You purchased Lamp.");
    }

    #[tokio::test]
    async fn favorite_of_product_without_seller_fails() {
        let store = Store::in_memory(DEFAULT_MAX_BATCH_WRITES).await.unwrap();
        store
            .set(
                &DocumentPath::parse("products/p1").unwrap(),
                WriteData::new().field("title", "Lamp"),
            )
            .await
            .unwrap();
        let ev = event("users/u1/favorites/p1", json!({}));
        let err = resolve(&store, &ev).await.unwrap_err();
        assert!(matches!(err, DispatchError::MissingField { field: "sellerId", .. }));
    }

    #[tokio::test]
    async fn new_product_reaches_every_user() {
        let store = Store::in_memory(DEFAULT_MAX_BATCH_WRITES).await.unwrap();
        for id in ["u1", "u2", "u3"] {
            store
                .set(&DocumentPath::parse(&format!("users/{id}")).unwrap(), WriteData::new())
                .await
                .unwrap();
        }
        let ev = event("products/p1", json!({"sellerId": "u1"}));
        let out = resolve(&store, &ev).await.unwrap();
        let recipients: Vec<_> = out.iter().map(|o| o.recipient.as_str()).collect();
        assert_eq!(recipients, vec!["u1", "u2", "u3"]);
        assert!(out.iter().all(|o| o.notice.body == "A product is now available."));
    }
}
