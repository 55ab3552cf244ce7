use crate::{
    bus::{Event, EventBus},
    document::{CollectionPath, DocumentEvent, DocumentPath, Fields, PathPattern, WriteData},
    error::StoreError,
};
use chrono::{DateTime, Duration, SubsecRound, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    ConnectOptions, Row, SqliteConnection, SqlitePool,
};
use std::{
    path::{Path, PathBuf},
    str::FromStr,
    sync::{Arc, Mutex},
};
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// Default ceiling on operations in one atomic batch.
pub const DEFAULT_MAX_BATCH_WRITES: usize = 500;

/// A stored document.
#[derive(Debug, Clone)]
pub struct Document {
    pub path: DocumentPath,
    pub data: Fields,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
}

/// Writes applied all-or-nothing by [`Store::commit`].
#[derive(Debug, Default)]
pub struct WriteBatch {
    ops: Vec<(DocumentPath, WriteData)>,
}

impl WriteBatch {
    pub fn set(&mut self, path: DocumentPath, data: WriteData) -> &mut Self {
        self.ops.push((path, data));
        self
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum PutMode {
    Create,
    Set,
}

/// The bus the store announces new documents on, and which paths to announce.
///
/// Paths outside `watch` are written silently, so notification fan-out never
/// competes with trigger events for bus capacity.
#[derive(Debug, Clone)]
pub struct EventSink {
    bus: Arc<EventBus>,
    watch: Arc<[PathPattern]>,
}

impl EventSink {
    pub fn new(bus: Arc<EventBus>, watch: Vec<PathPattern>) -> Self {
        Self {
            bus,
            watch: watch.into(),
        }
    }

    pub fn watches(&self, path: &DocumentPath) -> bool {
        self.watch.iter().any(|pattern| pattern.matches(path).is_some())
    }
}

/// JSON document store on SQLite.
#[derive(Clone, Debug)]
pub struct Store {
    pool: SqlitePool,
    max_batch_writes: usize,
    last_commit: Arc<Mutex<DateTime<Utc>>>,
    events: Option<EventSink>,
}

impl Store {
    /// Create a new Store instance.
    /// This will automatically create the database file if it doesn't exist.
    pub async fn new(db_path: impl AsRef<Path>, max_batch_writes: usize) -> Result<Self, StoreError> {
        let db_path = db_path.as_ref();

        // Ensure the parent directory exists
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let db_url = format!("sqlite://{}", db_path.to_string_lossy());

        let options = SqliteConnectOptions::from_str(&db_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5))
            .log_statements(tracing::log::LevelFilter::Trace);

        let pool = SqlitePool::connect_with(options).await?;

        Ok(Self::from_pool(pool, max_batch_writes))
    }

    /// A private in-memory database, mostly for tests and local runs.
    pub async fn in_memory(max_batch_writes: usize) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?
            .log_statements(tracing::log::LevelFilter::Trace);

        // Every connection to :memory: is its own database, so keep exactly one alive.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self::from_pool(pool, max_batch_writes);
        store.init().await?;
        Ok(store)
    }

    fn from_pool(pool: SqlitePool, max_batch_writes: usize) -> Self {
        Self {
            pool,
            max_batch_writes,
            last_commit: Arc::new(Mutex::new(DateTime::<Utc>::MIN_UTC)),
            events: None,
        }
    }

    /// Publish a creation event for every new document the sink watches.
    pub fn with_events(mut self, sink: EventSink) -> Self {
        self.events = Some(sink);
        self
    }

    pub fn max_batch_writes(&self) -> usize {
        self.max_batch_writes
    }

    /// Initialize the database schema.
    pub async fn init(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                path TEXT PRIMARY KEY,
                collection TEXT NOT NULL,
                data TEXT NOT NULL,
                create_time DATETIME NOT NULL,
                update_time DATETIME NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents(collection);
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Point lookup.
    pub async fn get(&self, path: &DocumentPath) -> Result<Option<Document>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT path, data, create_time, update_time
            FROM documents
            WHERE path = ?
            "#,
        )
        .bind(path.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| Self::document_from_row(&row)).transpose()
    }

    /// Every document directly inside `collection`, oldest first.
    pub async fn list(&self, collection: &CollectionPath) -> Result<Vec<Document>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT path, data, create_time, update_time
            FROM documents
            WHERE collection = ?
            ORDER BY rowid ASC
            "#,
        )
        .bind(collection.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::document_from_row).collect()
    }

    /// Create a document with a generated id under `collection`.
    pub async fn add(
        &self,
        collection: &CollectionPath,
        data: WriteData,
    ) -> Result<DocumentPath, StoreError> {
        let path = collection.new_doc();
        self.write_one(&path, data, PutMode::Create).await?;
        Ok(path)
    }

    /// Create a document; fails if `path` is already taken.
    pub async fn create(&self, path: &DocumentPath, data: WriteData) -> Result<(), StoreError> {
        self.write_one(path, data, PutMode::Create).await
    }

    /// Create or overwrite a document.
    pub async fn set(&self, path: &DocumentPath, data: WriteData) -> Result<(), StoreError> {
        self.write_one(path, data, PutMode::Set).await
    }

    pub fn batch(&self) -> WriteBatch {
        WriteBatch::default()
    }

    /// Apply every write in `batch` in one transaction, or none of them.
    pub async fn commit(&self, batch: WriteBatch) -> Result<Vec<DocumentPath>, StoreError> {
        if batch.len() > self.max_batch_writes {
            return Err(StoreError::BatchTooLarge {
                ops: batch.len(),
                max: self.max_batch_writes,
            });
        }

        let commit_time = self.next_commit_time();
        let mut created = Vec::new();
        let mut paths = Vec::with_capacity(batch.len());

        let mut tx = self.pool.begin().await?;
        for (path, data) in batch.ops {
            let fields = data.resolve(commit_time);
            let is_new = Self::write_in(&mut *tx, &path, &fields, commit_time, PutMode::Set).await?;
            if is_new && self.announces(&path) {
                created.push(DocumentEvent {
                    path: path.clone(),
                    data: fields,
                    create_time: commit_time,
                });
            }
            paths.push(path);
        }
        tx.commit().await?;

        debug!(writes = paths.len(), "Committed batch");
        for event in created {
            self.publish_created(event);
        }

        Ok(paths)
    }

    async fn write_one(
        &self,
        path: &DocumentPath,
        data: WriteData,
        mode: PutMode,
    ) -> Result<(), StoreError> {
        let commit_time = self.next_commit_time();
        let fields = data.resolve(commit_time);

        let mut tx = self.pool.begin().await?;
        let created = Self::write_in(&mut *tx, path, &fields, commit_time, mode).await?;
        tx.commit().await?;

        if created && self.announces(path) {
            self.publish_created(DocumentEvent {
                path: path.clone(),
                data: fields,
                create_time: commit_time,
            });
        }

        Ok(())
    }

    /// Returns whether the document is new.
    async fn write_in(
        conn: &mut SqliteConnection,
        path: &DocumentPath,
        fields: &Fields,
        commit_time: DateTime<Utc>,
        mode: PutMode,
    ) -> Result<bool, StoreError> {
        let key = path.to_string();

        let existing = sqlx::query("SELECT 1 FROM documents WHERE path = ?")
            .bind(&key)
            .fetch_optional(&mut *conn)
            .await?;
        if existing.is_some() && mode == PutMode::Create {
            return Err(StoreError::AlreadyExists(path.clone()));
        }

        let data = serde_json::to_string(fields).map_err(StoreError::Encode)?;

        sqlx::query(
            r#"
            INSERT INTO documents (path, collection, data, create_time, update_time)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(path) DO UPDATE SET
                data = excluded.data,
                update_time = excluded.update_time
            "#,
        )
        .bind(&key)
        .bind(path.parent().to_string())
        .bind(data)
        .bind(commit_time)
        .bind(commit_time)
        .execute(&mut *conn)
        .await?;

        Ok(existing.is_none())
    }

    fn announces(&self, path: &DocumentPath) -> bool {
        self.events.as_ref().is_some_and(|sink| sink.watches(path))
    }

    fn publish_created(&self, event: DocumentEvent) {
        if let Some(sink) = &self.events {
            sink.bus.publish(Event::DocumentCreated(event));
        }
    }

    /// Strictly increasing at microsecond resolution.
    fn next_commit_time(&self) -> DateTime<Utc> {
        let mut last = self
            .last_commit
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut now = Utc::now().trunc_subsecs(6);
        if now <= *last {
            now = *last + Duration::microseconds(1);
        }
        *last = now;
        now
    }

    fn document_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Document, StoreError> {
        let path: String = row.try_get("path")?;
        let data: String = row.try_get("data")?;
        let data: Fields = serde_json::from_str(&data).map_err(|source| StoreError::Decode {
            path: path.clone(),
            source,
        })?;

        Ok(Document {
            path: DocumentPath::parse(&path)?,
            data,
            create_time: row.try_get("create_time")?,
            update_time: row.try_get("update_time")?,
        })
    }
}

/// Where the store lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    File(PathBuf),
    Memory,
}

/// Process-wide store handle, connected on first use and then shared.
#[derive(Debug)]
pub struct StoreHandle {
    cell: OnceCell<Store>,
    location: StoreLocation,
    max_batch_writes: usize,
    events: Option<EventSink>,
}

impl StoreHandle {
    pub fn lazy(
        location: StoreLocation,
        max_batch_writes: usize,
        events: Option<EventSink>,
    ) -> Self {
        Self {
            cell: OnceCell::new(),
            location,
            max_batch_writes,
            events,
        }
    }

    /// A handle around an already connected store.
    pub fn ready(store: Store) -> Self {
        let max_batch_writes = store.max_batch_writes();
        let events = store.events.clone();
        Self {
            cell: OnceCell::from(store),
            location: StoreLocation::Memory,
            max_batch_writes,
            events,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.cell.initialized()
    }

    pub async fn get(&self) -> Result<&Store, StoreError> {
        self.cell
            .get_or_try_init(|| async {
                let store = match &self.location {
                    StoreLocation::File(path) => {
                        info!("Opening store at {}", path.display());
                        let store = Store::new(path, self.max_batch_writes).await?;
                        store.init().await?;
                        store
                    }
                    StoreLocation::Memory => {
                        info!("Opening in-memory store");
                        Store::in_memory(self.max_batch_writes).await?
                    }
                };
                Ok(match &self.events {
                    Some(sink) => store.with_events(sink.clone()),
                    None => store,
                })
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(path: &str) -> DocumentPath {
        DocumentPath::parse(path).unwrap()
    }

    #[tokio::test]
    async fn set_then_get_round_trips_fields() {
        let store = Store::in_memory(DEFAULT_MAX_BATCH_WRITES).await.unwrap();
        let path = doc("products/p1");
        store
            .set(&path, WriteData::new().field("sellerId", "s1").field("title", "Lamp"))
            .await
            .unwrap();

        let found = store.get(&path).await.unwrap().unwrap();
        assert_eq!(found.path, path);
        assert_eq!(found.data["sellerId"], json!("s1"));
        assert!(store.get(&doc("products/nope")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn create_refuses_existing_documents() {
        let store = Store::in_memory(DEFAULT_MAX_BATCH_WRITES).await.unwrap();
        let path = doc("users/u1");
        store.create(&path, WriteData::new()).await.unwrap();
        let err = store.create(&path, WriteData::new()).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(p) if p == path));
    }

    #[tokio::test]
    async fn list_only_sees_direct_children() {
        let store = Store::in_memory(DEFAULT_MAX_BATCH_WRITES).await.unwrap();
        store.set(&doc("users/a"), WriteData::new()).await.unwrap();
        store.set(&doc("users/b"), WriteData::new()).await.unwrap();
        store
            .add(
                &CollectionPath::parse("users/a/notifications").unwrap(),
                WriteData::new().field("title", "x"),
            )
            .await
            .unwrap();

        let users = store.list(&CollectionPath::root("users")).await.unwrap();
        let ids: Vec<_> = users.iter().map(|d| d.path.id().to_string()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn server_timestamps_increase_per_write() {
        let store = Store::in_memory(DEFAULT_MAX_BATCH_WRITES).await.unwrap();
        let inbox = CollectionPath::parse("users/u1/notifications").unwrap();
        let mut dates = Vec::new();
        for _ in 0..5 {
            let path = store
                .add(&inbox, WriteData::new().server_timestamp("date"))
                .await
                .unwrap();
            let found = store.get(&path).await.unwrap().unwrap();
            let date: DateTime<Utc> = serde_json::from_value(found.data["date"].clone()).unwrap();
            assert_eq!(date, found.create_time);
            dates.push(date);
        }
        assert!(dates.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn oversized_batch_writes_nothing() {
        let store = Store::in_memory(2).await.unwrap();
        let mut batch = store.batch();
        for id in ["a", "b", "c"] {
            batch.set(doc(&format!("users/{id}")), WriteData::new());
        }

        let err = store.commit(batch).await.unwrap_err();
        assert!(matches!(err, StoreError::BatchTooLarge { ops: 3, max: 2 }));
        assert!(store
            .list(&CollectionPath::root("users"))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn batch_shares_one_commit_time() {
        let store = Store::in_memory(DEFAULT_MAX_BATCH_WRITES).await.unwrap();
        let mut batch = store.batch();
        batch
            .set(doc("users/a"), WriteData::new().server_timestamp("date"))
            .set(doc("users/b"), WriteData::new().server_timestamp("date"));
        let paths = store.commit(batch).await.unwrap();
        assert_eq!(paths.len(), 2);

        let a = store.get(&paths[0]).await.unwrap().unwrap();
        let b = store.get(&paths[1]).await.unwrap().unwrap();
        assert_eq!(a.data["date"], b.data["date"]);
    }

    #[tokio::test]
    async fn only_new_documents_publish_events() {
        let bus = Arc::new(EventBus::default());
        let mut rx = bus.subscribe();
        let store = Store::in_memory(DEFAULT_MAX_BATCH_WRITES)
            .await
            .unwrap()
            .with_events(EventSink::new(
                bus.clone(),
                vec![PathPattern::new("products/{productId}")],
            ));

        let path = doc("products/p1");
        store.set(&path, WriteData::new().field("title", "v1")).await.unwrap();
        store.set(&path, WriteData::new().field("title", "v2")).await.unwrap();
        store.set(&doc("products/p2"), WriteData::new()).await.unwrap();

        let Event::DocumentCreated(first) = rx.recv().await.unwrap();
        assert_eq!(first.path, path);
        assert_eq!(first.data["title"], json!("v1"));
        let Event::DocumentCreated(second) = rx.recv().await.unwrap();
        assert_eq!(second.path, doc("products/p2"));
    }

    #[tokio::test]
    async fn unwatched_documents_are_written_silently() {
        let bus = Arc::new(EventBus::new(4));
        let mut rx = bus.subscribe();
        let store = Store::in_memory(DEFAULT_MAX_BATCH_WRITES)
            .await
            .unwrap()
            .with_events(EventSink::new(
                bus.clone(),
                vec![PathPattern::new("purchases/{purchaseId}")],
            ));

        let mut batch = store.batch();
        for i in 0..10 {
            batch.set(doc(&format!("users/u{i}/notifications/n1")), WriteData::new());
        }
        store.commit(batch).await.unwrap();
        store
            .add(&CollectionPath::parse("users/u1/notifications").unwrap(), WriteData::new())
            .await
            .unwrap();
        store.set(&doc("purchases/q1"), WriteData::new()).await.unwrap();

        // Only the watched write reached the bus, so nothing lagged.
        let Event::DocumentCreated(event) = rx.recv().await.unwrap();
        assert_eq!(event.path, doc("purchases/q1"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn handle_connects_once() {
        let handle = StoreHandle::lazy(StoreLocation::Memory, 10, None);
        assert!(!handle.is_connected());

        let first = handle.get().await.unwrap();
        first.set(&doc("users/u1"), WriteData::new()).await.unwrap();
        assert!(handle.is_connected());

        // Same connection: the document written through the first borrow is visible.
        let second = handle.get().await.unwrap();
        assert!(second.get(&doc("users/u1")).await.unwrap().is_some());
        assert_eq!(second.max_batch_writes(), 10);
    }
}
