#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use eavstore::document::{Document, Filter, Stage, UpsertModel};
use eavstore::error::{EavError, Result};
use eavstore::persist::SqliteStore;
use eavstore::settings::Settings;
use eavstore::store::DocumentStore;

pub fn memory_store() -> Arc<SqliteStore> {
    Arc::new(SqliteStore::in_memory().expect("in-memory store"))
}

/// Settings whose buffers only flush when asked to.
pub fn quiet_settings() -> Settings {
    Settings {
        bulk_write_threshold: 100_000,
        ..Settings::default()
    }
}

/// Counts the bulk writes that reach the wrapped store.
pub struct CountingStore {
    inner: SqliteStore,
    pub bulk_writes: AtomicUsize,
    pub bulk_documents: AtomicUsize,
}

impl CountingStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: SqliteStore::in_memory().expect("in-memory store"),
            bulk_writes: AtomicUsize::new(0),
            bulk_documents: AtomicUsize::new(0),
        })
    }
    pub fn bulk_writes(&self) -> usize {
        self.bulk_writes.load(Ordering::SeqCst)
    }
    pub fn bulk_documents(&self) -> usize {
        self.bulk_documents.load(Ordering::SeqCst)
    }
}

impl DocumentStore for CountingStore {
    fn insert_one(&self, collection: &str, document: Document) -> Result<()> {
        self.inner.insert_one(collection, document)
    }
    fn insert_many(&self, collection: &str, documents: Vec<Document>) -> Result<usize> {
        self.bulk_writes.fetch_add(1, Ordering::SeqCst);
        self.bulk_documents.fetch_add(documents.len(), Ordering::SeqCst);
        self.inner.insert_many(collection, documents)
    }
    fn bulk_upsert(&self, collection: &str, models: Vec<UpsertModel>) -> Result<usize> {
        self.bulk_writes.fetch_add(1, Ordering::SeqCst);
        self.bulk_documents.fetch_add(models.len(), Ordering::SeqCst);
        self.inner.bulk_upsert(collection, models)
    }
    fn find(&self, collection: &str, filter: &Filter, limit: Option<usize>) -> Result<Vec<Document>> {
        self.inner.find(collection, filter, limit)
    }
    fn count(&self, collection: &str, filter: &Filter) -> Result<usize> {
        self.inner.count(collection, filter)
    }
    fn aggregate(&self, collection: &str, pipeline: &[Stage]) -> Result<Vec<Document>> {
        self.inner.aggregate(collection, pipeline)
    }
    fn update_one(&self, collection: &str, filter: &Filter, set: Document) -> Result<bool> {
        self.inner.update_one(collection, filter, set)
    }
    fn find_one_and_update(&self, collection: &str, filter: &Filter, set: Document) -> Result<Option<Document>> {
        self.inner.find_one_and_update(collection, filter, set)
    }
    fn delete_one(&self, collection: &str, filter: &Filter) -> Result<bool> {
        self.inner.delete_one(collection, filter)
    }
}

/// Fails every bulk write while `failing` is set, passing everything else through.
pub struct FaultyStore {
    inner: SqliteStore,
    pub failing: AtomicBool,
}

impl FaultyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: SqliteStore::in_memory().expect("in-memory store"),
            failing: AtomicBool::new(true),
        })
    }
    pub fn heal(&self) {
        self.failing.store(false, Ordering::SeqCst);
    }
    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(EavError::Persistence("injected fault".to_owned()));
        }
        Ok(())
    }
}

impl DocumentStore for FaultyStore {
    fn insert_one(&self, collection: &str, document: Document) -> Result<()> {
        self.inner.insert_one(collection, document)
    }
    fn insert_many(&self, collection: &str, documents: Vec<Document>) -> Result<usize> {
        self.check()?;
        self.inner.insert_many(collection, documents)
    }
    fn bulk_upsert(&self, collection: &str, models: Vec<UpsertModel>) -> Result<usize> {
        self.check()?;
        self.inner.bulk_upsert(collection, models)
    }
    fn find(&self, collection: &str, filter: &Filter, limit: Option<usize>) -> Result<Vec<Document>> {
        self.inner.find(collection, filter, limit)
    }
    fn count(&self, collection: &str, filter: &Filter) -> Result<usize> {
        self.inner.count(collection, filter)
    }
    fn aggregate(&self, collection: &str, pipeline: &[Stage]) -> Result<Vec<Document>> {
        self.inner.aggregate(collection, pipeline)
    }
    fn update_one(&self, collection: &str, filter: &Filter, set: Document) -> Result<bool> {
        self.inner.update_one(collection, filter, set)
    }
    fn find_one_and_update(&self, collection: &str, filter: &Filter, set: Document) -> Result<Option<Document>> {
        self.inner.find_one_and_update(collection, filter, set)
    }
    fn delete_one(&self, collection: &str, filter: &Filter) -> Result<bool> {
        self.inner.delete_one(collection, filter)
    }
}
