//! Dense integer identifiers for attribute names.
//!
//! Identifiers are stable once allocated, grow by one per new name, and are
//! visible to every process reading the same store. New names are allocated
//! under the store-wide lock from [`crate::lock`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::{debug, warn};

use crate::construct::{OtherHasher, Timestamp, now};
use crate::document::{ATTRIBUTE_IDS_COLLECTION, ATTRIBUTE_NAME_FIELD, Document, Filter, ID_FIELD, TS_FIELD};
use crate::error::{EavError, Result};
use crate::lock::StoreLock;
use crate::settings::Settings;
use crate::store::DocumentStore;

pub const ALLOCATION_LOCK: &str = "attribute_id_lock";

#[derive(Debug, Default)]
struct AttributeCache {
    ids: HashMap<String, i64, OtherHasher>,
    // newest timestamp seen, the next refresh starts here
    refreshed_to: Timestamp,
}

impl AttributeCache {
    fn absorb(&mut self, documents: Vec<Document>) -> usize {
        let mut absorbed = 0;
        for document in documents {
            let name = document.get(ATTRIBUTE_NAME_FIELD).and_then(Value::as_str);
            let id = document.get(ID_FIELD).and_then(Value::as_i64);
            let (Some(name), Some(id)) = (name, id) else {
                warn!(?document, "skipping malformed attribute id record");
                continue;
            };
            if let Some(ts) = document.get(TS_FIELD).and_then(Value::as_i64) {
                self.refreshed_to = self.refreshed_to.max(ts);
            }
            self.ids.insert(name.to_owned(), id);
            absorbed += 1;
        }
        absorbed
    }
}

pub struct AttributeIdAllocator {
    store: Arc<dyn DocumentStore>,
    lock: StoreLock,
    cache: Mutex<AttributeCache>,
    max_fetch: usize,
    retries: u32,
}

impl AttributeIdAllocator {
    pub fn new(store: Arc<dyn DocumentStore>, settings: &Settings) -> Result<Self> {
        let lock = StoreLock::new(Arc::clone(&store), ALLOCATION_LOCK, settings.lock.clone())?;
        Ok(Self {
            store,
            lock,
            cache: Mutex::new(AttributeCache::default()),
            max_fetch: settings.attribute_cache_max,
            retries: settings.allocation_retries.max(1),
        })
    }

    /// The identifier of `name`, allocating one if the name is new.
    pub fn get_id(&self, name: &str) -> Result<i64> {
        if let Some(id) = self.cached(name)? {
            return Ok(id);
        }
        self.refresh()?;
        if let Some(id) = self.cached(name)? {
            return Ok(id);
        }
        let _guard = self.lock.acquire()?;
        // someone may have allocated it while we waited for the lock
        if let Some(id) = self.lookup(name)? {
            return Ok(id);
        }
        self.allocate(name)
    }

    pub fn cached(&self, name: &str) -> Result<Option<i64>> {
        Ok(self.cache.lock()?.ids.get(name).copied())
    }

    /// Number of names currently cached.
    pub fn cache_len(&self) -> Result<usize> {
        Ok(self.cache.lock()?.ids.len())
    }

    /// Pulls in the names recorded since the last refresh.
    pub fn refresh(&self) -> Result<usize> {
        let since = self.cache.lock()?.refreshed_to;
        let documents = self.store.find(
            ATTRIBUTE_IDS_COLLECTION,
            &Filter::gte(TS_FIELD, since),
            Some(self.max_fetch),
        )?;
        let absorbed = self.cache.lock()?.absorb(documents);
        debug!(since, absorbed, "attribute id cache refreshed");
        Ok(absorbed)
    }

    fn lookup(&self, name: &str) -> Result<Option<i64>> {
        let documents = self.store.find(
            ATTRIBUTE_IDS_COLLECTION,
            &Filter::eq(ATTRIBUTE_NAME_FIELD, name),
            Some(1),
        )?;
        self.cache.lock()?.absorb(documents);
        self.cached(name)
    }

    fn allocate(&self, name: &str) -> Result<i64> {
        let mut first_attempt: Option<i64> = None;
        let mut taken: Option<i64> = None;
        for attempt in 1..=self.retries {
            let counted = self.store.count(ATTRIBUTE_IDS_COLLECTION, &Filter::All)? as i64 + 1;
            // ids written outside the lock can leave the count behind
            let id = taken.map_or(counted, |taken| counted.max(taken + 1));
            let first = *first_attempt.get_or_insert(id);
            let mut record = Document::new();
            record.insert(ID_FIELD.to_owned(), Value::from(id));
            record.insert(ATTRIBUTE_NAME_FIELD.to_owned(), Value::from(name));
            record.insert(TS_FIELD.to_owned(), Value::from(now()));
            match self.store.insert_one(ATTRIBUTE_IDS_COLLECTION, record) {
                Ok(()) => {
                    if id != first {
                        warn!(name, first, id, attempt, "attribute id allocated after a write conflict");
                    }
                    self.cache.lock()?.ids.insert(name.to_owned(), id);
                    debug!(name, id, "attribute id allocated");
                    return Ok(id);
                }
                Err(e) if e.is_duplicate_key() => {
                    debug!(name, id, attempt, "attribute id taken, retrying");
                    taken = Some(id);
                }
                Err(e) => return Err(e),
            }
        }
        Err(EavError::AllocationConflict {
            name: name.to_owned(),
            attempts: self.retries,
        })
    }
}
