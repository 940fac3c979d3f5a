//! A store-wide exclusive lock kept in a single document.
//!
//! Acquisition is an atomic conditional update: the lock document is flipped
//! to held only if it is free, or if the previous holder's lease ran out.
//! Attempts are bounded and back off exponentially. Each acquisition holds
//! the lock under its own owner token and release only succeeds for that
//! token, so a guard whose lease expired cannot free a lock someone else has
//! taken over since.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::construct::now;
use crate::document::{Document, Filter, ID_FIELD, LOCKS_COLLECTION};
use crate::error::{EavError, Result};
use crate::settings::LockSettings;
use crate::store::DocumentStore;

const STATE_FIELD: &str = "state";
const OWNER_FIELD: &str = "owner";
const LEASE_FIELD: &str = "lease_until";

static OWNERS: AtomicU64 = AtomicU64::new(0);

fn owner_token() -> String {
    format!(
        "{}-{}-{}",
        std::process::id(),
        OWNERS.fetch_add(1, Ordering::Relaxed),
        now()
    )
}

fn fields<const N: usize>(pairs: [(&str, Value); N]) -> Document {
    pairs
        .into_iter()
        .map(|(field, value)| (field.to_owned(), value))
        .collect()
}

pub struct StoreLock {
    store: Arc<dyn DocumentStore>,
    name: String,
    settings: LockSettings,
}

impl StoreLock {
    /// Creates the lock document unless some process already did.
    pub fn new(store: Arc<dyn DocumentStore>, name: &str, settings: LockSettings) -> Result<Self> {
        let document = fields([
            (ID_FIELD, Value::from(name)),
            (STATE_FIELD, Value::from(false)),
            (OWNER_FIELD, Value::Null),
            (LEASE_FIELD, Value::from(0)),
        ]);
        match store.insert_one(LOCKS_COLLECTION, document) {
            Ok(()) => debug!(lock = name, "lock document created"),
            Err(e) if e.is_duplicate_key() => (),
            Err(e) => return Err(e),
        }
        Ok(Self {
            store,
            name: name.to_owned(),
            settings,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// One conditional update. Every acquisition holds under an owner token
    /// of its own, so guards sharing this lock never release each other.
    pub fn try_acquire(&self) -> Result<Option<LockGuard<'_>>> {
        let owner = owner_token();
        let now = now();
        let filter = Filter::And(vec![
            Filter::eq(ID_FIELD, self.name.as_str()),
            Filter::Or(vec![
                Filter::eq(STATE_FIELD, false),
                Filter::lt(LEASE_FIELD, now),
            ]),
        ]);
        let set = fields([
            (STATE_FIELD, Value::from(true)),
            (OWNER_FIELD, Value::from(owner.as_str())),
            (LEASE_FIELD, Value::from(now + self.settings.lease_ms as i64)),
        ]);
        let Some(previous) = self.store.find_one_and_update(LOCKS_COLLECTION, &filter, set)? else {
            return Ok(None);
        };
        if previous.get(STATE_FIELD).and_then(Value::as_bool) == Some(true) {
            let previous_owner = previous.get(OWNER_FIELD).cloned().unwrap_or(Value::Null);
            warn!(
                lock = %self.name,
                %previous_owner,
                "took over a lock whose lease expired"
            );
        }
        Ok(Some(LockGuard {
            lock: self,
            owner,
            released: false,
        }))
    }

    /// Blocks until the lock is held, or fails with [`EavError::LockTimeout`].
    pub fn acquire(&self) -> Result<LockGuard<'_>> {
        let mut backoff = self.settings.initial_backoff_ms;
        for attempt in 1..=self.settings.max_attempts {
            if let Some(guard) = self.try_acquire()? {
                debug!(lock = %self.name, attempt, "lock acquired");
                return Ok(guard);
            }
            if attempt < self.settings.max_attempts {
                thread::sleep(Duration::from_millis(backoff));
                backoff = (backoff * 2).min(self.settings.max_backoff_ms);
            }
        }
        Err(EavError::LockTimeout {
            attempts: self.settings.max_attempts,
        })
    }

    fn release_as(&self, owner: &str) -> Result<bool> {
        let filter = Filter::And(vec![
            Filter::eq(ID_FIELD, self.name.as_str()),
            Filter::eq(OWNER_FIELD, owner),
            Filter::eq(STATE_FIELD, true),
        ]);
        let set = fields([(STATE_FIELD, Value::from(false)), (LEASE_FIELD, Value::from(0))]);
        self.store.update_one(LOCKS_COLLECTION, &filter, set)
    }
}

/// Holds the lock until released or dropped.
pub struct LockGuard<'a> {
    lock: &'a StoreLock,
    owner: String,
    released: bool,
}

impl LockGuard<'_> {
    /// The token this acquisition holds the lock under.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// False when the lock was taken over after this guard's lease ran out.
    pub fn release(mut self) -> Result<bool> {
        self.released = true;
        self.lock.release_as(&self.owner)
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        match self.lock.release_as(&self.owner) {
            Ok(true) => debug!(lock = %self.lock.name, "lock released"),
            Ok(false) => warn!(lock = %self.lock.name, owner = %self.owner, "lock was taken over before release"),
            Err(e) => warn!(lock = %self.lock.name, error = %e, "lock release failed"),
        }
    }
}
