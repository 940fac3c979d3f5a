// used for persistence
use rusqlite::{Connection, ErrorCode, OptionalExtension, TransactionBehavior, params};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use crate::construct::OtherHasher;
use crate::document::{Document, Filter, ID_FIELD, Stage, UpsertModel, identity_key};
use crate::error::{EavError, Result};
use crate::identity;
use crate::store::DocumentStore;

/// Where the SQLite database lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistenceMode {
    InMemory,
    File(String),
}

// ------------- Persistence -------------
/// A [`DocumentStore`] on top of SQLite.
///
/// Each collection is a table keyed by the document identity, holding the
/// document itself as JSON. Filters are evaluated on the decoded documents, so
/// every feature of [`Filter`] is available regardless of SQLite's own
/// capabilities. A lookup joining on anything but the identity reads the
/// foreign collection once per stage.
pub struct SqliteStore {
    persistor: Mutex<Persistor>,
}

struct Persistor {
    connection: Connection,
    // collections whose table is known to exist
    seen_collections: HashSet<String, OtherHasher>,
}

impl SqliteStore {
    pub fn new(mode: &PersistenceMode) -> Result<Self> {
        let connection = match mode {
            PersistenceMode::InMemory => Connection::open_in_memory()?,
            PersistenceMode::File(path) => {
                let connection = Connection::open(path)?;
                // other processes may hold the write lock briefly
                connection.busy_timeout(Duration::from_secs(5))?;
                connection
            }
        };
        debug!(?mode, "opened document store");
        Ok(Self {
            persistor: Mutex::new(Persistor {
                connection,
                seen_collections: HashSet::default(),
            }),
        })
    }
    pub fn in_memory() -> Result<Self> {
        Self::new(&PersistenceMode::InMemory)
    }
}

fn table_name(collection: &str) -> Result<String> {
    if collection.is_empty() || !collection.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(EavError::Invariant(format!(
            "'{}' is not a valid collection name",
            collection
        )));
    }
    Ok(format!("Collection_{}", collection))
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(e, rusqlite::Error::SqliteFailure(f, _) if f.code == ErrorCode::ConstraintViolation)
}

fn decode(body: &str) -> Result<Document> {
    Ok(serde_json::from_str::<Document>(body)?)
}

// Values that compare equal share a key. Numbers compare by magnitude.
fn join_key(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => "null".to_owned(),
        Some(Value::Number(n)) => format!("n:{}", n.as_f64().unwrap_or(f64::NAN)),
        Some(Value::String(s)) => format!("s:{}", s),
        Some(other) => format!("v:{}", other),
    }
}

fn document_key(collection: &str, document: &Document) -> Result<String> {
    document
        .get(ID_FIELD)
        .map(identity_key)
        .ok_or_else(|| EavError::Codec(format!("document without {} in '{}'", ID_FIELD, collection)))
}

fn merge(target: &mut Document, set: Document) {
    for (field, value) in set {
        // identities never change once stored
        if field != ID_FIELD {
            target.insert(field, value);
        }
    }
}

// Statements only need the connection, so they also run inside transactions.
fn insert_row(connection: &Connection, table: &str, key: &str, document: &Document) -> rusqlite::Result<usize> {
    let body = serde_json::to_string(document)
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
    connection
        .prepare_cached(&format!(
            "
            insert into {} (
                Document_Identity,
                Body
            ) values (?, ?)
            ",
            table
        ))?
        .execute(params![key, body])
}

fn replace_row(connection: &Connection, table: &str, key: &str, document: &Document) -> Result<()> {
    let body = serde_json::to_string(document)?;
    connection
        .prepare_cached(&format!(
            "
            update {}
                set Body = ?
                where Document_Identity = ?
            ",
            table
        ))?
        .execute(params![body, key])?;
    Ok(())
}

fn select(connection: &Connection, table: &str, filter: &Filter, limit: Option<usize>) -> Result<Vec<Document>> {
    let limit = limit.unwrap_or(usize::MAX);
    let mut documents = Vec::new();
    if limit == 0 {
        return Ok(documents);
    }
    // a pinned identity is a primary key lookup rather than a scan
    if let Some(identity) = filter.identity() {
        let body: Option<String> = connection
            .prepare_cached(&format!(
                "
                select Body
                    from {}
                    where Document_Identity = ?
                ",
                table
            ))?
            .query_row(params![identity_key(identity)], |r| r.get(0))
            .optional()?;
        if let Some(body) = body {
            let document = decode(&body)?;
            if filter.matches(&document) {
                documents.push(document);
            }
        }
        return Ok(documents);
    }
    let mut statement = connection.prepare_cached(&format!(
        "
        select Body
            from {}
            order by rowid
        ",
        table
    ))?;
    let mut rows = statement.query([])?;
    while let Some(row) = rows.next()? {
        let body: String = row.get(0)?;
        let document = decode(&body)?;
        if filter.matches(&document) {
            documents.push(document);
            if documents.len() >= limit {
                break;
            }
        }
    }
    Ok(documents)
}

impl Persistor {
    fn table(&mut self, collection: &str) -> Result<String> {
        let table = table_name(collection)?;
        if !self.seen_collections.contains(collection) {
            self.connection.execute_batch(&format!(
                "
                create table if not exists {} (
                    Document_Identity text not null,
                    Body text not null,
                    constraint unique_and_referenceable_Document_Identity primary key (
                        Document_Identity
                    )
                );
                ",
                table
            ))?;
            self.seen_collections.insert(collection.to_owned());
        }
        Ok(table)
    }
    fn select(&mut self, collection: &str, filter: &Filter, limit: Option<usize>) -> Result<Vec<Document>> {
        let table = self.table(collection)?;
        select(&self.connection, &table, filter, limit)
    }
    /// Merges into the first match and returns the document as it was.
    fn update_first(&mut self, collection: &str, filter: &Filter, set: Document) -> Result<Option<Document>> {
        let table = self.table(collection)?;
        let transaction = self
            .connection
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let previous = select(&transaction, &table, filter, Some(1))?.into_iter().next();
        if let Some(previous) = &previous {
            let key = document_key(collection, previous)?;
            let mut updated = previous.clone();
            merge(&mut updated, set);
            replace_row(&transaction, &table, &key, &updated)?;
        }
        transaction.commit()?;
        Ok(previous)
    }
}

impl DocumentStore for SqliteStore {
    fn insert_one(&self, collection: &str, document: Document) -> Result<()> {
        let mut persistor = self.persistor.lock()?;
        let table = persistor.table(collection)?;
        let key = document_key(collection, &document)?;
        match insert_row(&persistor.connection, &table, &key, &document) {
            Ok(_) => Ok(()),
            Err(e) if is_constraint_violation(&e) => Err(EavError::DuplicateKey {
                collection: collection.to_owned(),
                id: key,
            }),
            Err(e) => Err(e.into()),
        }
    }

    fn insert_many(&self, collection: &str, documents: Vec<Document>) -> Result<usize> {
        let mut persistor = self.persistor.lock()?;
        let table = persistor.table(collection)?;
        let transaction = persistor.connection.transaction()?;
        let mut inserted = 0;
        let mut duplicates = Vec::new();
        let mut failure: Option<EavError> = None;
        for document in &documents {
            let key = match document_key(collection, document) {
                Ok(key) => key,
                Err(e) => {
                    failure = failure.or(Some(e));
                    continue;
                }
            };
            // a failed statement is rolled back on its own, the batch carries on
            match insert_row(&transaction, &table, &key, document) {
                Ok(_) => inserted += 1,
                Err(e) if is_constraint_violation(&e) => duplicates.push(key),
                Err(e) => {
                    failure = failure.or(Some(e.into()));
                }
            }
        }
        transaction.commit()?;
        if let Some(failure) = failure {
            return Err(failure);
        }
        if !duplicates.is_empty() {
            return Err(EavError::BulkWrite {
                collection: collection.to_owned(),
                inserted,
                duplicates,
            });
        }
        Ok(inserted)
    }

    fn bulk_upsert(&self, collection: &str, models: Vec<UpsertModel>) -> Result<usize> {
        let mut persistor = self.persistor.lock()?;
        let table = persistor.table(collection)?;
        let transaction = persistor
            .connection
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut applied = 0;
        for UpsertModel { filter, set } in models {
            match select(&transaction, &table, &filter, Some(1))?.into_iter().next() {
                Some(mut existing) => {
                    let key = document_key(collection, &existing)?;
                    merge(&mut existing, set);
                    replace_row(&transaction, &table, &key, &existing)?;
                }
                None => {
                    let mut fresh = filter.equalities();
                    fresh.extend(set);
                    if !fresh.contains_key(ID_FIELD) {
                        let seed = serde_json::to_string(&fresh)?;
                        fresh.insert(ID_FIELD.to_owned(), Value::String(identity::hash(&[seed.as_bytes()])));
                    }
                    let key = document_key(collection, &fresh)?;
                    insert_row(&transaction, &table, &key, &fresh)?;
                }
            }
            applied += 1;
        }
        transaction.commit()?;
        Ok(applied)
    }

    fn find(&self, collection: &str, filter: &Filter, limit: Option<usize>) -> Result<Vec<Document>> {
        self.persistor.lock()?.select(collection, filter, limit)
    }

    fn count(&self, collection: &str, filter: &Filter) -> Result<usize> {
        let mut persistor = self.persistor.lock()?;
        let table = persistor.table(collection)?;
        if *filter == Filter::All {
            let count: i64 = persistor.connection.query_row(
                &format!(
                    "
                    select count(*)
                        from {}
                    ",
                    table
                ),
                [],
                |r| r.get(0),
            )?;
            return Ok(count as usize);
        }
        Ok(select(&persistor.connection, &table, filter, None)?.len())
    }

    fn aggregate(&self, collection: &str, pipeline: &[Stage]) -> Result<Vec<Document>> {
        let mut persistor = self.persistor.lock()?;
        let (mut documents, remaining) = match pipeline.split_first() {
            Some((Stage::Match(filter), rest)) => (persistor.select(collection, filter, None)?, rest),
            _ => (persistor.select(collection, &Filter::All, None)?, pipeline),
        };
        for stage in remaining {
            match stage {
                Stage::Match(filter) => documents.retain(|d| filter.matches(d)),
                Stage::Limit(limit) => documents.truncate(*limit),
                Stage::Lookup {
                    from,
                    local_field,
                    foreign_field,
                    as_field,
                } if foreign_field == ID_FIELD => {
                    for document in documents.iter_mut() {
                        let joined = match document.get(local_field) {
                            Some(local) => persistor.select(from, &Filter::Eq(ID_FIELD.to_owned(), local.clone()), Some(1))?,
                            None => Vec::new(),
                        };
                        document.insert(
                            as_field.clone(),
                            Value::Array(joined.into_iter().map(Value::Object).collect()),
                        );
                    }
                }
                Stage::Lookup {
                    from,
                    local_field,
                    foreign_field,
                    as_field,
                } => {
                    // one pass over the foreign collection per stage
                    let mut foreign: HashMap<String, Vec<Value>, OtherHasher> = HashMap::default();
                    if !documents.is_empty() {
                        for candidate in persistor.select(from, &Filter::All, None)? {
                            foreign
                                .entry(join_key(candidate.get(foreign_field)))
                                .or_default()
                                .push(Value::Object(candidate));
                        }
                    }
                    for document in documents.iter_mut() {
                        let joined = match document.get(local_field) {
                            Some(local) => foreign.get(&join_key(Some(local))).cloned().unwrap_or_default(),
                            None => Vec::new(),
                        };
                        document.insert(as_field.clone(), Value::Array(joined));
                    }
                }
            }
        }
        Ok(documents)
    }

    fn update_one(&self, collection: &str, filter: &Filter, set: Document) -> Result<bool> {
        Ok(self
            .persistor
            .lock()?
            .update_first(collection, filter, set)?
            .is_some())
    }

    fn find_one_and_update(
        &self,
        collection: &str,
        filter: &Filter,
        set: Document,
    ) -> Result<Option<Document>> {
        self.persistor.lock()?.update_first(collection, filter, set)
    }

    fn delete_one(&self, collection: &str, filter: &Filter) -> Result<bool> {
        let mut persistor = self.persistor.lock()?;
        let table = persistor.table(collection)?;
        let Some(target) = select(&persistor.connection, &table, filter, Some(1))?.into_iter().next() else {
            return Ok(false);
        };
        let key = document_key(collection, &target)?;
        let deleted = persistor.connection.execute(
            &format!(
                "
                delete from {}
                    where Document_Identity = ?
                ",
                table
            ),
            params![key],
        )?;
        Ok(deleted > 0)
    }
}
