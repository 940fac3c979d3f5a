//! Saving entities.
//!
//! A save writes the entity's type and the entity itself straight to the
//! store, then hands every encoded attribute to the buffer its variant routes
//! to. Duplicate keys anywhere along the way mean the same content was saved
//! before and are ignored. Any other failure undoes the entity write, if this
//! save made it, and the save reports `false`.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::buffer::{BulkOperation, InsertBuffer, UpsertBuffer};
use crate::construct::{Entity, GeoPoint};
use crate::document::{
    ATTRIBUTES_COLLECTION, Document, ENTITIES_COLLECTION, ENTITY_ID_FIELD, Filter, GEOS_COLLECTION, ID_FIELD,
    LATITUDE_FIELD, LOCATION_FIELD, LONGITUDE_FIELD, REFERENCES_COLLECTION, TYPE_EXPR_FIELD, TYPE_FIELD,
    TYPES_COLLECTION, geo_json_point,
};
use crate::encoder::{AttributeDocument, AttributeEncoder};
use crate::error::Result;
use crate::identity;
use crate::persist::SqliteStore;
use crate::retrieve::EntityRetriever;
use crate::settings::Settings;
use crate::store::DocumentStore;

/// Entity ids per query when copying positions from the geos collection.
pub const GEO_UPDATE_BATCH: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SaveState {
    Start,
    SavedToEntitiesCollection,
}

pub struct PersistenceEngine {
    store: Arc<dyn DocumentStore>,
    encoder: AttributeEncoder,
    attributes: InsertBuffer,
    references: InsertBuffer,
    geos: UpsertBuffer,
    max_result_limit: usize,
}

impl PersistenceEngine {
    pub fn new(store: Arc<dyn DocumentStore>, settings: &Settings) -> Self {
        let threshold = settings.bulk_write_threshold;
        Self {
            attributes: InsertBuffer::new(Arc::clone(&store), ATTRIBUTES_COLLECTION, threshold),
            references: InsertBuffer::new(Arc::clone(&store), REFERENCES_COLLECTION, threshold),
            geos: UpsertBuffer::new(Arc::clone(&store), GEOS_COLLECTION, threshold),
            encoder: AttributeEncoder::new(),
            max_result_limit: settings.max_result_limit,
            store,
        }
    }

    /// Opens the SQLite store the settings point at.
    pub fn open(settings: &Settings) -> Result<Self> {
        let mode = settings.persistence_mode();
        info!(?mode, "opening persistence engine");
        let store: Arc<dyn DocumentStore> = Arc::new(SqliteStore::new(&mode)?);
        Ok(Self::new(store, settings))
    }

    pub fn retriever(&self) -> EntityRetriever {
        EntityRetriever::new(Arc::clone(&self.store), self.max_result_limit)
    }

    fn buffers(&self) -> [&dyn BulkOperation; 3] {
        [&self.attributes, &self.references, &self.geos]
    }

    /// Saves one entity, reporting failure as `false` after rolling back.
    pub fn save(&self, entity: &Entity) -> bool {
        let mut state = SaveState::Start;
        match self.write_entity(entity, &mut state) {
            Ok(()) => true,
            Err(e) => {
                error!(entity = %entity.id(), error = %e, "save failed");
                self.roll_back(entity, state);
                false
            }
        }
    }

    /// Saves each entity on its own and returns how many succeeded.
    pub fn save_all<'a>(&self, entities: impl IntoIterator<Item = &'a Entity>) -> usize {
        entities.into_iter().filter(|entity| self.save(entity)).count()
    }

    fn write_entity(&self, entity: &Entity, state: &mut SaveState) -> Result<()> {
        let type_signature = entity.type_signature();
        let type_hash = identity::type_hash(&type_signature);

        let mut type_document = Document::new();
        type_document.insert(ID_FIELD.to_owned(), Value::from(type_hash.as_str()));
        type_document.insert(TYPE_EXPR_FIELD.to_owned(), Value::from(type_signature));

        let mut entity_document = Document::new();
        entity_document.insert(ID_FIELD.to_owned(), Value::from(entity.id()));
        entity_document.insert(TYPE_FIELD.to_owned(), Value::from(type_hash));
        if let Some(position) = entity.position() {
            entity_document.insert(LOCATION_FIELD.to_owned(), geo_json_point(&position));
        }

        // type signatures are shared by many entities
        match self.store.insert_one(TYPES_COLLECTION, type_document) {
            Err(e) if e.is_duplicate_key() => debug!(entity = %entity.id(), "type already saved"),
            other => other?,
        }
        match self.store.insert_one(ENTITIES_COLLECTION, entity_document) {
            Ok(()) => *state = SaveState::SavedToEntitiesCollection,
            Err(e) if e.is_duplicate_key() => debug!(entity = %entity.id(), "entity already saved"),
            Err(e) => return Err(e),
        }

        // nothing is buffered unless every attribute encodes
        let documents = entity
            .attributes()
            .map(|(name, value)| self.encoder.encode(entity.id(), name, value))
            .collect::<Result<Vec<_>>>()?;
        for document in documents {
            match document {
                AttributeDocument::Default(d) => self.attributes.write(d)?,
                AttributeDocument::Reference(d) => self.references.write(d)?,
                AttributeDocument::Geo(d) => self.geos.update(Filter::eq(ENTITY_ID_FIELD, entity.id()), d)?,
            };
        }
        Ok(())
    }

    fn roll_back(&self, entity: &Entity, state: SaveState) {
        match state {
            SaveState::Start => (),
            SaveState::SavedToEntitiesCollection => {
                warn!(entity = %entity.id(), "rolling back write to the entities collection");
                let filter = Filter::eq(ID_FIELD, entity.id());
                if let Err(e) = self.store.delete_one(ENTITIES_COLLECTION, &filter) {
                    error!(entity = %entity.id(), error = %e, "rollback failed");
                }
            }
        }
    }

    /// Writes every buffer out. All buffers are flushed even if one fails.
    pub fn flush(&self) -> Result<()> {
        self.buffers()
            .into_iter()
            .map(|buffer| buffer.flush())
            .fold(Ok(()), |outcome, flushed| outcome.and(flushed))
    }

    /// Final flush of every buffer. The engine saves nothing afterwards.
    pub fn close(&self) -> Result<()> {
        self.buffers()
            .into_iter()
            .map(|buffer| buffer.close())
            .fold(Ok(()), |outcome, closed| outcome.and(closed))
    }

    pub fn set_buffer_write_threshold(&self, threshold: usize) {
        for buffer in self.buffers() {
            buffer.set_buffer_write_threshold(threshold);
        }
    }

    /// Documents waiting in the buffers.
    pub fn pending(&self) -> usize {
        self.buffers().iter().map(|buffer| buffer.pending()).sum()
    }

    /// Copies each entity's current position from its geo record onto the
    /// entity document, so that region searches find it. Entities without a
    /// complete position are left alone. Returns how many were updated.
    pub fn update_entities_with_geo_locations<S: AsRef<str>>(&self, ids: &[S]) -> Result<usize> {
        self.geos.flush()?;
        let mut updated = 0;
        for batch in ids.chunks(GEO_UPDATE_BATCH) {
            let batch: Vec<Value> = batch.iter().map(|id| Value::from(id.as_ref())).collect();
            let geos = self
                .store
                .find(GEOS_COLLECTION, &Filter::is_in(ENTITY_ID_FIELD, batch), None)?;
            for geo in geos {
                let coordinate = |field: &str| geo.get(field).and_then(Value::as_f64);
                let (Some(entity_id), Some(latitude), Some(longitude)) = (
                    geo.get(ENTITY_ID_FIELD).and_then(Value::as_str),
                    coordinate(LATITUDE_FIELD),
                    coordinate(LONGITUDE_FIELD),
                ) else {
                    debug!(?geo, "incomplete position");
                    continue;
                };
                let mut set = Document::new();
                set.insert(LATITUDE_FIELD.to_owned(), Value::from(latitude));
                set.insert(LONGITUDE_FIELD.to_owned(), Value::from(longitude));
                set.insert(
                    LOCATION_FIELD.to_owned(),
                    geo_json_point(&GeoPoint::new(longitude, latitude)),
                );
                if self
                    .store
                    .update_one(ENTITIES_COLLECTION, &Filter::eq(ID_FIELD, entity_id), set)?
                {
                    updated += 1;
                }
            }
        }
        debug!(requested = ids.len(), updated, "positions copied to entities");
        Ok(updated)
    }
}
