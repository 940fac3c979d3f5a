//! Reading entities back.
//!
//! Every search is an aggregation that joins the matched documents with the
//! entity documents and the full attribute set of each entity, which is then
//! decoded into [`Entity`] values in the order the store returned them.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::construct::{AttributeExpression, Entity, EntityType, GeoPoint, OtherHasher};
use crate::datatype::{AttributeType, to_text};
use crate::document::{
    ATTRIBUTE_NAME_FIELD, ATTRIBUTES_COLLECTION, Document, ENTITIES_COLLECTION, ENTITY_ID_FIELD, Filter,
    ID_FIELD, LATITUDE_FIELD, LOCATION_FIELD, LONG_STRING_FIELD, LONGITUDE_FIELD, REFERENCES_COLLECTION,
    Stage, TS_FIELD, VALUE_FIELD, parse_geo_json_point,
};
use crate::encoder::{AttributeEncoder, Decoded, ELIDED_PLACEHOLDER};
use crate::error::Result;
use crate::geo::Polygon;
use crate::store::DocumentStore;

/// Largest number of documents a search matches.
pub const MAX_LIMIT: usize = 10 * 1024;

// fields the joins gather into
const JOINED_ENTITIES: &str = "entities";
const JOINED_ATTRIBUTES: &str = "attributes";

#[derive(Clone)]
pub struct EntityRetriever {
    store: Arc<dyn DocumentStore>,
    encoder: AttributeEncoder,
    max_limit: usize,
}

impl EntityRetriever {
    pub fn new(store: Arc<dyn DocumentStore>, max_limit: usize) -> Self {
        Self {
            store,
            encoder: AttributeEncoder::new(),
            max_limit: max_limit.max(1),
        }
    }

    pub fn max_limit(&self) -> usize {
        self.max_limit
    }

    /// Non-positive limits mean the maximum, larger ones are clamped to it.
    pub fn determine_limit(&self, requested: i64) -> usize {
        if requested <= 0 {
            debug!(requested, max = self.max_limit, "using the maximum limit");
            return self.max_limit;
        }
        let requested = requested as u64;
        if requested > self.max_limit as u64 {
            warn!(requested, max = self.max_limit, "limit clamped to the maximum");
            return self.max_limit;
        }
        requested as usize
    }

    pub fn get_by_id(&self, id: &str) -> Result<Option<Entity>> {
        let pipeline = [
            Stage::Match(Filter::eq(ID_FIELD, id)),
            Stage::lookup(ATTRIBUTES_COLLECTION, ID_FIELD, ENTITY_ID_FIELD, JOINED_ATTRIBUTES),
        ];
        let joined = self.store.aggregate(ENTITIES_COLLECTION, &pipeline)?;
        let mut reconstruction = Reconstruction::new(&self.encoder, None);
        for entity_document in &joined {
            reconstruction.add_entity_rooted(entity_document)?;
        }
        Ok(reconstruction.into_entities().into_iter().next())
    }

    /// Entities in the order of `ids`, skipping ids that were never saved.
    pub fn get_by_ids<S: AsRef<str>>(&self, ids: &[S]) -> Result<Vec<Entity>> {
        let mut entities = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(entity) = self.get_by_id(id.as_ref())? {
                entities.push(entity);
            }
        }
        Ok(entities)
    }

    /// Entities with an attribute `name` whose value is `value`, either as
    /// text or as the number or boolean the text denotes.
    pub fn get_by_attribute_value(&self, name: &str, value: &str, limit: i64) -> Result<Vec<Entity>> {
        let mut candidates = vec![Value::from(value)];
        for native in [AttributeType::Number, AttributeType::Boolean] {
            if let Ok(converted) = native.convert(value) {
                candidates.push(converted);
            }
        }
        let filter = Filter::And(vec![
            Filter::eq(ATTRIBUTE_NAME_FIELD, name),
            Filter::is_in(VALUE_FIELD, candidates),
        ]);
        self.search_attributes(filter, None, self.determine_limit(limit))
    }

    /// Entities subsumed by `entity_type`: every declared attribute is
    /// present with its declared type. Undeclared attributes do not matter.
    pub fn get_by_type(&self, entity_type: &EntityType, limit: i64) -> Result<Vec<Entity>> {
        let fresh = Filter::gte(TS_FIELD, entity_type.age());
        let filter = if entity_type.is_empty() {
            fresh
        } else {
            let names = entity_type.attribute_names().map(Value::from).collect();
            Filter::And(vec![Filter::is_in(ATTRIBUTE_NAME_FIELD, names), fresh])
        };
        self.search_attributes(filter, Some(entity_type), self.determine_limit(limit))
    }

    /// Entities positioned inside the polygon spanned by `points`.
    pub fn get_by_region(&self, points: &[GeoPoint], limit: i64) -> Result<Vec<Entity>> {
        let Some(polygon) = Polygon::closed(points) else {
            info!(points = points.len(), "not enough points to form a polygon");
            return Ok(Vec::new());
        };
        let pipeline = [
            Stage::Match(Filter::GeoWithin(LOCATION_FIELD.to_owned(), polygon)),
            Stage::Limit(self.determine_limit(limit)),
            Stage::lookup(ATTRIBUTES_COLLECTION, ID_FIELD, ENTITY_ID_FIELD, JOINED_ATTRIBUTES),
        ];
        let joined = self.store.aggregate(ENTITIES_COLLECTION, &pipeline)?;
        let mut reconstruction = Reconstruction::new(&self.encoder, None);
        for entity_document in &joined {
            reconstruction.add_entity_rooted(entity_document)?;
        }
        Ok(reconstruction.into_entities())
    }

    pub fn get_by_expression(&self, expression: &AttributeExpression) -> Result<Vec<Entity>> {
        match expression {
            AttributeExpression::Within { points, limit } => self.get_by_region(points, *limit),
            AttributeExpression::From { entity_type, limit } => self.get_by_type(entity_type, *limit),
        }
    }

    /// The reference attributes of `entity`, fetched on first use and then
    /// kept on the entity.
    pub fn references<'e>(&self, entity: &'e Entity) -> Result<&'e HashMap<String, String>> {
        let cached = entity.cached_references();
        if let Some(references) = cached.get() {
            return Ok(references);
        }
        let references = self.retrieve_references(entity.id())?;
        Ok(cached.get_or_init(|| references))
    }

    /// Reference name to referenced value for one entity, read from the store.
    pub fn retrieve_references(&self, entity_id: &str) -> Result<HashMap<String, String>> {
        let documents = self.store.find(
            REFERENCES_COLLECTION,
            &Filter::eq(ENTITY_ID_FIELD, entity_id),
            None,
        )?;
        let mut references = HashMap::new();
        for document in documents {
            let Some(name) = document.get(ATTRIBUTE_NAME_FIELD).and_then(Value::as_str) else {
                continue;
            };
            let value = match document.get(VALUE_FIELD).map(to_text) {
                Some(value) if value == ELIDED_PLACEHOLDER => {
                    document.get(LONG_STRING_FIELD).map(to_text).unwrap_or(value)
                }
                Some(value) => value,
                None => continue,
            };
            references.insert(name.to_owned(), value);
        }
        Ok(references)
    }

    fn search_attributes(
        &self,
        filter: Filter,
        entity_type: Option<&EntityType>,
        limit: usize,
    ) -> Result<Vec<Entity>> {
        let pipeline = [
            Stage::Match(filter),
            Stage::Limit(limit),
            Stage::lookup(ENTITIES_COLLECTION, ENTITY_ID_FIELD, ID_FIELD, JOINED_ENTITIES),
            Stage::lookup(ATTRIBUTES_COLLECTION, ENTITY_ID_FIELD, ENTITY_ID_FIELD, JOINED_ATTRIBUTES),
        ];
        let joined = self.store.aggregate(ATTRIBUTES_COLLECTION, &pipeline)?;
        let mut reconstruction = Reconstruction::new(&self.encoder, entity_type);
        for attribute_document in &joined {
            reconstruction.add_attribute_rooted(attribute_document)?;
        }
        Ok(reconstruction.into_entities())
    }
}

fn joined<'d>(document: &'d Document, field: &str) -> &'d [Value] {
    document
        .get(field)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn position(entity_document: &Document) -> Option<GeoPoint> {
    if let Some(point) = entity_document.get(LOCATION_FIELD).and_then(parse_geo_json_point) {
        return Some(point);
    }
    let longitude = entity_document.get(LONGITUDE_FIELD)?.as_f64()?;
    let latitude = entity_document.get(LATITUDE_FIELD)?.as_f64()?;
    Some(GeoPoint::new(longitude, latitude))
}

// Builds each entity once, from the first joined row that mentions it.
struct Reconstruction<'a> {
    encoder: &'a AttributeEncoder,
    entity_type: Option<&'a EntityType>,
    seen: HashSet<String, OtherHasher>,
    entities: Vec<Entity>,
}

impl<'a> Reconstruction<'a> {
    fn new(encoder: &'a AttributeEncoder, entity_type: Option<&'a EntityType>) -> Self {
        Self {
            encoder,
            entity_type,
            seen: HashSet::default(),
            entities: Vec::new(),
        }
    }

    fn add_entity_rooted(&mut self, entity_document: &Document) -> Result<()> {
        let Some(id) = entity_document.get(ID_FIELD).and_then(Value::as_str) else {
            return Ok(());
        };
        self.add(id, entity_document, joined(entity_document, JOINED_ATTRIBUTES))
    }

    fn add_attribute_rooted(&mut self, attribute_document: &Document) -> Result<()> {
        let Some(id) = attribute_document.get(ENTITY_ID_FIELD).and_then(Value::as_str) else {
            return Ok(());
        };
        // attributes whose entity was rolled back have nothing to join
        let Some(entity_document) = joined(attribute_document, JOINED_ENTITIES)
            .first()
            .and_then(Value::as_object)
        else {
            debug!(entity = id, "attribute without entity");
            return Ok(());
        };
        self.add(id, entity_document, joined(attribute_document, JOINED_ATTRIBUTES))
    }

    fn add(&mut self, id: &str, entity_document: &Document, attributes: &[Value]) -> Result<()> {
        if !self.seen.insert(id.to_owned()) {
            return Ok(());
        }
        let mut entity = Entity::new(id);
        if let Some(point) = position(entity_document) {
            entity.set_position(point.longitude(), point.latitude());
        }
        let mut matched: HashSet<String, OtherHasher> = HashSet::default();
        for attribute in attributes.iter().filter_map(Value::as_object) {
            match self.encoder.decode(attribute, self.entity_type)? {
                Decoded::Accepted { name, value } => {
                    if self
                        .entity_type
                        .is_some_and(|t| t.contains(&name, value.attribute_type()))
                    {
                        matched.insert(name.clone());
                    }
                    entity.add_attribute_value(name, value);
                }
                Decoded::Rejected { name, declared, found } => {
                    debug!(entity = id, attribute = %name, %declared, %found, "attribute rejected by type");
                }
            }
        }
        if let Some(entity_type) = self.entity_type {
            if matched.len() < entity_type.len() {
                debug!(entity = id, matched = matched.len(), declared = entity_type.len(), "not subsumed by type");
                return Ok(());
            }
        }
        self.entities.push(entity);
        Ok(())
    }

    fn into_entities(self) -> Vec<Entity> {
        self.entities
    }
}
