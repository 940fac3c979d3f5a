//! Documents, the persisted field contract and the query vocabulary.
//!
//! A [`Document`] is a JSON object. The field names below are shared by every
//! collection and by any external tool reading the collections directly, so
//! they must never change and never be reused as metadata names.

use serde_json::{Map, Value, json};

// used to compare native values in range filters
use std::cmp::Ordering;

use crate::construct::GeoPoint;
use crate::geo::Polygon;

pub type Document = Map<String, Value>;

// ------------- Field names -------------
pub const ID_FIELD: &str = "_id";
pub const ENTITY_ID_FIELD: &str = "entity_id";
pub const ATTRIBUTE_NAME_FIELD: &str = "attribute_name";
pub const VALUE_FIELD: &str = "value";
pub const TYPE_FIELD: &str = "type";
pub const TS_FIELD: &str = "ts";
pub const TYPE_EXPR_FIELD: &str = "type_expr";
pub const LATITUDE_FIELD: &str = "latitude";
pub const LONGITUDE_FIELD: &str = "longitude";
pub const LOCATION_FIELD: &str = "loc";
pub const REFERENCE_FIELD: &str = "ref";
pub const TEXT_FIELD: &str = "text";
pub const LONG_STRING_FIELD: &str = "orig_value";

pub const RESERVED_FIELDS: [&str; 13] = [
    ATTRIBUTE_NAME_FIELD,
    ENTITY_ID_FIELD,
    ID_FIELD,
    LATITUDE_FIELD,
    LOCATION_FIELD,
    LONG_STRING_FIELD,
    LONGITUDE_FIELD,
    REFERENCE_FIELD,
    TEXT_FIELD,
    TS_FIELD,
    TYPE_EXPR_FIELD,
    TYPE_FIELD,
    VALUE_FIELD,
];

// ------------- Collection names -------------
pub const TYPES_COLLECTION: &str = "types";
pub const ENTITIES_COLLECTION: &str = "entities";
pub const ATTRIBUTES_COLLECTION: &str = "attributes";
pub const REFERENCES_COLLECTION: &str = "references";
pub const GEOS_COLLECTION: &str = "geos";
pub const ATTRIBUTE_IDS_COLLECTION: &str = "attribute_ids";
pub const LOCKS_COLLECTION: &str = "locks";

/// The key a document is stored under, derived from its identity field.
pub fn identity_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// GeoJSON point, longitude first.
pub fn geo_json_point(point: &GeoPoint) -> Value {
    json!({ "type": "Point", "coordinates": [point.longitude(), point.latitude()] })
}

/// Reads a GeoJSON point back, `None` for anything that is not one.
pub fn parse_geo_json_point(value: &Value) -> Option<GeoPoint> {
    let object = value.as_object()?;
    if object.get("type")?.as_str()? != "Point" {
        return None;
    }
    let coordinates = object.get("coordinates")?.as_array()?;
    match coordinates.as_slice() {
        [longitude, latitude] => Some(GeoPoint::new(longitude.as_f64()?, latitude.as_f64()?)),
        _ => None,
    }
}

// ------------- Filter -------------
/// Conditions on top-level document fields.
#[derive(Clone, Debug, PartialEq)]
pub enum Filter {
    All,
    Eq(String, Value),
    In(String, Vec<Value>),
    Gte(String, Value),
    Lt(String, Value),
    GeoWithin(String, Polygon),
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

impl Filter {
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Filter::Eq(field.to_owned(), value.into())
    }
    pub fn is_in(field: &str, values: Vec<Value>) -> Self {
        Filter::In(field.to_owned(), values)
    }
    pub fn gte(field: &str, value: impl Into<Value>) -> Self {
        Filter::Gte(field.to_owned(), value.into())
    }
    pub fn lt(field: &str, value: impl Into<Value>) -> Self {
        Filter::Lt(field.to_owned(), value.into())
    }
    pub fn matches(&self, document: &Document) -> bool {
        match self {
            Filter::All => true,
            Filter::Eq(field, expected) => match document.get(field) {
                Some(actual) => values_equal(actual, expected),
                None => expected.is_null(),
            },
            Filter::In(field, candidates) => document
                .get(field)
                .is_some_and(|actual| candidates.iter().any(|c| values_equal(actual, c))),
            Filter::Gte(field, bound) => document
                .get(field)
                .and_then(|actual| compare(actual, bound))
                .is_some_and(|o| o != Ordering::Less),
            Filter::Lt(field, bound) => document
                .get(field)
                .and_then(|actual| compare(actual, bound))
                .is_some_and(|o| o == Ordering::Less),
            Filter::GeoWithin(field, polygon) => document
                .get(field)
                .and_then(parse_geo_json_point)
                .is_some_and(|point| polygon.contains(&point)),
            Filter::And(filters) => filters.iter().all(|f| f.matches(document)),
            Filter::Or(filters) => filters.iter().any(|f| f.matches(document)),
        }
    }
    /// The field values an upsert must seed a freshly inserted document with.
    pub fn equalities(&self) -> Document {
        let mut seeded = Document::new();
        self.collect_equalities(&mut seeded);
        seeded
    }
    fn collect_equalities(&self, seeded: &mut Document) {
        match self {
            Filter::Eq(field, value) => {
                seeded.insert(field.clone(), value.clone());
            }
            Filter::And(filters) => filters.iter().for_each(|f| f.collect_equalities(seeded)),
            _ => (),
        }
    }
    /// The identity this filter pins down, if it pins one down.
    pub fn identity(&self) -> Option<&Value> {
        match self {
            Filter::Eq(field, value) if field == ID_FIELD => Some(value),
            Filter::And(filters) => filters.iter().find_map(Filter::identity),
            _ => None,
        }
    }
}

fn values_equal(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => actual == expected,
    }
}

fn compare(actual: &Value, bound: &Value) -> Option<Ordering> {
    match (actual, bound) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

// ------------- Aggregation -------------
/// One stage of an aggregation pipeline.
#[derive(Clone, Debug, PartialEq)]
pub enum Stage {
    Match(Filter),
    /// Store-side join: every document in `from` whose `foreign_field` equals
    /// this document's `local_field` is gathered into the array `as_field`.
    Lookup {
        from: String,
        local_field: String,
        foreign_field: String,
        as_field: String,
    },
    Limit(usize),
}

impl Stage {
    pub fn lookup(from: &str, local_field: &str, foreign_field: &str, as_field: &str) -> Self {
        Stage::Lookup {
            from: from.to_owned(),
            local_field: local_field.to_owned(),
            foreign_field: foreign_field.to_owned(),
            as_field: as_field.to_owned(),
        }
    }
}

// ------------- Upsert -------------
/// Insert-if-absent, else merge `set` into the first document matching `filter`.
#[derive(Clone, Debug, PartialEq)]
pub struct UpsertModel {
    pub filter: Filter,
    pub set: Document,
}

impl UpsertModel {
    pub fn new(filter: Filter, set: Document) -> Self {
        Self { filter, set }
    }
}
