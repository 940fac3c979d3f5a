use std::sync::OnceLock;

// other keepers use HashSet or HashMap with a fast hasher
use core::hash::BuildHasherDefault;
use seahash::SeaHasher;

// attributes are kept sorted by name so that type signatures are stable
use std::collections::{BTreeMap, BTreeSet, HashMap};

// used for attribute creation timestamps
use chrono::Utc;
use serde::{Deserialize, Serialize};

// used to print out readable forms of a construct
use std::fmt;

use crate::datatype::AttributeType;

/// Milliseconds since the epoch, the resolution of every persisted timestamp.
pub type Timestamp = i64;

pub type OtherHasher = BuildHasherDefault<SeaHasher>;

pub fn now() -> Timestamp {
    Utc::now().timestamp_millis()
}

// ------------- GeoPoint -------------
#[derive(PartialEq, Clone, Copy, Debug, Serialize, Deserialize)]
pub struct GeoPoint {
    longitude: f64,
    latitude: f64,
}
impl GeoPoint {
    pub fn new(longitude: f64, latitude: f64) -> Self {
        Self {
            longitude,
            latitude,
        }
    }
    pub fn longitude(&self) -> f64 {
        self.longitude
    }
    pub fn latitude(&self) -> f64 {
        self.latitude
    }
}
impl fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "({}, {})", self.longitude, self.latitude)
    }
}

// ------------- MetadataItem -------------
#[derive(PartialEq, Eq, Hash, Clone, Debug, Serialize, Deserialize)]
pub struct MetadataItem {
    name: String,
    value: String,
}
impl MetadataItem {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn value(&self) -> &str {
        &self.value
    }
}

// ------------- AttributeValue -------------
#[derive(PartialEq, Eq, Clone, Debug, Serialize, Deserialize)]
pub struct AttributeValue {
    value: String,
    #[serde(rename = "type")]
    attribute_type: AttributeType,
    #[serde(default)]
    metadata: Vec<MetadataItem>,
    #[serde(default = "now")]
    timestamp: Timestamp,
}
impl AttributeValue {
    pub fn new(
        value: impl Into<String>,
        attribute_type: AttributeType,
        metadata: Vec<MetadataItem>,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            value: value.into(),
            attribute_type,
            metadata,
            timestamp,
        }
    }
    pub fn value(&self) -> &str {
        &self.value
    }
    pub fn attribute_type(&self) -> AttributeType {
        self.attribute_type
    }
    pub fn metadata(&self) -> &[MetadataItem] {
        &self.metadata
    }
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }
}

// ------------- Entity -------------
/// An entity with an open-ended multiset of attributes.
///
/// The same attribute name may carry several values. The structural type of
/// an entity is not stored on it, it is derived from the attribute
/// declarations by [`Entity::type_signature`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Entity {
    id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    position: Option<GeoPoint>,
    #[serde(default)]
    attributes: BTreeMap<String, Vec<AttributeValue>>,
    // filled on first access by the retriever, never persisted
    #[serde(skip)]
    references: OnceLock<HashMap<String, String>>,
}
impl Entity {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            position: None,
            attributes: BTreeMap::new(),
            references: OnceLock::new(),
        }
    }
    pub fn id(&self) -> &str {
        &self.id
    }
    pub fn position(&self) -> Option<GeoPoint> {
        self.position
    }
    pub fn set_position(&mut self, longitude: f64, latitude: f64) {
        self.position = Some(GeoPoint::new(longitude, latitude));
    }
    pub fn with_position(mut self, longitude: f64, latitude: f64) -> Self {
        self.set_position(longitude, latitude);
        self
    }
    pub fn add_attribute(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
        attribute_type: AttributeType,
        metadata: Vec<MetadataItem>,
    ) {
        self.add_attribute_value(name, AttributeValue::new(value, attribute_type, metadata, now()));
    }
    pub fn with_attribute(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
        attribute_type: AttributeType,
    ) -> Self {
        self.add_attribute(name, value, attribute_type, Vec::new());
        self
    }
    pub fn add_attribute_value(&mut self, name: impl Into<String>, value: AttributeValue) {
        self.attributes.entry(name.into()).or_default().push(value);
    }
    /// The first value of the named attribute.
    pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name).and_then(|values| values.first())
    }
    pub fn values(&self, name: &str) -> &[AttributeValue] {
        self.attributes.get(name).map(Vec::as_slice).unwrap_or(&[])
    }
    pub fn attributes(&self) -> impl Iterator<Item = (&str, &AttributeValue)> {
        self.attributes
            .iter()
            .flat_map(|(name, values)| values.iter().map(move |v| (name.as_str(), v)))
    }
    pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
        self.attributes.keys().map(String::as_str)
    }
    /// Number of distinct attribute names.
    pub fn len(&self) -> usize {
        self.attributes.len()
    }
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }
    /// The sorted, duplicate-free `name:TYPE` declarations of this entity.
    pub fn type_signature(&self) -> String {
        let declarations: BTreeSet<String> = self
            .attributes()
            .map(|(name, value)| format!("{}:{}", name, value.attribute_type()))
            .collect();
        let declarations: Vec<String> = declarations.into_iter().collect();
        format!("{{{}}}", declarations.join(","))
    }
    pub(crate) fn cached_references(&self) -> &OnceLock<HashMap<String, String>> {
        &self.references
    }
}
impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.position == other.position && self.attributes == other.attributes
    }
}
impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {}", self.id, self.type_signature())
    }
}

// ------------- EntityType -------------
/// Attribute declarations plus an age threshold, used to filter reads.
#[derive(PartialEq, Eq, Clone, Debug, Default)]
pub struct EntityType {
    declarations: BTreeMap<String, AttributeType>,
    age: Timestamp,
}
impl EntityType {
    pub fn new<I, S>(declarations: I, age: Timestamp) -> Self
    where
        I: IntoIterator<Item = (S, AttributeType)>,
        S: Into<String>,
    {
        Self {
            declarations: declarations.into_iter().map(|(n, t)| (n.into(), t)).collect(),
            age,
        }
    }
    /// The declared type of an attribute, `None` when the name is undeclared.
    pub fn attribute_type(&self, name: &str) -> Option<AttributeType> {
        self.declarations.get(name).copied()
    }
    pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
        self.declarations.keys().map(String::as_str)
    }
    pub fn contains(&self, name: &str, attribute_type: AttributeType) -> bool {
        self.attribute_type(name) == Some(attribute_type)
    }
    pub fn len(&self) -> usize {
        self.declarations.len()
    }
    pub fn is_empty(&self) -> bool {
        self.declarations.is_empty()
    }
    pub fn age(&self) -> Timestamp {
        self.age
    }
}

// ------------- AttributeExpression -------------
/// The query shapes the retriever understands beyond lookups by id or value.
#[derive(Clone, Debug)]
pub enum AttributeExpression {
    /// Entities positioned within the polygon spanned by the points.
    Within { points: Vec<GeoPoint>, limit: i64 },
    /// Entities subsumed by the entity type.
    From { entity_type: EntityType, limit: i64 },
}
