//! Turning attribute values into documents and back.
//!
//! Each attribute value becomes one document tagged with the variant that
//! decides where it is written:
//! * `Reference` values go to the references collection and are read back
//!   through [`EntityRetriever::references`](crate::retrieve::EntityRetriever::references).
//! * `Geo` values carry one coordinate component and are upserted into the
//!   entity's single geo record, so their identity is the entity id.
//! * Everything else is a `Default` document in the attributes collection.
//!
//! Indexed fields never hold a value of [`MAX_INDEXABLE_LENGTH`] characters
//! or more. Such values are replaced by [`ELIDED_PLACEHOLDER`] and kept whole
//! in the long string field (or in the free-text field for spaced strings).

use std::collections::HashSet;

use lazy_static::lazy_static;
use serde_json::Value;

use crate::construct::{AttributeValue, EntityType, MetadataItem, OtherHasher};
use crate::datatype::{AttributeType, to_text};
use crate::document::{
    ATTRIBUTE_NAME_FIELD, Document, ENTITY_ID_FIELD, ID_FIELD, LATITUDE_FIELD, LONG_STRING_FIELD,
    LONGITUDE_FIELD, RESERVED_FIELDS, TEXT_FIELD, TS_FIELD, TYPE_FIELD, VALUE_FIELD,
};
use crate::error::{EavError, Result};
use crate::identity;

pub const MAX_INDEXABLE_LENGTH: usize = 256;
pub const ELIDED_PLACEHOLDER: &str = "...";

lazy_static! {
    static ref RESERVED: HashSet<&'static str, OtherHasher> = RESERVED_FIELDS.iter().copied().collect();
}

pub fn is_reserved(field: &str) -> bool {
    RESERVED.contains(field)
}

fn is_long(value: &str) -> bool {
    value.chars().count() >= MAX_INDEXABLE_LENGTH
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttributeDocument {
    Default(Document),
    Reference(Document),
    Geo(Document),
}

impl AttributeDocument {
    pub fn document(&self) -> &Document {
        match self {
            AttributeDocument::Default(d) | AttributeDocument::Reference(d) | AttributeDocument::Geo(d) => d,
        }
    }
    pub fn into_document(self) -> Document {
        match self {
            AttributeDocument::Default(d) | AttributeDocument::Reference(d) | AttributeDocument::Geo(d) => d,
        }
    }
    pub fn identity(&self) -> Option<&str> {
        self.document().get(ID_FIELD).and_then(Value::as_str)
    }
    /// Whether the indexed value was replaced by the placeholder.
    pub fn is_elided(&self) -> bool {
        self.document().get(VALUE_FIELD).and_then(Value::as_str) == Some(ELIDED_PLACEHOLDER)
    }
}

/// The outcome of decoding one attribute document.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Accepted { name: String, value: AttributeValue },
    /// The entity type declares the attribute with a different type.
    Rejected {
        name: String,
        declared: AttributeType,
        found: AttributeType,
    },
}

// Strings that are too long to index are elided and kept in the long string field.
fn put_indexable(document: &mut Document, field: &str, value: Value) {
    match value {
        Value::String(s) if is_long(&s) => {
            document.insert(field.to_owned(), Value::String(ELIDED_PLACEHOLDER.to_owned()));
            document.insert(LONG_STRING_FIELD.to_owned(), Value::String(s));
        }
        other => {
            document.insert(field.to_owned(), other);
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AttributeEncoder;

impl AttributeEncoder {
    pub fn new() -> Self {
        Self
    }

    pub fn encode(&self, entity_id: &str, name: &str, attribute: &AttributeValue) -> Result<AttributeDocument> {
        let value = attribute.value();
        let attribute_type = attribute.attribute_type();
        let mut document = Document::new();
        let mut identity = identity::attribute_id(value, name, entity_id.as_bytes());
        let tag: fn(Document) -> AttributeDocument = match attribute_type {
            AttributeType::Reference => {
                put_indexable(&mut document, VALUE_FIELD, Value::String(value.to_owned()));
                AttributeDocument::Reference
            }
            AttributeType::String if value.contains(' ') => {
                // the free-text field keeps the whole value, only the indexed one is elided
                document.insert(TEXT_FIELD.to_owned(), Value::String(value.to_owned()));
                let indexed = if is_long(value) { ELIDED_PLACEHOLDER } else { value };
                document.insert(VALUE_FIELD.to_owned(), Value::String(indexed.to_owned()));
                AttributeDocument::Default
            }
            geo if geo.is_geo() => {
                let field = if geo == AttributeType::Latitude {
                    LATITUDE_FIELD
                } else {
                    LONGITUDE_FIELD
                };
                put_indexable(&mut document, field, attribute_type.convert(value)?);
                // one current position per entity
                identity = entity_id.to_owned();
                AttributeDocument::Geo
            }
            _ => {
                put_indexable(&mut document, VALUE_FIELD, attribute_type.convert(value)?);
                AttributeDocument::Default
            }
        };
        for metadata in attribute.metadata() {
            if is_reserved(metadata.name()) {
                return Err(EavError::ReservedField {
                    field: metadata.name().to_owned(),
                    entity: entity_id.to_owned(),
                });
            }
            document.insert(metadata.name().to_owned(), Value::String(metadata.value().to_owned()));
        }
        document.insert(ID_FIELD.to_owned(), Value::String(identity));
        document.insert(ATTRIBUTE_NAME_FIELD.to_owned(), Value::String(name.to_owned()));
        document.insert(TYPE_FIELD.to_owned(), Value::String(attribute_type.name().to_owned()));
        document.insert(ENTITY_ID_FIELD.to_owned(), Value::String(entity_id.to_owned()));
        document.insert(TS_FIELD.to_owned(), Value::from(attribute.timestamp()));
        Ok(tag(document))
    }

    /// Recovers an attribute from its document.
    ///
    /// With an entity type, an attribute it declares must carry the declared
    /// type or it is rejected. Undeclared attributes are always accepted.
    pub fn decode(&self, document: &Document, entity_type: Option<&EntityType>) -> Result<Decoded> {
        let name = document
            .get(ATTRIBUTE_NAME_FIELD)
            .and_then(Value::as_str)
            .ok_or_else(|| EavError::Codec(format!("attribute document without {}", ATTRIBUTE_NAME_FIELD)))?
            .to_owned();
        let found: AttributeType = document
            .get(TYPE_FIELD)
            .and_then(Value::as_str)
            .ok_or_else(|| EavError::Codec(format!("attribute '{}' without {}", name, TYPE_FIELD)))?
            .parse()?;
        if let Some(declared) = entity_type.and_then(|t| t.attribute_type(&name)) {
            if declared != found {
                return Ok(Decoded::Rejected { name, declared, found });
            }
        }
        let value = raw_value(document, found);
        // metadata is every field outside the reserved set
        let metadata = document
            .iter()
            .filter(|(field, value)| !is_reserved(field) && !value.is_null())
            .map(|(field, value)| MetadataItem::new(field.clone(), to_text(value)))
            .collect();
        let timestamp = document.get(TS_FIELD).and_then(Value::as_i64).unwrap_or_default();
        Ok(Decoded::Accepted {
            name,
            value: AttributeValue::new(value, found, metadata, timestamp),
        })
    }
}

fn raw_value(document: &Document, attribute_type: AttributeType) -> String {
    let text = |field: &str| document.get(field).map(to_text);
    match attribute_type {
        AttributeType::Latitude => text(LATITUDE_FIELD).unwrap_or_default(),
        AttributeType::Longitude => text(LONGITUDE_FIELD).unwrap_or_default(),
        _ => {
            if let Some(full) = text(TEXT_FIELD) {
                return full;
            }
            match text(VALUE_FIELD) {
                Some(indexed) if indexed == ELIDED_PLACEHOLDER => {
                    text(LONG_STRING_FIELD).unwrap_or(indexed)
                }
                Some(indexed) => indexed,
                None => String::new(),
            }
        }
    }
}
