use eavstore::construct::{AttributeValue, EntityType, MetadataItem};
use eavstore::datatype::AttributeType;
use eavstore::document::{LATITUDE_FIELD, LONG_STRING_FIELD, TEXT_FIELD, VALUE_FIELD};
use eavstore::encoder::{AttributeDocument, AttributeEncoder, Decoded, ELIDED_PLACEHOLDER, MAX_INDEXABLE_LENGTH};
use eavstore::error::EavError;
use eavstore::identity;
use serde_json::{Value, json};

fn value(text: &str, attribute_type: AttributeType) -> AttributeValue {
    AttributeValue::new(text, attribute_type, Vec::new(), 1_700_000_000_000)
}

fn accepted(decoded: Decoded) -> (String, AttributeValue) {
    match decoded {
        Decoded::Accepted { name, value } => (name, value),
        other => panic!("expected an accepted attribute, got {:?}", other),
    }
}

#[test]
fn numbers_are_stored_natively_and_routed_to_attributes() {
    let encoder = AttributeEncoder::new();
    let encoded = encoder
        .encode("e1", "age", &value("42", AttributeType::Number))
        .expect("encode");
    assert!(matches!(encoded, AttributeDocument::Default(_)));
    let document = encoded.document();
    assert_eq!(document.get(VALUE_FIELD), Some(&json!(42)));
    assert_eq!(document.get("entity_id"), Some(&json!("e1")));
    assert_eq!(document.get("type"), Some(&json!("NUMBER")));
    assert_eq!(
        encoded.identity(),
        Some(identity::attribute_id("42", "age", b"e1").as_str())
    );
}

#[test]
fn references_are_routed_to_references() {
    let encoder = AttributeEncoder::new();
    let encoded = encoder
        .encode("e1", "spouse", &value("e2", AttributeType::Reference))
        .expect("encode");
    assert!(matches!(encoded, AttributeDocument::Reference(_)));
    assert_eq!(encoded.document().get(VALUE_FIELD), Some(&json!("e2")));
}

#[test]
fn coordinates_upsert_under_the_entity_id() {
    let encoder = AttributeEncoder::new();
    let first = encoder
        .encode("e1", "lat", &value("59.33", AttributeType::Latitude))
        .expect("encode");
    let second = encoder
        .encode("e1", "lat", &value("57.70", AttributeType::Latitude))
        .expect("encode");
    assert!(matches!(first, AttributeDocument::Geo(_)));
    assert_eq!(first.identity(), Some("e1"));
    assert_eq!(second.identity(), Some("e1"));
    assert_eq!(first.document().get(LATITUDE_FIELD), Some(&json!(59.33)));
    assert!(first.document().get(VALUE_FIELD).is_none());
}

#[test]
fn out_of_range_coordinates_do_not_encode() {
    let encoder = AttributeEncoder::new();
    let result = encoder.encode("e1", "lat", &value("91", AttributeType::Latitude));
    assert!(matches!(result, Err(EavError::Conversion { .. })));
}

#[test]
fn values_at_the_threshold_are_elided() {
    let encoder = AttributeEncoder::new();
    let long = "x".repeat(MAX_INDEXABLE_LENGTH);
    let encoded = encoder
        .encode("e1", "code", &value(&long, AttributeType::String))
        .expect("encode");
    assert!(encoded.is_elided());
    assert_eq!(encoded.document().get(LONG_STRING_FIELD), Some(&json!(long)));

    let (_, decoded) = accepted(encoder.decode(encoded.document(), None).expect("decode"));
    assert_eq!(decoded.value(), long);
}

#[test]
fn values_below_the_threshold_are_verbatim() {
    let encoder = AttributeEncoder::new();
    let short = "x".repeat(MAX_INDEXABLE_LENGTH - 1);
    let encoded = encoder
        .encode("e1", "code", &value(&short, AttributeType::String))
        .expect("encode");
    assert!(!encoded.is_elided());
    assert_eq!(encoded.document().get(VALUE_FIELD), Some(&json!(short)));
    assert!(encoded.document().get(LONG_STRING_FIELD).is_none());
}

#[test]
fn spaced_strings_keep_the_full_text() {
    let encoder = AttributeEncoder::new();
    let sentence = "word ".repeat(60);
    let encoded = encoder
        .encode("e1", "bio", &value(&sentence, AttributeType::String))
        .expect("encode");
    let document = encoded.document();
    assert_eq!(document.get(TEXT_FIELD), Some(&json!(sentence)));
    assert_eq!(document.get(VALUE_FIELD), Some(&json!(ELIDED_PLACEHOLDER)));

    let (name, decoded) = accepted(encoder.decode(document, None).expect("decode"));
    assert_eq!(name, "bio");
    assert_eq!(decoded.value(), sentence);
}

#[test]
fn long_references_are_elided() {
    let encoder = AttributeEncoder::new();
    let target = "r".repeat(300);
    let encoded = encoder
        .encode("e1", "source", &value(&target, AttributeType::Reference))
        .expect("encode");
    assert!(encoded.is_elided());
    assert_eq!(encoded.document().get(LONG_STRING_FIELD), Some(&json!(target)));
}

#[test]
fn metadata_travels_as_extra_fields() {
    let encoder = AttributeEncoder::new();
    let attribute = AttributeValue::new(
        "true",
        AttributeType::Boolean,
        vec![MetadataItem::new("source", "census")],
        5,
    );
    let encoded = encoder.encode("e1", "alive", &attribute).expect("encode");
    assert_eq!(encoded.document().get("source"), Some(&json!("census")));

    let (_, decoded) = accepted(encoder.decode(encoded.document(), None).expect("decode"));
    assert_eq!(decoded, attribute);
}

#[test]
fn reserved_metadata_names_are_refused() {
    let encoder = AttributeEncoder::new();
    let attribute = AttributeValue::new(
        "x",
        AttributeType::String,
        vec![MetadataItem::new("ts", "yesterday")],
        5,
    );
    let result = encoder.encode("e1", "name", &attribute);
    match result {
        Err(EavError::ReservedField { field, entity }) => {
            assert_eq!(field, "ts");
            assert_eq!(entity, "e1");
        }
        other => panic!("expected a reserved field error, got {:?}", other),
    }
}

#[test]
fn declared_types_subsume_matching_attributes_only() {
    let encoder = AttributeEncoder::new();
    let entity_type = EntityType::new([("a", AttributeType::Boolean)], 0);
    let boolean = encoder
        .encode("e1", "a", &value("true", AttributeType::Boolean))
        .expect("encode");
    let string = encoder
        .encode("e1", "a", &value("true", AttributeType::String))
        .expect("encode");
    let other = encoder
        .encode("e1", "b", &value("hello", AttributeType::String))
        .expect("encode");

    assert!(matches!(
        encoder.decode(boolean.document(), Some(&entity_type)).expect("decode"),
        Decoded::Accepted { .. }
    ));
    assert_eq!(
        encoder.decode(string.document(), Some(&entity_type)).expect("decode"),
        Decoded::Rejected {
            name: "a".to_owned(),
            declared: AttributeType::Boolean,
            found: AttributeType::String,
        }
    );
    assert!(matches!(
        encoder.decode(other.document(), None).expect("decode"),
        Decoded::Accepted { .. }
    ));
}

#[test]
fn decoding_without_a_type_field_fails() {
    let encoder = AttributeEncoder::new();
    let mut document = serde_json::Map::new();
    document.insert("attribute_name".to_owned(), Value::from("a"));
    assert!(matches!(encoder.decode(&document, None), Err(EavError::Codec(_))));
}

#[test]
fn type_names_round_trip_through_text() {
    for attribute_type in AttributeType::ALL {
        let parsed: AttributeType = attribute_type.to_string().parse().expect("parse");
        assert_eq!(parsed, attribute_type);
    }
    assert!("DATE".parse::<AttributeType>().is_err());
}

#[test]
fn numbers_and_booleans_convert_from_text() {
    assert_eq!(AttributeType::Number.convert("7").expect("int"), json!(7));
    assert_eq!(AttributeType::Number.convert("2.5").expect("float"), json!(2.5));
    assert_eq!(AttributeType::Boolean.convert("TRUE").expect("bool"), json!(true));
    assert!(AttributeType::Number.convert("seven").is_err());
    assert!(AttributeType::Boolean.convert("yes").is_err());
}
