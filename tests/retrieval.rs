mod common;

use std::sync::Arc;

use eavstore::construct::{AttributeExpression, Entity, EntityType, GeoPoint};
use eavstore::datatype::AttributeType;
use eavstore::engine::PersistenceEngine;
use eavstore::retrieve::{EntityRetriever, MAX_LIMIT};
use eavstore::store::DocumentStore;

use common::{memory_store, quiet_settings};

fn people() -> Vec<Entity> {
    vec![
        Entity::new("alice")
            .with_attribute("name", "Alice", AttributeType::String)
            .with_attribute("age", "42", AttributeType::Number)
            .with_attribute("married", "true", AttributeType::Boolean)
            .with_attribute("spouse", "bob", AttributeType::Reference)
            .with_position(18.07, 59.33),
        Entity::new("bob")
            .with_attribute("name", "Bob", AttributeType::String)
            .with_attribute("age", "40", AttributeType::Number)
            .with_attribute("married", "true", AttributeType::Boolean)
            .with_attribute("spouse", "alice", AttributeType::Reference)
            .with_position(11.97, 57.70),
        Entity::new("carol")
            .with_attribute("name", "Carol", AttributeType::String)
            .with_attribute("age", "42", AttributeType::Number)
            .with_attribute("married", "no", AttributeType::String)
            .with_position(-0.13, 51.51),
    ]
}

fn saved(entities: &[Entity]) -> (PersistenceEngine, EntityRetriever) {
    let store: Arc<dyn DocumentStore> = memory_store();
    let engine = PersistenceEngine::new(store, &quiet_settings());
    assert_eq!(engine.save_all(entities), entities.len());
    engine.flush().expect("flush");
    let retriever = engine.retriever();
    (engine, retriever)
}

fn ids(entities: &[Entity]) -> Vec<&str> {
    let mut ids: Vec<&str> = entities.iter().map(Entity::id).collect();
    ids.sort();
    ids
}

#[test]
fn entities_come_back_as_saved() {
    let people = people();
    let (_engine, retriever) = saved(&people);
    let alice = retriever.get_by_id("alice").expect("get").expect("alice exists");
    for name in ["name", "age", "married"] {
        assert_eq!(alice.attribute(name), people[0].attribute(name), "{}", name);
    }
    // references are read separately
    assert!(alice.attribute("spouse").is_none());
    assert_eq!(alice.position(), Some(GeoPoint::new(18.07, 59.33)));
    assert!(retriever.get_by_id("nobody").expect("get").is_none());
}

#[test]
fn several_ids_keep_their_order() {
    let people = people();
    let (_engine, retriever) = saved(&people);
    let found = retriever
        .get_by_ids(&["carol", "nobody", "alice"])
        .expect("get");
    let found: Vec<&str> = found.iter().map(Entity::id).collect();
    assert_eq!(found, vec!["carol", "alice"]);
}

#[test]
fn values_match_as_text_or_native() {
    let people = people();
    let (_engine, retriever) = saved(&people);
    let aged = retriever.get_by_attribute_value("age", "42", 0).expect("search");
    assert_eq!(ids(&aged), vec!["alice", "carol"]);
    // each entity comes back whole
    assert!(aged.iter().all(|e| e.len() >= 3));

    let married = retriever
        .get_by_attribute_value("married", "true", 10)
        .expect("search");
    assert_eq!(ids(&married), vec!["alice", "bob"]);

    let named = retriever.get_by_attribute_value("name", "Bob", -5).expect("search");
    assert_eq!(ids(&named), vec!["bob"]);
    assert!(retriever.get_by_attribute_value("name", "Dave", 0).expect("search").is_empty());
}

#[test]
fn limits_cap_the_matches() {
    let people = people();
    let (_engine, retriever) = saved(&people);
    let one = retriever.get_by_attribute_value("age", "42", 1).expect("search");
    assert_eq!(one.len(), 1);
}

#[test]
fn limits_are_clamped() {
    let people = people();
    let (_engine, retriever) = saved(&people);
    assert_eq!(retriever.max_limit(), MAX_LIMIT);
    assert_eq!(retriever.determine_limit(0), MAX_LIMIT);
    assert_eq!(retriever.determine_limit(-1), MAX_LIMIT);
    assert_eq!(retriever.determine_limit(7), 7);
    assert_eq!(retriever.determine_limit(i64::MAX), MAX_LIMIT);
}

#[test]
fn types_subsume_entities_with_matching_declarations() {
    let people = people();
    let (_engine, retriever) = saved(&people);
    let married = EntityType::new([("married", AttributeType::Boolean), ("age", AttributeType::Number)], 0);
    let found = retriever.get_by_type(&married, 0).expect("search");
    assert_eq!(ids(&found), vec!["alice", "bob"]);
    // undeclared attributes still come along
    assert!(found.iter().all(|e| e.attribute("name").is_some()));

    let impossible = EntityType::new([("age", AttributeType::String)], 0);
    assert!(retriever.get_by_type(&impossible, 0).expect("search").is_empty());
}

#[test]
fn types_without_declarations_filter_by_age() {
    let people = people();
    let (_engine, retriever) = saved(&people);
    let anything = EntityType::new(Vec::<(String, AttributeType)>::new(), 0);
    assert_eq!(ids(&retriever.get_by_type(&anything, 0).expect("search")), vec!["alice", "bob", "carol"]);

    let future = EntityType::new(Vec::<(String, AttributeType)>::new(), i64::MAX);
    assert!(retriever.get_by_type(&future, 0).expect("search").is_empty());
}

#[test]
fn regions_find_entities_within() {
    let people = people();
    let (_engine, retriever) = saved(&people);
    let scandinavia = [
        GeoPoint::new(5.0, 55.0),
        GeoPoint::new(25.0, 55.0),
        GeoPoint::new(25.0, 70.0),
        GeoPoint::new(5.0, 70.0),
    ];
    let found = retriever.get_by_region(&scandinavia, 0).expect("search");
    assert_eq!(ids(&found), vec!["alice", "bob"]);

    let by_expression = retriever
        .get_by_expression(&AttributeExpression::Within {
            points: scandinavia.to_vec(),
            limit: 1,
        })
        .expect("search");
    assert_eq!(by_expression.len(), 1);
}

#[test]
fn too_few_points_find_nothing() {
    let people = people();
    let (_engine, retriever) = saved(&people);
    let line = [GeoPoint::new(-180.0, -90.0), GeoPoint::new(180.0, 90.0)];
    assert!(retriever.get_by_region(&line, 0).expect("search").is_empty());
}

#[test]
fn expressions_dispatch_to_type_search() {
    let people = people();
    let (_engine, retriever) = saved(&people);
    let expression = AttributeExpression::From {
        entity_type: EntityType::new([("married", AttributeType::String)], 0),
        limit: 0,
    };
    let found = retriever.get_by_expression(&expression).expect("search");
    assert_eq!(ids(&found), vec!["carol"]);
}

#[test]
fn references_are_fetched_once_per_entity() {
    let people = people();
    let (engine, retriever) = saved(&people);
    let alice = retriever.get_by_id("alice").expect("get").expect("alice exists");
    let references = retriever.references(&alice).expect("references");
    assert_eq!(references.get("spouse").map(String::as_str), Some("bob"));

    // a later change is not seen through the cached map
    let long = "x".repeat(400);
    assert!(engine.save(&Entity::new("alice").with_attribute("friend", long.clone(), AttributeType::Reference)));
    engine.flush().expect("flush");
    assert!(!retriever.references(&alice).expect("references").contains_key("friend"));

    let fresh = retriever.retrieve_references("alice").expect("references");
    assert_eq!(fresh.get("friend"), Some(&long));
    assert!(retriever.references(&people[2]).expect("references").is_empty());
}
