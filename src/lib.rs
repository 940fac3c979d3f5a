//! Eavstore – entity persistence on top of a document store.
//!
//! Entities are saved in entity–attribute–value form: every attribute value
//! becomes a document of its own, so entities can carry any set of
//! attributes without a schema. The structural type of an entity is derived
//! from its attribute declarations and stored once per distinct signature.
//!
//! ## Collections
//! * `types` – one document per distinct type signature, keyed by its hash.
//! * `entities` – one document per entity: id, type hash and optional position.
//! * `attributes` – plain attribute values, keyed by a hash of
//!   (value, attribute name, entity id), which makes re-saving idempotent.
//! * `references` – attributes that point at other entities.
//! * `geos` – the single current latitude/longitude record of each entity.
//! * `attribute_ids` and `locks` – used by the [`allocator`] only.
//!
//! ## Modules
//! * [`construct`] – [`construct::Entity`], [`construct::AttributeValue`],
//!   [`construct::EntityType`] and friends.
//! * [`datatype`] – the closed set of attribute types and their conversions.
//! * [`encoder`] – attribute values to documents and back.
//! * [`buffer`] – batched writes with a size or time based flush.
//! * [`engine`] – [`engine::PersistenceEngine`], the save path.
//! * [`retrieve`] – [`retrieve::EntityRetriever`], searches by id, value,
//!   type and region.
//! * [`store`] / [`persist`] – the [`store::DocumentStore`] abstraction and
//!   its SQLite implementation.
//! * [`settings`] – configuration from `eavstore.toml` and the environment.
//!
//! ## Quick Start
//! ```
//! use eavstore::{datatype::AttributeType, construct::Entity, engine::PersistenceEngine, settings::Settings};
//! let engine = PersistenceEngine::open(&Settings::default()).unwrap();
//! let alice = Entity::new("alice")
//!     .with_attribute("name", "Alice", AttributeType::String)
//!     .with_attribute("age", "42", AttributeType::Number);
//! assert!(engine.save(&alice));
//! engine.close().unwrap();
//! let found = engine.retriever().get_by_attribute_value("age", "42", 0).unwrap();
//! assert_eq!(found, vec![alice]);
//! ```

pub mod allocator;
pub mod buffer;
pub mod construct;
pub mod datatype;
pub mod document;
pub mod encoder;
pub mod engine;
pub mod error;
pub mod geo;
pub mod identity;
pub mod lock;
pub mod persist;
pub mod retrieve;
pub mod settings;
pub mod store;
