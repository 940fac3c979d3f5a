//! Content addressable identities.
//!
//! Identities are blake3 digests over the identified content, rendered as
//! lower-case hex. Writing the same content twice yields the same identity,
//! which turns a repeated save into a duplicate key rather than a duplicate row.

/// Digest over the concatenation of the parts, in the order given.
pub fn hash(parts: &[&[u8]]) -> String {
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().to_hex().to_string()
}

/// The key of a type signature in the types collection.
pub fn type_hash(type_signature: &str) -> String {
    hash(&[type_signature.as_bytes()])
}

/// The identity of one attribute value of one entity.
pub fn attribute_id(value: &str, attribute_name: &str, entity_id: &[u8]) -> String {
    hash(&[value.as_bytes(), attribute_name.as_bytes(), entity_id])
}
