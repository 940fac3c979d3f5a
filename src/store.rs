use crate::document::{Document, Filter, Stage, UpsertModel};
use crate::error::Result;

/// The document store the persistence engine writes to and reads from.
///
/// Every call is a blocking round-trip. Implementations must be safe to share
/// between threads; the engine holds one behind an `Arc`.
pub trait DocumentStore: Send + Sync {
    /// Fails with [`EavError::DuplicateKey`](crate::error::EavError::DuplicateKey)
    /// when a document with the same identity exists.
    fn insert_one(&self, collection: &str, document: Document) -> Result<()>;

    /// Unordered bulk insert: a duplicate does not stop the remaining
    /// documents. Duplicates are reported together as
    /// [`EavError::BulkWrite`](crate::error::EavError::BulkWrite) after every
    /// other document has been written.
    fn insert_many(&self, collection: &str, documents: Vec<Document>) -> Result<usize>;

    /// Applies the upserts in order and returns how many were applied.
    fn bulk_upsert(&self, collection: &str, models: Vec<UpsertModel>) -> Result<usize>;

    fn find(&self, collection: &str, filter: &Filter, limit: Option<usize>) -> Result<Vec<Document>>;

    fn count(&self, collection: &str, filter: &Filter) -> Result<usize>;

    fn aggregate(&self, collection: &str, pipeline: &[Stage]) -> Result<Vec<Document>>;

    /// Merges `set` into the first match, never inserting. Returns whether a
    /// document was updated.
    fn update_one(&self, collection: &str, filter: &Filter, set: Document) -> Result<bool>;

    /// Atomic compare-and-set: merges `set` into the first match and returns
    /// that document as it was before the update.
    fn find_one_and_update(
        &self,
        collection: &str,
        filter: &Filter,
        set: Document,
    ) -> Result<Option<Document>>;

    fn delete_one(&self, collection: &str, filter: &Filter) -> Result<bool>;
}
