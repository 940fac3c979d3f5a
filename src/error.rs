use thiserror::Error;

#[derive(Error, Debug)]
pub enum EavError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Persistence error: {0}")]
    Persistence(String),
    #[error("Duplicate key '{id}' in collection '{collection}'")]
    DuplicateKey { collection: String, id: String },
    #[error("Bulk write to '{collection}' stored {inserted} documents, {} duplicates", .duplicates.len())]
    BulkWrite {
        collection: String,
        inserted: usize,
        duplicates: Vec<String>,
    },
    #[error("Attempting to use a reserved field name as a metadata field name: {field} in entity {entity}")]
    ReservedField { field: String, entity: String },
    #[error("Cannot convert '{value}' to {attribute_type}")]
    Conversion { value: String, attribute_type: String },
    #[error("Malformed document: {0}")]
    Codec(String),
    #[error("Lock not acquired after {attempts} attempts")]
    LockTimeout { attempts: u32 },
    #[error("Could not allocate an identifier for '{name}' after {attempts} attempts")]
    AllocationConflict { name: String, attempts: u32 },
    #[error("Write buffer for '{0}' is closed")]
    Closed(String),
    #[error("Internal invariant violated: {0}")]
    Invariant(String),
    #[error("Lock poisoned: {0}")]
    Lock(String),
}

impl EavError {
    /// Duplicate keys are the benign outcome of idempotent or concurrent re-saves.
    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, Self::DuplicateKey { .. } | Self::BulkWrite { .. })
    }
}

pub type Result<T> = std::result::Result<T, EavError>;

// Helper conversions
impl From<rusqlite::Error> for EavError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Persistence(e.to_string())
    }
}
impl From<serde_json::Error> for EavError {
    fn from(e: serde_json::Error) -> Self {
        Self::Codec(e.to_string())
    }
}
impl From<config::ConfigError> for EavError {
    fn from(e: config::ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}
impl<T> From<std::sync::PoisonError<T>> for EavError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        Self::Lock(e.to_string())
    }
}
