//! Error types for margin operations

use crate::EventContext;
use thiserror::Error;

/// Configuration errors.
///
/// Raised when a check list is malformed or used outside the event context it
/// was written for. These abort the whole cycle.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to parse {format} configuration: {reason}")]
    Parse { format: String, reason: String },

    #[error("Pre-mutation value old:{column} is only available in on_update, not in {context}")]
    PreMutationOutsideUpdate { context: EventContext, column: String },

    #[error("No pre-mutation value for column {column} of row {identity}")]
    MissingPreMutationValue { column: String, identity: String },

    #[error("Predicate references unknown column {column} on {entity}")]
    UnknownColumn { entity: String, column: String },

    #[error("Comparator {comparator} cannot compare {left} with {right}")]
    IncomparableValues {
        comparator: String,
        left: String,
        right: String,
    },

    #[error("Source row {row} of {entity} has no value in identity column {column}")]
    MissingIdentity {
        entity: String,
        column: String,
        row: usize,
    },
}

/// Templating errors raised while rendering output rows.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("Template reference {reference} is not available on row {identity}")]
    MissingReference { reference: String, identity: String },

    #[error("Malformed placeholder in template value {template}")]
    MalformedPlaceholder { template: String },
}

/// Storage layer errors.
///
/// These come from the underlying store and are propagated unchanged.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Entity not found: {entity}")]
    EntityNotFound { entity: String },

    #[error("Column {column} does not exist on {entity}")]
    ColumnNotFound { entity: String, column: String },

    #[error("Duplicate identity {identity} in {entity}")]
    DuplicateIdentity { entity: String, identity: String },

    #[error("Row index {index} out of range for row-set of {len} rows")]
    RowIndexOutOfRange { index: usize, len: usize },

    #[error("Write to {entity} failed: {reason}")]
    WriteFailed { entity: String, reason: String },

    #[error("Row {identity} not found in {entity}")]
    RowNotFound { entity: String, identity: String },

    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Master error type for all margin errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MarginError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Templating error: {0}")]
    Template(#[from] TemplateError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl MarginError {
    /// Whether this error was caused by the check configuration rather than the data or the store.
    pub fn is_configuration(&self) -> bool {
        matches!(self, MarginError::Config(_))
    }
}

/// Result type alias for margin operations.
pub type MarginResult<T> = Result<T, MarginError>;

// =============================================================================
// TESTS
// =============================================================================
