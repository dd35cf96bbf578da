//! Error types for schema parsing and comparison.

/// Errors that can occur while parsing or modelling a schema.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    /// A spec line contains text the grammar cannot match.
    #[error("Unable to parse \"{fragment}\" in table {table} where the full line is \"{line}\"")]
    Grammar {
        /// Table whose spec line failed.
        table: String,
        /// The unmatched tail of the line.
        fragment: String,
        /// The complete spec line.
        line: String,
    },

    /// A table-level constraint names a column zero or multiple times.
    #[error("{constraint} clause mentions {column} which has {matches} matches among the fields of {table}")]
    AmbiguousConstraint {
        /// Table containing the constraint.
        table: String,
        /// Constraint kind (PRIMARY KEY or UNIQUE).
        constraint: String,
        /// The column name that failed to resolve.
        column: String,
        /// How many columns matched.
        matches: usize,
    },

    /// A foreign key's local and parent column lists have different lengths.
    #[error("Foreign key in table {table} has mismatched column counts: ({from}) vs ({to})")]
    ForeignKeyArity {
        /// Table declaring the constraint.
        table: String,
        /// Local column list.
        from: String,
        /// Parent column list.
        to: String,
    },

    /// Two tables in one schema share a name (ignoring case).
    #[error("Duplicate table name: {0}")]
    DuplicateTable(String),

    /// Foreign key references could not be ordered.
    #[error("Tables have circular or unresolvable references: {}", .stuck.join(", "))]
    DependencyCycle {
        /// Tables that could not be placed.
        stuck: Vec<String>,
    },

    /// The spec input itself is malformed.
    #[error("Invalid database spec: {0}")]
    Spec(String),

    /// Failed to deserialize a spec file.
    #[error("Failed to parse spec file: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error reading a spec file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for schema operations.
pub type Result<T> = std::result::Result<T, SchemaError>;
