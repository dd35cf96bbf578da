//! # verdigris-schema
//!
//! Declarative SQLite schema modelling and comparison.
//!
//! This crate provides:
//! - A spec format for describing a database as SQL-ish lines per table
//! - A backtracking grammar that parses those lines into normalized records
//! - Records shaped exactly like SQLite's pragma output, so a parsed spec
//!   and an introspected live database compare field by field
//! - A structural differ that classifies every change as applicable in
//!   place or requiring a table rebuild
//!
//! ## Parsing a spec
//!
//! ```rust
//! use verdigris_schema::{DatabaseSpec, SpecParser};
//!
//! let spec = DatabaseSpec::new().table(
//!     "Players",
//!     [
//!         "ID INTEGER PRIMARY KEY AUTOINCREMENT",
//!         "Name TEXT NOT NULL",
//!         "Score REAL DEFAULT 0.0 [FORMERLY Points]",
//!     ],
//! );
//! let schema = SpecParser::new().parse_spec(&spec)?;
//!
//! let players = schema.get("players").unwrap();
//! assert_eq!(players.columns.len(), 3);
//! assert_eq!(players.column("Score").unwrap().former_names, vec!["points"]);
//! # Ok::<(), verdigris_schema::SchemaError>(())
//! ```
//!
//! ## Comparing two schemas
//!
//! ```rust
//! use verdigris_schema::{compare_schemas, CompareOptions, DatabaseSpec, SpecParser};
//!
//! let parser = SpecParser::new();
//! let desired = parser.parse_spec(
//!     &DatabaseSpec::new().table("T", ["ID INTEGER PRIMARY KEY", "Name TEXT"]),
//! )?;
//! let actual = parser.parse_spec(
//!     &DatabaseSpec::new().table("T", ["ID INTEGER PRIMARY KEY"]),
//! )?;
//!
//! let diff = compare_schemas(&desired, &actual, CompareOptions::default());
//! let delta = diff.deltas.get("t").unwrap();
//! assert_eq!(delta.added_columns, vec!["Name"]);
//! assert!(delta.alterable_in_place());
//! # Ok::<(), verdigris_schema::SchemaError>(())
//! ```

pub mod diff;
pub mod error;
pub mod grammar;
pub mod model;
pub mod parse;
pub mod record;
pub mod spec;

pub use diff::{
    compare_schemas, compare_tables, ColumnChange, CompareOptions, SchemaDiff, TableDelta,
};
pub use error::{Result, SchemaError};
pub use grammar::{Grammar, MatchEvent, Rule};
pub use model::{
    dependency_order, normalize_sql, split_top_level_commas, DatabaseSchema, TableSchema,
};
pub use parse::SpecParser;
pub use record::{
    ColumnRecord, DeclaredType, FkAction, ForeignKeyRecord, IndexOrigin, IndexRecord,
};
pub use spec::DatabaseSpec;
