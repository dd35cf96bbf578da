//! Spec-driven schema migration for SQLite databases.
//!
//! `verdigris-migrate` brings a live database up to a declared
//! [`DatabaseSpec`](verdigris_schema::DatabaseSpec) without hand-written
//! migration steps:
//! - The live schema is read back through SQLite's pragmas
//! - Differences are classified as in-place alterable or rebuild-only
//! - Renames, added columns and index changes run as `ALTER`/`CREATE INDEX`
//! - Anything else rebuilds the file through a staged copy, after a backup
//!
//! Applications call [`init`](upgrade::init) once at startup to create or
//! upgrade their database in a single step.
//!
//! # Architecture
//!
//! The migration flow consists of several components:
//!
//! - **Introspector** - Reads a live database into normalized schema records
//! - **Executor** - Applies in-place changes, creates schemas, stages rebuilds
//! - **BackupManager** - Timestamped backup copies and the atomic file swap
//! - **Upgrade** - The compare-and-upgrade flow tying everything together
//!
//! # Example
//!
//! ```rust,ignore
//! use std::path::Path;
//! use verdigris_migrate::prelude::*;
//!
//! let spec = DatabaseSpec::from_path("schema.json")?;
//! let options = UpgradeOptions {
//!     apply: true,
//!     ..UpgradeOptions::default()
//! };
//!
//! match compare_and_upgrade(Path::new("app.db"), &spec, &options).await? {
//!     UpgradeOutcome::Rebuilt { backup } => {
//!         println!("rebuilt; old file kept at {}", backup.display());
//!     }
//!     outcome => println!("{outcome:?}"),
//! }
//! ```
//!
//! # CLI Usage
//!
//! ```bash
//! # Report differences between the database and the spec
//! verdigris-migrate app.db --schema schema.json
//!
//! # Apply them, prompting before any rebuild
//! verdigris-migrate app.db --schema schema.json --upgrade
//!
//! # Non-interactive upgrade that also drops unspecified tables
//! verdigris-migrate app.db -s schema.json -u -f y -d
//! ```

pub mod backup;
pub mod db;
pub mod error;
pub mod executor;
pub mod introspect;
pub mod upgrade;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::backup::BackupManager;
    pub use crate::db::{open_pool, quote_identifier};
    pub use crate::error::{MigrateError, Result};
    pub use crate::executor::{index_statement, rebuild, MigrationExecutor};
    pub use crate::introspect::Introspector;
    pub use crate::upgrade::{
        compare_and_upgrade, init, parse_confirmation, UpgradeOptions, UpgradeOutcome,
    };
    pub use verdigris_schema::{
        compare_schemas, CompareOptions, DatabaseSchema, DatabaseSpec, SchemaDiff, SpecParser,
    };
}
