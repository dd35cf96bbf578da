//! Applies schema changes to a live database.
//!
//! Two strategies. When every difference is expressible as `ALTER TABLE`,
//! `CREATE INDEX` or `DROP INDEX`, the changes run in place inside a single
//! transaction. Otherwise [`rebuild`] stages a fresh database file next to
//! the live one, creates the desired schema there, attaches the live file
//! and copies every surviving row across; the caller swaps the staged file
//! in afterwards.

use sqlx::sqlite::SqlitePool;
use sqlx::{Sqlite, Transaction};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{debug, info};

use verdigris_schema::{
    dependency_order, DatabaseSchema, IndexRecord, SchemaDiff, TableDelta, TableSchema,
};

use crate::db::{maybe_quote, open_pool, quote_identifier};
use crate::error::Result;

/// Executes schema changes against a database.
pub struct MigrationExecutor {
    pool: SqlitePool,
}

impl MigrationExecutor {
    /// A new executor on the given pool.
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Creates every table and index of `schema`, parents before children.
    ///
    /// `existing` lists lowercased names of tables already present outside
    /// the schema; foreign keys to them count as satisfied when ordering.
    ///
    /// # Errors
    ///
    /// Fails when the tables cannot be ordered or a statement is rejected.
    pub async fn create_schema(
        &self,
        schema: &DatabaseSchema,
        existing: &BTreeSet<String>,
    ) -> Result<()> {
        for table in dependency_order(schema, existing)? {
            info!(table = %table.name, "creating table");
            execute(&self.pool, &table.create_sql).await?;
            for sql in &table.index_sql {
                execute(&self.pool, sql).await?;
            }
        }
        Ok(())
    }

    /// Applies every difference in `diff` with ALTER and index statements,
    /// all inside one transaction.
    ///
    /// Callers are expected to have checked [`SchemaDiff::requires_rebuild`]
    /// first. A statement the database refuses rolls the whole batch back,
    /// leaving the file untouched for a rebuild instead.
    ///
    /// # Errors
    ///
    /// Fails when a table cannot be ordered or a statement is rejected.
    pub async fn apply_in_place(
        &self,
        desired: &DatabaseSchema,
        diff: &SchemaDiff,
    ) -> Result<()> {
        let mut present: BTreeSet<String> =
            diff.dropped_tables.iter().map(|n| n.to_lowercase()).collect();
        present.extend(diff.unchanged.iter().map(|n| n.to_lowercase()));
        present.extend(diff.deltas.keys().cloned());
        let ordered = dependency_order(desired, &present)?;

        let mut tx = self.pool.begin().await?;
        for table in ordered {
            if !diff.new_tables.contains(&table.name) {
                continue;
            }
            info!(table = %table.name, "creating table");
            execute_tx(&mut tx, &table.create_sql).await?;
            for sql in &table.index_sql {
                execute_tx(&mut tx, sql).await?;
            }
        }
        for delta in diff.deltas.values() {
            if let Some(table) = desired.get(&delta.table) {
                alter_table(&mut tx, table, delta).await?;
            }
        }
        tx.commit().await?;
        Ok(())
    }
}

// Statements here are rewritten into the stored schema by SQLite, so
// identifiers keep the spec's bare spelling where possible.
async fn alter_table(
    tx: &mut Transaction<'_, Sqlite>,
    table: &TableSchema,
    delta: &TableDelta,
) -> Result<()> {
    let quoted = maybe_quote(&table.name);
    for (old, new) in &delta.renamed_columns {
        info!(table = %table.name, old = %old, new = %new, "renaming column");
        let sql = format!(
            "ALTER TABLE {quoted} RENAME COLUMN {} TO {}",
            maybe_quote(old),
            maybe_quote(new)
        );
        execute_tx(tx, &sql).await?;
    }
    for name in &delta.added_columns {
        if let Some(column) = table.column(name) {
            info!(table = %table.name, column = %name, "adding column");
            let sql = format!("ALTER TABLE {quoted} ADD COLUMN {}", column.describe());
            execute_tx(tx, &sql).await?;
        }
    }
    for name in &delta.dropped_indexes {
        info!(table = %table.name, index = %name, "dropping index");
        let sql = format!("DROP INDEX {}", maybe_quote(name));
        execute_tx(tx, &sql).await?;
    }
    for name in &delta.changed_indexes {
        info!(table = %table.name, index = %name, "recreating index");
        let sql = format!("DROP INDEX {}", maybe_quote(name));
        execute_tx(tx, &sql).await?;
        if let Some(index) = desired_index(table, name) {
            execute_tx(tx, &index_statement(&table.name, index)).await?;
        }
    }
    for name in &delta.added_indexes {
        if let Some(index) = desired_index(table, name) {
            info!(table = %table.name, index = %name, "creating index");
            execute_tx(tx, &index_statement(&table.name, index)).await?;
        }
    }
    Ok(())
}

/// Builds the desired schema into a staged file next to the live database
/// and copies every surviving row across. The live file is only read; the
/// staged path is returned for the caller to swap in.
///
/// Tables of the live database that the desired schema does not mention are
/// carried over as they are, unless `drop_unspecified` is set. Foreign key
/// checks are deferred to the final commit, so rows that violate the new
/// schema surface as one error and leave no staged file behind.
///
/// # Errors
///
/// Fails when the staged file cannot be created, tables cannot be ordered
/// or a statement is rejected. The live database is never modified.
pub async fn rebuild(
    desired: &DatabaseSchema,
    actual: &DatabaseSchema,
    diff: &SchemaDiff,
    live_path: &Path,
    drop_unspecified: bool,
) -> Result<tempfile::TempPath> {
    let dir = match live_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let staged = tempfile::Builder::new()
        .prefix(".rebuild-")
        .suffix(".db")
        .tempfile_in(dir)?
        .into_temp_path();
    info!(staged = %staged.display(), "rebuilding into staged database");

    let preserved: BTreeSet<String> = if drop_unspecified {
        BTreeSet::new()
    } else {
        diff.dropped_tables.iter().map(|n| n.to_lowercase()).collect()
    };

    let pool = open_pool(&staged, true).await?;
    MigrationExecutor::new(pool.clone())
        .create_schema(desired, &preserved)
        .await?;

    sqlx::query("ATTACH DATABASE ? AS old")
        .bind(live_path.to_string_lossy().into_owned())
        .execute(&pool)
        .await?;

    let mut tx = pool.begin().await?;
    execute_tx(&mut tx, "PRAGMA defer_foreign_keys = ON").await?;

    let carried = carried_tables(actual, desired, &preserved)?;
    for table in &carried {
        info!(table = %table.name, "keeping unspecified table");
        execute_tx(&mut tx, &table.create_sql).await?;
        for sql in &table.index_sql {
            execute_tx(&mut tx, sql).await?;
        }
    }
    if drop_unspecified {
        for name in &diff.dropped_tables {
            info!(table = %name, "dropping unspecified table");
        }
    }

    for table in dependency_order(desired, &preserved)? {
        if diff.new_tables.contains(&table.name) {
            continue;
        }
        copy_table(&mut tx, table, diff.deltas.get(&table.name.to_lowercase())).await?;
    }
    for table in &carried {
        let sql = format!(
            "INSERT INTO main.{0} SELECT * FROM old.{0}",
            quote_identifier(&table.name)
        );
        debug!(sql = %sql, "executing");
        let result = sqlx::query(&sql).execute(&mut *tx).await?;
        info!(table = %table.name, rows = result.rows_affected(), "copied rows");
    }

    tx.commit().await?;
    sqlx::query("DETACH DATABASE old").execute(&pool).await?;
    pool.close().await;
    Ok(staged)
}

/// Live tables the desired schema does not mention, parents first.
fn carried_tables<'a>(
    actual: &'a DatabaseSchema,
    desired: &DatabaseSchema,
    preserved: &BTreeSet<String>,
) -> Result<Vec<&'a TableSchema>> {
    if preserved.is_empty() {
        return Ok(Vec::new());
    }
    let specified: BTreeSet<String> = desired
        .tables()
        .map(|t| t.name.to_lowercase())
        .collect();
    let ordered = dependency_order(actual, &specified)?;
    Ok(ordered
        .into_iter()
        .filter(|t| preserved.contains(&t.name.to_lowercase()))
        .collect())
}

/// Copies one table's rows from the attached live database into the staged
/// one. Added columns are left to their defaults; renamed columns are read
/// under their old names.
async fn copy_table(
    tx: &mut Transaction<'_, Sqlite>,
    table: &TableSchema,
    delta: Option<&TableDelta>,
) -> Result<()> {
    let mut targets = Vec::with_capacity(table.columns.len());
    let mut sources = Vec::with_capacity(table.columns.len());
    for column in &table.columns {
        let added = delta.is_some_and(|d| {
            d.added_columns.iter().any(|a| a.eq_ignore_ascii_case(&column.name))
        });
        if added {
            continue;
        }
        targets.push(quote_identifier(&column.name));
        let source = delta.map_or(column.name.as_str(), |d| d.actual_column_name(&column.name));
        sources.push(quote_identifier(source));
    }
    if targets.is_empty() {
        return Ok(());
    }
    let sql = format!(
        "INSERT INTO main.{0} ({1}) SELECT {2} FROM old.{0}",
        quote_identifier(&table.name),
        targets.join(", "),
        sources.join(", ")
    );
    debug!(sql = %sql, "executing");
    let result = sqlx::query(&sql).execute(&mut **tx).await?;
    info!(table = %table.name, rows = result.rows_affected(), "copied rows");
    Ok(())
}

/// The `CREATE INDEX` statement for an explicit index record.
///
/// Identifiers stay bare when they are plain words, so the stored text
/// normalizes to the same SQL a spec-declared index produces.
#[must_use]
pub fn index_statement(table: &str, index: &IndexRecord) -> String {
    let unique = if index.unique { "UNIQUE " } else { "" };
    let columns: Vec<String> = index.columns.iter().map(|c| maybe_quote(c)).collect();
    let mut sql = format!(
        "CREATE {unique}INDEX {} ON {} ({})",
        maybe_quote(&index.name),
        maybe_quote(table),
        columns.join(", ")
    );
    if let Some(predicate) = &index.predicate {
        sql.push_str(" WHERE ");
        sql.push_str(predicate);
    }
    sql
}

fn desired_index<'a>(table: &'a TableSchema, name: &str) -> Option<&'a IndexRecord> {
    table
        .explicit_indexes()
        .find(|i| i.name.eq_ignore_ascii_case(name))
}

async fn execute(pool: &SqlitePool, sql: &str) -> Result<()> {
    debug!(sql = %sql, "executing");
    sqlx::query(sql).execute(pool).await?;
    Ok(())
}

async fn execute_tx(tx: &mut Transaction<'_, Sqlite>, sql: &str) -> Result<()> {
    debug!(sql = %sql, "executing");
    sqlx::query(sql).execute(&mut **tx).await?;
    Ok(())
}
