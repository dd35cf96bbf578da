//! Reads the schema of a live SQLite database into the same normalized
//! records a parsed spec produces.
//!
//! Columns, foreign keys and indexes come from the `table_info`,
//! `foreign_key_list` and `index_list` pragmas. CHECK constraints have no
//! pragma, so they are recovered by splitting the stored `CREATE TABLE`
//! text into top-level segments and scanning each with the spec grammar in
//! lenient mode; unknown syntax is skipped rather than fatal, since the
//! live database may contain clauses the spec format cannot express.

use sqlx::sqlite::SqlitePool;
use std::collections::BTreeMap;
use tracing::debug;

use verdigris_schema::{
    normalize_sql, split_top_level_commas, ColumnRecord, DatabaseSchema, DeclaredType, FkAction,
    ForeignKeyRecord, Grammar, IndexOrigin, IndexRecord, MatchEvent, TableSchema,
};

use crate::error::Result;

/// Reads database schemas through a connection pool.
pub struct Introspector {
    pool: SqlitePool,
    grammar: Grammar,
}

impl Introspector {
    /// A new introspector on the given pool.
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            grammar: Grammar::new(),
        }
    }

    /// Reads every user table into a [`DatabaseSchema`].
    ///
    /// Internal `sqlite_*` objects and autoindexes are skipped; autoindex
    /// records are reconstructed from `pragma index_list` instead.
    ///
    /// # Errors
    ///
    /// Fails when a query fails or two tables share a name ignoring case.
    pub async fn read_schema(&self) -> Result<DatabaseSchema> {
        let rows: Vec<(String, String, String, String)> = sqlx::query_as(
            r"SELECT type, name, tbl_name, sql FROM sqlite_master
              WHERE type IN ('table', 'index')
                AND name NOT LIKE 'sqlite\_%' ESCAPE '\'
                AND sql IS NOT NULL
              ORDER BY rowid",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut tables: Vec<(String, String)> = Vec::new();
        let mut indexes: BTreeMap<String, Vec<(String, String)>> = BTreeMap::new();
        for (kind, name, tbl_name, sql) in rows {
            if kind == "table" {
                tables.push((name, sql));
            } else {
                indexes
                    .entry(tbl_name.to_lowercase())
                    .or_default()
                    .push((name, sql));
            }
        }

        let mut schema = DatabaseSchema::new();
        for (name, sql) in tables {
            let table_indexes = indexes.remove(&name.to_lowercase()).unwrap_or_default();
            let table = self.read_table(&name, &sql, &table_indexes).await?;
            schema.insert(table)?;
        }
        Ok(schema)
    }

    async fn read_table(
        &self,
        name: &str,
        create_sql: &str,
        indexes: &[(String, String)],
    ) -> Result<TableSchema> {
        let mut table = TableSchema::new(name);
        table.create_sql = normalize_sql(create_sql);
        table.index_sql = indexes.iter().map(|(_, sql)| normalize_sql(sql)).collect();

        table.columns = self.read_columns(name).await?;
        table.foreign_keys = self.read_foreign_keys(name).await?;
        table.indices = self.read_indexes(name, indexes).await?;
        self.recover_checks(create_sql, &mut table);
        Ok(table)
    }

    async fn read_columns(&self, table: &str) -> Result<Vec<ColumnRecord>> {
        let rows: Vec<(i64, String, String, i64, Option<String>, i64)> = sqlx::query_as(
            r#"SELECT cid, name, type, "notnull", dflt_value, pk
               FROM pragma_table_info(?) ORDER BY cid"#,
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(cid, name, decl_type, not_null, default_value, pk)| ColumnRecord {
                position: cid,
                name,
                decl_type: DeclaredType::parse(&decl_type),
                not_null: not_null != 0,
                // An absent default and a literal NULL land in the same
                // place, mirroring the spec side.
                default_value: default_value.filter(|v| !v.eq_ignore_ascii_case("NULL")),
                pk_rank: pk,
                former_names: Vec::new(),
                source_text: String::new(),
            })
            .collect())
    }

    async fn read_foreign_keys(&self, table: &str) -> Result<Vec<ForeignKeyRecord>> {
        let rows: Vec<(i64, i64, String, String, Option<String>, String, String, String)> =
            sqlx::query_as(
                r#"SELECT id, seq, "table", "from", "to", on_update, on_delete, "match"
                   FROM pragma_foreign_key_list(?) ORDER BY id, seq"#,
            )
            .bind(table)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(
                |(id, seq, parent, from, to, on_update, on_delete, match_mode)| {
                    let mut record = ForeignKeyRecord::new(parent, from);
                    record.id = id;
                    record.seq = seq;
                    record.to = to;
                    record.on_update = FkAction::parse(&on_update);
                    record.on_delete = FkAction::parse(&on_delete);
                    record.match_mode = match_mode;
                    record
                },
            )
            .collect())
    }

    async fn read_indexes(
        &self,
        table: &str,
        stored: &[(String, String)],
    ) -> Result<Vec<IndexRecord>> {
        let rows: Vec<(i64, String, i64, String, i64)> = sqlx::query_as(
            r#"SELECT seq, name, "unique", origin, partial
               FROM pragma_index_list(?) ORDER BY seq"#,
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for (seq, name, unique, origin, partial) in rows {
            let columns: Vec<(i64, i64, Option<String>)> = sqlx::query_as(
                "SELECT seqno, cid, name FROM pragma_index_info(?) ORDER BY seqno",
            )
            .bind(&name)
            .fetch_all(&self.pool)
            .await?;

            let sql = stored
                .iter()
                .find(|(n, _)| n.eq_ignore_ascii_case(&name))
                .map(|(_, sql)| sql.as_str());
            let mut record = IndexRecord::new(IndexOrigin::from_pragma(&origin));
            record.seq = seq;
            record.name = name;
            record.unique = unique != 0;
            record.columns = columns
                .into_iter()
                .map(|(_, _, col)| col.unwrap_or_default())
                .collect();
            record.partial = partial != 0;
            record.predicate = if partial != 0 {
                sql.and_then(index_predicate)
            } else {
                None
            };
            records.push(record);
        }
        Ok(records)
    }

    /// Scans the stored `CREATE TABLE` body for CHECK constraints.
    fn recover_checks(&self, create_sql: &str, table: &mut TableSchema) {
        let Some(body) = table_body(create_sql) else {
            return;
        };
        let mut seq = 0;
        for segment in split_top_level_commas(body) {
            for event in self.grammar.scan_lenient(&segment) {
                if let MatchEvent::Check { expr } = event {
                    debug!(table = %table.name, expr = %expr, "recovered CHECK constraint");
                    let mut record = IndexRecord::new(IndexOrigin::CheckConstraint);
                    record.seq = seq;
                    seq += 1;
                    record.predicate = Some(expr);
                    table.indices.push(record);
                }
            }
        }
    }
}

/// The text between the outermost parentheses of a statement.
fn table_body(sql: &str) -> Option<&str> {
    let open = sql.find('(')?;
    let close = sql.rfind(')')?;
    (open < close).then(|| &sql[open + 1..close])
}

/// The `WHERE` expression of a stored `CREATE INDEX` statement.
fn index_predicate(sql: &str) -> Option<String> {
    let upper = sql.to_ascii_uppercase();
    upper
        .find(" WHERE ")
        .map(|i| sql[i + " WHERE ".len()..].trim().to_owned())
}
