//! Structural comparison of two database schemas.
//!
//! The desired schema (parsed from a spec) is compared against the actual
//! one (introspected from a live database). The result classifies every
//! difference by whether `ALTER TABLE` can apply it in place or the table
//! must be rebuilt by copying into a fresh database:
//!
//! * in place: new tables, added columns, column renames declared through
//!   `[FORMERLY ...]`, and explicit index changes;
//! * rebuild: dropped or changed columns, any constraint or foreign key
//!   change, and normalized SQL text that differs in a way no record
//!   captures (a `COLLATE` clause, say).
//!
//! Tables present in the database but absent from the spec are reported
//! but never treated as a difference; dropping them is an explicit choice
//! made at migration time.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write;

use crate::model::{split_top_level_commas, DatabaseSchema, TableSchema};
use crate::record::IndexRecord;

/// Knobs for schema comparison.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompareOptions {
    /// Treat column order as significant. Off by default: SQLite reads and
    /// writes columns by name, so order rarely matters.
    pub order_matters: bool,
}

/// A column whose definition changed between the two sides.
#[derive(Debug, Clone, Serialize)]
pub struct ColumnChange {
    /// Column name on the desired side.
    pub name: String,
    /// Which record fields disagree.
    pub fields: Vec<&'static str>,
    /// The desired definition.
    pub desired: String,
    /// The definition found in the database.
    pub actual: String,
}

/// Everything that differs for one table.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TableDelta {
    /// Table display name (desired side).
    pub table: String,
    /// `(name in database, name in spec)` pairs resolved via
    /// `[FORMERLY ...]` declarations.
    pub renamed_columns: Vec<(String, String)>,
    /// Columns only the spec has.
    pub added_columns: Vec<String>,
    /// Columns only the database has.
    pub dropped_columns: Vec<String>,
    /// Columns present on both sides with differing definitions.
    pub changed_columns: Vec<ColumnChange>,
    /// PRIMARY KEY / UNIQUE / CHECK constraints only the spec has.
    pub added_constraints: Vec<String>,
    /// Constraints only the database has.
    pub dropped_constraints: Vec<String>,
    /// Foreign keys only the spec has.
    pub added_foreign_keys: Vec<String>,
    /// Foreign keys only the database has.
    pub dropped_foreign_keys: Vec<String>,
    /// Explicit indexes only the spec has.
    pub added_indexes: Vec<String>,
    /// Explicit indexes only the database has.
    pub dropped_indexes: Vec<String>,
    /// Explicit indexes present on both sides with differing structure.
    pub changed_indexes: Vec<String>,
    /// The normalized SQL text disagrees.
    pub sql_differs: bool,
}

impl TableDelta {
    /// True when nothing differs.
    #[must_use]
    pub fn is_same(&self) -> bool {
        !self.has_record_changes() && !self.sql_differs
    }

    /// True when any record-level difference was found.
    #[must_use]
    pub fn has_record_changes(&self) -> bool {
        !(self.renamed_columns.is_empty()
            && self.added_columns.is_empty()
            && self.dropped_columns.is_empty()
            && self.changed_columns.is_empty()
            && self.added_constraints.is_empty()
            && self.dropped_constraints.is_empty()
            && self.added_foreign_keys.is_empty()
            && self.dropped_foreign_keys.is_empty()
            && self.added_indexes.is_empty()
            && self.dropped_indexes.is_empty()
            && self.changed_indexes.is_empty())
    }

    /// True when the table must be rebuilt: something was dropped or
    /// changed that `ALTER TABLE` cannot express, or the SQL text differs
    /// in a way no record explains.
    #[must_use]
    pub fn requires_rebuild(&self) -> bool {
        !self.dropped_columns.is_empty()
            || !self.changed_columns.is_empty()
            || !self.added_constraints.is_empty()
            || !self.dropped_constraints.is_empty()
            || !self.added_foreign_keys.is_empty()
            || !self.dropped_foreign_keys.is_empty()
            || (self.sql_differs && !self.has_record_changes())
    }

    /// True when the differences can all be applied with `ALTER TABLE`,
    /// `CREATE INDEX` and `DROP INDEX` on the live database.
    #[must_use]
    pub fn alterable_in_place(&self) -> bool {
        !self.is_same() && !self.requires_rebuild()
    }

    /// The database-side name of a desired column, translating through the
    /// rename pairs.
    #[must_use]
    pub fn actual_column_name<'a>(&'a self, desired: &'a str) -> &'a str {
        self.renamed_columns
            .iter()
            .find(|(_, new)| new.eq_ignore_ascii_case(desired))
            .map_or(desired, |(old, _)| old.as_str())
    }

    /// Human-readable lines describing each difference.
    #[must_use]
    pub fn describe(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for (old, new) in &self.renamed_columns {
            lines.push(format!("rename column {old} to {new}"));
        }
        for name in &self.added_columns {
            lines.push(format!("add column {name}"));
        }
        for name in &self.dropped_columns {
            lines.push(format!("drop column {name}"));
        }
        for change in &self.changed_columns {
            lines.push(format!(
                "change column {} ({}): \"{}\" is now \"{}\"",
                change.name,
                change.fields.join(", "),
                change.actual,
                change.desired
            ));
        }
        for text in &self.added_constraints {
            lines.push(format!("add constraint {text}"));
        }
        for text in &self.dropped_constraints {
            lines.push(format!("drop constraint {text}"));
        }
        for text in &self.added_foreign_keys {
            lines.push(format!("add foreign key {text}"));
        }
        for text in &self.dropped_foreign_keys {
            lines.push(format!("drop foreign key {text}"));
        }
        for name in &self.added_indexes {
            lines.push(format!("add index {name}"));
        }
        for name in &self.dropped_indexes {
            lines.push(format!("drop index {name}"));
        }
        for name in &self.changed_indexes {
            lines.push(format!("recreate index {name}"));
        }
        if lines.is_empty() && self.sql_differs {
            lines.push("sql text differs".to_owned());
        }
        lines
    }
}

/// The comparison result for two whole schemas.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchemaDiff {
    /// Tables identical on both sides.
    pub unchanged: Vec<String>,
    /// Tables only the desired schema has.
    pub new_tables: Vec<String>,
    /// Tables only the database has. Not counted as a difference.
    pub dropped_tables: Vec<String>,
    /// Per-table differences, keyed by lowercased table name.
    pub deltas: BTreeMap<String, TableDelta>,
}

impl SchemaDiff {
    /// True when the desired schema is fully present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.new_tables.is_empty() && self.deltas.is_empty()
    }

    /// True when at least one table must be rebuilt.
    #[must_use]
    pub fn requires_rebuild(&self) -> bool {
        self.deltas.values().any(TableDelta::requires_rebuild)
    }

    /// Tables whose differences can be applied in place.
    #[must_use]
    pub fn tables_alterable_in_place(&self) -> Vec<&TableDelta> {
        self.deltas
            .values()
            .filter(|d| d.alterable_in_place())
            .collect()
    }

    /// Tables that must be rebuilt.
    #[must_use]
    pub fn tables_requiring_rebuild(&self) -> Vec<&TableDelta> {
        self.deltas
            .values()
            .filter(|d| d.requires_rebuild())
            .collect()
    }

    /// A multi-line human-readable report.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut out = String::new();
        if self.is_empty() {
            out.push_str("database matches the spec");
            if !self.dropped_tables.is_empty() {
                let _ = write!(
                    out,
                    "; unspecified tables present: {}",
                    self.dropped_tables.join(", ")
                );
            }
            return out;
        }
        for name in &self.new_tables {
            let _ = writeln!(out, "create table {name}");
        }
        for delta in self.deltas.values() {
            let verb = if delta.requires_rebuild() {
                "rebuild"
            } else {
                "alter"
            };
            let _ = writeln!(out, "{verb} table {}:", delta.table);
            for line in delta.describe() {
                let _ = writeln!(out, "  {line}");
            }
        }
        if !self.dropped_tables.is_empty() {
            let _ = writeln!(
                out,
                "unspecified tables present: {}",
                self.dropped_tables.join(", ")
            );
        }
        out.trim_end().to_owned()
    }
}

/// Compares two schemas table by table.
#[must_use]
pub fn compare_schemas(
    desired: &DatabaseSchema,
    actual: &DatabaseSchema,
    options: CompareOptions,
) -> SchemaDiff {
    let mut diff = SchemaDiff::default();
    for table in desired.tables() {
        match actual.get(&table.name) {
            Some(actual_table) => {
                let delta = compare_tables(table, actual_table, options);
                if delta.is_same() {
                    diff.unchanged.push(table.name.clone());
                } else {
                    diff.deltas.insert(table.name.to_lowercase(), delta);
                }
            }
            None => diff.new_tables.push(table.name.clone()),
        }
    }
    for table in actual.tables() {
        if !desired.contains(&table.name) {
            diff.dropped_tables.push(table.name.clone());
        }
    }
    diff
}

/// Compares one table's two sides.
#[must_use]
pub fn compare_tables(
    desired: &TableSchema,
    actual: &TableSchema,
    options: CompareOptions,
) -> TableDelta {
    let mut delta = TableDelta {
        table: desired.name.clone(),
        ..TableDelta::default()
    };

    // Identical normalized SQL means identical schemas; skip the walk.
    let sql_same = create_sql_matches(desired, actual, options.order_matters)
        && index_sql_matches(desired, actual);
    if sql_same {
        return delta;
    }
    delta.sql_differs = true;

    compare_columns(desired, actual, options, &mut delta);
    compare_foreign_keys(desired, actual, &mut delta);
    compare_constraints(desired, actual, &mut delta);
    compare_explicit_indexes(desired, actual, &mut delta);
    delta
}

fn compare_columns(
    desired: &TableSchema,
    actual: &TableSchema,
    options: CompareOptions,
    delta: &mut TableDelta,
) {
    let mut claimed = vec![false; actual.columns.len()];
    let mut matches: Vec<(usize, Option<usize>)> = Vec::with_capacity(desired.columns.len());

    // Name matches claim their column first so a rename cannot steal one.
    for (di, column) in desired.columns.iter().enumerate() {
        let found = actual
            .columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(&column.name));
        if let Some(ai) = found {
            claimed[ai] = true;
        }
        matches.push((di, found));
    }
    for (di, found) in &mut matches {
        if found.is_some() {
            continue;
        }
        let column = &desired.columns[*di];
        for former in &column.former_names {
            let hit = actual
                .columns
                .iter()
                .enumerate()
                .find(|(ai, c)| !claimed[*ai] && c.name.eq_ignore_ascii_case(former))
                .map(|(ai, _)| ai);
            if let Some(ai) = hit {
                claimed[ai] = true;
                *found = Some(ai);
                delta
                    .renamed_columns
                    .push((actual.columns[ai].name.clone(), column.name.clone()));
                break;
            }
        }
    }

    for (di, found) in matches {
        let column = &desired.columns[di];
        let Some(ai) = found else {
            delta.added_columns.push(column.name.clone());
            continue;
        };
        let other = &actual.columns[ai];
        let renamed = !column.name.eq_ignore_ascii_case(&other.name);
        let fields: Vec<&'static str> = column
            .differences(other, options.order_matters)
            .into_iter()
            .filter(|f| !(renamed && *f == "name"))
            .collect();
        if !fields.is_empty() {
            delta.changed_columns.push(ColumnChange {
                name: column.name.clone(),
                fields,
                desired: column.describe(),
                actual: other.describe(),
            });
        }
    }
    for (ai, column) in actual.columns.iter().enumerate() {
        if !claimed[ai] {
            delta.dropped_columns.push(column.name.clone());
        }
    }
}

fn compare_foreign_keys(desired: &TableSchema, actual: &TableSchema, delta: &mut TableDelta) {
    let mut claimed = vec![false; actual.foreign_keys.len()];
    for fk in &desired.foreign_keys {
        let resolved_from = delta.actual_column_name(&fk.from).to_owned();
        let hit = actual
            .foreign_keys
            .iter()
            .enumerate()
            .find(|(ai, other)| !claimed[*ai] && fk.same_reference(&resolved_from, other))
            .map(|(ai, _)| ai);
        match hit {
            Some(ai) => claimed[ai] = true,
            None => delta.added_foreign_keys.push(fk.describe()),
        }
    }
    for (ai, fk) in actual.foreign_keys.iter().enumerate() {
        if !claimed[ai] {
            delta.dropped_foreign_keys.push(fk.describe());
        }
    }
}

fn compare_constraints(desired: &TableSchema, actual: &TableSchema, delta: &mut TableDelta) {
    let actual_records: Vec<&IndexRecord> = actual.constraint_records().collect();
    let mut claimed = vec![false; actual_records.len()];
    for record in desired.constraint_records() {
        // Constraint columns live under their database-side names until
        // the rename is applied.
        let mut translated = record.clone();
        translated.columns = record
            .columns
            .iter()
            .map(|c| delta.actual_column_name(c).to_owned())
            .collect();
        let hit = actual_records
            .iter()
            .enumerate()
            .find(|(ai, other)| !claimed[*ai] && translated.same_constraint(other))
            .map(|(ai, _)| ai);
        match hit {
            Some(ai) => claimed[ai] = true,
            None => delta.added_constraints.push(record.describe()),
        }
    }
    for (ai, record) in actual_records.iter().enumerate() {
        if !claimed[ai] {
            delta.dropped_constraints.push(record.describe());
        }
    }
}

fn compare_explicit_indexes(desired: &TableSchema, actual: &TableSchema, delta: &mut TableDelta) {
    let actual_indexes: Vec<&IndexRecord> = actual.explicit_indexes().collect();
    for index in desired.explicit_indexes() {
        let mut translated = index.clone();
        translated.columns = index
            .columns
            .iter()
            .map(|c| delta.actual_column_name(c).to_owned())
            .collect();
        match actual_indexes
            .iter()
            .find(|other| other.name.eq_ignore_ascii_case(&index.name))
        {
            Some(other) if translated.same_structure(other) => {}
            Some(_) => delta.changed_indexes.push(index.name.clone()),
            None => delta.added_indexes.push(index.name.clone()),
        }
    }
    for index in &actual_indexes {
        if !desired
            .explicit_indexes()
            .any(|i| i.name.eq_ignore_ascii_case(&index.name))
        {
            delta.dropped_indexes.push(index.name.clone());
        }
    }
}

fn create_sql_matches(desired: &TableSchema, actual: &TableSchema, order_matters: bool) -> bool {
    if desired.create_sql.eq_ignore_ascii_case(&actual.create_sql) {
        return true;
    }
    if order_matters {
        return false;
    }
    // Without significant order, bodies compare as sorted segment sets.
    let Some((desired_head, desired_body)) = head_and_body(&desired.create_sql) else {
        return false;
    };
    let Some((actual_head, actual_body)) = head_and_body(&actual.create_sql) else {
        return false;
    };
    desired_head.eq_ignore_ascii_case(actual_head)
        && sorted_segments(desired_body) == sorted_segments(actual_body)
}

fn index_sql_matches(desired: &TableSchema, actual: &TableSchema) -> bool {
    let mut a: Vec<String> = desired.index_sql.iter().map(|s| s.to_lowercase()).collect();
    let mut b: Vec<String> = actual.index_sql.iter().map(|s| s.to_lowercase()).collect();
    a.sort_unstable();
    b.sort_unstable();
    a == b
}

fn head_and_body(sql: &str) -> Option<(&str, &str)> {
    let open = sql.find('(')?;
    let close = sql.rfind(')')?;
    (open < close).then(|| (&sql[..open], &sql[open + 1..close]))
}

fn sorted_segments(body: &str) -> Vec<String> {
    let mut segments: Vec<String> = split_top_level_commas(body)
        .iter()
        .map(|s| s.to_lowercase())
        .collect();
    segments.sort_unstable();
    segments
}
