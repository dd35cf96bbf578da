//! Schema containers and the operations that work across whole tables:
//! SQL text normalization and dependency-ordered traversal.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};

use crate::error::{Result, SchemaError};
use crate::record::{ColumnRecord, ForeignKeyRecord, IndexOrigin, IndexRecord};

/// One table's parsed or introspected schema.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Table name with its declared casing.
    pub name: String,
    /// Columns in declaration order.
    pub columns: Vec<ColumnRecord>,
    /// Foreign key records, one per column pair.
    pub foreign_keys: Vec<ForeignKeyRecord>,
    /// Autoindices, CHECK constraints and explicit indexes.
    pub indices: Vec<IndexRecord>,
    /// Normalized `CREATE TABLE` statement.
    pub create_sql: String,
    /// Normalized `CREATE INDEX` statements for the explicit indexes.
    pub index_sql: Vec<String>,
}

impl TableSchema {
    /// An empty table schema with the given name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Looks up a column by name, ignoring case.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&ColumnRecord> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Looks up a column whose `[FORMERLY ...]` names include `name`.
    #[must_use]
    pub fn column_by_former_name(&self, name: &str) -> Option<&ColumnRecord> {
        let lower = name.to_lowercase();
        self.columns
            .iter()
            .find(|c| c.former_names.contains(&lower))
    }

    /// Column names in declaration order.
    #[must_use]
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Lowercased names of tables this table references.
    #[must_use]
    pub fn referenced_tables(&self) -> BTreeSet<String> {
        self.foreign_keys
            .iter()
            .map(|fk| fk.table.to_lowercase())
            .collect()
    }

    /// The explicit `CREATE INDEX` records.
    pub fn explicit_indexes(&self) -> impl Iterator<Item = &IndexRecord> {
        self.indices
            .iter()
            .filter(|i| i.origin == IndexOrigin::ExplicitIndex)
    }

    /// The constraint-backed records: primary key and unique autoindices
    /// plus CHECK constraints.
    pub fn constraint_records(&self) -> impl Iterator<Item = &IndexRecord> {
        self.indices
            .iter()
            .filter(|i| i.origin != IndexOrigin::ExplicitIndex)
    }
}

/// A whole database schema, keyed by lowercased table name.
///
/// Lookups ignore case because SQLite table names do; the display casing is
/// kept on each [`TableSchema`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSchema {
    tables: std::collections::BTreeMap<String, TableSchema>,
}

impl DatabaseSchema {
    /// An empty schema.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a table.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::DuplicateTable`] when a table with the same
    /// name (ignoring case) is already present.
    pub fn insert(&mut self, table: TableSchema) -> Result<()> {
        let key = table.name.to_lowercase();
        if self.tables.contains_key(&key) {
            return Err(SchemaError::DuplicateTable(table.name));
        }
        self.tables.insert(key, table);
        Ok(())
    }

    /// Looks up a table by name, ignoring case.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&TableSchema> {
        self.tables.get(&name.to_lowercase())
    }

    /// True when the named table exists, ignoring case.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tables.contains_key(&name.to_lowercase())
    }

    /// Iterates tables in name order.
    pub fn tables(&self) -> impl Iterator<Item = &TableSchema> {
        self.tables.values()
    }

    /// Display names of all tables, in name order.
    #[must_use]
    pub fn table_names(&self) -> Vec<&str> {
        self.tables.values().map(|t| t.name.as_str()).collect()
    }

    /// Number of tables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// True when the schema has no tables.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// Normalizes `CREATE TABLE` / `CREATE INDEX` text for comparison:
/// whitespace runs become single spaces, spaces around `,` `(` `)` are
/// dropped, `TEMP`/`TEMPORARY` and `IF NOT EXISTS` are removed, and the
/// created object's name loses any schema qualifier. Quoted strings are
/// left untouched.
#[must_use]
pub fn normalize_sql(sql: &str) -> String {
    let squeezed = squeeze_sql(sql);
    strip_create_noise(&squeezed)
}

fn squeeze_sql(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut in_quote = false;
    let mut pending_space = false;
    for c in sql.trim().chars() {
        if in_quote {
            out.push(c);
            if c == '\'' {
                in_quote = false;
            }
            continue;
        }
        match c {
            '\'' => {
                if pending_space && !out.is_empty() {
                    out.push(' ');
                }
                pending_space = false;
                in_quote = true;
                out.push(c);
            }
            c if c.is_whitespace() => pending_space = true,
            ',' | '(' | ')' => {
                // Delimiters absorb surrounding whitespace.
                pending_space = false;
                out.push(c);
            }
            _ => {
                if pending_space
                    && !out.is_empty()
                    && !matches!(out.chars().last(), Some(',' | '(' | ')'))
                {
                    out.push(' ');
                }
                pending_space = false;
                out.push(c);
            }
        }
    }
    out
}

fn strip_create_noise(sql: &str) -> String {
    let Some(body_start) = sql.find('(') else {
        return sql.to_owned();
    };
    let head = &sql[..body_start];
    let body = &sql[body_start..];
    let mut words: Vec<&str> = head.split(' ').filter(|w| !w.is_empty()).collect();
    words.retain(|w| !(w.eq_ignore_ascii_case("TEMP") || w.eq_ignore_ascii_case("TEMPORARY")));
    // Drop an IF NOT EXISTS triple wherever it appears in the head.
    if let Some(i) = words.windows(3).position(|w| {
        w[0].eq_ignore_ascii_case("IF")
            && w[1].eq_ignore_ascii_case("NOT")
            && w[2].eq_ignore_ascii_case("EXISTS")
    }) {
        words.drain(i..i + 3);
    }
    let mut out: Vec<String> = Vec::with_capacity(words.len());
    let mut strip_qualifier = false;
    for w in words {
        let mut word = w.to_owned();
        if strip_qualifier {
            if let Some(dot) = word.rfind('.') {
                word = word[dot + 1..].to_owned();
            }
            strip_qualifier = false;
        }
        if word.eq_ignore_ascii_case("TABLE") || word.eq_ignore_ascii_case("INDEX") {
            strip_qualifier = true;
        }
        out.push(word);
    }
    format!("{}{}", out.join(" "), body)
}

/// Splits SQL text at commas that sit outside parentheses and quoted
/// strings. Used to carve a `CREATE TABLE` body into its column and
/// constraint segments.
#[must_use]
pub fn split_top_level_commas(text: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0_usize;
    let mut in_quote = false;
    for c in text.chars() {
        if in_quote {
            current.push(c);
            if c == '\'' {
                in_quote = false;
            }
            continue;
        }
        match c {
            '\'' => {
                in_quote = true;
                current.push(c);
            }
            '(' => {
                depth += 1;
                current.push(c);
            }
            ')' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            ',' if depth == 0 => {
                parts.push(current.trim().to_owned());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        parts.push(current.trim().to_owned());
    }
    parts
}

/// Orders tables so every foreign-key parent comes before its children.
///
/// Tables in `ignore` (lowercased names) count as already present, as does
/// a self reference. Repeatedly sweeps the remaining tables; a full sweep
/// with no progress means the references cannot be satisfied.
///
/// # Errors
///
/// Returns [`SchemaError::DependencyCycle`] naming the tables that could
/// not be placed.
pub fn dependency_order<'a>(
    schema: &'a DatabaseSchema,
    ignore: &BTreeSet<String>,
) -> Result<Vec<&'a TableSchema>> {
    let mut pending: VecDeque<&TableSchema> = schema.tables().collect();
    let mut placed: BTreeSet<String> = ignore.iter().map(|n| n.to_lowercase()).collect();
    let mut ordered = Vec::with_capacity(pending.len());
    let mut since_progress = 0;
    while let Some(table) = pending.pop_front() {
        let key = table.name.to_lowercase();
        let ready = table
            .referenced_tables()
            .iter()
            .all(|parent| *parent == key || placed.contains(parent));
        if ready {
            placed.insert(key);
            ordered.push(table);
            since_progress = 0;
        } else {
            pending.push_back(table);
            since_progress += 1;
            if since_progress > pending.len() {
                let stuck = pending.iter().map(|t| t.name.clone()).collect();
                return Err(SchemaError::DependencyCycle { stuck });
            }
        }
    }
    Ok(ordered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::FkAction;

    fn table_with_fk(name: &str, parents: &[&str]) -> TableSchema {
        let mut t = TableSchema::new(name);
        for (i, p) in parents.iter().enumerate() {
            let mut fk = ForeignKeyRecord::new(*p, format!("{p}Id"));
            fk.id = i64::try_from(i).unwrap();
            fk.on_delete = FkAction::Cascade;
            t.foreign_keys.push(fk);
        }
        t
    }

    #[test]
    fn normalize_collapses_and_strips() {
        assert_eq!(
            normalize_sql("CREATE TABLE  IF NOT EXISTS  main.T (\n  A INTEGER ,  B TEXT )"),
            "CREATE TABLE T(A INTEGER,B TEXT)"
        );
        assert_eq!(
            normalize_sql("create temporary table T(A)"),
            "create table T(A)"
        );
        assert_eq!(
            normalize_sql("CREATE UNIQUE INDEX main.idx ON T ( A , B )"),
            "CREATE UNIQUE INDEX idx ON T(A,B)"
        );
    }

    #[test]
    fn normalize_preserves_quoted_text() {
        assert_eq!(
            normalize_sql("CREATE TABLE T(A TEXT DEFAULT 'two  spaces, (ok)')"),
            "CREATE TABLE T(A TEXT DEFAULT 'two  spaces, (ok)')"
        );
    }

    #[test]
    fn top_level_comma_split_respects_nesting() {
        let body = "A INTEGER,B TEXT DEFAULT 'a,b',PRIMARY KEY(A,B),CHECK (X IN (1, 2))";
        assert_eq!(
            split_top_level_commas(body),
            vec![
                "A INTEGER".to_owned(),
                "B TEXT DEFAULT 'a,b'".to_owned(),
                "PRIMARY KEY(A,B)".to_owned(),
                "CHECK (X IN (1, 2))".to_owned(),
            ]
        );
    }

    #[test]
    fn case_insensitive_lookups() {
        let mut schema = DatabaseSchema::new();
        schema.insert(TableSchema::new("Players")).unwrap();
        assert!(schema.get("players").is_some());
        assert!(schema.get("PLAYERS").is_some());
        assert!(schema.contains("pLaYeRs"));

        let dup = schema.insert(TableSchema::new("PLAYERS"));
        assert!(matches!(dup, Err(SchemaError::DuplicateTable(_))));
    }

    #[test]
    fn dependency_order_places_parents_first() {
        let mut schema = DatabaseSchema::new();
        // Alphabetical order would try Bills before Users.
        schema.insert(table_with_fk("Bills", &["Users"])).unwrap();
        schema
            .insert(table_with_fk("Audits", &["Bills", "Users"]))
            .unwrap();
        schema.insert(table_with_fk("Users", &[])).unwrap();

        let order = dependency_order(&schema, &BTreeSet::new()).unwrap();
        let names: Vec<&str> = order.iter().map(|t| t.name.as_str()).collect();
        let pos = |n: &str| names.iter().position(|x| *x == n).unwrap();
        assert!(pos("Users") < pos("Bills"));
        assert!(pos("Bills") < pos("Audits"));
    }

    #[test]
    fn self_reference_is_allowed() {
        let mut schema = DatabaseSchema::new();
        schema
            .insert(table_with_fk("Employees", &["Employees"]))
            .unwrap();
        let order = dependency_order(&schema, &BTreeSet::new()).unwrap();
        assert_eq!(order.len(), 1);
    }

    #[test]
    fn unresolvable_references_name_the_stuck_tables() {
        let mut schema = DatabaseSchema::new();
        schema.insert(table_with_fk("A", &["B"])).unwrap();
        schema.insert(table_with_fk("B", &["A"])).unwrap();
        schema.insert(table_with_fk("C", &[])).unwrap();

        let err = dependency_order(&schema, &BTreeSet::new()).unwrap_err();
        match err {
            SchemaError::DependencyCycle { stuck } => {
                assert!(stuck.contains(&"A".to_owned()));
                assert!(stuck.contains(&"B".to_owned()));
                assert!(!stuck.contains(&"C".to_owned()));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn ignored_parents_count_as_placed() {
        let mut schema = DatabaseSchema::new();
        schema.insert(table_with_fk("Scores", &["Players"])).unwrap();
        let ignore: BTreeSet<String> = ["players".to_owned()].into();
        let order = dependency_order(&schema, &ignore).unwrap();
        assert_eq!(order.len(), 1);
    }
}
