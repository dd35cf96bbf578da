//! Parses a declarative database spec into normalized schema records.
//!
//! Each spec line is matched by the [`Grammar`] and the resulting events
//! are folded into [`ColumnRecord`]s, [`ForeignKeyRecord`]s and
//! [`IndexRecord`]s shaped exactly the way SQLite's pragmas report them.
//! That includes the quirks: autoindex records are synthesized for PRIMARY
//! KEY and UNIQUE constraints with SQLite's 1-based naming, except for a
//! single INTEGER-affinity primary key column, which aliases the rowid and
//! gets none; `DEFAULT NULL` is recorded as no default; a parenthesized
//! default loses its outer parentheses.

use tracing::debug;

use crate::error::{Result, SchemaError};
use crate::grammar::{Grammar, MatchEvent};
use crate::model::{normalize_sql, DatabaseSchema, TableSchema};
use crate::record::{ColumnRecord, DeclaredType, ForeignKeyRecord, IndexOrigin, IndexRecord};
use crate::spec::DatabaseSpec;

/// Parses table specs into [`TableSchema`]s.
#[derive(Debug, Clone, Default)]
pub struct SpecParser {
    grammar: Grammar,
}

impl SpecParser {
    /// A parser with a freshly compiled grammar.
    #[must_use]
    pub fn new() -> Self {
        Self {
            grammar: Grammar::new(),
        }
    }

    /// The underlying grammar.
    #[must_use]
    pub fn grammar(&self) -> &Grammar {
        &self.grammar
    }

    /// Parses every table of a spec into one [`DatabaseSchema`].
    ///
    /// # Errors
    ///
    /// Fails on the first line no grammar path accepts, on constraint
    /// resolution problems, or on duplicate table names.
    pub fn parse_spec(&self, spec: &DatabaseSpec) -> Result<DatabaseSchema> {
        let mut schema = DatabaseSchema::new();
        for (name, lines) in spec.tables() {
            schema.insert(self.parse_table(name, lines)?)?;
        }
        Ok(schema)
    }

    /// Parses one table's spec lines.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::Grammar`] with the unmatched tail when a line
    /// does not parse, [`SchemaError::AmbiguousConstraint`] when a
    /// table-level constraint cannot resolve a column name, and
    /// [`SchemaError::ForeignKeyArity`] when foreign key column lists
    /// disagree in length.
    pub fn parse_table(&self, name: &str, lines: &[String]) -> Result<TableSchema> {
        let mut fold = Fold::new(name);
        for line in lines {
            let events = self
                .grammar
                .match_line(line)
                .map_err(|farthest| SchemaError::Grammar {
                    table: name.to_owned(),
                    fragment: line[farthest..].trim().to_owned(),
                    line: line.clone(),
                })?;
            let stripped = self.grammar.strip_former_names(line).trim().to_owned();
            fold.line(&stripped, events)?;
        }
        fold.finish()
    }
}

/// Accumulates one table's records while its lines are folded in order.
struct Fold<'a> {
    name: &'a str,
    table: TableSchema,
    /// Stripped lines destined for the `CREATE TABLE` body.
    body: Vec<String>,
    /// How many PRIMARY KEY / UNIQUE autoindices exist so far; SQLite
    /// numbers `sqlite_autoindex_{table}_{n}` from this count.
    autoindex_count: usize,
    index_seq: i64,
    next_fk_id: i64,
    next_position: i64,
}

impl<'a> Fold<'a> {
    fn new(name: &'a str) -> Self {
        Self {
            name,
            table: TableSchema::new(name),
            body: Vec::new(),
            autoindex_count: 0,
            index_seq: 0,
            next_fk_id: 0,
            next_position: 0,
        }
    }

    fn line(&mut self, stripped: &str, events: Vec<MatchEvent>) -> Result<()> {
        let mut events = events.into_iter();
        match events.next() {
            Some(MatchEvent::ColumnHead { name, decl_type }) => {
                self.column(stripped, &name, decl_type.as_deref(), events)
            }
            Some(MatchEvent::TablePrimaryKey(columns)) => {
                self.body.push(stripped.to_owned());
                self.table_primary_key(&columns)
            }
            Some(MatchEvent::TableUnique(columns)) => {
                self.body.push(stripped.to_owned());
                self.table_unique(&columns)
            }
            Some(MatchEvent::Check { expr }) => {
                self.body.push(stripped.to_owned());
                self.push_check(&expr);
                Ok(())
            }
            Some(MatchEvent::TableForeignKey(columns)) => {
                self.body.push(stripped.to_owned());
                self.table_foreign_key(stripped, &columns, events)
            }
            Some(MatchEvent::CreateIndex {
                unique,
                name,
                table,
                columns,
                predicate,
            }) => self.create_index(stripped, unique, &name, &table, columns, predicate),
            Some(other) => Err(SchemaError::Spec(format!(
                "unexpected {other:?} at the start of a line in table {}",
                self.name
            ))),
            None => {
                if !stripped.is_empty() {
                    debug!(table = self.name, line = stripped, "line matched nothing");
                }
                Ok(())
            }
        }
    }

    fn column(
        &mut self,
        stripped: &str,
        name: &str,
        decl_type: Option<&str>,
        events: impl Iterator<Item = MatchEvent>,
    ) -> Result<()> {
        let Some(decl_type) = decl_type.and_then(DeclaredType::parse) else {
            return Err(SchemaError::Spec(format!(
                "column {name} in table {} has no declared type",
                self.name
            )));
        };
        let mut column = ColumnRecord {
            position: self.next_position,
            name: name.to_owned(),
            decl_type: Some(decl_type),
            source_text: stripped.to_owned(),
            ..ColumnRecord::default()
        };
        self.next_position += 1;

        let mut unique = false;
        let mut check = None;
        let mut fk: Option<ForeignKeyRecord> = None;
        for event in events {
            match event {
                MatchEvent::PrimaryKey => column.pk_rank = 1,
                MatchEvent::NotNull => column.not_null = true,
                MatchEvent::Unique => unique = true,
                MatchEvent::Check { expr } => check = Some(expr),
                MatchEvent::Default { value } => column.default_value = normalize_default(&value),
                MatchEvent::FormerNames(names) => column.former_names = names,
                MatchEvent::References { table, columns } => {
                    if columns.len() > 1 {
                        return Err(SchemaError::ForeignKeyArity {
                            table: self.name.to_owned(),
                            from: column.name.clone(),
                            to: columns.join(", "),
                        });
                    }
                    let mut record = ForeignKeyRecord::new(table, column.name.clone());
                    record.id = self.next_fk_id;
                    record.to = columns.into_iter().next();
                    record.source_text = stripped.to_owned();
                    fk = Some(record);
                }
                MatchEvent::OnDelete(action) => {
                    if let Some(record) = fk.as_mut() {
                        record.on_delete = action;
                    }
                }
                MatchEvent::OnUpdate(action) => {
                    if let Some(record) = fk.as_mut() {
                        record.on_update = action;
                    }
                }
                MatchEvent::MatchMode(mode) => {
                    // SQLite parses MATCH but ignores it; the pragma always
                    // reports NONE, so the record keeps the default.
                    debug!(table = self.name, column = %column.name, mode, "ignoring MATCH clause");
                }
                other => {
                    debug!(table = %self.name, ?other, "ignoring event in column definition");
                }
            }
        }

        // Record order follows constraint declaration order within the line.
        if column.pk_rank > 0 && !column.is_integer_primary_key() {
            self.push_autoindex(IndexOrigin::PrimaryKey, vec![column.name.clone()]);
        }
        if unique {
            self.push_autoindex(IndexOrigin::UniqueConstraint, vec![column.name.clone()]);
        }
        if let Some(expr) = check {
            self.push_check(&expr);
        }
        if let Some(record) = fk {
            self.next_fk_id += 1;
            self.table.foreign_keys.push(record);
        }
        self.body.push(stripped.to_owned());
        self.table.columns.push(column);
        Ok(())
    }

    fn table_primary_key(&mut self, columns: &[String]) -> Result<()> {
        let resolved = self.resolve_columns("PRIMARY KEY", columns)?;
        for (rank, name) in (1..).zip(&resolved) {
            if let Some(column) = self
                .table
                .columns
                .iter_mut()
                .find(|c| c.name.eq_ignore_ascii_case(name))
            {
                column.pk_rank = rank;
            }
        }
        let rowid_alias = resolved.len() == 1
            && self
                .table
                .columns
                .iter()
                .any(|c| c.name.eq_ignore_ascii_case(&resolved[0]) && c.is_integer_primary_key());
        if !rowid_alias {
            self.push_autoindex(IndexOrigin::PrimaryKey, resolved);
        }
        Ok(())
    }

    fn table_unique(&mut self, columns: &[String]) -> Result<()> {
        let resolved = self.resolve_columns("UNIQUE", columns)?;
        self.push_autoindex(IndexOrigin::UniqueConstraint, resolved);
        Ok(())
    }

    fn table_foreign_key(
        &mut self,
        stripped: &str,
        columns: &[String],
        events: impl Iterator<Item = MatchEvent>,
    ) -> Result<()> {
        let mut parent: Option<(String, Vec<String>)> = None;
        let mut on_delete = None;
        let mut on_update = None;
        for event in events {
            match event {
                MatchEvent::References {
                    table,
                    columns: parent_columns,
                } => parent = Some((table, parent_columns)),
                MatchEvent::OnDelete(action) => on_delete = Some(action),
                MatchEvent::OnUpdate(action) => on_update = Some(action),
                MatchEvent::MatchMode(mode) => {
                    debug!(table = self.name, mode, "ignoring MATCH clause");
                }
                other => {
                    debug!(table = self.name, ?other, "ignoring event in foreign key");
                }
            }
        }
        let Some((parent_table, parent_columns)) = parent else {
            return Err(SchemaError::Spec(format!(
                "FOREIGN KEY clause in table {} has no REFERENCES",
                self.name
            )));
        };
        if !parent_columns.is_empty() && parent_columns.len() != columns.len() {
            return Err(SchemaError::ForeignKeyArity {
                table: self.name.to_owned(),
                from: columns.join(", "),
                to: parent_columns.join(", "),
            });
        }
        let id = self.next_fk_id;
        self.next_fk_id += 1;
        for (seq, (i, from)) in (0i64..).zip(columns.iter().enumerate()) {
            let mut record = ForeignKeyRecord::new(parent_table.clone(), from.clone());
            record.id = id;
            record.seq = seq;
            record.to = parent_columns.get(i).cloned();
            record.on_delete = on_delete.unwrap_or_default();
            record.on_update = on_update.unwrap_or_default();
            record.source_text = stripped.to_owned();
            self.table.foreign_keys.push(record);
        }
        Ok(())
    }

    fn create_index(
        &mut self,
        stripped: &str,
        unique: bool,
        name: &str,
        table: &str,
        columns: Vec<String>,
        predicate: Option<String>,
    ) -> Result<()> {
        if !table.eq_ignore_ascii_case(self.name) {
            return Err(SchemaError::Spec(format!(
                "index {name} declared under table {} targets table {table}",
                self.name
            )));
        }
        let mut record = IndexRecord::new(IndexOrigin::ExplicitIndex);
        record.seq = self.index_seq;
        self.index_seq += 1;
        record.name = name.to_owned();
        record.unique = unique;
        record.columns = columns;
        record.partial = predicate.is_some();
        record.predicate = predicate;
        record.source_text = stripped.to_owned();
        self.table.index_sql.push(normalize_sql(stripped));
        self.table.indices.push(record);
        Ok(())
    }

    /// Resolves constraint column names against the columns declared so
    /// far, returning their declared casing.
    fn resolve_columns(&self, constraint: &str, columns: &[String]) -> Result<Vec<String>> {
        columns
            .iter()
            .map(|name| {
                let matches: Vec<&ColumnRecord> = self
                    .table
                    .columns
                    .iter()
                    .filter(|c| c.name.eq_ignore_ascii_case(name))
                    .collect();
                match matches.as_slice() {
                    [column] => Ok(column.name.clone()),
                    _ => Err(SchemaError::AmbiguousConstraint {
                        table: self.name.to_owned(),
                        constraint: constraint.to_owned(),
                        column: name.clone(),
                        matches: matches.len(),
                    }),
                }
            })
            .collect()
    }

    fn push_autoindex(&mut self, origin: IndexOrigin, columns: Vec<String>) {
        self.autoindex_count += 1;
        let mut record = IndexRecord::new(origin);
        record.seq = self.index_seq;
        self.index_seq += 1;
        record.name = IndexRecord::autoindex_name(self.name, self.autoindex_count);
        record.columns = columns;
        self.table.indices.push(record);
    }

    fn push_check(&mut self, expr: &str) {
        let mut record = IndexRecord::new(IndexOrigin::CheckConstraint);
        record.seq = self.index_seq;
        self.index_seq += 1;
        record.predicate = Some(expr.to_owned());
        self.table.indices.push(record);
    }

    fn finish(self) -> Result<TableSchema> {
        if self.table.columns.is_empty() {
            return Err(SchemaError::Spec(format!(
                "table {} has no columns",
                self.name
            )));
        }
        let mut table = self.table;
        table.create_sql = normalize_sql(&format!(
            "CREATE TABLE {} ({})",
            table.name,
            self.body.join(", ")
        ));
        Ok(table)
    }
}

/// Maps spec default text to what `pragma table_info` will report: `NULL`
/// becomes no default and an expression loses its outer parentheses.
fn normalize_default(value: &str) -> Option<String> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("NULL") {
        return None;
    }
    if let Some(inner) = value.strip_prefix('(').and_then(|v| v.strip_suffix(')')) {
        return Some(inner.trim().to_owned());
    }
    Some(value.to_owned())
}
