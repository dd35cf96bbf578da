//! Normalized schema records.
//!
//! These mirror what SQLite's `table_info`, `foreign_key_list` and
//! `index_list` pragmas report, so a schema parsed from a spec and a schema
//! read from a live database land in the same shape and can be compared
//! field by field. CHECK constraints get a record here too even though no
//! pragma reports them; they are recovered from `CREATE TABLE` text.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A declared column type, split into its name and numeric parameters.
///
/// `CHAR(32)` parses to name `CHAR` with params `[32]`; the name may be any
/// identifier sequence (SQLite accepts arbitrary type names and assigns
/// affinity by substring rules).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclaredType {
    /// Type name as written, e.g. `INTEGER` or `DOUBLE PRECISION`.
    pub name: String,
    /// Parenthesized numeric parameters, e.g. `[10, -2]` for `DECIMAL(10,-2)`.
    pub params: Vec<i64>,
}

impl DeclaredType {
    /// Parses a declared type from its SQL text. Returns `None` for empty
    /// text (a typeless column, which live databases may contain).
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        let (name, params) = match text.find('(') {
            Some(open) => {
                let inner = text[open + 1..].trim_end().trim_end_matches(')');
                let params = inner
                    .split(',')
                    .filter_map(|p| p.trim().parse::<i64>().ok())
                    .collect();
                (text[..open].trim(), params)
            }
            None => (text, Vec::new()),
        };
        Some(Self {
            name: name.to_owned(),
            params,
        })
    }

    /// True when the two types are the same ignoring name case.
    #[must_use]
    pub fn equivalent(&self, other: &Self) -> bool {
        self.name.eq_ignore_ascii_case(&other.name) && self.params == other.params
    }

    /// True for type names SQLite maps to INTEGER affinity.
    ///
    /// A single column of integer affinity declared `PRIMARY KEY` becomes
    /// the rowid alias and gets no autoindex.
    #[must_use]
    pub fn integer_affinity(&self) -> bool {
        self.name.to_ascii_uppercase().contains("INT")
    }
}

impl fmt::Display for DeclaredType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.params.is_empty() {
            let params: Vec<String> = self.params.iter().map(ToString::to_string).collect();
            write!(f, "({})", params.join(","))?;
        }
        Ok(())
    }
}

/// Referential action on a foreign key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FkAction {
    /// `NO ACTION` (SQLite's default).
    #[default]
    NoAction,
    /// `SET NULL`.
    SetNull,
    /// `SET DEFAULT`.
    SetDefault,
    /// `CASCADE`.
    Cascade,
    /// `RESTRICT`.
    Restrict,
}

impl FkAction {
    /// Parses the action text as the pragma reports it (any case, any
    /// internal whitespace). Unrecognized text falls back to `NO ACTION`.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let words: Vec<String> = text
            .split_whitespace()
            .map(str::to_ascii_uppercase)
            .collect();
        match words.join(" ").as_str() {
            "SET NULL" => Self::SetNull,
            "SET DEFAULT" => Self::SetDefault,
            "CASCADE" => Self::Cascade,
            "RESTRICT" => Self::Restrict,
            _ => Self::NoAction,
        }
    }

    /// The SQL spelling of the action.
    #[must_use]
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::NoAction => "NO ACTION",
            Self::SetNull => "SET NULL",
            Self::SetDefault => "SET DEFAULT",
            Self::Cascade => "CASCADE",
            Self::Restrict => "RESTRICT",
        }
    }
}

impl fmt::Display for FkAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// Where an index record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexOrigin {
    /// Autoindex backing a `PRIMARY KEY` (pragma origin `pk`).
    PrimaryKey,
    /// Autoindex backing a `UNIQUE` constraint (pragma origin `u`).
    UniqueConstraint,
    /// Explicit `CREATE INDEX` (pragma origin `c`).
    ExplicitIndex,
    /// `CHECK` constraint. Not reported by any pragma; recovered from the
    /// stored `CREATE TABLE` text.
    CheckConstraint,
}

impl IndexOrigin {
    /// Maps a pragma `origin` value.
    #[must_use]
    pub fn from_pragma(origin: &str) -> Self {
        match origin {
            "pk" => Self::PrimaryKey,
            "u" => Self::UniqueConstraint,
            _ => Self::ExplicitIndex,
        }
    }

    /// True for the origins SQLite names autoindices after.
    #[must_use]
    pub const fn counts_toward_autoindex(self) -> bool {
        matches!(self, Self::PrimaryKey | Self::UniqueConstraint)
    }
}

impl fmt::Display for IndexOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::PrimaryKey => "pk",
            Self::UniqueConstraint => "u",
            Self::ExplicitIndex => "c",
            Self::CheckConstraint => "check",
        };
        f.write_str(s)
    }
}

/// One column of a table, as `pragma table_info` reports it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ColumnRecord {
    /// Zero-based column ordinal (`cid`).
    pub position: i64,
    /// Column name.
    pub name: String,
    /// Declared type, `None` for typeless columns.
    pub decl_type: Option<DeclaredType>,
    /// `NOT NULL` present.
    pub not_null: bool,
    /// Default value text. `None` when absent or literally `NULL`; a
    /// parenthesized expression is stored without its outer parentheses,
    /// matching the pragma; quoted strings keep their quotes.
    pub default_value: Option<String>,
    /// 1-based rank within the primary key, 0 when not part of it.
    pub pk_rank: i64,
    /// Lowercased prior names from a `[FORMERLY ...]` suffix. Only ever
    /// populated on the spec side.
    pub former_names: Vec<String>,
    /// The spec line (or fragment) this record came from, with any
    /// `[FORMERLY ...]` suffix removed.
    pub source_text: String,
}

impl ColumnRecord {
    /// True when this column alone is an INTEGER-affinity primary key, the
    /// case where SQLite aliases it to the rowid and creates no autoindex.
    #[must_use]
    pub fn is_integer_primary_key(&self) -> bool {
        self.pk_rank > 0 && self.decl_type.as_ref().is_some_and(DeclaredType::integer_affinity)
    }

    /// A one-line description for diff reporting. Introspected records have
    /// no source text, so one is reassembled from the fields.
    #[must_use]
    pub fn describe(&self) -> String {
        if !self.source_text.is_empty() {
            return self.source_text.clone();
        }
        let mut out = self.name.clone();
        if let Some(decl_type) = &self.decl_type {
            out.push(' ');
            out.push_str(&decl_type.to_string());
        }
        if self.pk_rank > 0 {
            out.push_str(" PRIMARY KEY");
        }
        if self.not_null {
            out.push_str(" NOT NULL");
        }
        if let Some(default) = &self.default_value {
            out.push_str(" DEFAULT ");
            out.push_str(default);
        }
        out
    }

    /// Lists the fields on which two column records disagree.
    ///
    /// Identifier and value text compares ignore case. `former_names` and
    /// `source_text` never participate; `position` only when
    /// `order_matters`.
    #[must_use]
    pub fn differences(&self, other: &Self, order_matters: bool) -> Vec<&'static str> {
        let mut diff = Vec::new();
        if !self.name.eq_ignore_ascii_case(&other.name) {
            diff.push("name");
        }
        let types_match = match (&self.decl_type, &other.decl_type) {
            (Some(a), Some(b)) => a.equivalent(b),
            (None, None) => true,
            _ => false,
        };
        if !types_match {
            diff.push("decl_type");
        }
        if self.not_null != other.not_null {
            diff.push("not_null");
        }
        let defaults_match = match (&self.default_value, &other.default_value) {
            (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
            (None, None) => true,
            _ => false,
        };
        if !defaults_match {
            diff.push("default_value");
        }
        if self.pk_rank != other.pk_rank {
            diff.push("pk_rank");
        }
        if order_matters && self.position != other.position {
            diff.push("position");
        }
        diff
    }
}

/// One column pair of a foreign key, as `pragma foreign_key_list` reports
/// it. A multi-column constraint expands to one record per pair sharing an
/// `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeyRecord {
    /// Constraint ordinal within the table.
    pub id: i64,
    /// Column ordinal within the constraint.
    pub seq: i64,
    /// Referenced parent table.
    pub table: String,
    /// Local column.
    pub from: String,
    /// Parent column; `None` when the clause omitted it and SQLite resolves
    /// it to the parent's primary key.
    pub to: Option<String>,
    /// Action on parent update.
    pub on_update: FkAction,
    /// Action on parent delete.
    pub on_delete: FkAction,
    /// `MATCH` clause text, `NONE` by default.
    pub match_mode: String,
    /// Spec line that produced this record, empty for introspected records.
    pub source_text: String,
}

impl ForeignKeyRecord {
    /// A fresh record targeting `table` with SQLite's defaults.
    #[must_use]
    pub fn new(table: impl Into<String>, from: impl Into<String>) -> Self {
        Self {
            id: 0,
            seq: 0,
            table: table.into(),
            from: from.into(),
            to: None,
            on_update: FkAction::NoAction,
            on_delete: FkAction::NoAction,
            match_mode: "NONE".to_owned(),
            source_text: String::new(),
        }
    }

    /// True when both records describe the same reference, ignoring `id`
    /// and `seq` renumbering and identifier case. `resolved_from` is the
    /// local column name of `self` after rename-map translation.
    #[must_use]
    pub fn same_reference(&self, resolved_from: &str, other: &Self) -> bool {
        let to_match = match (&self.to, &other.to) {
            (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
            (None, None) => true,
            _ => false,
        };
        self.table.eq_ignore_ascii_case(&other.table)
            && resolved_from.eq_ignore_ascii_case(&other.from)
            && to_match
            && self.on_update == other.on_update
            && self.on_delete == other.on_delete
            && self.match_mode.eq_ignore_ascii_case(&other.match_mode)
    }

    /// A one-line description for diff reporting.
    #[must_use]
    pub fn describe(&self) -> String {
        if self.source_text.is_empty() {
            let target = self.to.as_deref().unwrap_or("<primary key>");
            format!(
                "FOREIGN KEY ({}) REFERENCES {} ({}) ON UPDATE {} ON DELETE {}",
                self.from, self.table, target, self.on_update, self.on_delete
            )
        } else {
            self.source_text.clone()
        }
    }
}

/// One index or constraint of a table, as `pragma index_list` reports it,
/// extended with the indexed columns and any predicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexRecord {
    /// Ordinal within the table's index list.
    pub seq: i64,
    /// Index name; synthesized for autoindices, empty for CHECK records.
    pub name: String,
    /// Enforces uniqueness.
    pub unique: bool,
    /// What created this record.
    pub origin: IndexOrigin,
    /// Indexed column names in order; empty for CHECK records.
    pub columns: Vec<String>,
    /// `true` when a partial-index `WHERE` clause is present.
    pub partial: bool,
    /// Partial-index `WHERE` expression, or the CHECK expression.
    pub predicate: Option<String>,
    /// Spec line that produced this record, empty for introspected records.
    pub source_text: String,
}

impl IndexRecord {
    /// A fresh record with the given origin.
    #[must_use]
    pub fn new(origin: IndexOrigin) -> Self {
        Self {
            seq: 0,
            name: String::new(),
            unique: origin.counts_toward_autoindex(),
            origin,
            columns: Vec::new(),
            partial: false,
            predicate: None,
            source_text: String::new(),
        }
    }

    /// The name SQLite gives the autoindex backing a PRIMARY KEY or UNIQUE
    /// constraint. Ordinals are 1-based and count only such constraints,
    /// in declaration order.
    #[must_use]
    pub fn autoindex_name(table: &str, ordinal: usize) -> String {
        format!("sqlite_autoindex_{table}_{ordinal}")
    }

    /// True when two constraint records (autoindex or CHECK) are the same
    /// structurally: origin, uniqueness, columns and predicate, ignoring
    /// `seq`, the synthesized name and identifier case.
    #[must_use]
    pub fn same_constraint(&self, other: &Self) -> bool {
        self.origin == other.origin
            && self.unique == other.unique
            && columns_match(&self.columns, &other.columns)
            && predicates_match(self.predicate.as_deref(), other.predicate.as_deref())
    }

    /// True when two explicit indexes with the same name also agree on
    /// structure (uniqueness, columns, predicate).
    #[must_use]
    pub fn same_structure(&self, other: &Self) -> bool {
        self.unique == other.unique
            && columns_match(&self.columns, &other.columns)
            && self.partial == other.partial
            && predicates_match(self.predicate.as_deref(), other.predicate.as_deref())
    }

    /// A one-line description for diff reporting.
    #[must_use]
    pub fn describe(&self) -> String {
        if !self.source_text.is_empty() {
            return self.source_text.clone();
        }
        match self.origin {
            IndexOrigin::PrimaryKey => format!("PRIMARY KEY ({})", self.columns.join(", ")),
            IndexOrigin::UniqueConstraint => format!("UNIQUE ({})", self.columns.join(", ")),
            IndexOrigin::CheckConstraint => {
                format!("CHECK ({})", self.predicate.as_deref().unwrap_or_default())
            }
            IndexOrigin::ExplicitIndex => format!("INDEX {}", self.name),
        }
    }
}

fn columns_match(a: &[String], b: &[String]) -> bool {
    a.len() == b.len()
        && a.iter()
            .zip(b.iter())
            .all(|(x, y)| x.eq_ignore_ascii_case(y))
}

fn predicates_match(a: Option<&str>, b: Option<&str>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => squeeze(a).eq_ignore_ascii_case(&squeeze(b)),
        (None, None) => true,
        _ => false,
    }
}

/// Collapses whitespace runs so expression text compares reliably.
fn squeeze(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
