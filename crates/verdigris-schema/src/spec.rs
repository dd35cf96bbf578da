//! The declarative database spec: one list of spec strings per table.
//!
//! Each string is a single column definition, table constraint or
//! `CREATE INDEX` statement; the `CREATE TABLE` prefix is implicit in the
//! structure. The string boundaries carry meaning. The parser relies on one
//! definition per string to know where a column definition ends, so specs
//! are lists of strings rather than full DDL text.
//!
//! Specs are plain data: built in code with [`DatabaseSpec::table`] or
//! loaded from a JSON file mapping table names to string lists. Nothing is
//! ever evaluated.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{Result, SchemaError};

/// Keywords that start a table constraint or index statement rather than a
/// column definition.
const NON_COLUMN_STARTERS: [&str; 6] = [
    "FOREIGN",
    "UNIQUE",
    "CONSTRAINT",
    "PRIMARY",
    "CHECK",
    "CREATE",
];

/// A desired database schema as declared data.
///
/// ```
/// use verdigris_schema::DatabaseSpec;
///
/// let spec = DatabaseSpec::new()
///     .table("Players", [
///         "Id CHAR(32) PRIMARY KEY",
///         "Name TEXT NOT NULL",
///         "ScorePerPlayer INTEGER DEFAULT 25000",
///     ])
///     .table("Scores", [
///         "PlayerId CHAR(32) REFERENCES Players(Id) ON DELETE CASCADE",
///         "Score INTEGER",
///     ]);
/// assert_eq!(spec.len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatabaseSpec {
    tables: BTreeMap<String, Vec<String>>,
}

impl DatabaseSpec {
    /// An empty spec.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a table, builder style. Replaces any previous entry with the
    /// same name.
    #[must_use]
    pub fn table<I, S>(mut self, name: impl Into<String>, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.insert(name, lines);
        self
    }

    /// Adds a table.
    pub fn insert<I, S>(&mut self, name: impl Into<String>, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tables
            .insert(name.into(), lines.into_iter().map(Into::into).collect());
    }

    /// Parses a spec from JSON text: an object mapping table names to
    /// arrays of spec strings.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::Json`] on malformed JSON and
    /// [`SchemaError::Spec`] when a table name is not a plain identifier.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let spec: Self = serde_json::from_str(text)?;
        spec.validate()?;
        Ok(spec)
    }

    /// Loads a spec from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::Io`] when the file cannot be read, plus the
    /// errors of [`Self::from_json_str`].
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Number of tables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// True when no tables are declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// The spec lines for a table, if declared.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.tables.get(name).map(Vec::as_slice)
    }

    /// Iterates tables in name order.
    pub fn tables(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.tables.iter().map(|(n, l)| (n.as_str(), l.as_slice()))
    }

    /// The declared column names of a table, in declaration order: the
    /// first word of every line that is not a table constraint or index
    /// statement. Unknown tables yield an empty list.
    #[must_use]
    pub fn column_names(&self, table: &str) -> Vec<String> {
        self.get(table)
            .unwrap_or_default()
            .iter()
            .filter_map(|line| {
                let first = line.split_whitespace().next()?;
                let first = first.trim_matches(|c: char| !c.is_alphanumeric() && c != '_');
                if first.is_empty()
                    || NON_COLUMN_STARTERS
                        .iter()
                        .any(|kw| first.eq_ignore_ascii_case(kw))
                {
                    None
                } else {
                    Some(first.to_owned())
                }
            })
            .collect()
    }

    fn validate(&self) -> Result<()> {
        for name in self.tables.keys() {
            let plain =
                !name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '_');
            if !plain {
                return Err(SchemaError::Spec(format!(
                    "table name {name:?} is not a plain identifier"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_and_lookup() {
        let spec = DatabaseSpec::new().table("T", ["A INTEGER", "B TEXT"]);
        assert_eq!(spec.get("T").map(<[String]>::len), Some(2));
        assert!(spec.get("missing").is_none());
    }

    #[test]
    fn json_round_trip() {
        let text = r#"{
            "Players": ["Id CHAR(32) PRIMARY KEY", "Name TEXT NOT NULL"],
            "Scores": ["PlayerId CHAR(32) REFERENCES Players(Id)"]
        }"#;
        let spec = DatabaseSpec::from_json_str(text).unwrap();
        assert_eq!(spec.len(), 2);
        assert_eq!(
            spec.get("Players").unwrap()[0],
            "Id CHAR(32) PRIMARY KEY"
        );

        let dumped = serde_json::to_string(&spec).unwrap();
        let again = DatabaseSpec::from_json_str(&dumped).unwrap();
        assert_eq!(spec, again);
    }

    #[test]
    fn rejects_non_identifier_table_names() {
        let err = DatabaseSpec::from_json_str(r#"{"bad name; --": ["A INTEGER"]}"#);
        assert!(matches!(err, Err(SchemaError::Spec(_))));
    }

    #[test]
    fn column_names_skip_constraints_and_indexes() {
        let spec = DatabaseSpec::new().table(
            "T",
            [
                "Id INTEGER PRIMARY KEY",
                "Name TEXT",
                "UNIQUE(Name)",
                "CONSTRAINT c CHECK (Id > 0)",
                "CREATE INDEX t_name ON T(Name)",
            ],
        );
        assert_eq!(spec.column_names("T"), vec!["Id", "Name"]);
        assert!(spec.column_names("missing").is_empty());
    }
}
