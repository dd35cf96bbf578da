//! Database connections and SQL identifier helpers.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;

use crate::error::Result;

/// Opens a connection pool on a SQLite file.
///
/// The pool is capped at a single connection: `ATTACH` is per-connection
/// state and every statement of a rebuild has to see it. Foreign key
/// enforcement is on, and the rollback journal is used so a database is
/// always one plain file that can be copied and renamed.
///
/// # Errors
///
/// Fails when the file cannot be opened, or does not exist and
/// `create_if_missing` is off.
pub async fn open_pool(path: &Path, create_if_missing: bool) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(create_if_missing)
        .journal_mode(SqliteJournalMode::Delete)
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// Quotes an identifier for interpolation into SQL. Spec-side names are
/// plain words, but introspected tables can be named anything.
#[must_use]
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quotes an identifier only when it is not a plain word.
///
/// SQLite stores the text of column renames and `CREATE INDEX` statements
/// back into the schema, so DDL built from spec names must keep the spec's
/// bare spelling or the stored SQL stops matching the spec on the next
/// comparison.
#[must_use]
pub fn maybe_quote(name: &str) -> String {
    let mut chars = name.chars();
    let plain = chars
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_');
    if plain {
        name.to_owned()
    } else {
        quote_identifier(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoting_escapes_embedded_quotes() {
        assert_eq!(quote_identifier("Players"), "\"Players\"");
        assert_eq!(quote_identifier("odd \"name\""), "\"odd \"\"name\"\"\"");
    }

    #[test]
    fn plain_words_stay_bare() {
        assert_eq!(maybe_quote("Players"), "Players");
        assert_eq!(maybe_quote("_hidden2"), "_hidden2");
        assert_eq!(maybe_quote("2fast"), "\"2fast\"");
        assert_eq!(maybe_quote("white space"), "\"white space\"");
        assert_eq!(maybe_quote(""), "\"\"");
    }

    #[tokio::test]
    async fn refuses_missing_file_without_create() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.db");
        assert!(open_pool(&path, false).await.is_err());
        assert!(!path.exists());

        let pool = open_pool(&path, true).await.unwrap();
        pool.close().await;
        assert!(path.exists());
    }
}
