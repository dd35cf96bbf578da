//! Backup copies and the atomic file swap used by rebuilds.
//!
//! The live database is copied into the backup directory before it is
//! replaced, so a rebuild can always be undone by hand. The replacement
//! itself is a rename of a file staged in the same directory as the live
//! database, which keeps the swap atomic on one filesystem.

use chrono::format::{Item, StrftimeItems};
use chrono::Local;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{MigrateError, Result};

/// Creates timestamped backup copies and swaps rebuilt files into place.
#[derive(Debug, Clone)]
pub struct BackupManager {
    dir: PathBuf,
    prefix: String,
}

impl BackupManager {
    /// A manager writing into `dir`, naming files `<prefix><database name>`
    /// where the prefix goes through `strftime`.
    ///
    /// # Errors
    ///
    /// Fails when the prefix contains a conversion `strftime` does not
    /// know, so a bad prefix is caught before any file is touched.
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Result<Self> {
        let prefix = prefix.into();
        if StrftimeItems::new(&prefix).any(|item| matches!(item, Item::Error)) {
            return Err(MigrateError::BadBackupPrefix(prefix));
        }
        Ok(Self {
            dir: dir.into(),
            prefix,
        })
    }

    /// Where the next backup of `database` would land. Appends a numeric
    /// suffix when the timestamped name is already taken.
    #[must_use]
    pub fn backup_path(&self, database: &Path) -> PathBuf {
        let stamp = Local::now().format(&self.prefix).to_string();
        let file_name = database
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut candidate = self.dir.join(format!("{stamp}{file_name}"));
        let mut counter = 0;
        while candidate.exists() {
            counter += 1;
            candidate = self.dir.join(format!("{stamp}{file_name}.{counter}"));
        }
        candidate
    }

    /// Copies `database` into the backup directory, creating it if needed.
    ///
    /// # Errors
    ///
    /// Fails when the directory cannot be created or the copy fails.
    pub fn back_up(&self, database: &Path) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let backup = self.backup_path(database);
        fs::copy(database, &backup)?;
        info!(backup = %backup.display(), "backed up database");
        Ok(backup)
    }

    /// Backs up `database`, then renames `replacement` over it, keeping the
    /// original file's permissions. Returns the backup path.
    ///
    /// # Errors
    ///
    /// Fails when the backup or the rename fails. The live database is only
    /// replaced after the backup has been written.
    pub fn swap_in(&self, database: &Path, replacement: tempfile::TempPath) -> Result<PathBuf> {
        let permissions = fs::metadata(database)?.permissions();
        let backup = self.back_up(database)?;
        replacement.persist(database).map_err(|e| e.error)?;
        fs::set_permissions(database, permissions)?;
        Ok(backup)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn rejects_unknown_strftime_conversions() {
        let err = BackupManager::new("/tmp", "%Q-").unwrap_err();
        assert!(matches!(err, MigrateError::BadBackupPrefix(p) if p == "%Q-"));
    }

    #[test]
    fn accepts_plain_and_strftime_prefixes() {
        assert!(BackupManager::new("/tmp", "pre-").is_ok());
        assert!(BackupManager::new("/tmp", "%Y-%m-%d-").is_ok());
    }

    #[test]
    fn backs_up_with_prefix_and_counts_collisions() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("live.db");
        fs::write(&db, b"payload").unwrap();

        let manager = BackupManager::new(dir.path().join("backups"), "pre-").unwrap();
        let first = manager.back_up(&db).unwrap();
        let second = manager.back_up(&db).unwrap();

        assert_eq!(first.file_name().unwrap(), "pre-live.db");
        assert_eq!(second.file_name().unwrap(), "pre-live.db.1");
        assert_eq!(fs::read(&first).unwrap(), b"payload");
        assert_eq!(fs::read(&second).unwrap(), b"payload");
    }

    #[test]
    fn swap_keeps_a_backup_of_the_old_file() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("live.db");
        fs::write(&db, b"old contents").unwrap();

        let mut staged = tempfile::NamedTempFile::new_in(dir.path()).unwrap();
        staged.write_all(b"new contents").unwrap();
        let staged = staged.into_temp_path();

        let manager = BackupManager::new(dir.path().join("backups"), "b-").unwrap();
        let backup = manager.swap_in(&db, staged).unwrap();

        assert_eq!(fs::read(&db).unwrap(), b"new contents");
        assert_eq!(fs::read(&backup).unwrap(), b"old contents");
    }
}
