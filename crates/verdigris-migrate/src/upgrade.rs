//! The compare-and-upgrade flow.
//!
//! One entry point ties the pieces together: parse the spec, introspect the
//! live database, diff the two, then either report, create, alter in place
//! or back up and rebuild. Destructive paths ask for confirmation unless an
//! answer was forced up front.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use verdigris_schema::{
    compare_schemas, dependency_order, CompareOptions, DatabaseSpec, SpecParser,
};

use crate::backup::BackupManager;
use crate::db::open_pool;
use crate::error::{MigrateError, Result};
use crate::executor::{rebuild, MigrationExecutor};
use crate::introspect::Introspector;

/// Knobs for a [`compare_and_upgrade`] run.
#[derive(Debug, Clone)]
pub struct UpgradeOptions {
    /// Apply changes; off means compare and report only.
    pub apply: bool,
    /// Treat column order as significant when comparing.
    pub order_matters: bool,
    /// Answer the rebuild confirmation without prompting.
    pub force: Option<bool>,
    /// Rebuild even when every change could be applied in place.
    pub force_rebuild: bool,
    /// Drop tables the spec does not mention instead of carrying them over.
    pub drop_unspecified: bool,
    /// Directory backup copies are written to.
    pub backup_dir: PathBuf,
    /// `strftime` prefix for backup file names.
    pub backup_prefix: String,
}

impl Default for UpgradeOptions {
    fn default() -> Self {
        Self {
            apply: false,
            order_matters: false,
            force: None,
            force_rebuild: false,
            drop_unspecified: false,
            backup_dir: PathBuf::from("./backups"),
            backup_prefix: "%Y-%m-%d-%H-%M-%S-".to_owned(),
        }
    }
}

/// What a [`compare_and_upgrade`] run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpgradeOutcome {
    /// The database already matches the spec.
    UpToDate,
    /// The database did not exist and was created from the spec.
    Created,
    /// Differences were reported without touching the database.
    ReportOnly,
    /// Every difference was applied in place.
    Altered,
    /// The database was rebuilt; the old file was kept at this path.
    Rebuilt {
        /// Backup copy of the pre-rebuild database.
        backup: PathBuf,
    },
    /// A rebuild was needed and the confirmation was declined.
    Declined,
}

/// Brings `database` up to the spec, or reports what that would take.
///
/// A missing database is created outright when `apply` is set. An existing
/// one is altered in place when possible; otherwise it is backed up and
/// rebuilt, after confirmation. When an in-place attempt is rejected by the
/// database the run falls back to the rebuild path rather than failing.
///
/// # Errors
///
/// Fails on an invalid spec or backup prefix, on a missing database in
/// report mode, and on any database or file error while applying.
pub async fn compare_and_upgrade(
    database: &Path,
    spec: &DatabaseSpec,
    options: &UpgradeOptions,
) -> Result<UpgradeOutcome> {
    let desired = SpecParser::new().parse_spec(spec)?;
    let backups = BackupManager::new(&options.backup_dir, &options.backup_prefix)?;

    if !database.exists() {
        if !options.apply {
            return Err(MigrateError::MissingDatabase(database.to_path_buf()));
        }
        // Reject an unsatisfiable spec before the file exists on disk.
        dependency_order(&desired, &BTreeSet::new())?;
        info!(database = %database.display(), "creating new database");
        let pool = open_pool(database, true).await?;
        MigrationExecutor::new(pool.clone())
            .create_schema(&desired, &BTreeSet::new())
            .await?;
        pool.close().await;
        return Ok(UpgradeOutcome::Created);
    }

    let pool = open_pool(database, false).await?;
    let actual = Introspector::new(pool.clone()).read_schema().await?;
    let options_cmp = CompareOptions {
        order_matters: options.order_matters,
    };
    let diff = compare_schemas(&desired, &actual, options_cmp);

    let rebuild_needed = diff.requires_rebuild()
        || options.force_rebuild
        || (options.drop_unspecified && !diff.dropped_tables.is_empty());

    if diff.is_empty() && !rebuild_needed {
        info!(database = %database.display(), "database matches the spec");
        pool.close().await;
        return Ok(UpgradeOutcome::UpToDate);
    }

    if !options.apply {
        println!("{}", diff.summary());
        pool.close().await;
        return Ok(UpgradeOutcome::ReportOnly);
    }

    let executor = MigrationExecutor::new(pool.clone());
    if !rebuild_needed {
        info!(
            new_tables = diff.new_tables.len(),
            changed_tables = diff.deltas.len(),
            "applying schema changes in place"
        );
        match executor.apply_in_place(&desired, &diff).await {
            Ok(()) => {
                pool.close().await;
                return Ok(UpgradeOutcome::Altered);
            }
            Err(error) => {
                warn!(error = %error, "in-place migration failed, falling back to a rebuild");
            }
        }
    }

    let confirmed = options
        .force
        .unwrap_or_else(|| confirm_rebuild(database));
    if !confirmed {
        info!("rebuild declined, database left unchanged");
        pool.close().await;
        return Ok(UpgradeOutcome::Declined);
    }

    let staged = rebuild(&desired, &actual, &diff, database, options.drop_unspecified).await?;
    pool.close().await;
    let backup = backups.swap_in(database, staged)?;
    info!(
        database = %database.display(),
        backup = %backup.display(),
        "database rebuilt"
    );
    Ok(UpgradeOutcome::Rebuilt { backup })
}

/// Brings the application database up to the spec at startup.
///
/// The database is created when missing and upgraded otherwise. `force`
/// answers every confirmation with yes; without it a needed rebuild prompts
/// on stdin. Backups use the default directory and prefix.
///
/// # Errors
///
/// Fails as [`compare_and_upgrade`] does.
pub async fn init(database: &Path, spec: &DatabaseSpec, force: bool) -> Result<UpgradeOutcome> {
    let options = UpgradeOptions {
        apply: true,
        force: force.then_some(true),
        ..UpgradeOptions::default()
    };
    compare_and_upgrade(database, spec, &options).await
}

/// Parses a yes/no answer: `y`, `yes`, `1`, `n`, `no` or `0`, any case.
#[must_use]
pub fn parse_confirmation(text: &str) -> Option<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" | "1" => Some(true),
        "n" | "no" | "0" => Some(false),
        _ => None,
    }
}

/// Prompts on stdin until an answer parses. EOF declines.
fn confirm_rebuild(database: &Path) -> bool {
    let mut line = String::new();
    loop {
        println!(
            "{} must be rebuilt (a backup will be kept). Continue? [y/n]",
            database.display()
        );
        line.clear();
        match std::io::stdin().read_line(&mut line) {
            Ok(0) | Err(_) => return false,
            Ok(_) => {}
        }
        match parse_confirmation(&line) {
            Some(answer) => return answer,
            None => println!("Please answer y or n."),
        }
    }
}
