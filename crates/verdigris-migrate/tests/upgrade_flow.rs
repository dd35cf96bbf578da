//! End-to-end tests for the compare-and-upgrade flow.
//!
//! Each test drives a real database file through spec versions of a small
//! league-tracking schema and checks the outcome, the surviving data and
//! the backups on disk.

use std::path::{Path, PathBuf};

use verdigris_migrate::prelude::*;
use verdigris_schema::SchemaError;

// =============================================================================
// Spec versions
// =============================================================================

fn league_v1() -> DatabaseSpec {
    DatabaseSpec::new()
        .table(
            "Schools",
            [
                "ID INTEGER PRIMARY KEY AUTOINCREMENT",
                "Name TEXT NOT NULL UNIQUE",
                "Division TEXT DEFAULT 'open'",
            ],
        )
        .table(
            "Players",
            [
                "ID INTEGER PRIMARY KEY AUTOINCREMENT",
                "Name TEXT NOT NULL",
                "School INTEGER REFERENCES Schools(ID) ON DELETE CASCADE",
                "Rating INTEGER DEFAULT 1500",
                "CHECK (Rating >= 0)",
                "CREATE INDEX players_school ON Players (School)",
            ],
        )
        .table(
            "Scores",
            [
                "Player INTEGER NOT NULL REFERENCES Players(ID)",
                "Round INTEGER NOT NULL",
                "Value REAL DEFAULT 0.0",
                "PRIMARY KEY (Player, Round)",
                "CREATE UNIQUE INDEX scores_podium ON Scores (Round) WHERE Value > 90.0",
            ],
        )
}

/// v2 renames a column, adds a column and adds an index; all in place.
fn league_v2() -> DatabaseSpec {
    DatabaseSpec::new()
        .table(
            "Schools",
            [
                "ID INTEGER PRIMARY KEY AUTOINCREMENT",
                "Name TEXT NOT NULL UNIQUE",
                "Division TEXT DEFAULT 'open'",
            ],
        )
        .table(
            "Players",
            [
                "ID INTEGER PRIMARY KEY AUTOINCREMENT",
                "FullName TEXT NOT NULL [FORMERLY Name]",
                "School INTEGER REFERENCES Schools(ID) ON DELETE CASCADE",
                "Rating INTEGER DEFAULT 1500",
                "Handedness TEXT DEFAULT 'right'",
                "CHECK (Rating >= 0)",
                "CREATE INDEX players_school ON Players (School)",
                "CREATE INDEX players_name ON Players (FullName)",
            ],
        )
        .table(
            "Scores",
            [
                "Player INTEGER NOT NULL REFERENCES Players(ID)",
                "Round INTEGER NOT NULL",
                "Value REAL DEFAULT 0.0",
                "PRIMARY KEY (Player, Round)",
                "CREATE UNIQUE INDEX scores_podium ON Scores (Round) WHERE Value > 90.0",
            ],
        )
}

/// v3 drops the rating column and its CHECK; only a rebuild can do that.
fn league_v3() -> DatabaseSpec {
    DatabaseSpec::new()
        .table(
            "Schools",
            [
                "ID INTEGER PRIMARY KEY AUTOINCREMENT",
                "Name TEXT NOT NULL UNIQUE",
                "Division TEXT DEFAULT 'open'",
            ],
        )
        .table(
            "Players",
            [
                "ID INTEGER PRIMARY KEY AUTOINCREMENT",
                "FullName TEXT NOT NULL [FORMERLY Name]",
                "School INTEGER REFERENCES Schools(ID) ON DELETE CASCADE",
                "Handedness TEXT DEFAULT 'right'",
                "CREATE INDEX players_school ON Players (School)",
                "CREATE INDEX players_name ON Players (FullName)",
            ],
        )
        .table(
            "Scores",
            [
                "Player INTEGER NOT NULL REFERENCES Players(ID)",
                "Round INTEGER NOT NULL",
                "Value REAL DEFAULT 0.0",
                "PRIMARY KEY (Player, Round)",
                "CREATE UNIQUE INDEX scores_podium ON Scores (Round) WHERE Value > 90.0",
            ],
        )
}

// =============================================================================
// Helpers
// =============================================================================

fn options(dir: &Path, apply: bool) -> UpgradeOptions {
    UpgradeOptions {
        apply,
        backup_dir: dir.join("backups"),
        ..UpgradeOptions::default()
    }
}

async fn run_sql(db: &Path, statements: &[&str]) {
    let pool = open_pool(db, false).await.unwrap();
    for sql in statements {
        sqlx::query(sql).execute(&pool).await.unwrap();
    }
    pool.close().await;
}

async fn count(db: &Path, sql: &str) -> i64 {
    let pool = open_pool(db, false).await.unwrap();
    let row: (i64,) = sqlx::query_as(sql).fetch_one(&pool).await.unwrap();
    pool.close().await;
    row.0
}

async fn seed_league(db: &Path) {
    run_sql(
        db,
        &[
            "INSERT INTO Schools (Name) VALUES ('Riverside')",
            "INSERT INTO Players (Name, School, Rating) VALUES ('Tatsuya', 1, 1800)",
            "INSERT INTO Scores (Player, Round, Value) VALUES (1, 1, 95.5)",
        ],
    )
    .await;
}

fn backup_files(dir: &Path) -> Vec<PathBuf> {
    match std::fs::read_dir(dir.join("backups")) {
        Ok(entries) => entries.map(|e| e.unwrap().path()).collect(),
        Err(_) => Vec::new(),
    }
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn creates_a_missing_database_and_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("league.db");
    let opts = options(dir.path(), true);

    let outcome = compare_and_upgrade(&db, &league_v1(), &opts).await.unwrap();
    assert_eq!(outcome, UpgradeOutcome::Created);
    assert!(db.exists());

    // Everything the spec declared survives a read-back unchanged: primary
    // keys, autoindexes, foreign keys, checks, defaults, partial indexes.
    let outcome = compare_and_upgrade(&db, &league_v1(), &opts).await.unwrap();
    assert_eq!(outcome, UpgradeOutcome::UpToDate);
}

#[tokio::test]
async fn report_mode_never_touches_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("league.db");
    compare_and_upgrade(&db, &league_v1(), &options(dir.path(), true))
        .await
        .unwrap();
    seed_league(&db).await;
    let before = std::fs::read(&db).unwrap();

    let outcome = compare_and_upgrade(&db, &league_v2(), &options(dir.path(), false))
        .await
        .unwrap();
    assert_eq!(outcome, UpgradeOutcome::ReportOnly);
    assert_eq!(std::fs::read(&db).unwrap(), before);
}

#[tokio::test]
async fn renames_and_additions_run_in_place() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("league.db");
    let opts = options(dir.path(), true);
    compare_and_upgrade(&db, &league_v1(), &opts).await.unwrap();
    seed_league(&db).await;

    let outcome = compare_and_upgrade(&db, &league_v2(), &opts).await.unwrap();
    assert_eq!(outcome, UpgradeOutcome::Altered);

    // The renamed column still holds its data; the added one has its
    // default; no backup was taken for an in-place change.
    let pool = open_pool(&db, false).await.unwrap();
    let row: (String, String, i64) =
        sqlx::query_as("SELECT FullName, Handedness, Rating FROM Players WHERE ID = 1")
            .fetch_one(&pool)
            .await
            .unwrap();
    pool.close().await;
    assert_eq!(row, ("Tatsuya".to_owned(), "right".to_owned(), 1800));
    assert!(backup_files(dir.path()).is_empty());

    // The altered database now reads back as identical to the spec.
    let outcome = compare_and_upgrade(&db, &league_v2(), &opts).await.unwrap();
    assert_eq!(outcome, UpgradeOutcome::UpToDate);
}

#[tokio::test]
async fn adding_a_table_upgrades_in_place() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("league.db");
    let opts = options(dir.path(), true);
    compare_and_upgrade(&db, &league_v1(), &opts).await.unwrap();
    seed_league(&db).await;

    let with_awards = league_v1().table(
        "Awards",
        [
            "ID INTEGER PRIMARY KEY AUTOINCREMENT",
            "Player INTEGER NOT NULL REFERENCES Players(ID) ON DELETE CASCADE",
            "Title TEXT NOT NULL",
        ],
    );
    let outcome = compare_and_upgrade(&db, &with_awards, &opts).await.unwrap();
    assert_eq!(outcome, UpgradeOutcome::Altered);
    assert!(backup_files(dir.path()).is_empty());

    // The existing tables kept their rows and the new one is live, foreign
    // key included.
    assert_eq!(count(&db, "SELECT COUNT(*) FROM Players").await, 1);
    run_sql(
        &db,
        &["INSERT INTO Awards (Player, Title) VALUES (1, 'Gold Medal')"],
    )
    .await;
    assert_eq!(count(&db, "SELECT COUNT(*) FROM Awards").await, 1);

    let outcome = compare_and_upgrade(&db, &with_awards, &opts).await.unwrap();
    assert_eq!(outcome, UpgradeOutcome::UpToDate);
}

#[tokio::test]
async fn dropping_a_column_rebuilds_with_a_backup() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("league.db");
    let mut opts = options(dir.path(), true);
    compare_and_upgrade(&db, &league_v1(), &opts).await.unwrap();
    seed_league(&db).await;

    opts.force = Some(true);
    let outcome = compare_and_upgrade(&db, &league_v3(), &opts).await.unwrap();
    let UpgradeOutcome::Rebuilt { backup } = outcome else {
        panic!("expected a rebuild, got {outcome:?}");
    };

    // The new file lost the column but kept the rows.
    assert_eq!(count(&db, "SELECT COUNT(*) FROM Players").await, 1);
    assert_eq!(
        count(
            &db,
            "SELECT COUNT(*) FROM pragma_table_info('Players') WHERE name = 'Rating'"
        )
        .await,
        0
    );
    assert_eq!(count(&db, "SELECT COUNT(*) FROM Scores").await, 1);

    // The backup is the pre-rebuild database, rating and all.
    assert!(backup.starts_with(dir.path().join("backups")));
    assert_eq!(
        count(&backup, "SELECT Rating FROM Players WHERE ID = 1").await,
        1800
    );

    let outcome = compare_and_upgrade(&db, &league_v3(), &opts).await.unwrap();
    assert_eq!(outcome, UpgradeOutcome::UpToDate);
}

#[tokio::test]
async fn declining_the_rebuild_leaves_the_file_alone() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("league.db");
    let mut opts = options(dir.path(), true);
    compare_and_upgrade(&db, &league_v1(), &opts).await.unwrap();
    seed_league(&db).await;
    let before = std::fs::read(&db).unwrap();

    opts.force = Some(false);
    let outcome = compare_and_upgrade(&db, &league_v3(), &opts).await.unwrap();
    assert_eq!(outcome, UpgradeOutcome::Declined);
    assert_eq!(std::fs::read(&db).unwrap(), before);
    assert!(backup_files(dir.path()).is_empty());
}

#[tokio::test]
async fn unspecified_tables_survive_unless_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("league.db");
    let mut opts = options(dir.path(), true);
    compare_and_upgrade(&db, &league_v1(), &opts).await.unwrap();
    run_sql(
        &db,
        &[
            "CREATE TABLE Trophies (Title TEXT)",
            "INSERT INTO Trophies (Title) VALUES ('Spring Cup')",
        ],
    )
    .await;

    // An extra table alone is not a difference.
    let outcome = compare_and_upgrade(&db, &league_v1(), &opts).await.unwrap();
    assert_eq!(outcome, UpgradeOutcome::UpToDate);

    // A rebuild carries it over, rows included.
    opts.force = Some(true);
    opts.force_rebuild = true;
    let outcome = compare_and_upgrade(&db, &league_v1(), &opts).await.unwrap();
    assert!(matches!(outcome, UpgradeOutcome::Rebuilt { .. }));
    assert_eq!(count(&db, "SELECT COUNT(*) FROM Trophies").await, 1);

    // With the drop flag the rebuild leaves it behind.
    opts.force_rebuild = false;
    opts.drop_unspecified = true;
    let outcome = compare_and_upgrade(&db, &league_v1(), &opts).await.unwrap();
    assert!(matches!(outcome, UpgradeOutcome::Rebuilt { .. }));
    assert_eq!(
        count(
            &db,
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'Trophies'"
        )
        .await,
        0
    );
}

#[tokio::test]
async fn circular_references_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("league.db");
    let spec = DatabaseSpec::new()
        .table(
            "A",
            ["Id INTEGER PRIMARY KEY", "BId INTEGER REFERENCES B(Id)"],
        )
        .table(
            "B",
            ["Id INTEGER PRIMARY KEY", "AId INTEGER REFERENCES A(Id)"],
        );

    let err = compare_and_upgrade(&db, &spec, &options(dir.path(), true))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        MigrateError::Schema(SchemaError::DependencyCycle { .. })
    ));
    assert!(!db.exists());
}
