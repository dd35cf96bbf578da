//! Integration tests for the spec-to-diff pipeline.
//!
//! These tests parse v1 and v2 database specs for a small league-tracking
//! database, diff them, and verify the resulting classification matches
//! what a migration would have to do.

use std::collections::BTreeSet;
use verdigris_schema::{
    compare_schemas, dependency_order, CompareOptions, DatabaseSpec, FkAction, IndexOrigin,
    SpecParser,
};

// =============================================================================
// V1: Initial schema
// =============================================================================

fn league_v1() -> DatabaseSpec {
    DatabaseSpec::new()
        .table(
            "Schools",
            [
                "ID INTEGER PRIMARY KEY AUTOINCREMENT",
                "Name TEXT NOT NULL UNIQUE",
            ],
        )
        .table(
            "Players",
            [
                "ID INTEGER PRIMARY KEY AUTOINCREMENT",
                "Name TEXT NOT NULL",
                "School INTEGER REFERENCES Schools(ID) ON DELETE CASCADE",
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
            ],
        )
}

// =============================================================================
// V2: Evolved schema with a renamed column, an added column, a new table
// and a new index
// =============================================================================

fn league_v2() -> DatabaseSpec {
    DatabaseSpec::new()
        .table(
            "Schools",
            [
                "ID INTEGER PRIMARY KEY AUTOINCREMENT",
                "Name TEXT NOT NULL UNIQUE",
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
            ],
        )
        .table(
            "Seasons",
            ["ID INTEGER PRIMARY KEY", "Year INTEGER NOT NULL"],
        )
}

// =============================================================================
// V3: Breaking changes, a dropped column and a changed foreign key action
// =============================================================================

fn league_v3() -> DatabaseSpec {
    DatabaseSpec::new()
        .table(
            "Schools",
            ["ID INTEGER PRIMARY KEY AUTOINCREMENT", "Name TEXT NOT NULL UNIQUE"],
        )
        .table(
            "Players",
            [
                "ID INTEGER PRIMARY KEY AUTOINCREMENT",
                "Name TEXT NOT NULL",
                "School INTEGER REFERENCES Schools(ID) ON DELETE SET NULL",
                "CREATE INDEX players_school ON Players (School)",
            ],
        )
        .table(
            "Scores",
            [
                "Player INTEGER NOT NULL REFERENCES Players(ID)",
                "Round INTEGER NOT NULL",
                "PRIMARY KEY (Player, Round)",
            ],
        )
}

#[test]
fn v1_parses_into_pragma_shaped_records() {
    let schema = SpecParser::new().parse_spec(&league_v1()).unwrap();
    assert_eq!(schema.len(), 3);

    let schools = schema.get("schools").unwrap();
    // The integer primary key aliases the rowid, so only the UNIQUE
    // constraint gets an autoindex, and it takes ordinal 1.
    let autoindexes: Vec<_> = schools.constraint_records().collect();
    assert_eq!(autoindexes.len(), 1);
    assert_eq!(autoindexes[0].origin, IndexOrigin::UniqueConstraint);
    assert_eq!(autoindexes[0].name, "sqlite_autoindex_Schools_1");

    let players = schema.get("players").unwrap();
    assert_eq!(players.foreign_keys.len(), 1);
    assert_eq!(players.foreign_keys[0].on_delete, FkAction::Cascade);
    assert_eq!(players.explicit_indexes().count(), 1);
    assert_eq!(
        players.index_sql,
        vec!["CREATE INDEX players_school ON Players(School)".to_owned()]
    );

    let scores = schema.get("scores").unwrap();
    assert_eq!(scores.column("Player").unwrap().pk_rank, 1);
    assert_eq!(scores.column("Round").unwrap().pk_rank, 2);
    // A composite key is never a rowid alias, so it keeps its autoindex.
    let pk: Vec<_> = scores.constraint_records().collect();
    assert_eq!(pk.len(), 1);
    assert_eq!(pk[0].origin, IndexOrigin::PrimaryKey);
    assert_eq!(pk[0].columns, vec!["Player".to_owned(), "Round".to_owned()]);
}

#[test]
fn dependency_order_creates_parents_before_children() {
    let schema = SpecParser::new().parse_spec(&league_v1()).unwrap();
    let order = dependency_order(&schema, &BTreeSet::new()).unwrap();
    let names: Vec<&str> = order.iter().map(|t| t.name.as_str()).collect();
    let pos = |n: &str| names.iter().position(|x| *x == n).unwrap();
    assert!(pos("Schools") < pos("Players"));
    assert!(pos("Players") < pos("Scores"));
}

#[test]
fn v1_to_v2_is_applicable_in_place() {
    let parser = SpecParser::new();
    let desired = parser.parse_spec(&league_v2()).unwrap();
    let actual = parser.parse_spec(&league_v1()).unwrap();
    let diff = compare_schemas(&desired, &actual, CompareOptions::default());

    assert!(!diff.is_empty());
    assert!(!diff.requires_rebuild(), "v1 -> v2 should avoid a rebuild");
    assert_eq!(diff.new_tables, vec!["Seasons".to_owned()]);
    assert_eq!(
        diff.unchanged,
        vec!["Schools".to_owned(), "Scores".to_owned()]
    );

    let players = diff.deltas.get("players").unwrap();
    assert_eq!(
        players.renamed_columns,
        vec![("Name".to_owned(), "FullName".to_owned())]
    );
    assert_eq!(players.added_columns, vec!["Handedness".to_owned()]);
    assert_eq!(players.added_indexes, vec!["players_name".to_owned()]);
    assert!(players.alterable_in_place());
}

#[test]
fn v1_to_v3_requires_a_rebuild() {
    let parser = SpecParser::new();
    let desired = parser.parse_spec(&league_v3()).unwrap();
    let actual = parser.parse_spec(&league_v1()).unwrap();
    let diff = compare_schemas(&desired, &actual, CompareOptions::default());

    // Changing ON DELETE CASCADE to SET NULL swaps the foreign key record.
    let players = diff.deltas.get("players").unwrap();
    assert_eq!(players.added_foreign_keys.len(), 1);
    assert_eq!(players.dropped_foreign_keys.len(), 1);
    assert!(players.requires_rebuild());

    // Dropping the Value column forces a copy.
    let scores = diff.deltas.get("scores").unwrap();
    assert_eq!(scores.dropped_columns, vec!["Value".to_owned()]);
    assert!(scores.requires_rebuild());

    assert!(diff.requires_rebuild());
}

#[test]
fn spec_round_trips_through_json() {
    let json = r#"{
        "Schools": ["ID INTEGER PRIMARY KEY AUTOINCREMENT", "Name TEXT NOT NULL UNIQUE"],
        "Players": [
            "ID INTEGER PRIMARY KEY AUTOINCREMENT",
            "Name TEXT NOT NULL",
            "School INTEGER REFERENCES Schools(ID) ON DELETE CASCADE",
            "CREATE INDEX players_school ON Players (School)"
        ],
        "Scores": [
            "Player INTEGER NOT NULL REFERENCES Players(ID)",
            "Round INTEGER NOT NULL",
            "Value REAL DEFAULT 0.0",
            "PRIMARY KEY (Player, Round)"
        ]
    }"#;
    let from_json = DatabaseSpec::from_json_str(json).unwrap();
    let parser = SpecParser::new();
    let a = parser.parse_spec(&from_json).unwrap();
    let b = parser.parse_spec(&league_v1()).unwrap();
    let diff = compare_schemas(&a, &b, CompareOptions::default());
    assert!(diff.is_empty());
    assert_eq!(diff.unchanged.len(), 3);
}

#[test]
fn identical_specs_survive_formatting_noise() {
    let tidy = SpecParser::new()
        .parse_spec(&DatabaseSpec::new().table(
            "T",
            ["ID INTEGER PRIMARY KEY", "Name TEXT NOT NULL DEFAULT 'x'"],
        ))
        .unwrap();
    let noisy = SpecParser::new()
        .parse_spec(&DatabaseSpec::new().table(
            "T",
            ["ID  INTEGER   PRIMARY  KEY", "Name TEXT NOT  NULL DEFAULT 'x'"],
        ))
        .unwrap();
    let diff = compare_schemas(&tidy, &noisy, CompareOptions::default());
    assert!(diff.is_empty());
}
