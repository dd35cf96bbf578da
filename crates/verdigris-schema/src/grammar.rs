//! Backtracking grammar for column definitions, table constraints and
//! index statements.
//!
//! The grammar is a tree of pattern nodes, each backed by one anchored
//! case-insensitive regex. Matching walks the tree depth-first: a node that
//! matches consumes text and descends into its children; siblings are tried
//! in order at the current position; a `repeatable` node is retried after
//! its subtree, but only when its own match consumed text. A line parses
//! when some path through the tree consumes it entirely.
//!
//! This covers most of SQLite's `CREATE TABLE` column and constraint
//! grammar (see <https://www.sqlite.org/lang_createtable.html>) plus two
//! extensions: a `[FORMERLY old1, old2]` column suffix for renames, and
//! `CREATE [UNIQUE] INDEX` statements as table spec lines. Constraints are
//! accepted in the tree's declaration order; `WITHOUT ROWID` tables are not
//! supported.

use regex::{Regex, RegexBuilder};

use crate::record::FkAction;

/// Terminal rules of the grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    /// Column name and optional declared type.
    ColumnHead,
    /// Optional `CONSTRAINT name` prefix.
    ConstraintName,
    /// `PRIMARY KEY [ASC|DESC]` on a column.
    PrimaryKey,
    /// Optional `ON CONFLICT resolution`.
    ConflictClause,
    /// Optional `AUTOINCREMENT`.
    AutoIncrement,
    /// `NOT NULL`.
    NotNull,
    /// `UNIQUE` on a column.
    Unique,
    /// `CHECK (expr)` on a column or table.
    Check,
    /// `DEFAULT value`.
    Default,
    /// `COLLATE name`.
    Collate,
    /// `REFERENCES parent [(columns)]`.
    References,
    /// `ON DELETE|UPDATE action` or `MATCH name`.
    FkActionClause,
    /// `[NOT] DEFERRABLE [INITIALLY ...]`.
    FkDefer,
    /// `[FORMERLY name, ...]` suffix.
    FormerNames,
    /// Table-level `PRIMARY KEY (columns)`.
    TablePrimaryKey,
    /// Table-level `UNIQUE (columns)`.
    TableUnique,
    /// Table-level `FOREIGN KEY (columns)`.
    TableForeignKey,
    /// `CREATE [UNIQUE] INDEX ... ON table (columns) [WHERE expr]`.
    CreateIndex,
}

/// A recognized grammar fragment with its extracted values.
///
/// Rules that carry nothing a record needs (conflict clauses, collations,
/// `AUTOINCREMENT`, deferrability) match and consume text but emit no
/// event; they survive only in the line's source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchEvent {
    /// Start of a column definition.
    ColumnHead {
        /// Column name.
        name: String,
        /// Declared type text, if present.
        decl_type: Option<String>,
    },
    /// Column-level `PRIMARY KEY`.
    PrimaryKey,
    /// `NOT NULL`.
    NotNull,
    /// Column-level `UNIQUE`.
    Unique,
    /// `CHECK` with its expression.
    Check {
        /// The expression between the parentheses.
        expr: String,
    },
    /// `DEFAULT` with its raw value text.
    Default {
        /// Value as written, parentheses included for expressions.
        value: String,
    },
    /// `REFERENCES` clause.
    References {
        /// Parent table.
        table: String,
        /// Parent columns; empty when the clause omitted them.
        columns: Vec<String>,
    },
    /// `ON DELETE` action.
    OnDelete(FkAction),
    /// `ON UPDATE` action.
    OnUpdate(FkAction),
    /// `MATCH` clause name.
    MatchMode(String),
    /// `[FORMERLY ...]` names, lowercased.
    FormerNames(Vec<String>),
    /// Table-level `PRIMARY KEY (columns)`.
    TablePrimaryKey(Vec<String>),
    /// Table-level `UNIQUE (columns)`.
    TableUnique(Vec<String>),
    /// Table-level `FOREIGN KEY (columns)`.
    TableForeignKey(Vec<String>),
    /// `CREATE INDEX` statement.
    CreateIndex {
        /// `UNIQUE` index.
        unique: bool,
        /// Index name, schema qualifier dropped.
        name: String,
        /// Table the index is on.
        table: String,
        /// Indexed columns in order.
        columns: Vec<String>,
        /// Partial-index `WHERE` expression.
        predicate: Option<String>,
    },
}

/// One node of the pattern tree.
#[derive(Debug, Clone)]
struct PatternNode {
    rule: Rule,
    repeatable: bool,
    children: Vec<PatternNode>,
}

fn node(rule: Rule, repeatable: bool, children: Vec<PatternNode>) -> PatternNode {
    PatternNode {
        rule,
        repeatable,
        children,
    }
}

/// Keywords that may not start a column definition; they introduce table
/// constraints or index statements instead.
const CONSTRAINT_STARTERS: [&str; 6] = [
    "CONSTRAINT",
    "PRIMARY",
    "FOREIGN",
    "UNIQUE",
    "CHECK",
    "CREATE",
];

/// The compiled grammar. Regexes are built once at construction and reused
/// for every line; there is no shared or global state.
#[derive(Debug, Clone)]
pub struct Grammar {
    column_head: Regex,
    constraint_name: Regex,
    primary_key: Regex,
    conflict_clause: Regex,
    autoincrement: Regex,
    not_null: Regex,
    unique: Regex,
    check: Regex,
    default_value: Regex,
    collate: Regex,
    references: Regex,
    fk_action: Regex,
    fk_defer: Regex,
    former_names: Regex,
    former_suffix: Regex,
    table_primary_key: Regex,
    table_unique: Regex,
    table_foreign_key: Regex,
    create_index: Regex,
    word: Regex,
    skip_token: Regex,
    roots: Vec<PatternNode>,
}

fn rx(pattern: &str) -> Regex {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .expect("invalid grammar pattern")
}

impl Default for Grammar {
    fn default() -> Self {
        Self::new()
    }
}

impl Grammar {
    /// Compiles the grammar.
    #[must_use]
    pub fn new() -> Self {
        let column_constraints = vec![
            node(
                Rule::PrimaryKey,
                false,
                vec![node(
                    Rule::ConflictClause,
                    false,
                    vec![node(Rule::AutoIncrement, false, vec![])],
                )],
            ),
            node(
                Rule::NotNull,
                false,
                vec![node(Rule::ConflictClause, false, vec![])],
            ),
            node(
                Rule::Unique,
                false,
                vec![node(Rule::ConflictClause, false, vec![])],
            ),
            node(Rule::Check, false, vec![]),
            node(Rule::Default, false, vec![]),
            node(Rule::Collate, false, vec![]),
            node(
                Rule::References,
                false,
                vec![
                    node(Rule::FkActionClause, true, vec![]),
                    node(Rule::FkDefer, false, vec![]),
                ],
            ),
            node(Rule::FormerNames, false, vec![]),
        ];
        let column_tree = node(
            Rule::ColumnHead,
            false,
            vec![node(Rule::ConstraintName, true, column_constraints)],
        );
        let table_tree = node(
            Rule::ConstraintName,
            false,
            vec![
                node(
                    Rule::TablePrimaryKey,
                    false,
                    vec![node(Rule::ConflictClause, false, vec![])],
                ),
                node(
                    Rule::TableUnique,
                    false,
                    vec![node(Rule::ConflictClause, false, vec![])],
                ),
                node(Rule::Check, false, vec![]),
                node(
                    Rule::TableForeignKey,
                    false,
                    vec![node(
                        Rule::References,
                        false,
                        vec![
                            node(Rule::FkActionClause, true, vec![]),
                            node(Rule::FkDefer, false, vec![]),
                        ],
                    )],
                ),
            ],
        );
        let index_tree = node(Rule::CreateIndex, false, vec![]);

        Self {
            column_head: rx(
                r"^\s*(?P<name>\w+)\s+(?P<type>\w+(?:\s*\([+-]?\d+\s*(?:,\s*[+-]?\d+\s*)?\))?)?",
            ),
            constraint_name: rx(r"^\s*(?:CONSTRAINT\s+(?P<cname>\w+)\s*\b)?"),
            primary_key: rx(r"^\s*\bPRIMARY\s+KEY(?:\s+(?:ASC|DESC))?\b"),
            conflict_clause: rx(r"^\s*\b(?:ON\s+CONFLICT\s+\w+)?\b"),
            autoincrement: rx(r"^\s*\b(?:AUTOINCREMENT)?\b"),
            not_null: rx(r"^\s*\bNOT\s+NULL\b"),
            unique: rx(r"^\s*\bUNIQUE\b"),
            check: rx(r"^\s*\bCHECK\s*\((?P<expr>[\w\s<!='.>,%()*/+-]+)\)"),
            default_value: rx(
                r"^\s*\bDEFAULT\b\s*(?P<value>[+-]?\d+(?:\.\d*\b)?|'[^']*'|TRUE|FALSE|NULL|CURRENT_(?:DATE|TIMESTAMP|TIME)\b|\([\w\s,'.+/*-]+\))",
            ),
            collate: rx(r"^\s*\bCOLLATE\s+\w+\b"),
            references: rx(
                r"^\s*\bREFERENCES\s+(?P<table>\w+)(?:\s*\((?P<columns>\w+(?:\s*,\s*\w+)*)\s*\))?",
            ),
            fk_action: rx(
                r"^\s*\b(?:ON\s+(?P<action>DELETE|UPDATE)\s+(?P<reaction>SET\s+NULL|SET\s+DEFAULT|CASCADE|RESTRICT|NO\s+ACTION)|MATCH\s+(?P<mode>\w+))\b",
            ),
            fk_defer: rx(
                r"^\s*\b(?:NOT\s+)?DEFERR?ABLE(?:\s+INITIALLY\s+(?:DEFERRED|IMMEDIATE))?\b",
            ),
            former_names: rx(r"^\s*\[FORMERLY\s+(?P<names>(?:\w+(?:\s*,\s*)?)+)\s*\]\s*$"),
            former_suffix: rx(r"\s*\[FORMERLY[^\]]*\]\s*$"),
            table_primary_key: rx(r"^\s*\bPRIMARY\s+KEY\s*\((?P<columns>\w+(?:\s*,\s*\w+)*)\s*\)"),
            table_unique: rx(r"^\s*\bUNIQUE\s*\((?P<columns>\w+(?:\s*,\s*\w+)*)\s*\)"),
            table_foreign_key: rx(
                r"^\s*\bFOREIGN\s+KEY\s*\((?P<columns>\w+(?:\s*,\s*\w+)*)\s*\)",
            ),
            create_index: rx(
                r"^\s*CREATE\s+(?P<uniq>UNIQUE\s+)?INDEX(?:\s+IF\s+NOT\s+EXISTS)?\s+(?:(?:\w+)\.)?(?P<iname>\w+)\s+ON\s+(?P<tname>\w+)\s*\((?P<columns>(?:\w+(?:\s*,\s*)?)+)\s*\)(?:\s+WHERE\s+(?P<pred>.*))?",
            ),
            word: rx(r"\w+"),
            skip_token: rx(r"^\s*(?:\w+|\S)"),
            roots: vec![column_tree, table_tree, index_tree],
        }
    }

    /// Matches one complete spec line.
    ///
    /// On success returns the events along the accepting path, in match
    /// order. On failure returns the byte offset of the farthest point any
    /// path reached, for error reporting.
    ///
    /// # Errors
    ///
    /// Returns `Err(offset)` when no path through the grammar consumes the
    /// whole line.
    pub fn match_line(&self, line: &str) -> Result<Vec<MatchEvent>, usize> {
        let mut farthest = 0;
        for root in &self.roots {
            let mut events = Vec::new();
            if self.match_level(std::slice::from_ref(root), line, 0, &mut events, &mut farthest) {
                return Ok(events);
            }
        }
        Err(farthest)
    }

    /// Scans text that may contain fragments the grammar does not cover.
    ///
    /// Repeatedly attempts a full match on the remaining text; when that
    /// fails, skips one token and tries again. Used to recover CHECK
    /// constraints from live `CREATE TABLE` text, where unknown syntax must
    /// not abort introspection.
    #[must_use]
    pub fn scan_lenient(&self, text: &str) -> Vec<MatchEvent> {
        let mut pos = 0;
        while pos < text.len() && !text[pos..].trim().is_empty() {
            match self.match_line(&text[pos..]) {
                Ok(events) => return events,
                Err(_) => {
                    let Some(m) = self.skip_token.find(&text[pos..]) else {
                        break;
                    };
                    tracing::debug!(
                        skipped = %text[pos..pos + m.end()].trim(),
                        "skipping unrecognized token"
                    );
                    pos += m.end();
                }
            }
        }
        Vec::new()
    }

    /// True when the line is a `CREATE INDEX` statement.
    #[must_use]
    pub fn is_create_index(&self, line: &str) -> bool {
        self.create_index.is_match(line)
    }

    /// Removes a trailing `[FORMERLY ...]` suffix.
    #[must_use]
    pub fn strip_former_names(&self, line: &str) -> String {
        self.former_suffix.replace(line, "").trim_end().to_owned()
    }

    fn match_level(
        &self,
        nodes: &[PatternNode],
        text: &str,
        start: usize,
        events: &mut Vec<MatchEvent>,
        farthest: &mut usize,
    ) -> bool {
        let checkpoint = events.len();
        let mut pos = start;
        let mut idx = 0;
        while idx < nodes.len() {
            let n = &nodes[idx];
            let Some((consumed, event)) = self.apply(n.rule, &text[pos..]) else {
                idx += 1;
                continue;
            };
            let advanced = pos + consumed;
            *farthest = (*farthest).max(advanced);
            if let Some(ev) = event {
                events.push(ev);
            }
            if text[advanced..].trim().is_empty() {
                return true;
            }
            if self.match_level(&n.children, text, advanced, events, farthest) {
                return true;
            }
            // Continue at the advanced position: a repeatable node that
            // consumed text is retried, anything else falls through to the
            // next sibling.
            if !(n.repeatable && consumed > 0) {
                idx += 1;
            }
            pos = advanced;
        }
        events.truncate(checkpoint);
        false
    }

    /// Tries a single rule at the start of `text`. Returns the consumed
    /// byte count and the event the match produces, if any.
    #[allow(clippy::too_many_lines)]
    fn apply(&self, rule: Rule, text: &str) -> Option<(usize, Option<MatchEvent>)> {
        match rule {
            Rule::ColumnHead => {
                let caps = self.column_head.captures(text)?;
                let name = caps.name("name")?.as_str();
                if CONSTRAINT_STARTERS
                    .iter()
                    .any(|kw| name.eq_ignore_ascii_case(kw))
                {
                    return None;
                }
                let event = MatchEvent::ColumnHead {
                    name: name.to_owned(),
                    decl_type: caps.name("type").map(|m| m.as_str().to_owned()),
                };
                Some((caps.get(0).map_or(0, |m| m.end()), Some(event)))
            }
            Rule::ConstraintName => silent(&self.constraint_name, text),
            Rule::PrimaryKey => emit(&self.primary_key, text, |_| MatchEvent::PrimaryKey),
            Rule::ConflictClause => silent(&self.conflict_clause, text),
            Rule::AutoIncrement => silent(&self.autoincrement, text),
            Rule::NotNull => emit(&self.not_null, text, |_| MatchEvent::NotNull),
            Rule::Unique => emit(&self.unique, text, |_| MatchEvent::Unique),
            Rule::Check => emit(&self.check, text, |caps| MatchEvent::Check {
                expr: caps
                    .name("expr")
                    .map_or_else(String::new, |m| m.as_str().trim().to_owned()),
            }),
            Rule::Default => emit(&self.default_value, text, |caps| MatchEvent::Default {
                value: caps
                    .name("value")
                    .map_or_else(String::new, |m| m.as_str().to_owned()),
            }),
            Rule::Collate => silent(&self.collate, text),
            Rule::References => emit(&self.references, text, |caps| MatchEvent::References {
                table: caps
                    .name("table")
                    .map_or_else(String::new, |m| m.as_str().to_owned()),
                columns: self.words(caps.name("columns").map_or("", |m| m.as_str())),
            }),
            Rule::FkActionClause => {
                let caps = self.fk_action.captures(text)?;
                let end = caps.get(0).map_or(0, |m| m.end());
                let event = if let Some(mode) = caps.name("mode") {
                    MatchEvent::MatchMode(mode.as_str().to_owned())
                } else {
                    let action = FkAction::parse(caps.name("reaction").map_or("", |m| m.as_str()));
                    if caps
                        .name("action")
                        .is_some_and(|m| m.as_str().eq_ignore_ascii_case("DELETE"))
                    {
                        MatchEvent::OnDelete(action)
                    } else {
                        MatchEvent::OnUpdate(action)
                    }
                };
                Some((end, Some(event)))
            }
            Rule::FkDefer => silent(&self.fk_defer, text),
            Rule::FormerNames => emit(&self.former_names, text, |caps| {
                let names = self
                    .words(caps.name("names").map_or("", |m| m.as_str()))
                    .iter()
                    .map(|n| n.to_lowercase())
                    .collect();
                MatchEvent::FormerNames(names)
            }),
            Rule::TablePrimaryKey => emit(&self.table_primary_key, text, |caps| {
                MatchEvent::TablePrimaryKey(
                    self.words(caps.name("columns").map_or("", |m| m.as_str())),
                )
            }),
            Rule::TableUnique => emit(&self.table_unique, text, |caps| {
                MatchEvent::TableUnique(self.words(caps.name("columns").map_or("", |m| m.as_str())))
            }),
            Rule::TableForeignKey => emit(&self.table_foreign_key, text, |caps| {
                MatchEvent::TableForeignKey(
                    self.words(caps.name("columns").map_or("", |m| m.as_str())),
                )
            }),
            Rule::CreateIndex => emit(&self.create_index, text, |caps| MatchEvent::CreateIndex {
                unique: caps.name("uniq").is_some(),
                name: caps
                    .name("iname")
                    .map_or_else(String::new, |m| m.as_str().to_owned()),
                table: caps
                    .name("tname")
                    .map_or_else(String::new, |m| m.as_str().to_owned()),
                columns: self.words(caps.name("columns").map_or("", |m| m.as_str())),
                predicate: caps.name("pred").map(|m| m.as_str().trim().to_owned()),
            }),
        }
    }

    fn words(&self, text: &str) -> Vec<String> {
        self.word
            .find_iter(text)
            .map(|m| m.as_str().to_owned())
            .collect()
    }
}

fn silent(re: &Regex, text: &str) -> Option<(usize, Option<MatchEvent>)> {
    re.find(text).map(|m| (m.end(), None))
}

fn emit(
    re: &Regex,
    text: &str,
    build: impl FnOnce(&regex::Captures<'_>) -> MatchEvent,
) -> Option<(usize, Option<MatchEvent>)> {
    let caps = re.captures(text)?;
    let end = caps.get(0).map_or(0, |m| m.end());
    Some((end, Some(build(&caps))))
}
