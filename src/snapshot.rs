// 🔎 Column Presence Resolver
// One introspection pass per run; transform steps consult the snapshot
//
// Extract vintages differ in which optional fields they carry. Steps ask the
// snapshot whether a field exists and get back either the column or a
// neutral substitute, so one fixed set of steps serves every vintage.

use crate::error::{IngestError, Result};
use crate::query::Expr;
use crate::sanitize::sanitize_identifier;
use crate::staging::live_columns;
use rusqlite::Connection;
use std::collections::{BTreeMap, HashSet};

/// Live column sets of every staging relation, captured once
#[derive(Debug, Clone, Default)]
pub struct SchemaSnapshot {
    relations: BTreeMap<String, HashSet<String>>,
}

impl SchemaSnapshot {
    /// Introspect every `stg_*` relation
    pub fn capture(conn: &Connection) -> Result<Self> {
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name LIKE 'stg\\_%' ESCAPE '\\'",
        )?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut relations = BTreeMap::new();
        for name in names {
            let columns = live_columns(conn, &name)?;
            relations.insert(name, columns);
        }
        Ok(SchemaSnapshot { relations })
    }

    /// Build a snapshot by hand (tests, dry runs)
    pub fn from_relations<I, C>(relations: I) -> Self
    where
        I: IntoIterator<Item = (String, C)>,
        C: IntoIterator<Item = String>,
    {
        SchemaSnapshot {
            relations: relations
                .into_iter()
                .map(|(name, cols)| (name, cols.into_iter().collect()))
                .collect(),
        }
    }

    pub fn has_relation(&self, relation: &str) -> bool {
        self.relations.contains_key(relation)
    }

    /// Does `original_name` (pre-sanitization) exist in the relation?
    pub fn has_column(&self, relation: &str, original_name: &str) -> bool {
        self.relations
            .get(relation)
            .map(|cols| cols.contains(&sanitize_identifier(original_name)))
            .unwrap_or(false)
    }

    /// View over one relation, or `None` when this run staged no such entity
    pub fn view(&self, relation: &str) -> Option<StagingView<'_>> {
        self.relations
            .get_key_value(relation)
            .map(|(name, columns)| StagingView { name, columns })
    }

    pub fn relation_names(&self) -> impl Iterator<Item = &str> {
        self.relations.keys().map(String::as_str)
    }
}

/// One staging relation as seen by a transform step
#[derive(Debug, Clone, Copy)]
pub struct StagingView<'a> {
    name: &'a str,
    columns: &'a HashSet<String>,
}

impl<'a> StagingView<'a> {
    pub fn name(&self) -> &'a str {
        self.name
    }

    pub fn has_column(&self, original_name: &str) -> bool {
        self.columns.contains(&sanitize_identifier(original_name))
    }

    /// Required field; absence is a step failure
    pub fn col(&self, original_name: &str) -> Result<Expr> {
        let column = sanitize_identifier(original_name);
        if self.columns.contains(&column) {
            Ok(Expr::Column(column))
        } else {
            Err(IngestError::MissingColumn {
                relation: self.name.to_string(),
                column,
            })
        }
    }

    /// Optional field; literal NULL when this vintage lacks it
    pub fn opt(&self, original_name: &str) -> Expr {
        self.opt_or(original_name, Expr::Null)
    }

    /// Optional field with a caller-supplied substitute
    pub fn opt_or(&self, original_name: &str, default: Expr) -> Expr {
        self.col(original_name).unwrap_or(default)
    }

    /// Optional field with the sentinel mapped to null
    pub fn opt_nullif(&self, original_name: &str) -> Expr {
        self.opt(original_name).null_if_sentinel()
    }

    /// A provenance column (`reporting_year`, `source_file`, ...)
    pub fn provenance(&self, column: &'static str) -> Expr {
        Expr::Column(column.to_string())
    }
}
