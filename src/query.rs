// 🧱 Statement Composer
// Builds INSERT ... SELECT ... ON CONFLICT DO UPDATE statements
//
// Only identifiers are written into statement text, and those come from the
// sanitizer or from static warehouse names. Every data value, including
// the extraction timestamp, is a bound parameter.

use crate::error::Result;
use rusqlite::{params_from_iter, Connection};

/// Quote an identifier for interpolation
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

// ============================================================================
// EXPRESSIONS
// ============================================================================

/// A projected value in a selection
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A column of the source relation (already sanitized)
    Column(String),
    /// Literal NULL
    Null,
    /// A bound constant
    Bind(String),
    /// The run's extraction timestamp (bound once, reused)
    ExtractionTimestamp,
    /// `NULLIF(expr, 'NULL')`: the text sentinel becomes a real null
    NullIfSentinel(Box<Expr>),
    /// Null when blank or the sentinel, so aggregates only see real values
    Known(Box<Expr>),
    Min(Box<Expr>),
    Max(Box<Expr>),
}

impl Expr {
    pub fn column(name: impl Into<String>) -> Self {
        Expr::Column(name.into())
    }

    pub fn bind(value: impl Into<String>) -> Self {
        Expr::Bind(value.into())
    }

    pub fn null_if_sentinel(self) -> Self {
        match self {
            Expr::Null => Expr::Null,
            other => Expr::NullIfSentinel(Box::new(other)),
        }
    }

    pub fn known(self) -> Self {
        match self {
            Expr::Null => Expr::Null,
            other => Expr::Known(Box::new(other)),
        }
    }

    pub fn min(self) -> Self {
        Expr::Min(Box::new(self))
    }

    pub fn max(self) -> Self {
        Expr::Max(Box::new(self))
    }

    fn render(&self, params: &mut Params) -> String {
        match self {
            Expr::Column(name) => quote_ident(name),
            Expr::Null => "NULL".to_string(),
            Expr::Bind(value) => params.bind(value),
            Expr::ExtractionTimestamp => params.timestamp(),
            Expr::NullIfSentinel(inner) => format!("NULLIF({}, 'NULL')", inner.render(params)),
            Expr::Known(inner) => format!("NULLIF(NULLIF(TRIM({}), ''), 'NULL')", inner.render(params)),
            Expr::Min(inner) => format!("MIN({})", inner.render(params)),
            Expr::Max(inner) => format!("MAX({})", inner.render(params)),
        }
    }
}

/// Row predicates beyond the extraction-timestamp scope
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Value is not null, not blank and not the `NULL` sentinel
    Present(Expr),
    /// Value matches `column` of some row in `table`
    ///
    /// `value` is resolved against the outer relation only when `table` has
    /// no column of the same name.
    ExistsIn {
        table: &'static str,
        column: &'static str,
        value: Expr,
    },
}

impl Filter {
    fn render(&self, params: &mut Params) -> String {
        match self {
            Filter::Present(expr) => format!("{} IS NOT NULL", expr.clone().known().render(params)),
            Filter::ExistsIn { table, column, value } => format!(
                "EXISTS (SELECT 1 FROM {} AS existing WHERE existing.{} = {})",
                quote_ident(table),
                quote_ident(column),
                value.render(params)
            ),
        }
    }
}

/// Which source rows a statement reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Only rows staged under the current extraction timestamp
    Extraction,
    /// Every row (used for rollups over warehouse relations)
    All,
}

// ============================================================================
// PARAMETERS
// ============================================================================

struct Params {
    extraction_ts: String,
    values: Vec<String>,
    ts_slot: Option<usize>,
}

impl Params {
    fn new(extraction_ts: &str) -> Self {
        Params {
            extraction_ts: extraction_ts.to_string(),
            values: Vec::new(),
            ts_slot: None,
        }
    }

    fn bind(&mut self, value: &str) -> String {
        self.values.push(value.to_string());
        format!("?{}", self.values.len())
    }

    fn timestamp(&mut self) -> String {
        let slot = match self.ts_slot {
            Some(slot) => slot,
            None => {
                self.values.push(self.extraction_ts.clone());
                let slot = self.values.len();
                self.ts_slot = Some(slot);
                slot
            }
        };
        format!("?{}", slot)
    }
}

/// Rendered SQL plus its positional parameters
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<String>,
}

impl Statement {
    pub fn execute(&self, conn: &Connection) -> Result<usize> {
        let changed = conn.execute(&self.sql, params_from_iter(self.params.iter()))?;
        Ok(changed)
    }
}

fn where_clause(scope: Scope, filters: &[Filter], params: &mut Params) -> String {
    let mut predicates = Vec::new();
    if scope == Scope::Extraction {
        predicates.push(format!(
            "{} = {}",
            quote_ident("extraction_timestamp"),
            params.timestamp()
        ));
    }
    predicates.extend(filters.iter().map(|f| f.render(params)));
    if predicates.is_empty() {
        // INSERT ... SELECT ... ON CONFLICT needs a WHERE to parse unambiguously
        "WHERE 1".to_string()
    } else {
        format!("WHERE {}", predicates.join("\n  AND "))
    }
}

// ============================================================================
// UPSERT
// ============================================================================

/// `INSERT INTO target (...) SELECT ... FROM source ... ON CONFLICT(key) DO UPDATE`
///
/// Rows whose key is null, blank or the `NULL` sentinel are never selected.
/// On conflict every non-key column is overwritten with the incoming value.
#[derive(Debug, Clone)]
pub struct Upsert {
    target: &'static str,
    key: &'static str,
    source: String,
    scope: Scope,
    distinct: bool,
    columns: Vec<(&'static str, Expr)>,
    filters: Vec<Filter>,
    group_by: Vec<Expr>,
}

impl Upsert {
    pub fn into_table(target: &'static str, key: &'static str, key_expr: Expr) -> Self {
        Upsert {
            target,
            key,
            source: String::new(),
            scope: Scope::Extraction,
            distinct: false,
            filters: vec![Filter::Present(key_expr.clone())],
            columns: vec![(key, key_expr)],
            group_by: Vec::new(),
        }
    }

    pub fn from(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    pub fn set(mut self, column: &'static str, expr: Expr) -> Self {
        self.columns.push((column, expr));
        self
    }

    /// Write the run's extraction timestamp into `extraction_timestamp`
    pub fn stamped(self) -> Self {
        self.set("extraction_timestamp", Expr::ExtractionTimestamp)
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn group_by(mut self, expr: Expr) -> Self {
        self.group_by.push(expr);
        self
    }

    pub fn render(&self, extraction_ts: &str) -> Statement {
        let mut params = Params::new(extraction_ts);

        let target_cols: Vec<String> = self.columns.iter().map(|(c, _)| quote_ident(c)).collect();
        let select_exprs: Vec<String> = self
            .columns
            .iter()
            .map(|(_, e)| e.render(&mut params))
            .collect();
        let where_sql = where_clause(self.scope, &self.filters, &mut params);

        let mut sql = format!(
            "INSERT INTO {} ({})\nSELECT {}{}\nFROM {}\n{}",
            quote_ident(self.target),
            target_cols.join(", "),
            if self.distinct { "DISTINCT " } else { "" },
            select_exprs.join(",\n       "),
            quote_ident(&self.source),
            where_sql,
        );

        if !self.group_by.is_empty() {
            let groups: Vec<String> = self.group_by.iter().map(|e| e.render(&mut params)).collect();
            sql.push_str(&format!("\nGROUP BY {}", groups.join(", ")));
        }

        sql.push_str(&conflict_clause(
            self.key,
            self.columns.iter().map(|(c, _)| *c),
        ));

        Statement {
            sql,
            params: params.values,
        }
    }

    pub fn execute(&self, conn: &Connection, extraction_ts: &str) -> Result<usize> {
        self.render(extraction_ts).execute(conn)
    }
}

fn conflict_clause<'a>(key: &str, columns: impl Iterator<Item = &'a str>) -> String {
    let updates: Vec<String> = columns
        .filter(|c| *c != key)
        .map(|c| format!("{0} = excluded.{0}", quote_ident(c)))
        .collect();
    if updates.is_empty() {
        format!("\nON CONFLICT({}) DO NOTHING", quote_ident(key))
    } else {
        format!(
            "\nON CONFLICT({}) DO UPDATE SET\n    {}",
            quote_ident(key),
            updates.join(",\n    ")
        )
    }
}

/// Row-at-a-time upsert for keys computed outside SQL
///
/// `columns[0]` must be the key; placeholders are `?1..?N` in column order.
pub fn values_upsert_sql(target: &str, key: &str, columns: &[&str]) -> String {
    let cols: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({}){}",
        quote_ident(target),
        cols.join(", "),
        placeholders.join(", "),
        conflict_clause(key, columns.iter().copied())
    )
}

// ============================================================================
// SELECT
// ============================================================================

/// Plain projection over a staging relation, for steps that post-process rows
#[derive(Debug, Clone)]
pub struct Select {
    source: String,
    columns: Vec<Expr>,
    filters: Vec<Filter>,
}

impl Select {
    pub fn from(source: impl Into<String>) -> Self {
        Select {
            source: source.into(),
            columns: Vec::new(),
            filters: Vec::new(),
        }
    }

    pub fn column(mut self, expr: Expr) -> Self {
        self.columns.push(expr);
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn render(&self, extraction_ts: &str) -> Statement {
        let mut params = Params::new(extraction_ts);
        let exprs: Vec<String> = self.columns.iter().map(|e| e.render(&mut params)).collect();
        let where_sql = where_clause(Scope::Extraction, &self.filters, &mut params);
        Statement {
            sql: format!(
                "SELECT {}\nFROM {}\n{}",
                exprs.join(", "),
                quote_ident(&self.source),
                where_sql
            ),
            params: params.values,
        }
    }

    /// Fetch every matching row as optional text values
    pub fn fetch(&self, conn: &Connection, extraction_ts: &str) -> Result<Vec<Vec<Option<String>>>> {
        let statement = self.render(extraction_ts);
        let width = self.columns.len();
        let mut stmt = conn.prepare(&statement.sql)?;
        let rows = stmt
            .query_map(
                params_from_iter(statement.params.iter()),
                |row| -> rusqlite::Result<Vec<Option<String>>> {
                    (0..width).map(|i| row.get(i)).collect()
                },
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn staging_fixture() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE stg_items (item_key TEXT, label TEXT, amount TEXT,
                                     source_file TEXT NOT NULL, reporting_year TEXT,
                                     extraction_timestamp TEXT NOT NULL);
             CREATE TABLE dim_item (item_key TEXT PRIMARY KEY, label TEXT, amount REAL,
                                    kind TEXT, extraction_timestamp TEXT);
             INSERT INTO stg_items VALUES ('K1', 'first', '10.5', 'a.csv', NULL, 'T1');
             INSERT INTO stg_items VALUES ('K2', 'second', 'NULL', 'a.csv', NULL, 'T1');
             INSERT INTO stg_items VALUES ('', 'blank key', '1', 'a.csv', NULL, 'T1');
             INSERT INTO stg_items VALUES ('NULL', 'sentinel key', '1', 'a.csv', NULL, 'T1');
             INSERT INTO stg_items VALUES ('K3', 'other run', '2', 'a.csv', NULL, 'T0');",
        )
        .unwrap();
        conn
    }

    fn item_upsert() -> Upsert {
        Upsert::into_table("dim_item", "item_key", Expr::column("item_key"))
            .from("stg_items")
            .set("label", Expr::column("label"))
            .set("amount", Expr::column("amount").null_if_sentinel())
            .set("kind", Expr::bind("ITEM'; DROP TABLE dim_item; --"))
            .stamped()
    }

    #[test]
    fn test_render_binds_values() {
        let stmt = item_upsert().render("T1");

        assert!(stmt.sql.starts_with("INSERT INTO \"dim_item\""));
        assert!(stmt.sql.contains("ON CONFLICT(\"item_key\") DO UPDATE SET"));
        assert!(stmt.sql.contains("\"label\" = excluded.\"label\""));
        assert!(!stmt.sql.contains("\"item_key\" = excluded"));
        assert!(!stmt.sql.contains("DROP TABLE"));
        // kind constant, then the timestamp reused by the WHERE clause
        assert_eq!(stmt.params, vec!["ITEM'; DROP TABLE dim_item; --", "T1"]);
        assert_eq!(stmt.sql.matches("?2").count(), 2);
    }

    #[test]
    fn test_upsert_scopes_and_skips_missing_keys() {
        let conn = staging_fixture();
        let changed = item_upsert().execute(&conn, "T1").unwrap();
        assert_eq!(changed, 2);

        let amount: Option<f64> = conn
            .query_row("SELECT amount FROM dim_item WHERE item_key = 'K2'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(amount, None);

        let amount: f64 = conn
            .query_row("SELECT amount FROM dim_item WHERE item_key = 'K1'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(amount, 10.5);
    }

    #[test]
    fn test_upsert_overwrites_on_conflict() {
        let conn = staging_fixture();
        item_upsert().execute(&conn, "T1").unwrap();
        conn.execute("UPDATE stg_items SET label = 'renamed' WHERE item_key = 'K1'", [])
            .unwrap();
        item_upsert().execute(&conn, "T1").unwrap();

        let (count, label): (i64, String) = conn
            .query_row(
                "SELECT (SELECT COUNT(*) FROM dim_item), label FROM dim_item WHERE item_key = 'K1'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(count, 2);
        assert_eq!(label, "renamed");
    }

    #[test]
    fn test_null_wrappers_on_null_stay_null() {
        assert_eq!(Expr::Null.null_if_sentinel(), Expr::Null);
        assert_eq!(Expr::Null.known(), Expr::Null);
    }

    #[test]
    fn test_group_by_and_all_scope() {
        let stmt = Upsert::into_table("dim_item", "item_key", Expr::column("item_key"))
            .from("dim_item")
            .scope(Scope::All)
            .set("label", Expr::column("label").min())
            .group_by(Expr::column("item_key"))
            .render("T1");
        assert!(stmt.sql.contains("MIN(\"label\")"));
        assert!(stmt.sql.contains("GROUP BY \"item_key\""));
        assert!(!stmt.sql.contains("extraction_timestamp"));
        assert!(stmt.params.is_empty());
    }

    #[test]
    fn test_values_upsert_sql() {
        let sql = values_upsert_sql("dim_item", "item_key", &["item_key", "label"]);
        assert_eq!(
            sql,
            "INSERT INTO \"dim_item\" (\"item_key\", \"label\") VALUES (?1, ?2)\n\
             ON CONFLICT(\"item_key\") DO UPDATE SET\n    \"label\" = excluded.\"label\""
        );
    }

    #[test]
    fn test_select_fetch() {
        let conn = staging_fixture();
        let rows = Select::from("stg_items")
            .column(Expr::column("item_key"))
            .column(Expr::column("amount").null_if_sentinel())
            .filter(Filter::Present(Expr::column("item_key")))
            .fetch(&conn, "T1")
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.contains(&vec![Some("K2".to_string()), None]));
    }

    #[test]
    fn test_quote_ident_escapes() {
        assert_eq!(quote_ident("plain"), "\"plain\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }
}
