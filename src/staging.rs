// 📥 Staging Loader
// Lands raw extract rows in dynamically-shaped, all-TEXT staging relations
//
// Guarantees:
// - schema only grows (new vintage columns are added, nothing is dropped)
// - one (extraction_timestamp, source_file) pair is never duplicated
// - a file lands completely or not at all

use crate::classifier::ExtractFile;
use crate::db::table_exists;
use crate::error::{IngestError, Result};
use crate::query::quote_ident;
use crate::sanitize::sanitize_header;
use crate::source::{open_source, TabularSource};
use rusqlite::{params, params_from_iter, Connection};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info};

/// Default progress interval for row inserts
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Outcome of loading one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedFile {
    pub relation: String,
    pub source_file: String,
    pub rows: usize,
    pub columns_added: usize,
}

/// Open and load one classified extract file
///
/// The source is opened (and its header read) before anything is written,
/// so an unreadable file never touches the store.
pub fn load_extract(
    conn: &Connection,
    file: &ExtractFile,
    extraction_ts: &str,
    batch_size: usize,
) -> Result<StagedFile> {
    let source = open_source(file)?;
    load_source(
        conn,
        &file.staging_table,
        source,
        extraction_ts,
        &file.file_name,
        file.reporting_year.as_deref(),
        batch_size,
    )
}

/// Load a tabular source into `relation`, replacing rows from the same
/// (extraction timestamp, source file) pair
pub fn load_source(
    conn: &Connection,
    relation: &str,
    source: TabularSource,
    extraction_ts: &str,
    source_file: &str,
    reporting_year: Option<&str>,
    batch_size: usize,
) -> Result<StagedFile> {
    if source.header.is_empty() {
        return Err(IngestError::malformed(source_file, "no header row"));
    }
    let columns = sanitize_header(&source.header);
    let width = columns.len();
    let batch_size = batch_size.max(1);

    let tx = conn.unchecked_transaction()?;
    let columns_added = ensure_staging_table(&tx, relation, &columns)?;

    let removed = tx.execute(
        &format!(
            "DELETE FROM {} WHERE extraction_timestamp = ?1 AND source_file = ?2",
            quote_ident(relation)
        ),
        params![extraction_ts, source_file],
    )?;
    if removed > 0 {
        debug!(relation, source_file, removed, "replacing previously staged rows");
    }

    let insert_sql = insert_statement(relation, &columns);
    let mut rows = 0usize;
    {
        let mut stmt = tx.prepare_cached(&insert_sql)?;
        for row in source.rows {
            let row = row?;
            // Missing cells are blank, not null: absence is a schema matter
            let mut values: Vec<Option<String>> = (0..width)
                .map(|i| {
                    Some(
                        row.get(i)
                            .and_then(|cell| cell.as_deref())
                            .map(|v| v.trim().to_string())
                            .unwrap_or_default(),
                    )
                })
                .collect();
            values.push(Some(source_file.to_string()));
            values.push(reporting_year.map(str::to_string));
            values.push(Some(extraction_ts.to_string()));

            stmt.execute(params_from_iter(values.iter()))?;
            rows += 1;
            if rows % batch_size == 0 {
                debug!(relation, rows, "staging batch written");
            }
        }
    }
    tx.commit()?;

    info!(relation, source_file, rows, columns_added, "staged extract file");
    Ok(StagedFile {
        relation: relation.to_string(),
        source_file: source_file.to_string(),
        rows,
        columns_added,
    })
}

/// Create the staging relation, or add any columns it lacks
///
/// Returns how many columns were added to an existing relation.
pub fn ensure_staging_table(conn: &Connection, relation: &str, columns: &[String]) -> Result<usize> {
    let table = quote_ident(relation);

    if !table_exists(conn, relation)? {
        let mut defs: Vec<String> = columns
            .iter()
            .map(|c| format!("{} TEXT", quote_ident(c)))
            .collect();
        defs.push("source_file TEXT NOT NULL".to_string());
        defs.push("reporting_year TEXT".to_string());
        defs.push("extraction_timestamp TEXT NOT NULL".to_string());

        conn.execute(
            &format!("CREATE TABLE {} (\n    {}\n)", table, defs.join(",\n    ")),
            [],
        )?;
        conn.execute(
            &format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} (extraction_timestamp, source_file)",
                quote_ident(&format!("idx_{}_run", relation)),
                table
            ),
            [],
        )?;
        debug!(relation, columns = columns.len(), "created staging relation");
        return Ok(0);
    }

    let existing = live_columns(conn, relation)?;
    let mut added = 0;
    for column in columns.iter().filter(|c| !existing.contains(*c)) {
        conn.execute(
            &format!("ALTER TABLE {} ADD COLUMN {} TEXT", table, quote_ident(column)),
            [],
        )?;
        added += 1;
    }
    if added > 0 {
        info!(relation, added, "staging relation grew new columns");
    }
    Ok(added)
}

/// Current column names of a relation
pub fn live_columns(conn: &Connection, relation: &str) -> Result<HashSet<String>> {
    let mut stmt = conn.prepare("SELECT name FROM pragma_table_info(?1)")?;
    let names = stmt
        .query_map(params![relation], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<HashSet<_>, _>>()?;
    Ok(names)
}

/// Rows staged for one (extraction timestamp, source file) pair
pub fn staged_row_count(
    conn: &Connection,
    relation: &str,
    extraction_ts: &str,
    source_file: &str,
) -> Result<i64> {
    let count = conn.query_row(
        &format!(
            "SELECT COUNT(*) FROM {} WHERE extraction_timestamp = ?1 AND source_file = ?2",
            quote_ident(relation)
        ),
        params![extraction_ts, source_file],
        |row| row.get(0),
    )?;
    Ok(count)
}

fn insert_statement(relation: &str, columns: &[String]) -> String {
    let mut names: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
    names.extend(["source_file", "reporting_year", "extraction_timestamp"].map(quote_ident));
    let placeholders: Vec<String> = (1..=names.len()).map(|i| format!("?{}", i)).collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(relation),
        names.join(", "),
        placeholders.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::Row;

    fn header(fields: &[&str]) -> Vec<String> {
        fields.iter().map(|f| f.to_string()).collect()
    }

    fn row(cells: &[Option<&str>]) -> Row {
        cells.iter().map(|c| c.map(str::to_string)).collect()
    }

    fn students_source() -> TabularSource {
        TabularSource::from_rows(
            header(&["UID8_StudentsResKey", "E313 Student-Identification Code"]),
            vec![
                row(&[Some("S1"), Some(" 1001 ")]),
                row(&[Some("S2"), None]),
                row(&[Some("S3")]),
            ],
        )
    }

    #[test]
    fn test_load_creates_relation_with_provenance() {
        let conn = Connection::open_in_memory().unwrap();
        let staged = load_source(
            &conn,
            "stg_hep_students",
            students_source(),
            "2023-11-01T00:00:00Z",
            "HEPStudents_2023.csv",
            Some("2023"),
            DEFAULT_BATCH_SIZE,
        )
        .unwrap();

        assert_eq!(staged.rows, 3);
        let columns = live_columns(&conn, "stg_hep_students").unwrap();
        for expected in [
            "uid8_students_res_key",
            "e313_student_identification_code",
            "source_file",
            "reporting_year",
            "extraction_timestamp",
        ] {
            assert!(columns.contains(expected), "missing {}", expected);
        }

        let (code, year): (String, String) = conn
            .query_row(
                "SELECT e313_student_identification_code, reporting_year
                 FROM stg_hep_students WHERE uid8_students_res_key = 'S1'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(code, "1001");
        assert_eq!(year, "2023");
    }

    #[test]
    fn test_missing_cells_are_blank_not_null() {
        let conn = Connection::open_in_memory().unwrap();
        load_source(&conn, "stg_x", students_source(), "T1", "x.csv", None, 2).unwrap();

        let nulls: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM stg_x WHERE e313_student_identification_code IS NULL",
                [],
                |r| r.get(0),
            )
            .unwrap();
        let blanks: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM stg_x WHERE e313_student_identification_code = ''",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(nulls, 0);
        assert_eq!(blanks, 2);
    }

    #[test]
    fn test_reload_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        for _ in 0..2 {
            load_source(&conn, "stg_x", students_source(), "T1", "x.csv", None, 1000).unwrap();
        }
        assert_eq!(staged_row_count(&conn, "stg_x", "T1", "x.csv").unwrap(), 3);

        // A different file or run is kept alongside
        load_source(&conn, "stg_x", students_source(), "T1", "y.csv", None, 1000).unwrap();
        load_source(&conn, "stg_x", students_source(), "T2", "x.csv", None, 1000).unwrap();
        assert_eq!(staged_row_count(&conn, "stg_x", "T1", "x.csv").unwrap(), 3);
        assert_eq!(crate::db::count_rows(&conn, "stg_x").unwrap(), 9);
    }

    #[test]
    fn test_schema_grows_never_shrinks() {
        let conn = Connection::open_in_memory().unwrap();
        let old = TabularSource::from_rows(header(&["UID5_CoursesResKey"]), vec![row(&[Some("C1")])]);
        load_source(&conn, "stg_hep_courses", old, "T1", "old.csv", None, 1000).unwrap();

        let newer = TabularSource::from_rows(
            header(&["UID5_CoursesResKey", "E597_CRICOSCode"]),
            vec![row(&[Some("C2"), Some("012345A")])],
        );
        let staged = load_source(&conn, "stg_hep_courses", newer, "T2", "new.csv", None, 1000).unwrap();
        assert_eq!(staged.columns_added, 1);

        // Older vintage without the column again: nothing dropped
        let older = TabularSource::from_rows(header(&["UID5_CoursesResKey"]), vec![row(&[Some("C3")])]);
        load_source(&conn, "stg_hep_courses", older, "T3", "old.csv", None, 1000).unwrap();

        let columns = live_columns(&conn, "stg_hep_courses").unwrap();
        assert!(columns.contains("e597_cricoscode"));
        let cricos: Option<String> = conn
            .query_row(
                "SELECT e597_cricoscode FROM stg_hep_courses WHERE uid5_courses_res_key = 'C3'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(cricos, None);
    }

    #[test]
    fn test_read_error_rolls_back_file() {
        let conn = Connection::open_in_memory().unwrap();
        load_source(&conn, "stg_x", students_source(), "T1", "x.csv", None, 1000).unwrap();

        let failing = TabularSource {
            header: header(&["UID8_StudentsResKey", "E313 Student-Identification Code"]),
            rows: Box::new(
                vec![
                    Ok(row(&[Some("S9"), Some("9")])),
                    Err(IngestError::malformed("x.csv", "truncated record")),
                ]
                .into_iter(),
            ),
        };
        let err = load_source(&conn, "stg_x", failing, "T1", "x.csv", None, 1000).unwrap_err();
        assert!(matches!(err, IngestError::MalformedSource { .. }));

        // Previous rows survive; the partial reload is gone
        assert_eq!(staged_row_count(&conn, "stg_x", "T1", "x.csv").unwrap(), 3);
    }

    #[test]
    fn test_headerless_source_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        let empty = TabularSource::from_rows(Vec::new(), Vec::new());
        let err = load_source(&conn, "stg_x", empty, "T1", "x.csv", None, 1000).unwrap_err();
        assert!(matches!(err, IngestError::MalformedSource { .. }));
        assert!(!table_exists(&conn, "stg_x").unwrap());
    }

    #[test]
    fn test_insert_statement_shape() {
        let sql = insert_statement("stg_x", &["a".to_string()]);
        assert_eq!(
            sql,
            "INSERT INTO \"stg_x\" (\"a\", \"source_file\", \"reporting_year\", \"extraction_timestamp\") VALUES (?1, ?2, ?3, ?4)"
        );
    }
}
