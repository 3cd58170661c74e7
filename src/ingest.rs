// 🚚 Directory Ingestion
// One extract directory → staged files → ordered transforms → ledger row
//
// File-level failures are logged and the directory moves on; a failing
// transform step aborts the directory without a ledger row.

use crate::classifier::{classify_path, ExtractFormat};
use crate::config::LoaderConfig;
use crate::error::Result;
use crate::ledger::{record_run, RunRecord};
use crate::snapshot::SchemaSnapshot;
use crate::staging::{load_extract, StagedFile};
use crate::transform::{run_pipeline, PipelineReport};
use chrono::{NaiveDate, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, info_span, warn};

/// Date formats tried, in order, on the first `_` token of a directory name
const DIRECTORY_DATE_FORMATS: &[&str] = &["%d%b%Y", "%d%B%Y", "%Y%m%d"];

// ============================================================================
// EXTRACTION TIMESTAMP
// ============================================================================

/// Date encoded in a directory name such as `01Nov2023_tcsi_extract`
pub fn parse_directory_date(dir_name: &str) -> Option<NaiveDate> {
    let token = dir_name.split('_').next()?;
    DIRECTORY_DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(token, fmt).ok())
}

/// Midnight UTC of the directory's date, or of today when the name carries none
///
/// # Examples:
/// ```
/// use std::path::Path;
/// use tcsi_warehouse::ingest::extraction_timestamp_for_dir;
/// assert_eq!(
///     extraction_timestamp_for_dir(Path::new("/data/01Nov2023_extract")),
///     "2023-11-01T00:00:00Z"
/// );
/// ```
pub fn extraction_timestamp_for_dir(dir: &Path) -> String {
    let date = dir
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(parse_directory_date)
        .unwrap_or_else(|| Utc::now().date_naive());
    format!("{}T00:00:00Z", date.format("%Y-%m-%d"))
}

// ============================================================================
// DIRECTORY RUN
// ============================================================================

/// A file that was seen but not staged
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedFile {
    pub file: String,
    pub reason: String,
}

/// Everything one directory run did
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryReport {
    pub directory: PathBuf,
    pub extraction_timestamp: String,
    /// Staged rows per staging relation
    pub counts: BTreeMap<String, usize>,
    pub staged: Vec<StagedFile>,
    pub skipped: Vec<SkippedFile>,
    pub pipeline: PipelineReport,
    pub ledger_id: i64,
}

/// Regular files of `dir` in name order
pub fn list_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Stage every recognised file of `dir`, run the transforms, record the run
///
/// Returns `None` when the directory holds no CSV or workbook files; nothing
/// is transformed or recorded in that case.
pub fn process_directory(
    conn: &Connection,
    dir: &Path,
    config: &LoaderConfig,
) -> Result<Option<DirectoryReport>> {
    let extraction_ts = config
        .extraction_timestamp
        .clone()
        .unwrap_or_else(|| extraction_timestamp_for_dir(dir));
    let span = info_span!("directory", path = %dir.display(), extraction_ts = %extraction_ts);
    let _enter = span.enter();

    let files = list_files(dir)?;
    if !files.iter().any(|p| ExtractFormat::from_path(p).is_some()) {
        warn!("no CSV or workbook files found, skipping directory");
        return Ok(None);
    }

    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut staged = Vec::new();
    let mut skipped = Vec::new();

    for path in &files {
        match stage_file(conn, path, &extraction_ts, config.batch_size) {
            Ok(file) => {
                *counts.entry(file.relation.clone()).or_insert(0) += file.rows;
                staged.push(file);
            }
            Err(e) if e.is_file_scoped() => {
                warn!(file = %path.display(), error = %e, "skipping file");
                skipped.push(SkippedFile {
                    file: display_name(path),
                    reason: e.to_string(),
                });
            }
            Err(e) => return Err(e),
        }
    }

    let snapshot = SchemaSnapshot::capture(conn)?;
    let pipeline = run_pipeline(conn, &extraction_ts, &snapshot, config.commit_mode)?;

    let ledger_id = record_run(
        conn,
        &RunRecord {
            extraction_timestamp: extraction_ts.clone(),
            source_directory: dir.display().to_string(),
            counts: counts.clone(),
        },
    )?;

    info!(
        files = staged.len(),
        skipped = skipped.len(),
        "directory complete"
    );

    Ok(Some(DirectoryReport {
        directory: dir.to_path_buf(),
        extraction_timestamp: extraction_ts,
        counts,
        staged,
        skipped,
        pipeline,
        ledger_id,
    }))
}

fn stage_file(conn: &Connection, path: &Path, extraction_ts: &str, batch_size: usize) -> Result<StagedFile> {
    let file = classify_path(path)?;
    let staged = load_extract(conn, &file, extraction_ts, batch_size)?;
    info!(
        file = %file.file_name,
        relation = %staged.relation,
        rows = staged.rows,
        "loaded"
    );
    Ok(staged)
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Walk every source in order; non-directories are skipped with a warning
pub fn process_sources(
    conn: &Connection,
    sources: &[PathBuf],
    config: &LoaderConfig,
) -> Result<Vec<DirectoryReport>> {
    process_sources_with(conn, sources, config, |_| {})
}

/// Like [`process_sources`], handing each report to `on_report` as soon as
/// its directory is recorded
///
/// A later directory failing does not take back reports already handed out.
pub fn process_sources_with<F>(
    conn: &Connection,
    sources: &[PathBuf],
    config: &LoaderConfig,
    mut on_report: F,
) -> Result<Vec<DirectoryReport>>
where
    F: FnMut(&DirectoryReport),
{
    let mut reports = Vec::new();
    for source in sources {
        if !source.is_dir() {
            warn!(path = %source.display(), "not a directory, skipping");
            continue;
        }
        if let Some(report) = process_directory(conn, source, config)? {
            on_report(&report);
            reports.push(report);
        }
    }
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CommitMode;
    use crate::db::{count_rows, setup_database};
    use crate::ledger::load_history;
    use crate::staging::staged_row_count;
    use std::fs;
    use tempfile::TempDir;

    const STUDENTS_CSV: &str = "\u{feff}UID1_ProvidersResKey,E306_ProviderCode,UID8_StudentsResKey,E313_StudentIdentificationCode,E314_DateOfBirth
P1,3001,S1,1001,2001-02-03
P1,3001,S2,1002,2000-05-06
";

    const COURSES_CSV: &str = "UID5_CoursesResKey,UID1_ProvidersResKey,UID3_CoursesOfStudyResKey,E307_CourseCode,E308_CourseName
C1,P1,CS1,BSC,Bachelor of Science
";

    const ADMISSIONS_CSV: &str = "UID15_CourseAdmissionsResKey,UID1_ProvidersResKey,UID8_StudentsResKey,UID5_CoursesResKey,E534_CourseOfStudyCommencementDate,E632_ATAR
A1,P1,S1,C1,2023-02-27,92.35
A2,P1,S2,C1,2023-02-27,NULL
";

    fn extract_dir(root: &TempDir, name: &str) -> PathBuf {
        let dir = root.path().join(name);
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join("deidentified_1_tcsi_DataExtract_01_11_HEPStudents_2023.csv"), STUDENTS_CSV).unwrap();
        fs::write(dir.join("deidentified_1_tcsi_DataExtract_01_11_HEPCourses_2023.csv"), COURSES_CSV).unwrap();
        fs::write(
            dir.join("deidentified_1_tcsi_DataExtract_01_11_HEPCourseAdmissions_2023.csv"),
            ADMISSIONS_CSV,
        )
        .unwrap();
        fs::write(dir.join("README.txt"), "extract notes").unwrap();
        dir
    }

    fn db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    fn snapshot_table(conn: &Connection, table: &str) -> Vec<String> {
        let sql = format!("SELECT * FROM {} ORDER BY 1", table);
        let mut stmt = conn.prepare(&sql).unwrap();
        let width = stmt.column_count();
        let rows = stmt
            .query_map([], |row| {
                let mut cells = Vec::with_capacity(width);
                for i in 0..width {
                    let v: rusqlite::types::Value = row.get(i)?;
                    cells.push(format!("{:?}", v));
                }
                Ok(cells.join("|"))
            })
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();
        rows
    }

    #[test]
    fn test_directory_dates() {
        assert_eq!(
            parse_directory_date("01Nov2023_extract"),
            NaiveDate::from_ymd_opt(2023, 11, 1)
        );
        assert_eq!(
            parse_directory_date("15March2024_tcsi"),
            NaiveDate::from_ymd_opt(2024, 3, 15)
        );
        assert_eq!(
            parse_directory_date("20240701_tcsi"),
            NaiveDate::from_ymd_opt(2024, 7, 1)
        );
        assert_eq!(parse_directory_date("latest_extract"), None);

        let fallback = extraction_timestamp_for_dir(Path::new("latest_extract"));
        assert!(fallback.ends_with("T00:00:00Z"));
        assert_eq!(fallback.len(), "2024-01-01T00:00:00Z".len());
    }

    #[test]
    fn test_end_to_end_directory() {
        let root = TempDir::new().unwrap();
        let dir = extract_dir(&root, "01Nov2023_extract");
        let conn = db();

        let report = process_directory(&conn, &dir, &LoaderConfig::default())
            .unwrap()
            .expect("directory has extract files");

        assert_eq!(report.extraction_timestamp, "2023-11-01T00:00:00Z");
        assert_eq!(report.counts.get("stg_hep_students"), Some(&2));
        assert_eq!(report.counts.get("stg_hep_courses"), Some(&1));
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].file, "README.txt");

        assert_eq!(count_rows(&conn, "dim_provider").unwrap(), 1);
        assert_eq!(count_rows(&conn, "dim_student").unwrap(), 2);

        // Admissions resolve their course through the dimension
        let joined: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM fact_course_admission a
                 JOIN dim_course c ON c.course_res_key = a.course_res_key
                 JOIN dim_student s ON s.student_res_key = a.student_res_key",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(joined, 2);

        let history = load_history(&conn).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].record.counts, report.counts);
    }

    #[test]
    fn test_rerun_is_idempotent() {
        let root = TempDir::new().unwrap();
        let dir = extract_dir(&root, "01Nov2023_extract");
        let conn = db();
        let config = LoaderConfig::default();

        process_directory(&conn, &dir, &config).unwrap();
        let students = snapshot_table(&conn, "dim_student");
        let admissions = snapshot_table(&conn, "fact_course_admission");

        process_directory(&conn, &dir, &config).unwrap();
        assert_eq!(
            staged_row_count(
                &conn,
                "stg_hep_students",
                "2023-11-01T00:00:00Z",
                "deidentified_1_tcsi_DataExtract_01_11_HEPStudents_2023.csv"
            )
            .unwrap(),
            2
        );
        assert_eq!(snapshot_table(&conn, "dim_student"), students);
        assert_eq!(snapshot_table(&conn, "fact_course_admission"), admissions);

        // Each processed directory appends its own ledger row
        assert_eq!(load_history(&conn).unwrap().len(), 2);
    }

    #[test]
    fn test_empty_directory_records_nothing() {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("01Nov2023_empty");
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join("notes.md"), "nothing here").unwrap();
        let conn = db();

        let report = process_directory(&conn, &dir, &LoaderConfig::default()).unwrap();
        assert!(report.is_none());
        assert!(load_history(&conn).unwrap().is_empty());
    }

    #[test]
    fn test_malformed_file_does_not_stop_directory() {
        let root = TempDir::new().unwrap();
        let dir = extract_dir(&root, "01Nov2023_extract");
        fs::write(dir.join("deidentified_1_tcsi_DataExtract_01_11_SAHELP_2023.csv"), "").unwrap();
        let conn = db();

        let report = process_directory(&conn, &dir, &LoaderConfig::default())
            .unwrap()
            .unwrap();
        assert_eq!(report.skipped.len(), 2);
        assert!(!report.counts.contains_key("stg_sahelp"));
        assert_eq!(count_rows(&conn, "dim_student").unwrap(), 2);
    }

    #[test]
    fn test_timestamp_override_and_sources() {
        let root = TempDir::new().unwrap();
        let dir = extract_dir(&root, "latest");
        let not_a_dir = root.path().join("stray.csv");
        fs::write(&not_a_dir, "a,b\n1,2\n").unwrap();
        let conn = db();

        let config = LoaderConfig::default()
            .with_commit_mode(CommitMode::Atomic)
            .with_extraction_timestamp(Some("2022-06-30T00:00:00Z".to_string()));
        let reports = process_sources(&conn, &[not_a_dir, dir], &config).unwrap();

        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].extraction_timestamp, "2022-06-30T00:00:00Z");
        let stamp: String = conn
            .query_row("SELECT extraction_timestamp FROM dim_student LIMIT 1", [], |r| r.get(0))
            .unwrap();
        assert_eq!(stamp, "2022-06-30T00:00:00Z");
    }

    #[test]
    fn test_failed_step_aborts_without_ledger_row() {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("01Nov2023_broken");
        fs::create_dir(&dir).unwrap();
        // Citizenship rows without their resource key column
        fs::write(
            dir.join("deidentified_1_tcsi_DataExtract_01_11_HEPStudentCitizenships_2023.csv"),
            "UID8_StudentsResKey,E358_CitizenResidentCode\nS1,1\n",
        )
        .unwrap();
        let conn = db();

        let err = process_directory(&conn, &dir, &LoaderConfig::default()).unwrap_err();
        assert_eq!(err.failed_step(), Some("student_citizenship"));
        assert!(load_history(&conn).unwrap().is_empty());
    }

    #[test]
    fn test_reports_surface_before_a_later_directory_fails() {
        let root = TempDir::new().unwrap();
        let good = extract_dir(&root, "01Nov2023_extract");
        let broken = root.path().join("15Mar2024_broken");
        fs::create_dir(&broken).unwrap();
        fs::write(
            broken.join("deidentified_1_tcsi_DataExtract_01_11_HEPStudentCitizenships_2024.csv"),
            "UID8_StudentsResKey,E358_CitizenResidentCode\nS1,1\n",
        )
        .unwrap();
        let conn = db();

        let mut seen = Vec::new();
        let err = process_sources_with(&conn, &[good, broken], &LoaderConfig::default(), |report| {
            seen.push(report.extraction_timestamp.clone());
        })
        .unwrap_err();

        assert_eq!(err.failed_step(), Some("student_citizenship"));
        assert_eq!(seen, vec!["2023-11-01T00:00:00Z".to_string()]);
        assert_eq!(load_history(&conn).unwrap().len(), 1);
    }
}
