// 📄 Tabular Sources
// CSV and workbook readers resolved to one shape: header + lazy rows
//
// The staging loader only ever sees `TabularSource`; it does not know which
// reader produced it.

use crate::classifier::{ExtractFile, ExtractFormat};
use crate::error::{IngestError, Result};
use std::fs::File;
use std::path::Path;

/// One positional row; `None` marks a missing cell
pub type Row = Vec<Option<String>>;

/// Header plus a single-pass row iterator
pub struct TabularSource {
    pub header: Vec<String>,
    pub rows: Box<dyn Iterator<Item = Result<Row>>>,
}

impl TabularSource {
    /// Build a source from in-memory data
    pub fn from_rows(header: Vec<String>, rows: Vec<Row>) -> Self {
        TabularSource {
            header,
            rows: Box::new(rows.into_iter().map(Ok)),
        }
    }
}

impl std::fmt::Debug for TabularSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TabularSource")
            .field("header", &self.header)
            .finish_non_exhaustive()
    }
}

/// Open the reader matching the file's format
pub fn open_source(file: &ExtractFile) -> Result<TabularSource> {
    match file.format {
        ExtractFormat::Csv => open_csv(&file.path),
        ExtractFormat::Workbook => open_workbook(&file.path),
    }
}

// ============================================================================
// CSV
// ============================================================================

/// Delimited-text reader
///
/// Ragged rows are accepted; a leading UTF-8 byte-order mark is dropped from
/// the first header field.
pub fn open_csv(path: &Path) -> Result<TabularSource> {
    let file = File::open(path).map_err(|e| IngestError::malformed(path, e))?;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(file);

    let header: Vec<String> = reader
        .headers()
        .map_err(|e| IngestError::malformed(path, e))?
        .iter()
        .enumerate()
        .map(|(i, field)| {
            if i == 0 {
                field.trim_start_matches('\u{feff}').to_string()
            } else {
                field.to_string()
            }
        })
        .collect();

    if header.is_empty() {
        return Err(IngestError::malformed(path, "no header row"));
    }

    let owned_path = path.to_path_buf();
    let rows = reader.into_records().map(move |record| {
        record
            .map(|r| r.iter().map(|v| Some(v.to_string())).collect())
            .map_err(|e| IngestError::malformed(owned_path.clone(), e))
    });

    Ok(TabularSource {
        header,
        rows: Box::new(rows),
    })
}

// ============================================================================
// WORKBOOK
// ============================================================================

/// Spreadsheet reader: first worksheet, first row is the header
///
/// calamine decodes the whole sheet into a `Range` up front; rows are
/// converted to text one at a time as the loader pulls them.
#[cfg(feature = "xlsx")]
pub fn open_workbook(path: &Path) -> Result<TabularSource> {
    use calamine::{open_workbook_auto, Reader};

    let mut workbook = open_workbook_auto(path).map_err(|e| IngestError::malformed(path, e))?;
    let sheet_name = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| IngestError::malformed(path, "workbook has no sheets"))?;
    let range = workbook
        .worksheet_range(&sheet_name)
        .map_err(|e| IngestError::malformed(path, e))?;

    sheet_source(range).ok_or_else(|| IngestError::malformed(path, "no header row"))
}

#[cfg(feature = "xlsx")]
fn cell_text(cell: &calamine::Data) -> Option<String> {
    use calamine::Data;
    match cell {
        Data::Empty => None,
        Data::String(s) => Some(s.clone()),
        // Whole floats render without a trailing ".0"
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => Some(format!("{}", *f as i64)),
        other => Some(other.to_string()),
    }
}

/// Header from the first row, the rest yielded lazily; `None` for an empty sheet
#[cfg(feature = "xlsx")]
fn sheet_source(range: calamine::Range<calamine::Data>) -> Option<TabularSource> {
    if range.is_empty() {
        return None;
    }
    let header_width = range.width();
    let header: Vec<String> = (0..header_width)
        .map(|c| range.get((0, c)).and_then(cell_text).unwrap_or_default())
        .collect();

    let width = header.len();
    let height = range.height();
    let rows = (1..height).map(move |r| {
        Ok((0..width)
            .map(|c| range.get((r, c)).and_then(cell_text))
            .collect::<Row>())
    });

    Some(TabularSource {
        header,
        rows: Box::new(rows),
    })
}

#[cfg(not(feature = "xlsx"))]
pub fn open_workbook(path: &Path) -> Result<TabularSource> {
    Err(IngestError::MissingOptionalDependency {
        path: path.to_path_buf(),
        feature: "xlsx",
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, body: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        let mut f = File::create(&path).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_csv_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "HEPStudents_2023.csv",
            "\u{feff}UID8_StudentsResKey,E313_StudentIdentificationCode\nS1,1001\nS2\n",
        );

        let source = open_csv(&path).unwrap();
        assert_eq!(
            source.header,
            vec!["UID8_StudentsResKey", "E313_StudentIdentificationCode"]
        );

        let rows: Vec<Row> = source.rows.collect::<Result<_>>().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], vec![Some("S1".to_string()), Some("1001".to_string())]);
        // Ragged row keeps only the cells it has
        assert_eq!(rows[1], vec![Some("S2".to_string())]);
    }

    #[test]
    fn test_empty_csv_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "Empty.csv", "");
        let err = open_csv(&path).unwrap_err();
        assert!(matches!(err, IngestError::MalformedSource { .. }));
    }

    #[test]
    fn test_missing_csv_is_malformed() {
        let err = open_csv(Path::new("/nonexistent/extract.csv")).unwrap_err();
        assert!(err.is_file_scoped());
    }

    #[cfg(feature = "xlsx")]
    #[test]
    fn test_sheet_rows_are_text() {
        use calamine::{Data, Range};

        let mut range = Range::new((0, 0), (2, 1));
        range.set_value((0, 0), Data::String("UID8_StudentsResKey".to_string()));
        range.set_value((0, 1), Data::String("E313_StudentIdentificationCode".to_string()));
        range.set_value((1, 0), Data::String("S1".to_string()));
        range.set_value((1, 1), Data::Float(1001.0));
        range.set_value((2, 0), Data::String("S2".to_string()));

        let source = sheet_source(range).unwrap();
        assert_eq!(source.header, vec!["UID8_StudentsResKey", "E313_StudentIdentificationCode"]);
        let rows: Vec<Row> = source.rows.collect::<Result<_>>().unwrap();
        assert_eq!(
            rows,
            vec![
                vec![Some("S1".to_string()), Some("1001".to_string())],
                vec![Some("S2".to_string()), None],
            ]
        );
    }

    #[cfg(feature = "xlsx")]
    #[test]
    fn test_empty_sheet_has_no_source() {
        let range: calamine::Range<calamine::Data> = calamine::Range::empty();
        assert!(sheet_source(range).is_none());
    }

    #[test]
    fn test_in_memory_source() {
        let source = TabularSource::from_rows(
            vec!["a".to_string()],
            vec![vec![Some("1".to_string())], vec![None]],
        );
        assert_eq!(source.rows.count(), 2);
    }

    #[cfg(not(feature = "xlsx"))]
    #[test]
    fn test_workbook_without_feature() {
        let err = open_workbook(Path::new("RTPStipend_2020.xlsx")).unwrap_err();
        assert!(matches!(err, IngestError::MissingOptionalDependency { .. }));
    }

    #[cfg(feature = "xlsx")]
    #[test]
    fn test_unreadable_workbook_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "RTPStipend_2020.xlsx", "not a zip archive");
        let err = open_workbook(&path).unwrap_err();
        assert!(matches!(err, IngestError::MalformedSource { .. }));
    }
}
