// 🗂️ Extract Classifier
// Filename → (entity, reporting year) → staging relation
//
// Extract files arrive as e.g.
//   deidentified_1_tcsi_DataExtract_01_11_HEPStudents_2023.csv
// and each entity lands in exactly one staging relation.

use crate::error::{IngestError, Result};
use crate::sanitize::sanitize_identifier;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

// ============================================================================
// STAGING NAME OVERRIDES
// ============================================================================

/// Known entity → staging relation mappings
///
/// Entities missing from this table fall back to `stg_<sanitized entity>`.
/// The fallback is lossy for acronym-prefixed names ("HEPStudents" would
/// become `stg_hepstudents`), which is why every entity a transform step
/// consumes is listed here explicitly.
pub const STAGING_NAME_OVERRIDES: &[(&str, &str)] = &[
    ("HEPStudents", "stg_hep_students"),
    ("HEPStudentCitizenships", "stg_hep_student_citizenships"),
    ("HEPStudentDisabilities", "stg_hep_student_disabilities"),
    ("StudentContactsFirstReportedAddress", "stg_student_contacts_first_reported_address"),
    ("CoursesOfStudy", "stg_courses_of_study"),
    ("HEPCourses", "stg_hep_courses"),
    ("HEPCoursesOnCampuses", "stg_hep_courses_on_campuses"),
    ("CampusesTAC", "stg_campuses_tac"),
    ("CampusCourseFeesITSP", "stg_campus_course_fees_itsp"),
    ("CourseFieldsOfEducation", "stg_course_fields_of_education"),
    ("CourseSpecialisations", "stg_course_specialisations"),
    ("HEPCourseAdmissions", "stg_hep_course_admissions"),
    ("HEPCoursePriorCredits", "stg_hep_course_prior_credits"),
    ("HEP_units-AOUs", "stg_hep_units_aous"),
    ("OSHELP", "stg_oshelp"),
    ("SAHELP", "stg_sahelp"),
    ("CommonwealthScholarships", "stg_commonwealth_scholarships"),
    ("RTPScholarships", "stg_rtp_scholarships"),
    ("RTPStipend", "stg_rtp_stipend"),
    ("AggregatedAwards", "stg_aggregated_awards"),
    ("HEPHDREndUsersEngagement", "stg_hephdr_end_users_engagement"),
    ("UndeterminedStudentsRecords", "stg_undetermined_students_records"),
    ("UndeterminedStudentCitizenships", "stg_undetermined_student_citizenships"),
    ("UndeterminedStudentDisabilities", "stg_undetermined_student_disabilities"),
    ("SpecialInterestCourses", "stg_special_interest_courses"),
];

static DEIDENTIFIED_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^deidentified_").expect("valid regex"));
static BATCH_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\d+_tcsi_DataExtract_\d+_11_").expect("valid regex"));
static NUMERIC_PREFIX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d+_").expect("valid regex"));
static YEAR_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.+?)_((?:19|20)\d{2})(-onwards)?$").expect("valid regex"));

/// Split a file stem into (entity name, reporting-year token)
///
/// # Examples:
/// ```
/// use tcsi_warehouse::parse_entity_and_year;
/// let (entity, year) = parse_entity_and_year("deidentified_1_tcsi_DataExtract_01_11_HEPStudents_2023");
/// assert_eq!(entity, "HEPStudents");
/// assert_eq!(year.as_deref(), Some("2023"));
/// ```
pub fn parse_entity_and_year(stem: &str) -> (String, Option<String>) {
    let cleaned = DEIDENTIFIED_PREFIX.replace(stem, "");
    let cleaned = BATCH_PREFIX.replace(&cleaned, "");
    let cleaned = NUMERIC_PREFIX.replace(&cleaned, "");

    match YEAR_SUFFIX.captures(&cleaned) {
        Some(caps) => {
            let base = caps[1].to_string();
            let mut year = caps[2].to_string();
            if caps.get(3).is_some() {
                year.push_str("-onwards");
            }
            (base, Some(year))
        }
        None => (cleaned.into_owned(), None),
    }
}

/// Staging relation for an entity: override table first, derived name otherwise
pub fn staging_table_for(entity: &str) -> String {
    STAGING_NAME_OVERRIDES
        .iter()
        .find(|(name, _)| *name == entity)
        .map(|(_, table)| table.to_string())
        .unwrap_or_else(|| format!("stg_{}", sanitize_identifier(entity)))
}

// ============================================================================
// EXTRACT FILES
// ============================================================================

/// Physical format of an extract file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractFormat {
    Csv,
    Workbook,
}

impl ExtractFormat {
    /// Decide format from the file extension (case-insensitive)
    pub fn from_path(path: &Path) -> Option<ExtractFormat> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "csv" => Some(ExtractFormat::Csv),
            "xlsx" | "xlsm" => Some(ExtractFormat::Workbook),
            _ => None,
        }
    }
}

/// One classified extract file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractFile {
    pub path: PathBuf,
    /// Provenance label stored in `source_file`
    pub file_name: String,
    pub entity: String,
    pub reporting_year: Option<String>,
    pub staging_table: String,
    pub format: ExtractFormat,
}

/// Classify a path, rejecting anything that is not a recognised tabular format
pub fn classify_path(path: &Path) -> Result<ExtractFile> {
    let format =
        ExtractFormat::from_path(path).ok_or_else(|| IngestError::UnsupportedFormat(path.to_path_buf()))?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| IngestError::malformed(path, "file name is not valid UTF-8"))?
        .to_string();
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_name.as_str());

    let (entity, reporting_year) = parse_entity_and_year(stem);
    let staging_table = staging_table_for(&entity);

    Ok(ExtractFile {
        path: path.to_path_buf(),
        file_name,
        entity,
        reporting_year,
        staging_table,
        format,
    })
}
