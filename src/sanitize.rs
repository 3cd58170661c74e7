// 🧼 Identifier Sanitizer
// Maps arbitrary source field/entity names onto snake_case identifiers
//
// Every identifier that ends up interpolated into SQL text passes through
// here, so the output alphabet is closed: [0-9a-z_].

use std::collections::HashSet;

/// Provenance columns appended to every staging relation
pub const PROVENANCE_COLUMNS: [&str; 3] = ["source_file", "reporting_year", "extraction_timestamp"];

/// Canonical snake_case identifier for a source name
///
/// # Examples:
/// ```
/// use tcsi_warehouse::sanitize_identifier;
/// assert_eq!(sanitize_identifier("E306 Provider-Code"), "e306_provider_code");
/// assert_eq!(sanitize_identifier("UID8_StudentsResKey"), "uid8_students_res_key");
/// ```
pub fn sanitize_identifier(name: &str) -> String {
    // Pass 1: runs of anything outside [0-9A-Za-z_] become one underscore
    let mut cleaned = String::with_capacity(name.len());
    for ch in name.chars() {
        let ch = if ch.is_ascii_alphanumeric() || ch == '_' { ch } else { '_' };
        if ch == '_' && cleaned.ends_with('_') {
            continue;
        }
        cleaned.push(ch);
    }
    let trimmed = cleaned.trim_matches('_');

    // Pass 2: camelCase boundary, then lowercase
    let mut out = String::with_capacity(trimmed.len() + 8);
    let mut prev: Option<char> = None;
    for ch in trimmed.chars() {
        if let Some(p) = prev {
            if (p.is_ascii_lowercase() || p.is_ascii_digit()) && ch.is_ascii_uppercase() {
                out.push('_');
            }
        }
        out.push(ch.to_ascii_lowercase());
        prev = Some(ch);
    }
    out
}

/// Hands out unique column identifiers for one header
///
/// Seeded with the provenance columns so source fields can never shadow them.
#[derive(Debug, Clone)]
pub struct ColumnNamer {
    used: HashSet<String>,
}

impl ColumnNamer {
    pub fn new() -> Self {
        ColumnNamer {
            used: PROVENANCE_COLUMNS.iter().map(|c| c.to_string()).collect(),
        }
    }

    /// Sanitize `name`, appending `_2`, `_3`, ... until unused
    pub fn assign(&mut self, name: &str) -> String {
        let base = sanitize_identifier(name);
        let base = if base.is_empty() { "col".to_string() } else { base };

        let mut candidate = base.clone();
        let mut counter = 1;
        while self.used.contains(&candidate) {
            counter += 1;
            candidate = format!("{}_{}", base, counter);
        }
        self.used.insert(candidate.clone());
        candidate
    }
}

impl Default for ColumnNamer {
    fn default() -> Self {
        Self::new()
    }
}

/// Sanitize a whole header into unique column identifiers, in order
pub fn sanitize_header<S: AsRef<str>>(header: &[S]) -> Vec<String> {
    let mut namer = ColumnNamer::new();
    header.iter().map(|field| namer.assign(field.as_ref())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spaces_and_hyphens() {
        assert_eq!(sanitize_identifier("E306 Provider-Code"), "e306_provider_code");
        assert_eq!(sanitize_identifier("HEP_units-AOUs"), "hep_units_aous");
    }

    #[test]
    fn test_camel_case_boundaries() {
        assert_eq!(sanitize_identifier("UID1_ProvidersResKey"), "uid1_providers_res_key");
        assert_eq!(sanitize_identifier("E597_CRICOSCode"), "e597_cricoscode");
        assert_eq!(
            sanitize_identifier("Campuses_E609_EffectiveFromDate"),
            "campuses_e609_effective_from_date"
        );
        // Uppercase runs are not split
        assert_eq!(sanitize_identifier("HEPStudents"), "hepstudents");
    }

    #[test]
    fn test_punctuation_collapse_and_trim() {
        assert_eq!(sanitize_identifier("  (Amount $) -- paid  "), "amount_paid");
        assert_eq!(sanitize_identifier("a__b___c"), "a_b_c");
        assert_eq!(sanitize_identifier("__lead_trail__"), "lead_trail");
        assert_eq!(sanitize_identifier("Año lectivo"), "a_o_lectivo");
    }

    #[test]
    fn test_total_on_degenerate_input() {
        assert_eq!(sanitize_identifier(""), "");
        assert_eq!(sanitize_identifier("%%%"), "");
        assert_eq!(sanitize_identifier("\u{feff}"), "");
    }

    #[test]
    fn test_header_uniqueness() {
        let header = ["Student ID", "student-id", "STUDENT_ID", "Name"];
        let columns = sanitize_header(&header);
        assert_eq!(
            columns,
            vec!["student_id", "student_id_2", "student_id_3", "name"]
        );
    }

    #[test]
    fn test_header_is_deterministic() {
        let header = ["E306 Provider-Code", "Student ID", "student_id", ""];
        let first = sanitize_header(&header);
        let second = sanitize_header(&header);
        assert_eq!(first, second);
        assert_eq!(first, vec!["e306_provider_code", "student_id", "student_id_2", "col"]);
    }

    #[test]
    fn test_provenance_names_are_reserved() {
        let columns = sanitize_header(&["Source File", "Reporting Year", "value"]);
        assert_eq!(columns, vec!["source_file_2", "reporting_year_2", "value"]);
    }
}
