use std::sync::Arc;

use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Core domain enums
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictStatus {
    Genuine,
    GenuineByNameOnly,
    Forged,
}

impl VerdictStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Genuine => "genuine",
            Self::GenuineByNameOnly => "genuine_by_name_only",
            Self::Forged => "forged",
        }
    }

    pub fn is_genuine(self) -> bool {
        !matches!(self, Self::Forged)
    }
}

// ---------------------------------------------------------------------------
// OCR text
// ---------------------------------------------------------------------------

/// OCR output split into trimmed, non-empty lines.
///
/// Carriage returns (`\r\n` and lone `\r`) count as line breaks, as do the
/// other Unicode line separators OCR engines occasionally emit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct RawText {
    lines: Vec<String>,
}

impl RawText {
    pub fn from_ocr(raw: &str) -> Self {
        let normalized = raw.replace("\r\n", "\n").replace('\r', "\n");
        let lines = normalized
            .split(is_line_boundary)
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        Self { lines }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// All lines joined by a single space, the form pattern scans run over.
    pub fn joined(&self) -> String {
        self.lines.join(" ")
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

fn is_line_boundary(ch: char) -> bool {
    matches!(
        ch,
        '\n' | '\u{0b}' | '\u{0c}' | '\u{1c}' | '\u{1d}' | '\u{1e}' | '\u{85}' | '\u{2028}' | '\u{2029}'
    )
}

// ---------------------------------------------------------------------------
// Claims, records, evidence
// ---------------------------------------------------------------------------

/// Fields read off a certificate. Any of them may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedClaim {
    pub reg_no: Option<String>,
    pub name: Option<String>,
    pub department: Option<String>,
}

impl ExtractedClaim {
    pub fn is_empty(&self) -> bool {
        self.reg_no.is_none() && self.name.is_none() && self.department.is_none()
    }
}

/// Authoritative student entry. `reg_no` is the unique key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StudentRecord {
    pub name: String,
    pub reg_no: String,
    pub department: String,
    #[serde(default)]
    pub degree: Option<String>,
}

/// Ordered audit trail behind a verdict. Lines are only ever appended.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Evidence {
    lines: Vec<String>,
}

impl Evidence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for Evidence {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            lines: iter.into_iter().map(Into::into).collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Verdict
// ---------------------------------------------------------------------------

/// Outcome of verification. Genuine outcomes always name the record they
/// matched; a forged outcome names one only when a record was found but
/// failed corroboration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Genuine {
        record: Arc<StudentRecord>,
        evidence: Evidence,
    },
    GenuineByNameOnly {
        record: Arc<StudentRecord>,
        evidence: Evidence,
    },
    Forged {
        record: Option<Arc<StudentRecord>>,
        evidence: Evidence,
    },
}

impl Verdict {
    pub fn status(&self) -> VerdictStatus {
        match self {
            Self::Genuine { .. } => VerdictStatus::Genuine,
            Self::GenuineByNameOnly { .. } => VerdictStatus::GenuineByNameOnly,
            Self::Forged { .. } => VerdictStatus::Forged,
        }
    }

    pub fn evidence(&self) -> &Evidence {
        match self {
            Self::Genuine { evidence, .. }
            | Self::GenuineByNameOnly { evidence, .. }
            | Self::Forged { evidence, .. } => evidence,
        }
    }

    pub fn record(&self) -> Option<&Arc<StudentRecord>> {
        match self {
            Self::Genuine { record, .. } | Self::GenuineByNameOnly { record, .. } => Some(record),
            Self::Forged { record, .. } => record.as_ref(),
        }
    }
}

#[derive(Serialize)]
struct VerdictView<'a> {
    status: VerdictStatus,
    evidence: &'a Evidence,
    record: Option<&'a StudentRecord>,
}

impl Serialize for Verdict {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        VerdictView {
            status: self.status(),
            evidence: self.evidence(),
            record: self.record().map(Arc::as_ref),
        }
        .serialize(serializer)
    }
}

// ---------------------------------------------------------------------------
// Record store capability
// ---------------------------------------------------------------------------

/// Read-only view of the authoritative record store.
///
/// `list_all_records` must return records in a stable order; the name-only
/// search breaks score ties by that order.
pub trait RecordLookup {
    fn lookup_by_reg_no(&self, reg_no: &str) -> Option<Arc<StudentRecord>>;

    fn list_all_records(&self) -> Vec<Arc<StudentRecord>>;
}

impl<T: RecordLookup + ?Sized> RecordLookup for &T {
    fn lookup_by_reg_no(&self, reg_no: &str) -> Option<Arc<StudentRecord>> {
        (**self).lookup_by_reg_no(reg_no)
    }

    fn list_all_records(&self) -> Vec<Arc<StudentRecord>> {
        (**self).list_all_records()
    }
}

/// Adapts a pair of plain functions into a [`RecordLookup`].
pub struct LookupFns<F, G> {
    pub by_reg_no: F,
    pub list_all: G,
}

impl<F, G> RecordLookup for LookupFns<F, G>
where
    F: Fn(&str) -> Option<Arc<StudentRecord>>,
    G: Fn() -> Vec<Arc<StudentRecord>>,
{
    fn lookup_by_reg_no(&self, reg_no: &str) -> Option<Arc<StudentRecord>> {
        (self.by_reg_no)(reg_no)
    }

    fn list_all_records(&self) -> Vec<Arc<StudentRecord>> {
        (self.list_all)()
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("missing field: {0}")]
    MissingField(&'static str),
    #[error("invalid value for field: {0}")]
    InvalidValue(&'static str),
}

pub fn validate_student_record(record: &StudentRecord) -> Result<(), ValidationError> {
    if record.name.trim().is_empty() {
        return Err(ValidationError::MissingField("name"));
    }
    if record.reg_no.trim().is_empty() {
        return Err(ValidationError::MissingField("reg_no"));
    }
    if record
        .reg_no
        .chars()
        .any(|ch| ch.is_whitespace() || ch == '/')
    {
        return Err(ValidationError::InvalidValue("reg_no"));
    }
    if record.department.trim().is_empty() {
        return Err(ValidationError::MissingField("department"));
    }
    if let Some(degree) = &record.degree
        && degree.trim().is_empty()
    {
        return Err(ValidationError::InvalidValue("degree"));
    }
    Ok(())
}

/// Helper to create a `StudentRecord` without spelling out every field.
pub fn student_record(
    name: &str,
    reg_no: &str,
    department: &str,
    degree: Option<&str>,
) -> StudentRecord {
    StudentRecord {
        name: name.to_string(),
        reg_no: reg_no.to_string(),
        department: department.to_string(),
        degree: degree.map(str::to_string),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_text_normalizes_line_endings_and_drops_blank_lines() {
        let text = RawText::from_ocr("  CERTIFICATE \r\n\r\nJohn Doe\rCSE\n   \n");
        assert_eq!(text.lines(), &["CERTIFICATE", "John Doe", "CSE"]);
        assert_eq!(text.joined(), "CERTIFICATE John Doe CSE");
    }

    #[test]
    fn raw_text_from_empty_input_is_empty() {
        assert!(RawText::from_ocr("").is_empty());
        assert!(RawText::from_ocr(" \r\n \t ").is_empty());
    }

    #[test]
    fn validates_record_successfully() {
        let record = student_record("John Doe", "ABC2023123", "EEE", Some("B.Tech"));
        assert_eq!(validate_student_record(&record), Ok(()));
    }

    #[test]
    fn rejects_record_with_blank_department() {
        let record = student_record("John Doe", "ABC2023123", "  ", None);
        assert_eq!(
            validate_student_record(&record),
            Err(ValidationError::MissingField("department"))
        );
    }

    #[test]
    fn rejects_record_with_spaced_reg_no() {
        let record = student_record("John Doe", "ABC 2023123", "EEE", None);
        assert_eq!(
            validate_student_record(&record),
            Err(ValidationError::InvalidValue("reg_no"))
        );
    }

    #[test]
    fn rejects_record_with_slash_in_reg_no() {
        let record = student_record("John Doe", "ABC/2023123", "EEE", None);
        assert_eq!(
            validate_student_record(&record),
            Err(ValidationError::InvalidValue("reg_no"))
        );
    }

    #[test]
    fn rejects_record_with_blank_degree() {
        let record = student_record("John Doe", "ABC2023123", "EEE", Some(""));
        assert_eq!(
            validate_student_record(&record),
            Err(ValidationError::InvalidValue("degree"))
        );
    }

    #[test]
    fn verdict_accessors_follow_variant() {
        let record = Arc::new(student_record("Jane Smith", "KGISL2023003", "ECE", None));
        let genuine = Verdict::GenuineByNameOnly {
            record: Arc::clone(&record),
            evidence: ["Name match score 100.0"].into_iter().collect(),
        };
        assert_eq!(genuine.status(), VerdictStatus::GenuineByNameOnly);
        assert!(genuine.status().is_genuine());
        assert_eq!(genuine.record().map(|r| r.reg_no.as_str()), Some("KGISL2023003"));
        assert_eq!(genuine.evidence().len(), 1);

        let forged = Verdict::Forged {
            record: None,
            evidence: Evidence::new(),
        };
        assert!(!forged.status().is_genuine());
        assert!(forged.record().is_none());
    }

    #[test]
    fn verdict_serializes_status_evidence_and_record() {
        let verdict = Verdict::Genuine {
            record: Arc::new(student_record("John Doe", "ABC2023123", "EEE", None)),
            evidence: ["Name match score: 100.0"].into_iter().collect(),
        };
        let json = serde_json::to_value(&verdict).unwrap();
        assert_eq!(json["status"], "genuine");
        assert_eq!(json["evidence"][0], "Name match score: 100.0");
        assert_eq!(json["record"]["reg_no"], "ABC2023123");
        assert!(json["record"]["degree"].is_null());
    }

    #[test]
    fn lookup_fns_adapts_closures() {
        let record = Arc::new(student_record("John Doe", "ABC2023123", "EEE", None));
        let all = vec![Arc::clone(&record)];
        let lookup = LookupFns {
            by_reg_no: |reg_no: &str| (reg_no == "ABC2023123").then(|| Arc::clone(&record)),
            list_all: || all.clone(),
        };
        assert!(lookup.lookup_by_reg_no("ABC2023123").is_some());
        assert!(lookup.lookup_by_reg_no("XYZ1234").is_none());
        assert_eq!(lookup.list_all_records().len(), 1);
    }
}
