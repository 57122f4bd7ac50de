pub mod api;
pub mod config;
pub mod ocr;
pub mod transport;
#[cfg(feature = "async-transport")]
pub mod transport_axum;

use decider::{DecisionPolicy, decide_with_policy};
use extractor::FieldExtractor;
use schema::{ExtractedClaim, RawText, RecordLookup, Verdict};
use serde::Serialize;

use crate::ocr::{OcrError, OcrProvider};

/// What one verification produced, ready for presentation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationReport {
    pub text: RawText,
    #[serde(flatten)]
    pub outcome: VerificationOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum VerificationOutcome {
    Decided {
        claim: ExtractedClaim,
        verdict: Verdict,
    },
    /// No text could be read, so there was nothing to decide on.
    Unverifiable { reason: String },
}

impl VerificationReport {
    pub fn verdict(&self) -> Option<&Verdict> {
        match &self.outcome {
            VerificationOutcome::Decided { verdict, .. } => Some(verdict),
            VerificationOutcome::Unverifiable { .. } => None,
        }
    }

    pub fn claim(&self) -> Option<&ExtractedClaim> {
        match &self.outcome {
            VerificationOutcome::Decided { claim, .. } => Some(claim),
            VerificationOutcome::Unverifiable { .. } => None,
        }
    }
}

pub fn verify_text<L>(
    extractor: &FieldExtractor,
    records: &L,
    policy: &DecisionPolicy,
    raw: &str,
) -> VerificationReport
where
    L: RecordLookup + ?Sized,
{
    let text = RawText::from_ocr(raw);
    let claim = extractor.extract(&text);
    let verdict = decide_with_policy(&claim, records, policy);
    VerificationReport {
        text,
        outcome: VerificationOutcome::Decided { claim, verdict },
    }
}

pub fn verify_image<O, L>(
    ocr: &O,
    extractor: &FieldExtractor,
    records: &L,
    policy: &DecisionPolicy,
    image: &[u8],
) -> VerificationReport
where
    O: OcrProvider + ?Sized,
    L: RecordLookup + ?Sized,
{
    verify_recognized(ocr.recognize(image), extractor, records, policy)
}

/// Continues verification from an OCR result obtained elsewhere. A failed
/// or blank recognition never reaches the decider.
pub fn verify_recognized<L>(
    recognized: Result<String, OcrError>,
    extractor: &FieldExtractor,
    records: &L,
    policy: &DecisionPolicy,
) -> VerificationReport
where
    L: RecordLookup + ?Sized,
{
    let raw = match recognized {
        Ok(raw) => raw,
        Err(err) => {
            return VerificationReport {
                text: RawText::default(),
                outcome: VerificationOutcome::Unverifiable {
                    reason: format!("text recognition failed: {err}"),
                },
            };
        }
    };
    if RawText::from_ocr(&raw).is_empty() {
        return VerificationReport {
            text: RawText::default(),
            outcome: VerificationOutcome::Unverifiable {
                reason: OcrError::EmptyOutput.to_string(),
            },
        };
    }
    verify_text(extractor, records, policy, &raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use schema::VerdictStatus;
    use store::InMemoryRecordStore;

    fn extractor() -> FieldExtractor {
        FieldExtractor::default()
    }

    #[test]
    fn verify_text_runs_extraction_and_decision() {
        let store = InMemoryRecordStore::with_sample_records();
        let report = verify_text(
            &extractor(),
            &store,
            &DecisionPolicy::default(),
            "CERTIFICATE OF COMPLETION\nThis is to certify that Jane Smith\nReg No: KGISL2023003\nDepartment of ECE",
        );
        let claim = report.claim().expect("text input is always decided");
        assert_eq!(claim.reg_no.as_deref(), Some("KGISL2023003"));
        assert_eq!(claim.name.as_deref(), Some("Jane Smith"));
        assert_eq!(claim.department.as_deref(), Some("ECE"));
        assert_eq!(
            report.verdict().map(Verdict::status),
            Some(VerdictStatus::Genuine)
        );
        assert_eq!(report.text.lines().len(), 4);
    }

    #[test]
    fn matching_name_without_department_is_forged() {
        let store = InMemoryRecordStore::with_sample_records();
        let report = verify_text(
            &extractor(),
            &store,
            &DecisionPolicy::default(),
            "CERTIFICATE\nThis is to certify that John Doe has completed the programme\nRegistration ABC2023123",
        );
        let claim = report.claim().expect("text input is always decided");
        assert_eq!(claim.reg_no.as_deref(), Some("ABC2023123"));
        assert_eq!(claim.department, None);

        let verdict = report.verdict().expect("text input is always decided");
        assert_eq!(verdict.status(), VerdictStatus::Forged);
        assert_eq!(verdict.record().map(|r| r.name.as_str()), Some("John Doe"));
        assert_eq!(
            verdict.evidence().lines(),
            &[
                "Record reg: ABC2023123; OCR reg: ABC2023123",
                "Name match score: 100.0",
                "Department match score: 0.0",
                "Department mismatch (found no department vs expected 'EEE').",
            ]
        );
    }

    #[test]
    fn blank_text_is_still_decided_as_forged() {
        let store = InMemoryRecordStore::with_sample_records();
        let report = verify_text(&extractor(), &store, &DecisionPolicy::default(), "  \n ");
        assert_eq!(
            report.verdict().map(Verdict::status),
            Some(VerdictStatus::Forged)
        );
    }

    #[test]
    fn failed_recognition_is_unverifiable() {
        let store = InMemoryRecordStore::with_sample_records();
        let ocr = |_: &[u8]| -> Result<String, OcrError> {
            Err(OcrError::MissingProgram("tesseract".to_string()))
        };
        let report = verify_image(&ocr, &extractor(), &store, &DecisionPolicy::default(), b"png");
        assert!(report.verdict().is_none());
        assert!(matches!(
            report.outcome,
            VerificationOutcome::Unverifiable { ref reason } if reason.contains("tesseract")
        ));
    }

    #[test]
    fn blank_recognition_is_unverifiable() {
        let store = InMemoryRecordStore::with_sample_records();
        let ocr = |_: &[u8]| -> Result<String, OcrError> { Ok("\n \r\n".to_string()) };
        let report = verify_image(&ocr, &extractor(), &store, &DecisionPolicy::default(), b"png");
        assert_eq!(
            report.outcome,
            VerificationOutcome::Unverifiable {
                reason: "ocr produced no text".to_string(),
            }
        );
    }

    #[test]
    fn report_serializes_outcome_inline() {
        let store = InMemoryRecordStore::with_sample_records();
        let report = verify_text(
            &extractor(),
            &store,
            &DecisionPolicy::default(),
            "Awarded to Maha Lakshmi N",
        );
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["outcome"], "decided");
        assert_eq!(value["verdict"]["status"], "genuine_by_name_only");
        assert_eq!(value["verdict"]["record"]["reg_no"], "KGISL2023001");
        assert_eq!(value["claim"]["reg_no"], serde_json::Value::Null);
        assert_eq!(value["text"][0], "Awarded to Maha Lakshmi N");
    }
}
