use std::sync::Arc;

use schema::{Evidence, ExtractedClaim, RecordLookup, StudentRecord, Verdict};
use serde::{Deserialize, Serialize};
use similarity::token_set_ratio;

pub const DEFAULT_NAME_THRESHOLD: f64 = 80.0;
pub const DEFAULT_DEPARTMENT_THRESHOLD: f64 = 80.0;
pub const DEFAULT_NAME_ONLY_THRESHOLD: f64 = 85.0;

/// Acceptance thresholds, all on the 0-100 token-set scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionPolicy {
    pub name_threshold: f64,
    pub department_threshold: f64,
    /// Bar for accepting a certificate on its name alone (no reg_no read).
    pub name_only_threshold: f64,
}

impl Default for DecisionPolicy {
    fn default() -> Self {
        Self {
            name_threshold: DEFAULT_NAME_THRESHOLD,
            department_threshold: DEFAULT_DEPARTMENT_THRESHOLD,
            name_only_threshold: DEFAULT_NAME_ONLY_THRESHOLD,
        }
    }
}

pub fn decide<L>(claim: &ExtractedClaim, records: &L) -> Verdict
where
    L: RecordLookup + ?Sized,
{
    decide_with_policy(claim, records, &DecisionPolicy::default())
}

/// Decides a claim against the record store.
///
/// A registration number, when read, is authoritative: the record it names
/// must corroborate both the name and the department. Without one, the
/// closest name across all records is accepted only above the name-only bar.
pub fn decide_with_policy<L>(
    claim: &ExtractedClaim,
    records: &L,
    policy: &DecisionPolicy,
) -> Verdict
where
    L: RecordLookup + ?Sized,
{
    match claim.reg_no.as_deref() {
        Some(reg_no) => decide_by_reg_no(reg_no, claim, records, policy),
        None => decide_by_name(claim, records, policy),
    }
}

fn decide_by_reg_no<L>(
    reg_no: &str,
    claim: &ExtractedClaim,
    records: &L,
    policy: &DecisionPolicy,
) -> Verdict
where
    L: RecordLookup + ?Sized,
{
    let Some(record) = records.lookup_by_reg_no(reg_no) else {
        return Verdict::Forged {
            record: None,
            evidence: [format!(
                "Registration number {reg_no} not found in record store."
            )]
            .into_iter()
            .collect(),
        };
    };

    let name_score = claim
        .name
        .as_deref()
        .map(|name| token_set_ratio(name, &record.name))
        .unwrap_or(0.0);
    let department_score = claim
        .department
        .as_deref()
        .filter(|_| !record.department.is_empty())
        .map(|department| token_set_ratio(department, &record.department))
        .unwrap_or(0.0);

    let mut evidence = Evidence::new();
    evidence.push(format!("Record reg: {}; OCR reg: {reg_no}", record.reg_no));
    evidence.push(format!("Name match score: {}", format_score(name_score)));
    evidence.push(format!(
        "Department match score: {}",
        format_score(department_score)
    ));

    let name_matches = name_score >= policy.name_threshold;
    let department_matches = department_score >= policy.department_threshold
        || record_department_within_claim(&record, claim.department.as_deref());

    if name_matches && department_matches {
        return Verdict::Genuine { record, evidence };
    }

    if !name_matches {
        evidence.push(format!(
            "Name mismatch (score {} vs expected '{}').",
            format_score(name_score),
            record.name
        ));
    }
    if !department_matches {
        let found = claim
            .department
            .as_deref()
            .map(|department| format!("'{department}'"))
            .unwrap_or_else(|| "no department".to_string());
        evidence.push(format!(
            "Department mismatch (found {found} vs expected '{}').",
            record.department
        ));
    }
    Verdict::Forged {
        record: Some(record),
        evidence,
    }
}

fn decide_by_name<L>(claim: &ExtractedClaim, records: &L, policy: &DecisionPolicy) -> Verdict
where
    L: RecordLookup + ?Sized,
{
    let Some(name) = claim.name.as_deref() else {
        return Verdict::Forged {
            record: None,
            evidence: ["Neither registration number nor name reliably detected."]
                .into_iter()
                .collect(),
        };
    };

    let mut best: Option<Arc<StudentRecord>> = None;
    let mut best_score = 0.0_f64;
    for record in records.list_all_records() {
        let score = token_set_ratio(name, &record.name);
        // strict comparison keeps the earliest record on ties
        if score > best_score {
            best_score = score;
            best = Some(record);
        }
    }

    match best {
        Some(record) if best_score >= policy.name_only_threshold => Verdict::GenuineByNameOnly {
            record,
            evidence: [format!("Name match score {}", format_score(best_score))]
                .into_iter()
                .collect(),
        },
        _ => Verdict::Forged {
            record: None,
            evidence: [format!(
                "No strong name match (best score {}).",
                format_score(best_score)
            )]
            .into_iter()
            .collect(),
        },
    }
}

/// The record's department must appear inside the claimed one, not the
/// other way round: "CSE" on file accepts a claimed "CSE (HONS)".
fn record_department_within_claim(record: &StudentRecord, claimed: Option<&str>) -> bool {
    claimed.is_some_and(|claimed| {
        claimed
            .to_lowercase()
            .contains(&record.department.to_lowercase())
    })
}

fn format_score(score: f64) -> String {
    format!("{score:.1}")
}
