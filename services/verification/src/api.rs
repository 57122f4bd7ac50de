use schema::StudentRecord;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VerifyTextRequest {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RegisterStudentRequest {
    pub name: String,
    pub reg_no: String,
    pub department: String,
    #[serde(default)]
    pub degree: Option<String>,
}

impl RegisterStudentRequest {
    /// Surrounding whitespace from form input is dropped; an all-blank
    /// degree counts as no degree. Registration numbers are stored
    /// upper-case, the form the extractor produces.
    pub fn into_record(self) -> StudentRecord {
        StudentRecord {
            name: self.name.trim().to_string(),
            reg_no: self.reg_no.trim().to_ascii_uppercase(),
            department: self.department.trim().to_string(),
            degree: self
                .degree
                .map(|degree| degree.trim().to_string())
                .filter(|degree| !degree.is_empty()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegisterStudentResponse {
    pub student: StudentRecord,
    pub students_total: usize,
    pub checkpoint_triggered: bool,
    pub checkpoint_snapshot_records: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StudentListResponse<'a> {
    pub students: Vec<&'a StudentRecord>,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorResponse<'a> {
    pub error: &'a str,
}
