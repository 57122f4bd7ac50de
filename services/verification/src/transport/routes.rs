use std::sync::MutexGuard;

use store::StoreError;
use tracing::debug;

use super::{
    HttpRequest, HttpResponse, SharedRuntime, VerificationRuntime,
    audit::{AuditEvent, emit_audit_event},
    request::split_target,
};
use crate::{
    VerificationOutcome, VerificationReport,
    api::{RegisterStudentRequest, StudentListResponse, VerifyTextRequest},
};

const STUDENTS_PREFIX: &str = "/v1/students/";

pub(crate) fn handle_request(runtime: &SharedRuntime, request: &HttpRequest) -> HttpResponse {
    let path = split_target(&request.target);
    match (request.method.as_str(), path) {
        ("GET", "/health") => HttpResponse::ok_json("{\"status\":\"ok\"}".to_string()),
        ("GET", "/metrics") => {
            let body = match runtime.lock() {
                Ok(rt) => rt.metrics_text(),
                Err(_) => "certverify_metrics_unavailable 1\n".to_string(),
            };
            HttpResponse::ok_text(body)
        }
        ("POST", "/v1/verify") => handle_verify(runtime, request),
        ("GET", "/v1/students") => match lock_runtime(runtime) {
            Ok(rt) => {
                let students: Vec<_> = rt.store().records().iter().map(|record| &**record).collect();
                HttpResponse::json(&StudentListResponse {
                    total: students.len(),
                    students,
                })
            }
            Err(response) => response,
        },
        ("POST", "/v1/students") => handle_register(runtime, request),
        ("GET", path) if path.starts_with(STUDENTS_PREFIX) => {
            let reg_no = &path[STUDENTS_PREFIX.len()..];
            if reg_no.is_empty() || reg_no.contains('/') {
                return HttpResponse::not_found("not found");
            }
            match lock_runtime(runtime) {
                Ok(rt) => match rt.store().get(reg_no) {
                    Some(record) => HttpResponse::json(&**record),
                    None => HttpResponse::not_found(&format!("student '{reg_no}' not found")),
                },
                Err(response) => response,
            }
        }
        (_, "/health" | "/metrics" | "/v1/verify" | "/v1/students") => {
            HttpResponse::method_not_allowed("method not allowed")
        }
        (_, path) if path.starts_with(STUDENTS_PREFIX) => {
            HttpResponse::method_not_allowed("method not allowed")
        }
        _ => HttpResponse::not_found("not found"),
    }
}

fn handle_verify(runtime: &SharedRuntime, request: &HttpRequest) -> HttpResponse {
    let input = match VerifyInput::from_request(request) {
        Ok(input) => input,
        Err(message) => return HttpResponse::bad_request(&message),
    };
    let (view, ocr) = match lock_runtime(runtime) {
        Ok(rt) => (rt.verification_view(), rt.ocr_provider()),
        Err(response) => return response,
    };
    let report = match input {
        VerifyInput::Text(text) => view.verify_text(&text),
        VerifyInput::Image(image) => {
            let Some(ocr) = ocr else {
                return HttpResponse::service_unavailable("text recognition is not configured");
            };
            debug!(image_bytes = image.len(), "running text recognition");
            view.verify_recognized(ocr.recognize(image))
        }
    };
    match lock_runtime(runtime) {
        Ok(mut rt) => rt.observe_report(&report),
        Err(response) => return response,
    }

    let response = HttpResponse::json(&report);
    audit_verification(runtime, &report, response.status);
    response
}

fn handle_register(runtime: &SharedRuntime, request: &HttpRequest) -> HttpResponse {
    let payload: RegisterStudentRequest = match serde_json::from_slice(&request.body) {
        Ok(payload) => payload,
        Err(err) => return HttpResponse::bad_request(&format!("invalid JSON: {err}")),
    };
    let reg_no = payload.reg_no.trim().to_ascii_uppercase();

    let result = match lock_runtime(runtime) {
        Ok(mut rt) => rt.register(payload),
        Err(response) => return response,
    };
    let (response, reason) = match result {
        Ok(registered) => (
            HttpResponse::json(&registered),
            "student registered".to_string(),
        ),
        Err(err) => {
            let reason = err.to_string();
            (map_store_error(&err), reason)
        }
    };
    let outcome = if response.status == 200 {
        "registered"
    } else {
        "rejected"
    };
    emit_audit_event(
        runtime,
        audit_log_path(runtime).as_deref(),
        AuditEvent {
            action: "register",
            reg_no: Some(&reg_no),
            status: response.status,
            outcome,
            reason: &reason,
        },
    );
    response
}

enum VerifyInput<'a> {
    Text(String),
    Image(&'a [u8]),
}

impl<'a> VerifyInput<'a> {
    fn from_request(request: &'a HttpRequest) -> Result<Self, String> {
        let content_type = request.content_type();
        let media_type = content_type
            .as_deref()
            .and_then(|value| value.split(';').next())
            .map(str::trim);
        match media_type {
            None | Some("application/json") => {
                let payload: VerifyTextRequest = serde_json::from_slice(&request.body)
                    .map_err(|err| format!("invalid JSON: {err}"))?;
                Ok(Self::Text(payload.text))
            }
            Some(media) if media.starts_with("image/") || media == "application/octet-stream" => {
                if request.body.is_empty() {
                    return Err("image body is empty".to_string());
                }
                Ok(Self::Image(&request.body))
            }
            Some(media) => Err(format!("unsupported content type '{media}'")),
        }
    }
}

fn audit_verification(runtime: &SharedRuntime, report: &VerificationReport, status: u16) {
    let (reg_no, outcome, reason) = match &report.outcome {
        VerificationOutcome::Decided { claim, verdict } => (
            claim.reg_no.as_deref(),
            verdict.status().as_str(),
            verdict.evidence().lines().join(" | "),
        ),
        VerificationOutcome::Unverifiable { reason } => (None, "unverifiable", reason.clone()),
    };
    emit_audit_event(
        runtime,
        audit_log_path(runtime).as_deref(),
        AuditEvent {
            action: "verify",
            reg_no,
            status,
            outcome,
            reason: &reason,
        },
    );
}

fn audit_log_path(runtime: &SharedRuntime) -> Option<String> {
    runtime
        .lock()
        .ok()
        .and_then(|rt| rt.audit_log_path().map(str::to_string))
}

fn map_store_error(err: &StoreError) -> HttpResponse {
    match err {
        StoreError::Validation(_) => HttpResponse::bad_request(&err.to_string()),
        StoreError::Conflict(_) => HttpResponse::error_with_status(409, &err.to_string()),
        StoreError::Io(_) | StoreError::Parse(_) => {
            HttpResponse::internal_server_error(&err.to_string())
        }
    }
}

fn lock_runtime(
    runtime: &SharedRuntime,
) -> Result<MutexGuard<'_, VerificationRuntime>, HttpResponse> {
    runtime.lock().map_err(|_| {
        HttpResponse::internal_server_error("failed to acquire verification runtime lock")
    })
}
