use std::sync::{Arc, Mutex};

use store::InMemoryRecordStore;
use verification::{
    ocr::OcrError,
    transport::{SharedRuntime, VerificationRuntime, handle_http_request_bytes},
};

fn sample_runtime() -> SharedRuntime {
    Arc::new(Mutex::new(VerificationRuntime::in_memory(
        InMemoryRecordStore::with_sample_records(),
    )))
}

fn post(target: &str, content_type: &str, body: &[u8]) -> Vec<u8> {
    let mut request = format!(
        "POST {target} HTTP/1.1\r\nHost: localhost\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    )
    .into_bytes();
    request.extend_from_slice(body);
    request
}

fn send(runtime: &SharedRuntime, request: &[u8]) -> (String, serde_json::Value) {
    let response = handle_http_request_bytes(runtime, request)
        .expect("request should parse and return response");
    let response = String::from_utf8(response).expect("response should be UTF-8");
    let (head, body) = response
        .split_once("\r\n\r\n")
        .expect("response should carry a header block");
    let body = serde_json::from_str(body).unwrap_or(serde_json::Value::Null);
    (head.to_string(), body)
}

#[test]
fn transport_verify_text_returns_genuine_verdict() {
    let runtime = sample_runtime();
    let body = br#"{"text":"CERTIFICATE\nThis is to certify that Maha Lakshmi N\nRegister No: KGISL2023001\nB.E Computer Science and Engineering (CSE)"}"#;
    let (head, value) = send(&runtime, &post("/v1/verify", "application/json", body));

    assert!(head.starts_with("HTTP/1.1 200 OK"));
    assert_eq!(value["outcome"], "decided");
    assert_eq!(value["claim"]["reg_no"], "KGISL2023001");
    assert_eq!(value["claim"]["department"], "CSE");
    assert_eq!(value["verdict"]["status"], "genuine");
    assert_eq!(
        value["verdict"]["evidence"],
        serde_json::json!([
            "Record reg: KGISL2023001; OCR reg: KGISL2023001",
            "Name match score: 100.0",
            "Department match score: 100.0",
        ])
    );
}

#[test]
fn transport_verify_text_reports_mismatches() {
    let runtime = sample_runtime();
    let body = br#"{"text":"Awarded to Robert Brown\nReg No: ABC2023123\nDepartment of MECH"}"#;
    let (head, value) = send(&runtime, &post("/v1/verify", "application/json", body));

    assert!(head.starts_with("HTTP/1.1 200 OK"));
    assert_eq!(value["verdict"]["status"], "forged");
    assert_eq!(value["verdict"]["record"]["name"], "John Doe");
    let evidence = value["verdict"]["evidence"].as_array().unwrap();
    assert_eq!(evidence.len(), 5);
    assert!(
        evidence[3]
            .as_str()
            .unwrap()
            .ends_with("vs expected 'John Doe').")
    );
    assert_eq!(
        evidence[4],
        "Department mismatch (found 'MECH' vs expected 'EEE')."
    );
}

#[test]
fn transport_verify_text_unknown_registration() {
    let runtime = sample_runtime();
    let body = br#"{"text":"Awarded to John Doe\nReg No: XYZ2099001\nEEE"}"#;
    let (_, value) = send(&runtime, &post("/v1/verify", "application/json", body));

    assert_eq!(value["verdict"]["status"], "forged");
    assert_eq!(value["verdict"]["record"], serde_json::Value::Null);
    assert_eq!(
        value["verdict"]["evidence"][0],
        "Registration number XYZ2099001 not found in record store."
    );
}

#[test]
fn transport_verify_image_uses_ocr_provider() {
    let ocr = |image: &[u8]| -> Result<String, OcrError> {
        assert_eq!(image, b"\x89PNG\x00\xff");
        Ok("Jane Smith\nElectronics (ECE)".to_string())
    };
    let runtime: SharedRuntime = Arc::new(Mutex::new(
        VerificationRuntime::in_memory(InMemoryRecordStore::with_sample_records())
            .with_ocr(Arc::new(ocr)),
    ));
    let (head, value) = send(
        &runtime,
        &post("/v1/verify", "image/png", b"\x89PNG\x00\xff"),
    );

    assert!(head.starts_with("HTTP/1.1 200 OK"));
    assert_eq!(value["verdict"]["status"], "genuine_by_name_only");
    assert_eq!(value["verdict"]["evidence"][0], "Name match score 100.0");
    assert_eq!(value["verdict"]["record"]["reg_no"], "KGISL2023003");
}

#[test]
fn transport_verify_image_reports_failed_ocr_as_unverifiable() {
    let ocr = |_: &[u8]| -> Result<String, OcrError> { Ok("   \n".to_string()) };
    let runtime: SharedRuntime = Arc::new(Mutex::new(
        VerificationRuntime::in_memory(InMemoryRecordStore::with_sample_records())
            .with_ocr(Arc::new(ocr)),
    ));
    let (head, value) = send(
        &runtime,
        &post("/v1/verify", "application/octet-stream", b"raw"),
    );

    assert!(head.starts_with("HTTP/1.1 200 OK"));
    assert_eq!(value["outcome"], "unverifiable");
    assert_eq!(value["reason"], "ocr produced no text");
}

#[test]
fn transport_metrics_endpoint_returns_prometheus_payload() {
    let runtime = sample_runtime();
    send(
        &runtime,
        &post("/v1/verify", "application/json", br#"{"text":"nothing here"}"#),
    );
    let request = b"GET /metrics HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n";
    let response = handle_http_request_bytes(&runtime, request)
        .expect("request should parse and return response");
    let response = String::from_utf8(response).expect("response should be UTF-8");

    assert!(response.starts_with("HTTP/1.1 200 OK"));
    assert!(response.contains("Content-Type: text/plain; version=0.0.4; charset=utf-8"));
    assert!(response.contains("certverify_verifications_total 1\n"));
    assert!(response.contains("certverify_verdict_forged_total 1\n"));
}

#[test]
fn transport_register_then_lookup_student() {
    let runtime = sample_runtime();
    let body = br#"{"name":"Priya R","reg_no":"KGISL2023010","department":"IT","degree":"B.Tech IT"}"#;
    let (head, value) = send(&runtime, &post("/v1/students", "application/json", body));
    assert!(head.starts_with("HTTP/1.1 200 OK"));
    assert_eq!(value["students_total"], 5);
    assert_eq!(value["checkpoint_triggered"], false);

    let (head, value) = send(
        &runtime,
        b"GET /v1/students/KGISL2023010 HTTP/1.1\r\nHost: localhost\r\n\r\n",
    );
    assert!(head.starts_with("HTTP/1.1 200 OK"));
    assert_eq!(value["degree"], "B.Tech IT");

    let (head, value) = send(&runtime, &post("/v1/students", "application/json", body));
    assert!(head.starts_with("HTTP/1.1 409 Conflict"));
    assert!(value["error"].as_str().unwrap().contains("KGISL2023010"));
}

#[test]
fn transport_rejects_oversized_body_via_content_length_guard() {
    let runtime = sample_runtime();
    let request =
        b"POST /v1/verify HTTP/1.1\r\nHost: localhost\r\nContent-Length: 99999999\r\n\r\n";
    let err = handle_http_request_bytes(&runtime, request).unwrap_err();
    assert!(err.contains("exceeds max body size"));
}

#[test]
fn transport_rejects_unsupported_content_type() {
    let runtime = sample_runtime();
    let (head, value) = send(&runtime, &post("/v1/verify", "text/plain", b"Jane Smith"));
    assert!(head.starts_with("HTTP/1.1 400 Bad Request"));
    assert!(value["error"].as_str().unwrap().contains("text/plain"));
}

#[test]
fn transport_register_normalizes_reg_no_case() {
    let runtime = sample_runtime();
    let body = br#"{"name":"Priya R","reg_no":" kgisl2023010 ","department":"IT"}"#;
    let (head, value) = send(&runtime, &post("/v1/students", "application/json", body));
    assert!(head.starts_with("HTTP/1.1 200 OK"));
    assert_eq!(value["student"]["reg_no"], "KGISL2023010");

    let (head, _) = send(
        &runtime,
        b"GET /v1/students/KGISL2023010 HTTP/1.1\r\nHost: localhost\r\n\r\n",
    );
    assert!(head.starts_with("HTTP/1.1 200 OK"));

    let body = br#"{"text":"Awarded to Priya R\nReg No: kgisl2023010\nDepartment of IT"}"#;
    let (_, value) = send(&runtime, &post("/v1/verify", "application/json", body));
    assert_eq!(value["verdict"]["status"], "genuine");
}

#[test]
fn transport_register_rejects_reg_no_with_slash() {
    let runtime = sample_runtime();
    let body = br#"{"name":"Priya R","reg_no":"KGISL/2023010","department":"IT"}"#;
    let (head, value) = send(&runtime, &post("/v1/students", "application/json", body));
    assert!(head.starts_with("HTTP/1.1 400 Bad Request"));
    assert!(value["error"].as_str().unwrap().contains("reg_no"));

    let (_, listing) = send(
        &runtime,
        b"GET /v1/students HTTP/1.1\r\nHost: localhost\r\n\r\n",
    );
    assert_eq!(listing["total"], 4);
}
