use std::{collections::HashMap, io::Write, net::TcpStream};

use serde::Serialize;

use crate::api::ErrorResponse;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct HttpRequest {
    pub(crate) method: String,
    pub(crate) target: String,
    pub(crate) headers: HashMap<String, String>,
    pub(crate) body: Vec<u8>,
}

impl HttpRequest {
    pub(crate) fn content_type(&self) -> Option<String> {
        self.headers
            .get("content-type")
            .map(|value| value.trim().to_ascii_lowercase())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct HttpResponse {
    pub(crate) status: u16,
    pub(crate) content_type: &'static str,
    pub(crate) body: String,
}

impl HttpResponse {
    pub(crate) fn ok_json(body: String) -> Self {
        Self {
            status: 200,
            content_type: "application/json",
            body,
        }
    }

    pub(crate) fn ok_text(body: String) -> Self {
        Self {
            status: 200,
            content_type: "text/plain; version=0.0.4; charset=utf-8",
            body,
        }
    }

    pub(crate) fn json<T: Serialize>(value: &T) -> Self {
        match serde_json::to_string(value) {
            Ok(body) => Self::ok_json(body),
            Err(err) => Self::internal_server_error(&format!("failed to render response: {err}")),
        }
    }

    pub(crate) fn bad_request(message: &str) -> Self {
        Self::error_with_status(400, message)
    }

    pub(crate) fn not_found(message: &str) -> Self {
        Self::error_with_status(404, message)
    }

    pub(crate) fn method_not_allowed(message: &str) -> Self {
        Self::error_with_status(405, message)
    }

    pub(crate) fn internal_server_error(message: &str) -> Self {
        Self::error_with_status(500, message)
    }

    pub(crate) fn service_unavailable(message: &str) -> Self {
        Self::error_with_status(503, message)
    }

    pub(crate) fn error_with_status(status: u16, message: &str) -> Self {
        let body = serde_json::to_string(&ErrorResponse { error: message })
            .unwrap_or_else(|_| "{\"error\":\"unrenderable error\"}".to_string());
        Self {
            status,
            content_type: "application/json",
            body,
        }
    }
}

pub(crate) fn write_response(stream: &mut TcpStream, response: HttpResponse) -> std::io::Result<()> {
    stream.write_all(render_response_text(&response).as_bytes())?;
    stream.flush()
}

pub(crate) fn render_response_text(response: &HttpResponse) -> String {
    let status_text = match response.status {
        200 => "200 OK",
        400 => "400 Bad Request",
        404 => "404 Not Found",
        405 => "405 Method Not Allowed",
        409 => "409 Conflict",
        413 => "413 Payload Too Large",
        503 => "503 Service Unavailable",
        _ => "500 Internal Server Error",
    };
    let body_len = response.body.len();
    format!(
        "HTTP/1.1 {status_text}\r\nContent-Type: {}\r\nContent-Length: {body_len}\r\nConnection: close\r\n\r\n{}",
        response.content_type, response.body
    )
}
