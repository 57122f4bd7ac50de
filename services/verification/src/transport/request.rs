use std::{
    collections::HashMap,
    io::{BufRead, BufReader, Read},
    net::TcpStream,
};

use super::{HttpRequest, MAX_HTTP_BODY_BYTES};

pub(super) fn read_http_request(stream: &mut TcpStream) -> Result<Option<HttpRequest>, String> {
    let mut reader = BufReader::new(stream);

    let mut request_line = String::new();
    let bytes = reader
        .read_line(&mut request_line)
        .map_err(|e| e.to_string())?;
    if bytes == 0 {
        return Ok(None);
    }
    let (method, target) = parse_request_line(&request_line)?;

    let mut headers = HashMap::new();
    loop {
        let mut header_line = String::new();
        let bytes = reader
            .read_line(&mut header_line)
            .map_err(|e| e.to_string())?;
        if bytes == 0 || header_line == "\r\n" || header_line == "\n" {
            break;
        }
        let (name, value) = parse_header_line(&header_line)?;
        headers.insert(name, value);
    }

    let content_length = content_length(&headers)?;
    let mut body = vec![0u8; content_length];
    if content_length > 0 {
        reader.read_exact(&mut body).map_err(|e| e.to_string())?;
    }

    Ok(Some(HttpRequest {
        method,
        target,
        headers,
        body,
    }))
}

/// Parses a complete request already held in memory. Bodies may be binary;
/// only the header block has to be UTF-8.
pub(super) fn parse_http_request_bytes(raw_request: &[u8]) -> Result<HttpRequest, String> {
    let header_end = raw_request
        .windows(4)
        .position(|window| window == b"\r\n\r\n")
        .ok_or_else(|| "missing HTTP header terminator".to_string())?;
    let header_block = std::str::from_utf8(&raw_request[..header_end])
        .map_err(|_| "request headers must be valid UTF-8".to_string())?;
    let body = &raw_request[header_end + 4..];

    let mut lines = header_block.split("\r\n");
    let request_line = lines
        .next()
        .ok_or_else(|| "missing request line".to_string())?;
    let (method, target) = parse_request_line(request_line)?;

    let mut headers = HashMap::new();
    for line in lines {
        if line.trim().is_empty() {
            continue;
        }
        let (name, value) = parse_header_line(line)?;
        headers.insert(name, value);
    }

    let content_length = content_length(&headers)?;
    if content_length != body.len() {
        return Err("content-length does not match body size".to_string());
    }

    Ok(HttpRequest {
        method,
        target,
        headers,
        body: body.to_vec(),
    })
}

pub(super) fn split_target(target: &str) -> &str {
    target
        .split_once('?')
        .map(|(path, _)| path)
        .unwrap_or(target)
}

pub(super) fn parse_request_line(line: &str) -> Result<(String, String), String> {
    let mut parts = line.trim().split_whitespace();
    let method = parts
        .next()
        .ok_or_else(|| "missing HTTP method".to_string())?;
    let target = parts
        .next()
        .ok_or_else(|| "missing HTTP target".to_string())?;
    let version = parts
        .next()
        .ok_or_else(|| "missing HTTP version".to_string())?;
    if !version.starts_with("HTTP/1.") {
        return Err("unsupported HTTP version".to_string());
    }
    Ok((method.to_string(), target.to_string()))
}

fn parse_header_line(line: &str) -> Result<(String, String), String> {
    let (name, value) = line
        .split_once(':')
        .ok_or_else(|| "invalid HTTP header".to_string())?;
    Ok((name.trim().to_ascii_lowercase(), value.trim().to_string()))
}

fn content_length(headers: &HashMap<String, String>) -> Result<usize, String> {
    let content_length = match headers.get("content-length") {
        Some(raw) => raw
            .parse::<usize>()
            .map_err(|_| "invalid content-length header".to_string())?,
        None => 0,
    };
    if content_length > MAX_HTTP_BODY_BYTES {
        return Err(format!(
            "content-length exceeds max body size ({MAX_HTTP_BODY_BYTES} bytes)"
        ));
    }
    Ok(content_length)
}
