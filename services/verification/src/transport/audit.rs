use std::{
    collections::HashMap,
    fs::{OpenOptions, create_dir_all},
    io::{BufRead, BufReader, Write},
    path::Path,
    sync::{Mutex, OnceLock},
};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

use super::{SharedRuntime, unix_timestamp_millis};

pub(crate) const AUDIT_CHAIN_GENESIS_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

#[derive(Debug, Clone, Copy)]
pub(crate) struct AuditEvent<'a> {
    pub(crate) action: &'a str,
    pub(crate) reg_no: Option<&'a str>,
    pub(crate) status: u16,
    pub(crate) outcome: &'a str,
    pub(crate) reason: &'a str,
}

/// One JSONL line. `hash` covers the same record serialized without it.
#[derive(Debug, Serialize)]
struct AuditRecord<'a> {
    seq: u64,
    ts_unix_ms: u64,
    action: &'a str,
    reg_no: Option<&'a str>,
    status: u16,
    outcome: &'a str,
    reason: &'a str,
    prev_hash: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    hash: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct AuditChainTail {
    seq: u64,
    hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct AuditChainState {
    next_seq: u64,
    last_hash: String,
}

impl AuditChainState {
    fn genesis() -> Self {
        Self {
            next_seq: 1,
            last_hash: AUDIT_CHAIN_GENESIS_HASH.to_string(),
        }
    }
}

pub(crate) fn emit_audit_event(
    runtime: &SharedRuntime,
    audit_log_path: Option<&str>,
    event: AuditEvent<'_>,
) {
    let mut write_error = false;
    if let Some(path) = audit_log_path
        && let Err(err) = append_audit_record(path, &event, unix_timestamp_millis())
    {
        write_error = true;
        warn!(path, error = %err, "audit write failed");
    }

    if let Ok(mut guard) = runtime.lock() {
        guard.observe_audit_event(write_error);
    }
}

pub(crate) fn append_audit_record(
    path: &str,
    event: &AuditEvent<'_>,
    timestamp_ms: u64,
) -> Result<(), String> {
    if let Some(parent) = Path::new(path).parent()
        && !parent.as_os_str().is_empty()
    {
        create_dir_all(parent).map_err(|e| format!("creating audit directory failed: {e}"))?;
    }
    let mut chain_states = audit_chain_states()
        .lock()
        .map_err(|_| "acquiring audit chain lock failed".to_string())?;
    let state = match chain_states.get(path) {
        Some(state) => state.clone(),
        None => load_audit_chain_state(path)?,
    };

    let (line, next_state) = render_chained_audit_line(event, timestamp_ms, &state)?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| format!("opening audit file failed: {e}"))?;
    writeln!(file, "{line}").map_err(|e| format!("appending audit file failed: {e}"))?;
    chain_states.insert(path.to_string(), next_state);
    Ok(())
}

fn render_chained_audit_line(
    event: &AuditEvent<'_>,
    timestamp_ms: u64,
    state: &AuditChainState,
) -> Result<(String, AuditChainState), String> {
    let mut record = AuditRecord {
        seq: state.next_seq,
        ts_unix_ms: timestamp_ms,
        action: event.action,
        reg_no: event.reg_no,
        status: event.status,
        outcome: event.outcome,
        reason: event.reason,
        prev_hash: &state.last_hash,
        hash: None,
    };
    // canonical form: the line minus `hash`, re-serialized through `Value`
    let canonical = serde_json::to_value(&record)
        .and_then(|value| serde_json::to_string(&value))
        .map_err(|e| format!("rendering audit record failed: {e}"))?;
    let hash = sha256_hex(canonical.as_bytes());
    record.hash = Some(&hash);
    let line =
        serde_json::to_string(&record).map_err(|e| format!("rendering audit record failed: {e}"))?;
    let next_state = AuditChainState {
        next_seq: state.next_seq.saturating_add(1),
        last_hash: hash.clone(),
    };
    Ok((line, next_state))
}

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

fn audit_chain_states() -> &'static Mutex<HashMap<String, AuditChainState>> {
    static STATES: OnceLock<Mutex<HashMap<String, AuditChainState>>> = OnceLock::new();
    STATES.get_or_init(|| Mutex::new(HashMap::new()))
}

fn load_audit_chain_state(path: &str) -> Result<AuditChainState, String> {
    if !Path::new(path).exists() {
        return Ok(AuditChainState::genesis());
    }
    let file = OpenOptions::new()
        .read(true)
        .open(path)
        .map_err(|e| format!("opening audit file failed: {e}"))?;
    let mut last_line = None;
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|e| format!("reading audit file failed: {e}"))?;
        if !line.trim().is_empty() {
            last_line = Some(line);
        }
    }
    let Some(last_line) = last_line else {
        return Ok(AuditChainState::genesis());
    };
    let tail: AuditChainTail = serde_json::from_str(&last_line)
        .map_err(|e| format!("audit tail record is invalid: {e}"))?;
    if !is_sha256_hex(&tail.hash) {
        return Err("audit tail hash is not a sha256 hex digest".to_string());
    }
    Ok(AuditChainState {
        next_seq: tail.seq.saturating_add(1),
        last_hash: tail.hash,
    })
}

fn is_sha256_hex(raw: &str) -> bool {
    raw.len() == 64 && raw.chars().all(|ch| ch.is_ascii_hexdigit())
}

#[cfg(test)]
pub(crate) fn clear_cached_audit_chain_state(path: &str) {
    if let Ok(mut states) = audit_chain_states().lock() {
        states.remove(path);
    }
}
