mod audit;
mod http;
mod request;
mod routes;

use std::{
    net::{TcpListener, TcpStream},
    sync::{Arc, Mutex, mpsc},
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use decider::DecisionPolicy;
use extractor::FieldExtractor;
use schema::VerdictStatus;
use store::{CheckpointPolicy, FileWal, InMemoryRecordStore, StoreError};
use tracing::{info, warn};

pub(crate) use http::{HttpRequest, HttpResponse};
pub(crate) use routes::handle_request;

use crate::{
    VerificationOutcome, VerificationReport,
    api::{RegisterStudentRequest, RegisterStudentResponse},
    ocr::{OcrError, OcrProvider},
};
use http::{render_response_text, write_response};
use request::{parse_http_request_bytes, read_http_request};

pub(crate) const MAX_HTTP_BODY_BYTES: usize = 16 * 1024 * 1024;
const SOCKET_TIMEOUT_SECS: u64 = 5;

pub type SharedRuntime = Arc<Mutex<VerificationRuntime>>;

/// Everything one verification service instance needs: the record store,
/// its optional WAL, the extraction and decision settings, and counters
/// surfaced on `/metrics`.
pub struct VerificationRuntime {
    store: Arc<InMemoryRecordStore>,
    wal: Option<FileWal>,
    checkpoint_policy: CheckpointPolicy,
    extractor: Arc<FieldExtractor>,
    decision_policy: DecisionPolicy,
    ocr: Option<Arc<dyn OcrProvider>>,
    audit_log_path: Option<String>,
    verifications_total: u64,
    genuine_total: u64,
    genuine_by_name_only_total: u64,
    forged_total: u64,
    unverifiable_total: u64,
    registrations_total: u64,
    registration_failures_total: u64,
    audit_events_total: u64,
    audit_write_error_total: u64,
    started_at: Instant,
}

impl VerificationRuntime {
    pub fn in_memory(store: InMemoryRecordStore) -> Self {
        Self {
            store: Arc::new(store),
            wal: None,
            checkpoint_policy: CheckpointPolicy::default(),
            extractor: Arc::new(FieldExtractor::default()),
            decision_policy: DecisionPolicy::default(),
            ocr: None,
            audit_log_path: None,
            verifications_total: 0,
            genuine_total: 0,
            genuine_by_name_only_total: 0,
            forged_total: 0,
            unverifiable_total: 0,
            registrations_total: 0,
            registration_failures_total: 0,
            audit_events_total: 0,
            audit_write_error_total: 0,
            started_at: Instant::now(),
        }
    }

    pub fn persistent(
        store: InMemoryRecordStore,
        wal: FileWal,
        checkpoint_policy: CheckpointPolicy,
    ) -> Self {
        Self {
            wal: Some(wal),
            checkpoint_policy,
            ..Self::in_memory(store)
        }
    }

    pub fn with_extractor(mut self, extractor: FieldExtractor) -> Self {
        self.extractor = Arc::new(extractor);
        self
    }

    pub fn with_decision_policy(mut self, policy: DecisionPolicy) -> Self {
        self.decision_policy = policy;
        self
    }

    pub fn with_ocr(mut self, ocr: Arc<dyn OcrProvider>) -> Self {
        self.ocr = Some(ocr);
        self
    }

    pub fn with_audit_log_path(mut self, path: Option<String>) -> Self {
        self.audit_log_path = path;
        self
    }

    pub fn store(&self) -> &InMemoryRecordStore {
        &self.store
    }

    pub fn students_len(&self) -> usize {
        self.store.records_len()
    }

    pub fn audit_log_path(&self) -> Option<&str> {
        self.audit_log_path.as_deref()
    }

    /// The provider is handed out so recognition can run without holding
    /// the runtime lock.
    pub fn ocr_provider(&self) -> Option<Arc<dyn OcrProvider>> {
        self.ocr.clone()
    }

    /// Snapshot of the store and settings. Registrations made after this
    /// call copy the store instead of changing what the view sees.
    pub fn verification_view(&self) -> VerificationView {
        VerificationView {
            store: Arc::clone(&self.store),
            extractor: Arc::clone(&self.extractor),
            decision_policy: self.decision_policy,
        }
    }

    pub fn verify_text(&mut self, raw: &str) -> VerificationReport {
        let report = self.verification_view().verify_text(raw);
        self.observe_report(&report);
        report
    }

    pub fn verify_recognized(&mut self, recognized: Result<String, OcrError>) -> VerificationReport {
        let report = self.verification_view().verify_recognized(recognized);
        self.observe_report(&report);
        report
    }

    pub fn register(
        &mut self,
        request: RegisterStudentRequest,
    ) -> Result<RegisterStudentResponse, StoreError> {
        let record = request.into_record();
        let store = Arc::make_mut(&mut self.store);
        let result = match self.wal.as_mut() {
            Some(wal) => store.insert_persistent_with_policy(wal, &self.checkpoint_policy, record),
            None => store.insert(record).map(|stored| (stored, None)),
        };
        match result {
            Ok((stored, checkpoint)) => {
                self.registrations_total += 1;
                if let Some(stats) = &checkpoint {
                    info!(
                        snapshot_records = stats.snapshot_records,
                        truncated_wal_records = stats.truncated_wal_records,
                        "wal checkpoint written"
                    );
                }
                Ok(RegisterStudentResponse {
                    student: stored.as_ref().clone(),
                    students_total: self.store.records_len(),
                    checkpoint_triggered: checkpoint.is_some(),
                    checkpoint_snapshot_records: checkpoint.map(|stats| stats.snapshot_records),
                })
            }
            Err(err) => {
                self.registration_failures_total += 1;
                Err(err)
            }
        }
    }

    pub(crate) fn observe_report(&mut self, report: &VerificationReport) {
        self.verifications_total += 1;
        match &report.outcome {
            VerificationOutcome::Decided { verdict, .. } => match verdict.status() {
                VerdictStatus::Genuine => self.genuine_total += 1,
                VerdictStatus::GenuineByNameOnly => self.genuine_by_name_only_total += 1,
                VerdictStatus::Forged => self.forged_total += 1,
            },
            VerificationOutcome::Unverifiable { .. } => self.unverifiable_total += 1,
        }
    }

    pub(crate) fn observe_audit_event(&mut self, write_error: bool) {
        self.audit_events_total += 1;
        if write_error {
            self.audit_write_error_total += 1;
        }
    }

    pub fn metrics_text(&self) -> String {
        let wal_records = self
            .wal
            .as_ref()
            .map(FileWal::wal_record_count)
            .unwrap_or(0);
        format!(
            "# TYPE certverify_verifications_total counter\n\
certverify_verifications_total {}\n\
# TYPE certverify_verdict_genuine_total counter\n\
certverify_verdict_genuine_total {}\n\
# TYPE certverify_verdict_genuine_by_name_only_total counter\n\
certverify_verdict_genuine_by_name_only_total {}\n\
# TYPE certverify_verdict_forged_total counter\n\
certverify_verdict_forged_total {}\n\
# TYPE certverify_unverifiable_total counter\n\
certverify_unverifiable_total {}\n\
# TYPE certverify_registrations_total counter\n\
certverify_registrations_total {}\n\
# TYPE certverify_registration_failures_total counter\n\
certverify_registration_failures_total {}\n\
# TYPE certverify_audit_events_total counter\n\
certverify_audit_events_total {}\n\
# TYPE certverify_audit_write_error_total counter\n\
certverify_audit_write_error_total {}\n\
# TYPE certverify_students_total gauge\n\
certverify_students_total {}\n\
# TYPE certverify_wal_records gauge\n\
certverify_wal_records {}\n\
# TYPE certverify_uptime_seconds gauge\n\
certverify_uptime_seconds {:.4}\n",
            self.verifications_total,
            self.genuine_total,
            self.genuine_by_name_only_total,
            self.forged_total,
            self.unverifiable_total,
            self.registrations_total,
            self.registration_failures_total,
            self.audit_events_total,
            self.audit_write_error_total,
            self.store.records_len(),
            wal_records,
            self.started_at.elapsed().as_secs_f64(),
        )
    }
}

/// Read-only pieces of a runtime; verifies without the runtime lock.
#[derive(Clone)]
pub struct VerificationView {
    store: Arc<InMemoryRecordStore>,
    extractor: Arc<FieldExtractor>,
    decision_policy: DecisionPolicy,
}

impl VerificationView {
    pub fn students_len(&self) -> usize {
        self.store.records_len()
    }

    pub fn verify_text(&self, raw: &str) -> VerificationReport {
        crate::verify_text(
            &self.extractor,
            self.store.as_ref(),
            &self.decision_policy,
            raw,
        )
    }

    pub fn verify_recognized(&self, recognized: Result<String, OcrError>) -> VerificationReport {
        crate::verify_recognized(
            recognized,
            &self.extractor,
            self.store.as_ref(),
            &self.decision_policy,
        )
    }
}

pub(crate) fn unix_timestamp_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

pub fn serve_http_with_workers(
    runtime: VerificationRuntime,
    bind_addr: &str,
    worker_count: usize,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(bind_addr)?;
    let worker_count = worker_count.max(1);
    let runtime = Arc::new(Mutex::new(runtime));
    let (tx, rx) = mpsc::channel::<TcpStream>();
    let rx = Arc::new(Mutex::new(rx));
    info!(bind_addr, worker_count, "verification transport listening");

    std::thread::scope(|scope| {
        for _ in 0..worker_count {
            let runtime = Arc::clone(&runtime);
            let rx = Arc::clone(&rx);
            scope.spawn(move || {
                loop {
                    let stream = {
                        let guard = match rx.lock() {
                            Ok(guard) => guard,
                            Err(_) => break,
                        };
                        match guard.recv() {
                            Ok(stream) => stream,
                            Err(_) => break,
                        }
                    };
                    if let Err(err) = handle_connection(&runtime, stream) {
                        warn!(error = %err, "verification transport connection error");
                    }
                }
            });
        }

        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    if tx.send(stream).is_err() {
                        warn!("verification transport worker queue closed");
                        break;
                    }
                }
                Err(err) => warn!(error = %err, "verification transport accept error"),
            }
        }
        drop(tx);
    });

    Ok(())
}

/// Runs one raw HTTP/1.1 request through the router without a socket.
pub fn handle_http_request_bytes(
    runtime: &SharedRuntime,
    raw_request: &[u8],
) -> Result<Vec<u8>, String> {
    let request = parse_http_request_bytes(raw_request)?;
    let response = handle_request(runtime, &request);
    Ok(render_response_text(&response).into_bytes())
}

fn handle_connection(runtime: &SharedRuntime, mut stream: TcpStream) -> std::io::Result<()> {
    stream.set_read_timeout(Some(Duration::from_secs(SOCKET_TIMEOUT_SECS)))?;
    stream.set_write_timeout(Some(Duration::from_secs(SOCKET_TIMEOUT_SECS)))?;

    let request = match read_http_request(&mut stream) {
        Ok(Some(request)) => request,
        Ok(None) => return Ok(()),
        Err(err) => return write_response(&mut stream, HttpResponse::bad_request(&err)),
    };

    let response = handle_request(runtime, &request);
    write_response(&mut stream, response)
}
