use std::{
    io::Read,
    path::PathBuf,
    process::ExitCode,
    sync::Arc,
};

use clap::Parser;
use store::{FileWal, InMemoryRecordStore, StoreError, sample_records};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use verification::{
    config::{ServiceConfig, TransportRuntime},
    ocr::OcrProvider,
    transport::{VerificationRuntime, serve_http_with_workers},
};

#[derive(Parser)]
#[command(name = "certverify")]
#[command(about = "Certificate verification against the student record store")]
#[command(version)]
struct Cli {
    /// Run the HTTP service instead of a one-shot verification
    #[arg(long, conflicts_with_all = ["text_file", "image_file"])]
    serve: bool,

    /// Certificate text to verify; stdin is read when neither file is given
    #[arg(long, conflicts_with = "image_file")]
    text_file: Option<PathBuf>,

    /// Certificate image to recognize and verify
    #[arg(long)]
    image_file: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("certverify=info,verification=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = ServiceConfig::from_env();
    let runtime = match build_runtime(&config) {
        Ok(runtime) => runtime,
        Err(err) => {
            error!(error = %err, "verification startup failed");
            return ExitCode::FAILURE;
        }
    };

    if cli.serve {
        return serve(runtime, &config);
    }

    let mut runtime = runtime;
    let report = if let Some(path) = cli.image_file {
        let image = match std::fs::read(&path) {
            Ok(image) => image,
            Err(err) => {
                error!(path = %path.display(), error = %err, "failed reading certificate image");
                return ExitCode::FAILURE;
            }
        };
        let recognized = config.ocr_provider().recognize(&image);
        runtime.verify_recognized(recognized)
    } else {
        let text = match read_text(cli.text_file.as_ref()) {
            Ok(text) => text,
            Err(err) => {
                error!(error = %err, "failed reading certificate text");
                return ExitCode::FAILURE;
            }
        };
        runtime.verify_text(&text)
    };

    match serde_json::to_string_pretty(&report) {
        Ok(rendered) => {
            println!("{rendered}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(error = %err, "failed rendering verification report");
            ExitCode::FAILURE
        }
    }
}

fn build_runtime(config: &ServiceConfig) -> Result<VerificationRuntime, String> {
    let extractor = config.build_extractor().map_err(|err| err.to_string())?;
    let decision_policy = config.decision_policy().map_err(|err| err.to_string())?;
    let ocr = config.ocr_provider();
    info!(
        name_threshold = decision_policy.name_threshold,
        department_threshold = decision_policy.department_threshold,
        name_only_threshold = decision_policy.name_only_threshold,
        ocr_program = ocr.program(),
        ocr_lang = ocr.lang().unwrap_or("default"),
        "verification pipeline configured"
    );

    let runtime = match &config.wal_path {
        Some(wal_path) => {
            let mut wal = FileWal::open_with_sync_every_records(wal_path, config.wal_sync_every_records)
                .map_err(|err| format!("opening WAL '{}': {err}", wal_path.display()))?;
            let (mut store, stats) = InMemoryRecordStore::load_from_wal_with_stats(&wal)
                .map_err(|err| format!("replaying WAL '{}': {err}", wal_path.display()))?;
            info!(
                wal_path = %wal_path.display(),
                students = store.records_len(),
                snapshot_records = stats.snapshot_records,
                wal_delta_records = stats.wal_records,
                sync_every_records = wal.sync_every_records(),
                "student store replayed"
            );
            if config.seed_sample && store.is_empty() {
                seed_persistent(&mut store, &mut wal)
                    .map_err(|err| format!("seeding WAL '{}': {err}", wal_path.display()))?;
            }
            VerificationRuntime::persistent(store, wal, config.checkpoint_policy.clone())
        }
        None => {
            let store = if config.seed_sample {
                InMemoryRecordStore::with_sample_records()
            } else {
                InMemoryRecordStore::new()
            };
            VerificationRuntime::in_memory(store)
        }
    };

    Ok(runtime
        .with_extractor(extractor)
        .with_decision_policy(decision_policy)
        .with_ocr(Arc::new(ocr))
        .with_audit_log_path(config.audit_log_path.clone()))
}

fn seed_persistent(store: &mut InMemoryRecordStore, wal: &mut FileWal) -> Result<(), StoreError> {
    let mut inserted = 0usize;
    for record in sample_records() {
        if store.insert_or_ignore_persistent(wal, record)? {
            inserted += 1;
        }
    }
    wal.flush_pending_sync()?;
    info!(inserted, "sample roster seeded");
    Ok(())
}

fn serve(runtime: VerificationRuntime, config: &ServiceConfig) -> ExitCode {
    info!(
        bind_addr = %config.bind_addr,
        http_workers = config.http_workers,
        transport_runtime = config.transport_runtime.as_str(),
        students = runtime.students_len(),
        audit_log = config.audit_log_path.as_deref().unwrap_or("disabled"),
        "starting verification service"
    );

    let result = match config.transport_runtime {
        TransportRuntime::Axum => serve_axum(runtime, config),
        TransportRuntime::Std => {
            serve_http_with_workers(runtime, &config.bind_addr, config.http_workers)
                .map_err(|err| err.to_string())
        }
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "verification transport failed");
            ExitCode::FAILURE
        }
    }
}

#[cfg(feature = "async-transport")]
fn serve_axum(runtime: VerificationRuntime, config: &ServiceConfig) -> Result<(), String> {
    verification::transport_axum::serve_http_with_axum(
        runtime,
        &config.bind_addr,
        config.http_workers,
    )
}

#[cfg(not(feature = "async-transport"))]
fn serve_axum(runtime: VerificationRuntime, config: &ServiceConfig) -> Result<(), String> {
    tracing::warn!("axum transport requested but the async-transport feature is disabled; using std");
    serve_http_with_workers(runtime, &config.bind_addr, config.http_workers)
        .map_err(|err| err.to_string())
}

fn read_text(path: Option<&PathBuf>) -> std::io::Result<String> {
    match path {
        Some(path) => std::fs::read_to_string(path),
        None => {
            let mut text = String::new();
            std::io::stdin().read_to_string(&mut text)?;
            Ok(text)
        }
    }
}
