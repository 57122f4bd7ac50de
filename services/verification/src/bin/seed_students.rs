use std::{
    path::{Path, PathBuf},
    process::ExitCode,
};

use clap::Parser;
use store::{FileWal, InMemoryRecordStore, StoreError, sample_records};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Inserts the sample roster into a WAL-backed store and prints every
/// stored student as one JSON object per line.
#[derive(Parser)]
#[command(name = "seed-students")]
#[command(version)]
struct Cli {
    /// WAL file; defaults to CERTVERIFY_WAL_PATH
    #[arg(long, env = "CERTVERIFY_WAL_PATH")]
    wal_path: PathBuf,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("seed_students=info,store=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match seed(&cli.wal_path) {
        Ok(store) => {
            for record in store.records() {
                match serde_json::to_string(record.as_ref()) {
                    Ok(line) => println!("{line}"),
                    Err(err) => {
                        error!(error = %err, "failed rendering student");
                        return ExitCode::FAILURE;
                    }
                }
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(wal_path = %cli.wal_path.display(), error = %err, "seeding failed");
            ExitCode::FAILURE
        }
    }
}

fn seed(wal_path: &Path) -> Result<InMemoryRecordStore, StoreError> {
    let mut wal = FileWal::open(wal_path)?;
    let mut store = InMemoryRecordStore::load_from_wal(&wal)?;
    let mut inserted = 0usize;
    for record in sample_records() {
        if store.insert_or_ignore_persistent(&mut wal, record)? {
            inserted += 1;
        }
    }
    wal.flush_pending_sync()?;
    info!(inserted, students = store.records_len(), "sample roster seeded");
    Ok(store)
}
