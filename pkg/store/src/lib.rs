use std::{
    collections::HashMap,
    fs::{OpenOptions, create_dir_all, rename},
    io::{BufRead, BufReader, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use schema::{
    RecordLookup, StudentRecord, ValidationError, student_record, validate_student_record,
};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("invalid student record: {0}")]
    Validation(#[from] ValidationError),
    #[error("registration number already registered: {0}")]
    Conflict(String),
    #[error("io error: {0}")]
    Io(String),
    #[error("parse error: {0}")]
    Parse(String),
}

impl From<std::io::Error> for StoreError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value.to_string())
    }
}

const SNAPSHOT_HEADER: &str = "SNAP\t1";
const STUDENT_TAG: &str = "S";
// escaped text never contains `\N`: every literal backslash is doubled
const NULL_FIELD: &str = "\\N";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalCheckpointStats {
    pub snapshot_records: usize,
    pub truncated_wal_records: usize,
}

/// Thresholds that trigger snapshot compaction after a persistent insert.
/// `None` or zero disables a threshold.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CheckpointPolicy {
    pub max_wal_records: Option<usize>,
    pub max_wal_bytes: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WalReplayStats {
    pub snapshot_records: usize,
    pub wal_records: usize,
}

/// The demo roster bundled for seeding fresh deployments.
pub fn sample_records() -> Vec<StudentRecord> {
    vec![
        student_record(
            "Maha Lakshmi N",
            "KGISL2023001",
            "CSE",
            Some("B.E Computer Science and Engineering"),
        ),
        student_record(
            "John Doe",
            "ABC2023123",
            "EEE",
            Some("B.Tech Electrical Engineering"),
        ),
        student_record("Jane Smith", "KGISL2023003", "ECE", Some("B.E")),
        student_record("Alex Johnson", "KGISL2023004", "MECH", Some("B.E")),
    ]
}

/// Append-only student log plus an optional compacted snapshot beside it.
///
/// Each line is `S<TAB>name<TAB>reg_no<TAB>department<TAB>degree`, with
/// `null` standing in for a missing degree. Replay reads the snapshot first
/// and then the log delta written since the last checkpoint.
pub struct FileWal {
    path: PathBuf,
    wal_records: usize,
    sync_every_records: usize,
    unsynced_records: usize,
}

impl FileWal {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::open_with_sync_every_records(path, 1)
    }

    pub fn open_with_sync_every_records(
        path: impl AsRef<Path>,
        sync_every_records: usize,
    ) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            create_dir_all(parent)?;
        }
        OpenOptions::new().create(true).append(true).open(&path)?;
        let wal_records = count_non_empty_lines(&path)?;
        Ok(Self {
            path,
            wal_records,
            sync_every_records: sync_every_records.max(1),
            unsynced_records: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn snapshot_path(&self) -> PathBuf {
        let mut path = self.path.clone().into_os_string();
        path.push(".snapshot");
        PathBuf::from(path)
    }

    pub fn sync_every_records(&self) -> usize {
        self.sync_every_records
    }

    pub fn wal_record_count(&self) -> usize {
        self.wal_records
    }

    pub fn wal_size_bytes(&self) -> Result<u64, StoreError> {
        Ok(std::fs::metadata(&self.path)?.len())
    }

    pub fn append_student(&mut self, record: &StudentRecord) -> Result<(), StoreError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", record_to_line(record))?;
        self.wal_records += 1;
        self.unsynced_records += 1;
        if self.unsynced_records >= self.sync_every_records {
            file.sync_data()?;
            self.unsynced_records = 0;
        }
        Ok(())
    }

    pub fn flush_pending_sync(&mut self) -> Result<(), StoreError> {
        if self.unsynced_records == 0 {
            return Ok(());
        }
        OpenOptions::new()
            .append(true)
            .open(&self.path)?
            .sync_data()?;
        self.unsynced_records = 0;
        Ok(())
    }

    fn replay(&self) -> Result<(Vec<StudentRecord>, WalReplayStats), StoreError> {
        let snapshot = self.read_snapshot()?;
        let delta = read_record_lines(&self.path)?;
        let stats = WalReplayStats {
            snapshot_records: snapshot.len(),
            wal_records: delta.len(),
        };
        let mut records = snapshot;
        records.extend(delta);
        Ok((records, stats))
    }

    fn read_snapshot(&self) -> Result<Vec<StudentRecord>, StoreError> {
        let snapshot_path = self.snapshot_path();
        if !snapshot_path.exists() {
            return Ok(Vec::new());
        }
        let file = OpenOptions::new().read(true).open(&snapshot_path)?;
        let mut lines = BufReader::new(file).lines();
        let header = loop {
            match lines.next() {
                Some(line) => {
                    let line = line?;
                    if !line.trim().is_empty() {
                        break line;
                    }
                }
                None => return Err(StoreError::Parse("snapshot file is empty".to_string())),
            }
        };
        if header != SNAPSHOT_HEADER {
            return Err(StoreError::Parse(
                "snapshot file has invalid header".to_string(),
            ));
        }
        let mut records = Vec::new();
        for line in lines {
            let line = line?;
            if !line.trim().is_empty() {
                records.push(line_to_record(&line)?);
            }
        }
        Ok(records)
    }

    fn compact_with_snapshot(
        &mut self,
        records: &[Arc<StudentRecord>],
    ) -> Result<WalCheckpointStats, StoreError> {
        let truncated_wal_records = self.wal_records;
        self.flush_pending_sync()?;

        let snapshot_path = self.snapshot_path();
        let mut tmp_path = snapshot_path.clone().into_os_string();
        tmp_path.push(".tmp");
        let tmp_path = PathBuf::from(tmp_path);
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;
        writeln!(file, "{SNAPSHOT_HEADER}")?;
        for record in records {
            writeln!(file, "{}", record_to_line(record))?;
        }
        file.sync_all()?;
        rename(&tmp_path, &snapshot_path)?;

        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        self.wal_records = 0;
        self.unsynced_records = 0;

        debug!(
            snapshot_records = records.len(),
            truncated_wal_records,
            wal = %self.path.display(),
            "student wal compacted"
        );
        Ok(WalCheckpointStats {
            snapshot_records: records.len(),
            truncated_wal_records,
        })
    }
}

impl Drop for FileWal {
    fn drop(&mut self) {
        let _ = self.flush_pending_sync();
    }
}

/// Authoritative student records, kept in insertion order with a unique
/// index on `reg_no`.
#[derive(Debug, Default, Clone)]
pub struct InMemoryRecordStore {
    records: Vec<Arc<StudentRecord>>,
    by_reg_no: HashMap<String, usize>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sample_records() -> Self {
        let mut store = Self::new();
        for record in sample_records() {
            store.apply(record);
        }
        store
    }

    pub fn load_from_wal(wal: &FileWal) -> Result<Self, StoreError> {
        let (store, _) = Self::load_from_wal_with_stats(wal)?;
        Ok(store)
    }

    pub fn load_from_wal_with_stats(wal: &FileWal) -> Result<(Self, WalReplayStats), StoreError> {
        let (records, stats) = wal.replay()?;
        let mut store = Self::new();
        for record in records {
            validate_student_record(&record)?;
            match store.by_reg_no.get(&record.reg_no) {
                // a crash between snapshot rename and truncation replays the
                // same line twice
                Some(&index) if *store.records[index] == record => continue,
                Some(_) => return Err(StoreError::Conflict(record.reg_no)),
                None => {
                    store.apply(record);
                }
            }
        }
        debug!(
            snapshot_records = stats.snapshot_records,
            wal_records = stats.wal_records,
            students = store.records_len(),
            "student wal replayed"
        );
        Ok((store, stats))
    }

    pub fn insert(&mut self, record: StudentRecord) -> Result<Arc<StudentRecord>, StoreError> {
        self.check_insertable(&record)?;
        Ok(self.apply(record))
    }

    /// Returns `false` when the registration number is already on file.
    pub fn insert_or_ignore(&mut self, record: StudentRecord) -> Result<bool, StoreError> {
        validate_student_record(&record)?;
        if self.by_reg_no.contains_key(&record.reg_no) {
            return Ok(false);
        }
        self.apply(record);
        Ok(true)
    }

    pub fn insert_persistent(
        &mut self,
        wal: &mut FileWal,
        record: StudentRecord,
    ) -> Result<Arc<StudentRecord>, StoreError> {
        self.check_insertable(&record)?;
        wal.append_student(&record)?;
        Ok(self.apply(record))
    }

    pub fn insert_or_ignore_persistent(
        &mut self,
        wal: &mut FileWal,
        record: StudentRecord,
    ) -> Result<bool, StoreError> {
        validate_student_record(&record)?;
        if self.by_reg_no.contains_key(&record.reg_no) {
            return Ok(false);
        }
        wal.append_student(&record)?;
        self.apply(record);
        Ok(true)
    }

    pub fn insert_persistent_with_policy(
        &mut self,
        wal: &mut FileWal,
        policy: &CheckpointPolicy,
        record: StudentRecord,
    ) -> Result<(Arc<StudentRecord>, Option<WalCheckpointStats>), StoreError> {
        let stored = self.insert_persistent(wal, record)?;
        let checkpoint = if should_checkpoint(wal, policy)? {
            Some(self.checkpoint_and_compact(wal)?)
        } else {
            None
        };
        Ok((stored, checkpoint))
    }

    pub fn checkpoint_and_compact(
        &self,
        wal: &mut FileWal,
    ) -> Result<WalCheckpointStats, StoreError> {
        wal.compact_with_snapshot(&self.records)
    }

    pub fn get(&self, reg_no: &str) -> Option<&Arc<StudentRecord>> {
        self.by_reg_no.get(reg_no).map(|&index| &self.records[index])
    }

    pub fn records(&self) -> &[Arc<StudentRecord>] {
        &self.records
    }

    pub fn records_len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn check_insertable(&self, record: &StudentRecord) -> Result<(), StoreError> {
        validate_student_record(record)?;
        if self.by_reg_no.contains_key(&record.reg_no) {
            return Err(StoreError::Conflict(record.reg_no.clone()));
        }
        Ok(())
    }

    fn apply(&mut self, record: StudentRecord) -> Arc<StudentRecord> {
        let record = Arc::new(record);
        self.by_reg_no
            .insert(record.reg_no.clone(), self.records.len());
        self.records.push(Arc::clone(&record));
        record
    }
}

impl RecordLookup for InMemoryRecordStore {
    fn lookup_by_reg_no(&self, reg_no: &str) -> Option<Arc<StudentRecord>> {
        self.get(reg_no).cloned()
    }

    fn list_all_records(&self) -> Vec<Arc<StudentRecord>> {
        self.records.clone()
    }
}

fn should_checkpoint(wal: &FileWal, policy: &CheckpointPolicy) -> Result<bool, StoreError> {
    let records_met = match policy.max_wal_records {
        Some(threshold) if threshold > 0 => wal.wal_record_count() >= threshold,
        _ => false,
    };
    let bytes_met = match policy.max_wal_bytes {
        Some(threshold) if threshold > 0 => wal.wal_size_bytes()? >= threshold,
        _ => false,
    };
    Ok(records_met || bytes_met)
}

fn record_to_line(record: &StudentRecord) -> String {
    format!(
        "{STUDENT_TAG}\t{}\t{}\t{}\t{}",
        escape_field(&record.name),
        escape_field(&record.reg_no),
        escape_field(&record.department),
        record
            .degree
            .as_deref()
            .map(escape_field)
            .unwrap_or_else(|| NULL_FIELD.to_string())
    )
}

fn line_to_record(line: &str) -> Result<StudentRecord, StoreError> {
    let fields: Vec<&str> = line.split('\t').collect();
    let [tag, name, reg_no, department, degree] = fields.as_slice() else {
        return Err(StoreError::Parse(format!(
            "student record expects 5 fields, found {}",
            fields.len()
        )));
    };
    if *tag != STUDENT_TAG {
        return Err(StoreError::Parse(format!("unknown record tag: {tag}")));
    }
    Ok(StudentRecord {
        name: unescape_field(name)?,
        reg_no: unescape_field(reg_no)?,
        department: unescape_field(department)?,
        degree: match *degree {
            NULL_FIELD => None,
            raw => Some(unescape_field(raw)?),
        },
    })
}

fn read_record_lines(path: &Path) -> Result<Vec<StudentRecord>, StoreError> {
    let file = OpenOptions::new().read(true).open(path)?;
    let mut records = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if !line.trim().is_empty() {
            records.push(line_to_record(&line)?);
        }
    }
    Ok(records)
}

fn count_non_empty_lines(path: &Path) -> Result<usize, StoreError> {
    let file = OpenOptions::new().read(true).open(path)?;
    let mut count = 0usize;
    for line in BufReader::new(file).lines() {
        if !line?.trim().is_empty() {
            count += 1;
        }
    }
    Ok(count)
}

fn escape_field(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('\t', "\\t")
        .replace('\n', "\\n")
        .replace('\r', "\\r")
}

fn unescape_field(value: &str) -> Result<String, StoreError> {
    let mut output = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            output.push(ch);
            continue;
        }
        match chars.next() {
            Some('\\') => output.push('\\'),
            Some('t') => output.push('\t'),
            Some('n') => output.push('\n'),
            Some('r') => output.push('\r'),
            Some(other) => {
                return Err(StoreError::Parse(format!(
                    "invalid escape sequence: \\{other}"
                )));
            }
            None => {
                return Err(StoreError::Parse(
                    "unterminated escape sequence in wal field".to_string(),
                ));
            }
        }
    }
    Ok(output)
}
