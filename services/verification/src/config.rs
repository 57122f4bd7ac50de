use std::{
    fs,
    path::{Path, PathBuf},
};

use decider::DecisionPolicy;
use extractor::{ExtractionConfig, ExtractorError, FieldExtractor};
use serde::de::DeserializeOwned;
use store::CheckpointPolicy;
use thiserror::Error;

use crate::ocr::{DEFAULT_OCR_PROGRAM, TesseractCommand};

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8090";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed reading config file '{}': {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed parsing config file '{}': {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Extractor(#[from] ExtractorError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportRuntime {
    Std,
    Axum,
}

impl TransportRuntime {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Std => "std",
            Self::Axum => "axum",
        }
    }

    fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            Some(value) if value.eq_ignore_ascii_case("axum") => Self::Axum,
            _ => Self::Std,
        }
    }
}

/// Service settings resolved from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub bind_addr: String,
    pub http_workers: usize,
    pub transport_runtime: TransportRuntime,
    pub wal_path: Option<PathBuf>,
    pub wal_sync_every_records: usize,
    pub checkpoint_policy: CheckpointPolicy,
    pub audit_log_path: Option<String>,
    pub ocr_program: String,
    pub ocr_lang: Option<String>,
    pub extraction_config_path: Option<PathBuf>,
    pub decision_policy_path: Option<PathBuf>,
    pub extra_departments: Vec<String>,
    pub seed_sample: bool,
}

impl ServiceConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Each setting is read from the first key in its list that is set.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let first = |keys: &[&str]| {
            keys.iter()
                .find_map(|key| lookup(key))
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let first_parsed_usize =
            |keys: &[&str]| first(keys).and_then(|value| value.parse::<usize>().ok());

        Self {
            bind_addr: first(&["CERTVERIFY_BIND"]).unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            http_workers: first_parsed_usize(&["CERTVERIFY_HTTP_WORKERS"])
                .filter(|workers| *workers > 0)
                .unwrap_or_else(default_http_workers),
            transport_runtime: TransportRuntime::parse(
                first(&["CERTVERIFY_TRANSPORT_RUNTIME"]).as_deref(),
            ),
            wal_path: first(&["CERTVERIFY_WAL_PATH"]).map(PathBuf::from),
            wal_sync_every_records: first_parsed_usize(&["CERTVERIFY_WAL_SYNC_EVERY_RECORDS"])
                .filter(|value| *value > 0)
                .unwrap_or(1),
            checkpoint_policy: CheckpointPolicy {
                max_wal_records: first_parsed_usize(&["CERTVERIFY_CHECKPOINT_MAX_WAL_RECORDS"]),
                max_wal_bytes: first(&["CERTVERIFY_CHECKPOINT_MAX_WAL_BYTES"])
                    .and_then(|value| value.parse::<u64>().ok()),
            },
            audit_log_path: first(&["CERTVERIFY_AUDIT_LOG_PATH"]),
            ocr_program: first(&["CERTVERIFY_OCR_PROGRAM", "TESSERACT_CMD"])
                .unwrap_or_else(|| DEFAULT_OCR_PROGRAM.to_string()),
            ocr_lang: first(&["CERTVERIFY_OCR_LANG"]),
            extraction_config_path: first(&["CERTVERIFY_EXTRACTION_CONFIG"]).map(PathBuf::from),
            decision_policy_path: first(&["CERTVERIFY_DECISION_POLICY"]).map(PathBuf::from),
            extra_departments: first(&["CERTVERIFY_EXTRA_DEPARTMENTS"])
                .map(|raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|label| !label.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            seed_sample: first(&["CERTVERIFY_SEED_SAMPLE"])
                .map(|value| parse_flag(&value))
                .unwrap_or(true),
        }
    }

    pub fn extraction_config(&self) -> Result<ExtractionConfig, ConfigError> {
        let base = match &self.extraction_config_path {
            Some(path) => read_json_file(path)?,
            None => ExtractionConfig::default(),
        };
        Ok(base.with_extra_departments(self.extra_departments.iter().cloned()))
    }

    /// Thresholds missing from the file keep their defaults.
    pub fn decision_policy(&self) -> Result<DecisionPolicy, ConfigError> {
        match &self.decision_policy_path {
            Some(path) => read_json_file(path),
            None => Ok(DecisionPolicy::default()),
        }
    }

    pub fn build_extractor(&self) -> Result<FieldExtractor, ConfigError> {
        Ok(FieldExtractor::new(&self.extraction_config()?)?)
    }

    pub fn ocr_provider(&self) -> TesseractCommand {
        TesseractCommand::new(self.ocr_program.clone(), self.ocr_lang.clone())
    }
}

fn read_json_file<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

pub fn default_http_workers() -> usize {
    std::thread::available_parallelism()
        .map(|parallelism| parallelism.get().clamp(1, 32))
        .unwrap_or(4)
}

fn parse_flag(raw: &str) -> bool {
    !matches!(
        raw.to_ascii_lowercase().as_str(),
        "0" | "false" | "no" | "off"
    )
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> ServiceConfig {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        ServiceConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_apply_without_environment() {
        let config = config_from(&[]);
        assert_eq!(config.bind_addr, DEFAULT_BIND_ADDR);
        assert_eq!(config.transport_runtime, TransportRuntime::Std);
        assert_eq!(config.wal_path, None);
        assert_eq!(config.wal_sync_every_records, 1);
        assert_eq!(config.checkpoint_policy, CheckpointPolicy::default());
        assert_eq!(config.ocr_program, "tesseract");
        assert!(config.seed_sample);
        assert!(config.http_workers >= 1);
    }

    #[test]
    fn service_key_wins_over_shared_key() {
        let config = config_from(&[
            ("CERTVERIFY_OCR_PROGRAM", "/opt/ocr/tesseract"),
            ("TESSERACT_CMD", "/usr/bin/tesseract"),
        ]);
        assert_eq!(config.ocr_program, "/opt/ocr/tesseract");
        assert_eq!(config.ocr_provider().program(), "/opt/ocr/tesseract");
        let config = config_from(&[("TESSERACT_CMD", "/usr/bin/tesseract")]);
        assert_eq!(config.ocr_program, "/usr/bin/tesseract");
    }

    #[test]
    fn invalid_numbers_fall_back_to_defaults() {
        let config = config_from(&[
            ("CERTVERIFY_HTTP_WORKERS", "0"),
            ("CERTVERIFY_WAL_SYNC_EVERY_RECORDS", "many"),
            ("CERTVERIFY_CHECKPOINT_MAX_WAL_RECORDS", "500"),
            ("CERTVERIFY_TRANSPORT_RUNTIME", "AXUM"),
            ("CERTVERIFY_SEED_SAMPLE", "off"),
        ]);
        assert!(config.http_workers >= 1);
        assert_eq!(config.wal_sync_every_records, 1);
        assert_eq!(config.checkpoint_policy.max_wal_records, Some(500));
        assert_eq!(config.transport_runtime, TransportRuntime::Axum);
        assert!(!config.seed_sample);
    }

    #[test]
    fn extra_departments_extend_the_default_vocabulary() {
        let config = config_from(&[("CERTVERIFY_EXTRA_DEPARTMENTS", "AIDS, cse , ,BME")]);
        let vocabulary = config.extraction_config().unwrap().department_vocabulary;
        assert_eq!(vocabulary.first().map(String::as_str), Some("CSE"));
        assert_eq!(&vocabulary[vocabulary.len() - 2..], &["AIDS", "BME"]);
    }

    fn temp_config_file(contents: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|elapsed| elapsed.as_nanos())
            .unwrap_or(0);
        let path = std::env::temp_dir().join(format!(
            "certverify-config-{}-{nanos}.json",
            std::process::id()
        ));
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn decision_policy_defaults_without_a_file() {
        let config = config_from(&[]);
        assert_eq!(config.decision_policy_path, None);
        assert_eq!(config.decision_policy().unwrap(), DecisionPolicy::default());
    }

    #[test]
    fn decision_policy_file_overrides_named_thresholds() {
        let path = temp_config_file(r#"{"name_threshold": 90.0, "name_only_threshold": 95}"#);
        let config = config_from(&[("CERTVERIFY_DECISION_POLICY", path.to_str().unwrap())]);
        let policy = config.decision_policy().unwrap();
        let _ = fs::remove_file(&path);

        assert_eq!(policy.name_threshold, 90.0);
        assert_eq!(policy.name_only_threshold, 95.0);
        assert_eq!(
            policy.department_threshold,
            DecisionPolicy::default().department_threshold
        );
    }

    #[test]
    fn decision_policy_file_errors_name_the_path() {
        let path = temp_config_file("{ not json");
        let config = config_from(&[("CERTVERIFY_DECISION_POLICY", path.to_str().unwrap())]);
        let err = config.decision_policy().unwrap_err();
        let _ = fs::remove_file(&path);

        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains(path.to_str().unwrap()));
    }

    #[test]
    fn extraction_config_file_errors_name_the_path() {
        let config = config_from(&[(
            "CERTVERIFY_EXTRACTION_CONFIG",
            "/nonexistent/certverify-extraction.json",
        )]);
        let err = config.build_extractor().unwrap_err();
        assert!(err.to_string().contains("certverify-extraction.json"));
    }
}
