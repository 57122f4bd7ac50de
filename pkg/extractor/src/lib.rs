use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};
use schema::{ExtractedClaim, RawText};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_REG_NO_PATTERN: &str = r"\b([A-Z]{2,6}\d{4,6}|[A-Z]{2,6}\d{3,7})\b";
pub const DEFAULT_NAME_FALLBACK_LINES: usize = 8;
pub const DEFAULT_MIN_NAME_TOKENS: usize = 2;

const NAME_TRIM_CHARS: &[char] = &[' ', ':', '-'];

/// Declarative extraction rules. Vocabulary and trigger lists are ordered:
/// the first entry that matches wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Registration-code regex, matched case-insensitively. Capture group 1
    /// is the code when present, otherwise the whole match.
    pub reg_no_pattern: String,
    pub department_vocabulary: Vec<String>,
    pub name_triggers: Vec<String>,
    /// How many leading lines the title-case fallback looks at.
    pub name_fallback_lines: usize,
    pub min_name_tokens: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            reg_no_pattern: DEFAULT_REG_NO_PATTERN.to_string(),
            department_vocabulary: [
                "CSE",
                "ECE",
                "EEE",
                "MECH",
                "CIVIL",
                "IT",
                "MBA",
                "COMPUTER SCIENCE",
                "COMPUTER SCIENCE AND ENGINEERING",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
            name_triggers: ["awarded to", "this is to certify that", "name:"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            name_fallback_lines: DEFAULT_NAME_FALLBACK_LINES,
            min_name_tokens: DEFAULT_MIN_NAME_TOKENS,
        }
    }
}

impl ExtractionConfig {
    /// Appends departments after the existing entries, so they never outrank them.
    pub fn with_extra_departments<I, S>(mut self, extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for label in extra {
            let label = label.into();
            let label = label.trim();
            if label.is_empty()
                || self
                    .department_vocabulary
                    .iter()
                    .any(|existing| existing.eq_ignore_ascii_case(label))
            {
                continue;
            }
            self.department_vocabulary.push(label.to_string());
        }
        self
    }
}

#[derive(Debug, Error)]
pub enum ExtractorError {
    #[error("invalid {field} pattern: {source}")]
    InvalidPattern {
        field: &'static str,
        #[source]
        source: regex::Error,
    },
    #[error("invalid setting: {0}")]
    InvalidSetting(&'static str),
}

#[derive(Debug, Clone)]
struct DepartmentMatcher {
    label: String,
    pattern: Regex,
}

/// Compiled form of an [`ExtractionConfig`]; build once and reuse.
#[derive(Debug, Clone)]
pub struct FieldExtractor {
    reg_no: Regex,
    departments: Vec<DepartmentMatcher>,
    triggers: Option<Regex>,
    name_fallback_lines: usize,
    min_name_tokens: usize,
}

impl FieldExtractor {
    pub fn new(config: &ExtractionConfig) -> Result<Self, ExtractorError> {
        if config.min_name_tokens < DEFAULT_MIN_NAME_TOKENS {
            return Err(ExtractorError::InvalidSetting(
                "min_name_tokens must be at least 2",
            ));
        }
        let reg_no = case_insensitive(&config.reg_no_pattern, "reg_no")?;

        let mut departments = Vec::with_capacity(config.department_vocabulary.len());
        for label in &config.department_vocabulary {
            let label = label.trim();
            if label.is_empty() {
                continue;
            }
            let pattern = case_insensitive(
                &format!(r"\b{}\b", regex::escape(label)),
                "department",
            )?;
            departments.push(DepartmentMatcher {
                label: label.to_string(),
                pattern,
            });
        }

        let trigger_alternatives: Vec<String> = config
            .name_triggers
            .iter()
            .map(|trigger| trigger.trim())
            .filter(|trigger| !trigger.is_empty())
            .map(regex::escape)
            .collect();
        let triggers = if trigger_alternatives.is_empty() {
            None
        } else {
            Some(case_insensitive(&trigger_alternatives.join("|"), "name_trigger")?)
        };

        Ok(Self {
            reg_no,
            departments,
            triggers,
            name_fallback_lines: config.name_fallback_lines,
            min_name_tokens: config.min_name_tokens,
        })
    }

    pub fn extract(&self, text: &RawText) -> ExtractedClaim {
        let joined = text.joined();
        ExtractedClaim {
            reg_no: self.extract_reg_no(&joined),
            name: self.extract_name(text.lines()),
            department: self.extract_department(&joined),
        }
    }

    fn extract_reg_no(&self, joined: &str) -> Option<String> {
        let captures = self.reg_no.captures(joined)?;
        let code = captures.get(1).or_else(|| captures.get(0))?;
        Some(code.as_str().to_uppercase())
    }

    fn extract_department(&self, joined: &str) -> Option<String> {
        self.departments
            .iter()
            .find(|department| department.pattern.is_match(joined))
            .map(|department| department.label.clone())
    }

    fn extract_name(&self, lines: &[String]) -> Option<String> {
        self.name_after_trigger(lines)
            .or_else(|| self.title_case_name(lines))
    }

    fn name_after_trigger(&self, lines: &[String]) -> Option<String> {
        let triggers = self.triggers.as_ref()?;
        lines
            .iter()
            .filter(|line| triggers.is_match(line))
            .find_map(|line| {
                let stripped = triggers.replace_all(line, "");
                let candidate = stripped.trim_matches(NAME_TRIM_CHARS).trim();
                self.has_enough_tokens(candidate)
                    .then(|| candidate.to_string())
            })
    }

    fn title_case_name(&self, lines: &[String]) -> Option<String> {
        lines
            .iter()
            .take(self.name_fallback_lines)
            .find(|line| self.has_enough_tokens(line) && is_title_cased(line))
            .cloned()
    }

    fn has_enough_tokens(&self, candidate: &str) -> bool {
        candidate.split_whitespace().count() >= self.min_name_tokens
    }
}

impl Default for FieldExtractor {
    fn default() -> Self {
        DEFAULT_EXTRACTOR.clone()
    }
}

static DEFAULT_EXTRACTOR: LazyLock<FieldExtractor> = LazyLock::new(|| {
    FieldExtractor::new(&ExtractionConfig::default())
        .expect("built-in extraction rules must compile")
});

/// Extracts a claim with the built-in rules.
pub fn extract(text: &RawText) -> ExtractedClaim {
    DEFAULT_EXTRACTOR.extract(text)
}

fn case_insensitive(pattern: &str, field: &'static str) -> Result<Regex, ExtractorError> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|source| ExtractorError::InvalidPattern { field, source })
}

/// True when the line equals its own title-cased form: the first cased
/// character of every run is upper case, the rest lower case. Digits,
/// punctuation and spaces end a run.
fn is_title_cased(line: &str) -> bool {
    let mut previous_cased = false;
    let mut titled = String::with_capacity(line.len());
    for ch in line.chars() {
        let cased = ch.is_uppercase() || ch.is_lowercase();
        if cased && previous_cased {
            titled.extend(ch.to_lowercase());
        } else if cased {
            titled.extend(ch.to_uppercase());
        } else {
            titled.push(ch);
        }
        previous_cased = cased;
    }
    titled == line
}
