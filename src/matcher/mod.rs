// Mon Feb 2 2026 - Alex

pub mod null;

use crate::error::HarnessError;
use bytes::Bytes;
use itertools::Itertools;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Completion codes reported by a matcher call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusCode {
    Success,
    ImageSizeNotSupported,
    TemplateTypeNotSupported,
    FailedToExtract,
    FailedToSearch,
    FailedToParseInput,
    InsufficientResources,
    Vendor,
}

impl StatusCode {
    pub fn value(self) -> u8 {
        match self {
            StatusCode::Success => 0,
            StatusCode::ImageSizeNotSupported => 1,
            StatusCode::TemplateTypeNotSupported => 2,
            StatusCode::FailedToExtract => 3,
            StatusCode::FailedToSearch => 4,
            StatusCode::FailedToParseInput => 5,
            StatusCode::InsufficientResources => 6,
            StatusCode::Vendor => 7,
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StatusCode::Success => "Success",
            StatusCode::ImageSizeNotSupported => "Image size not supported",
            StatusCode::TemplateTypeNotSupported => "Template type not supported",
            StatusCode::FailedToExtract => "Failed to extract",
            StatusCode::FailedToSearch => "Failed to search",
            StatusCode::FailedToParseInput => "Failed to parse input",
            StatusCode::InsufficientResources => "Insufficient resources",
            StatusCode::Vendor => "Vendor-defined",
        };
        write!(f, "{}", s)
    }
}

/// Completion status of one matcher call.
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnStatus {
    pub code: StatusCode,
    pub info: String,
}

impl ReturnStatus {
    pub fn ok() -> Self {
        Self {
            code: StatusCode::Success,
            info: String::new(),
        }
    }

    pub fn new(code: StatusCode, info: impl Into<String>) -> Self {
        Self {
            code,
            info: info.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == StatusCode::Success
    }
}

impl fmt::Display for ReturnStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Code: {} Info: '{}'", self.code, self.info)
    }
}

/// Class of search imagery driven through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputClass {
    Capture,
    Latent,
}

impl InputClass {
    /// Combined stage one + stage two budget for one search identifier.
    /// The matcher owns this bound; the harness only enforces per-call budgets.
    pub fn combined_budget(self) -> Duration {
        match self {
            InputClass::Capture => Duration::from_secs(60),
            InputClass::Latent => Duration::from_secs(300),
        }
    }
}

impl FromStr for InputClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "capture" => Ok(InputClass::Capture),
            "latent" => Ok(InputClass::Latent),
            other => Err(format!("unknown input class: {}", other)),
        }
    }
}

impl fmt::Display for InputClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputClass::Capture => write!(f, "Capture"),
            InputClass::Latent => write!(f, "Latent"),
        }
    }
}

/// One proposed match: enrolled template ID plus similarity score.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub template_id: String,
    pub similarity: f64,
}

impl Candidate {
    pub fn new(template_id: impl Into<String>, similarity: f64) -> Self {
        Self {
            template_id: template_id.into(),
            similarity,
        }
    }
}

pub const MAX_CANDIDATES: usize = 100;

/// Stable descending sort by similarity, capped at 100 entries.
/// Applied to every list a matcher hands back, misbehaving or not.
pub fn normalize_candidates(candidates: &mut Vec<Candidate>) {
    candidates.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    candidates.truncate(MAX_CANDIDATES);
}

/// `id,score;id,score;...` for the stage two logsheet.
pub fn serialize_candidates(candidates: &[Candidate]) -> String {
    candidates
        .iter()
        .map(|c| format!("{},{}", c.template_id, c.similarity))
        .join(";")
}

/// One finger's worth of input imagery. Decoding is a collaborator concern;
/// the payload stays opaque here.
#[derive(Debug, Clone)]
pub struct FingerImage {
    /// Quality value; 254 means not calculated.
    pub quality: u8,
    pub data: Bytes,
}

/// Seam for finger-record parsing: one record payload becomes the image set
/// handed to the matcher.
pub fn finger_images_from_record(data: &Bytes) -> Vec<FingerImage> {
    if data.is_empty() {
        return Vec::new();
    }
    vec![FingerImage {
        quality: 254,
        data: data.clone(),
    }]
}

#[derive(Debug, Clone)]
pub struct MatcherIdentity {
    pub identifier: String,
    pub revision: u32,
    pub contact: String,
}

/// The matcher under test. Implementations are statically linked and chosen
/// by name at startup; every method may be called from multiple processes.
///
/// Per-item operations (`make_*_template`, `identify_stage_one`,
/// `identify_stage_two`) must not multithread: the harness calls them from
/// several worker processes on the same machine.
pub trait Matcher: Send + Sync {
    /// Must return immediately.
    fn identity(&self) -> MatcherIdentity;

    fn init_enrollment_templating(&self, config_dir: &Path) -> ReturnStatus;

    fn make_enrollment_template(
        &self,
        standard: &[FingerImage],
        proprietary: &[Bytes],
    ) -> (ReturnStatus, Bytes);

    /// Splits the enrollment set across `node_count` partitions under
    /// `enroll_dir`. Returns `InsufficientResources` when the node or memory
    /// budget is too small; all implementations must support node_count <= 5.
    fn finalize_enrollment(
        &self,
        config_dir: &Path,
        enroll_dir: &Path,
        node_count: u32,
        node_memory_kib: u64,
        templates: &Path,
    ) -> ReturnStatus;

    fn init_search_templating(&self, config_dir: &Path, class: InputClass) -> ReturnStatus;

    fn make_search_template(
        &self,
        standard: &[FingerImage],
        proprietary: &[Bytes],
    ) -> (ReturnStatus, Bytes);

    fn init_identification_stage_one(
        &self,
        config_dir: &Path,
        enroll_dir: &Path,
        class: InputClass,
        node: u32,
    ) -> ReturnStatus;

    /// Searches one template against this node's partition, writing whatever
    /// evidence stage two will need into `output_dir`.
    fn identify_stage_one(
        &self,
        search_id: &str,
        template: &[u8],
        output_dir: &Path,
    ) -> ReturnStatus;

    fn init_identification_stage_two(
        &self,
        config_dir: &Path,
        enroll_dir: &Path,
        class: InputClass,
    ) -> ReturnStatus;

    /// Turns the merged stage one evidence for `search_id` into a ranked
    /// candidate list (<= 100 entries, descending similarity).
    fn identify_stage_two(&self, search_id: &str, stage_one_dir: &Path)
        -> (ReturnStatus, Vec<Candidate>);
}

type MatcherFactory = fn() -> Arc<dyn Matcher>;

static MATCHERS: Lazy<HashMap<&'static str, MatcherFactory>> = Lazy::new(|| {
    let mut m: HashMap<&'static str, MatcherFactory> = HashMap::new();
    m.insert("null", || Arc::new(null::NullMatcher::new()));
    m
});

/// Look up a statically-linked matcher implementation by name.
pub fn for_name(name: &str) -> Result<Arc<dyn Matcher>, HarnessError> {
    match MATCHERS.get(name) {
        Some(factory) => Ok(factory()),
        None => Err(HarnessError::Config(format!(
            "unknown matcher \"{}\" (available: {})",
            name,
            MATCHERS.keys().sorted().join(", ")
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_values() {
        assert_eq!(StatusCode::Success.value(), 0);
        assert_eq!(StatusCode::InsufficientResources.value(), 6);
        assert_eq!(StatusCode::Vendor.value(), 7);
    }

    #[test]
    fn test_input_class_parse() {
        assert_eq!("latent".parse::<InputClass>().unwrap(), InputClass::Latent);
        assert_eq!("CAPTURE".parse::<InputClass>().unwrap(), InputClass::Capture);
        assert!("rolled".parse::<InputClass>().is_err());
    }

    #[test]
    fn test_combined_budget_by_class() {
        assert!(InputClass::Latent.combined_budget() > InputClass::Capture.combined_budget());
    }

    #[test]
    fn test_normalize_sorts_descending_and_caps() {
        let mut candidates: Vec<Candidate> = (0..250)
            .map(|i| Candidate::new(format!("T{:03}", i), (i % 97) as f64))
            .collect();
        normalize_candidates(&mut candidates);

        assert_eq!(candidates.len(), MAX_CANDIDATES);
        assert!(candidates
            .windows(2)
            .all(|w| w[0].similarity >= w[1].similarity));
    }

    #[test]
    fn test_normalize_is_stable_on_ties() {
        let mut candidates = vec![
            Candidate::new("B", 5.0),
            Candidate::new("A", 5.0),
            Candidate::new("C", 9.0),
        ];
        normalize_candidates(&mut candidates);

        assert_eq!(candidates[0].template_id, "C");
        assert_eq!(candidates[1].template_id, "B");
        assert_eq!(candidates[2].template_id, "A");
    }

    #[test]
    fn test_serialize_candidates() {
        let candidates = vec![Candidate::new("A", 9.0), Candidate::new("B", 3.5)];
        assert_eq!(serialize_candidates(&candidates), "A,9;B,3.5");
        assert_eq!(serialize_candidates(&[]), "");
    }

    #[test]
    fn test_registry_lookup() {
        assert!(for_name("null").is_ok());
        assert!(for_name("missing").is_err());
    }
}
