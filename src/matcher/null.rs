// Mon Feb 2 2026 - Alex

use crate::matcher::{
    Candidate, FingerImage, InputClass, Matcher, MatcherIdentity, ReturnStatus, StatusCode,
    MAX_CANDIDATES,
};
use crate::store::{FileRecordStore, RecordStore};
use bytes::Bytes;
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::hash::{BuildHasher, Hasher};
use std::path::Path;

fn default_enrollment_length() -> usize {
    1024
}

fn default_search_length() -> usize {
    512
}

fn default_maximum_score() -> u64 {
    100
}

#[derive(Debug, Clone, Deserialize)]
struct NullConfig {
    #[serde(default = "default_enrollment_length")]
    enrollment_template_length: usize,
    #[serde(default = "default_search_length")]
    search_template_length: usize,
    #[serde(default)]
    minimum_score: u64,
    #[serde(default = "default_maximum_score")]
    maximum_score: u64,
}

#[derive(Default)]
struct Inner {
    config: Option<NullConfig>,
    shard: Option<FileRecordStore>,
}

/// Reference matcher: produces synthetic templates and hash-derived scores.
/// Fully deterministic, so two identical pipeline runs agree byte for byte.
pub struct NullMatcher {
    inner: RwLock<Inner>,
}

const STAGE_ONE_CANDIDATES: usize = 5;

fn stable_hash(parts: &[&[u8]]) -> u64 {
    let mut hasher = ahash::RandomState::with_seeds(7, 11, 13, 17).build_hasher();
    for part in parts {
        hasher.write(part);
    }
    hasher.finish()
}

impl NullMatcher {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    fn config_file(&self, config_dir: &Path) -> std::path::PathBuf {
        let id = self.identity();
        config_dir.join(format!("{}-{}.json", id.identifier, id.revision))
    }

    fn load_configuration(&self, config_dir: &Path) -> Result<(), ReturnStatus> {
        let path = self.config_file(config_dir);
        let text = fs::read_to_string(&path).map_err(|e| {
            ReturnStatus::new(
                StatusCode::Vendor,
                format!("could not load config ({}): {}", path.display(), e),
            )
        })?;
        let config: NullConfig = serde_json::from_str(&text).map_err(|e| {
            ReturnStatus::new(
                StatusCode::Vendor,
                format!("could not parse config ({}): {}", path.display(), e),
            )
        })?;
        self.inner.write().config = Some(config);
        Ok(())
    }

    fn make_template(&self, standard: &[FingerImage], length: usize) -> Bytes {
        let mut seed_parts: Vec<&[u8]> = Vec::with_capacity(standard.len());
        for image in standard {
            seed_parts.push(image.data.as_ref());
        }
        let seed = stable_hash(&seed_parts);

        let total = length * standard.len();
        let mut out = Vec::with_capacity(total);
        for i in 0..total {
            out.push(((seed >> ((i % 8) * 8)) as u8).wrapping_add(i as u8));
        }
        Bytes::from(out)
    }
}

impl Default for NullMatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Matcher for NullMatcher {
    fn identity(&self) -> MatcherIdentity {
        MatcherIdentity {
            identifier: "NULLIMPL".to_string(),
            revision: 1,
            contact: "validation@ident-harness.invalid".to_string(),
        }
    }

    fn init_enrollment_templating(&self, config_dir: &Path) -> ReturnStatus {
        match self.load_configuration(config_dir) {
            Ok(()) => ReturnStatus::ok(),
            Err(status) => status,
        }
    }

    fn make_enrollment_template(
        &self,
        standard: &[FingerImage],
        _proprietary: &[Bytes],
    ) -> (ReturnStatus, Bytes) {
        if standard.is_empty() {
            return (
                ReturnStatus::new(StatusCode::FailedToExtract, "no finger images"),
                Bytes::new(),
            );
        }
        let length = match self.inner.read().config.as_ref() {
            Some(config) => config.enrollment_template_length,
            None => {
                return (
                    ReturnStatus::new(StatusCode::Vendor, "not initialized"),
                    Bytes::new(),
                )
            }
        };
        (ReturnStatus::ok(), self.make_template(standard, length))
    }

    fn finalize_enrollment(
        &self,
        _config_dir: &Path,
        enroll_dir: &Path,
        node_count: u32,
        node_memory_kib: u64,
        templates: &Path,
    ) -> ReturnStatus {
        const TEN_GIB_KIB: u64 = 10 * 1024 * 1024;
        if node_memory_kib < TEN_GIB_KIB {
            return ReturnStatus::new(StatusCode::InsufficientResources, "< 10 GiB");
        }
        if node_count == 0 {
            return ReturnStatus::new(StatusCode::InsufficientResources, "0 nodes");
        }

        let mut source = match FileRecordStore::open(templates) {
            Ok(s) => s,
            Err(e) => {
                return ReturnStatus::new(
                    StatusCode::Vendor,
                    format!("could not open enrollment templates: {}", e),
                )
            }
        };

        // Contiguous per-node partitions, ceil(count / nodes) each
        let per_node = (source.count() + node_count as u64 - 1) / node_count.max(1) as u64;
        for n in 0..node_count {
            let mut shard = match FileRecordStore::create(&enroll_dir.join(n.to_string())) {
                Ok(s) => s,
                Err(e) => {
                    return ReturnStatus::new(
                        StatusCode::Vendor,
                        format!("could not create enrollment partition: {}", e),
                    )
                }
            };
            for _ in 0..per_node {
                match source.sequence() {
                    Ok(Some(record)) => {
                        if let Err(e) = shard.insert(&record.key, &record.data) {
                            return ReturnStatus::new(
                                StatusCode::Vendor,
                                format!("could not fill enrollment partition: {}", e),
                            );
                        }
                    }
                    Ok(None) => break,
                    Err(e) => return ReturnStatus::new(StatusCode::Vendor, e.to_string()),
                }
            }
        }

        ReturnStatus::ok()
    }

    fn init_search_templating(&self, config_dir: &Path, _class: InputClass) -> ReturnStatus {
        match self.load_configuration(config_dir) {
            Ok(()) => ReturnStatus::ok(),
            Err(status) => status,
        }
    }

    fn make_search_template(
        &self,
        standard: &[FingerImage],
        _proprietary: &[Bytes],
    ) -> (ReturnStatus, Bytes) {
        if standard.is_empty() {
            return (
                ReturnStatus::new(StatusCode::FailedToExtract, "no finger images"),
                Bytes::new(),
            );
        }
        let length = match self.inner.read().config.as_ref() {
            Some(config) => config.search_template_length,
            None => {
                return (
                    ReturnStatus::new(StatusCode::Vendor, "not initialized"),
                    Bytes::new(),
                )
            }
        };
        (ReturnStatus::ok(), self.make_template(standard, length))
    }

    fn init_identification_stage_one(
        &self,
        config_dir: &Path,
        enroll_dir: &Path,
        _class: InputClass,
        node: u32,
    ) -> ReturnStatus {
        if let Err(status) = self.load_configuration(config_dir) {
            return status;
        }
        match FileRecordStore::open(&enroll_dir.join(node.to_string())) {
            Ok(shard) => {
                self.inner.write().shard = Some(shard);
                ReturnStatus::ok()
            }
            Err(e) => ReturnStatus::new(
                StatusCode::Vendor,
                format!("could not open enrollment partition {}: {}", node, e),
            ),
        }
    }

    fn identify_stage_one(
        &self,
        search_id: &str,
        _template: &[u8],
        output_dir: &Path,
    ) -> ReturnStatus {
        let mut inner = self.inner.write();
        let (score_min, score_max) = match inner.config.as_ref() {
            Some(config) => (config.minimum_score, config.maximum_score),
            None => return ReturnStatus::new(StatusCode::Vendor, "not initialized"),
        };
        let shard = match inner.shard.as_mut() {
            Some(shard) => shard,
            None => return ReturnStatus::new(StatusCode::Vendor, "no enrollment partition open"),
        };
        if shard.count() == 0 {
            return ReturnStatus::new(StatusCode::FailedToSearch, "empty enrollment partition");
        }

        // Next few enrolled IDs, wrapping to the start on exhaustion
        let mut candidates: BTreeMap<String, u64> = BTreeMap::new();
        for _ in 0..STAGE_ONE_CANDIDATES {
            let key = match shard.sequence_key() {
                Ok(Some(key)) => key,
                Ok(None) => match shard.sequence_key() {
                    Ok(Some(key)) => key,
                    Ok(None) => break,
                    Err(e) => return ReturnStatus::new(StatusCode::Vendor, e.to_string()),
                },
                Err(e) => return ReturnStatus::new(StatusCode::Vendor, e.to_string()),
            };

            let span = score_max.saturating_sub(score_min).max(1);
            let score = score_min + stable_hash(&[search_id.as_bytes(), key.as_bytes()]) % span;
            candidates.insert(key, score);
        }

        let shard_name = shard
            .pathname()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "0".to_string());

        let mut output = String::new();
        for (key, score) in &candidates {
            output.push_str(&format!("{},{}\n", key, score));
        }

        let path = output_dir.join(format!("{}-{}", search_id, shard_name));
        match fs::write(&path, output) {
            Ok(()) => ReturnStatus::ok(),
            Err(e) => ReturnStatus::new(
                StatusCode::Vendor,
                format!("could not write evidence ({}): {}", path.display(), e),
            ),
        }
    }

    fn init_identification_stage_two(
        &self,
        _config_dir: &Path,
        _enroll_dir: &Path,
        _class: InputClass,
    ) -> ReturnStatus {
        ReturnStatus::ok()
    }

    fn identify_stage_two(
        &self,
        search_id: &str,
        stage_one_dir: &Path,
    ) -> (ReturnStatus, Vec<Candidate>) {
        let entries = match fs::read_dir(stage_one_dir) {
            Ok(entries) => entries,
            Err(e) => {
                return (
                    ReturnStatus::new(
                        StatusCode::Vendor,
                        format!(
                            "could not open stage one data ({}): {}",
                            stage_one_dir.display(),
                            e
                        ),
                    ),
                    Vec::new(),
                )
            }
        };

        // Every file in the merged directory is a CSV we wrote at stage one
        let mut candidates = Vec::new();
        let mut paths: Vec<_> = entries.filter_map(|e| e.ok().map(|e| e.path())).collect();
        paths.sort();
        for path in paths {
            let text = match fs::read_to_string(&path) {
                Ok(text) => text,
                Err(e) => {
                    return (
                        ReturnStatus::new(StatusCode::Vendor, e.to_string()),
                        Vec::new(),
                    )
                }
            };
            for line in text.lines() {
                let mut fields = line.splitn(2, ',');
                let (id, score) = match (fields.next(), fields.next()) {
                    (Some(id), Some(score)) => (id, score),
                    _ => {
                        return (
                            ReturnStatus::new(
                                StatusCode::Vendor,
                                format!("malformed stage one data for {}", search_id),
                            ),
                            Vec::new(),
                        )
                    }
                };
                let similarity: f64 = match score.parse() {
                    Ok(s) => s,
                    Err(_) => {
                        return (
                            ReturnStatus::new(
                                StatusCode::Vendor,
                                format!("malformed stage one score for {}", search_id),
                            ),
                            Vec::new(),
                        )
                    }
                };
                candidates.push(Candidate::new(id, similarity));
            }
        }

        candidates.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates.truncate(MAX_CANDIDATES);

        (ReturnStatus::ok(), candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_config(dir: &Path) {
        fs::write(
            dir.join("NULLIMPL-1.json"),
            r#"{"enrollment_template_length": 64, "search_template_length": 32}"#,
        )
        .unwrap();
    }

    fn template_store(path: &Path, count: usize) {
        let mut store = FileRecordStore::create(path).unwrap();
        for i in 0..count {
            let key = format!("E{:04}", i);
            store.insert(&key, key.as_bytes()).unwrap();
        }
    }

    #[test]
    fn test_templates_need_init() {
        let matcher = NullMatcher::new();
        let images = vec![FingerImage {
            quality: 254,
            data: Bytes::from_static(b"img"),
        }];
        let (status, template) = matcher.make_enrollment_template(&images, &[]);
        assert_eq!(status.code, StatusCode::Vendor);
        assert!(template.is_empty());
    }

    #[test]
    fn test_templates_are_deterministic() {
        let dir = TempDir::new().unwrap();
        write_config(dir.path());

        let matcher = NullMatcher::new();
        assert!(matcher.init_enrollment_templating(dir.path()).is_success());

        let images = vec![FingerImage {
            quality: 254,
            data: Bytes::from_static(b"img"),
        }];
        let (_, first) = matcher.make_enrollment_template(&images, &[]);
        let (_, second) = matcher.make_enrollment_template(&images, &[]);
        assert_eq!(first.len(), 64);
        assert_eq!(first, second);
    }

    #[test]
    fn test_finalize_rejects_small_memory() {
        let dir = TempDir::new().unwrap();
        let templates = dir.path().join("templates");
        template_store(&templates, 4);

        let matcher = NullMatcher::new();
        let status = matcher.finalize_enrollment(
            dir.path(),
            &dir.path().join("enroll"),
            2,
            1024,
            &templates,
        );
        assert_eq!(status.code, StatusCode::InsufficientResources);
    }

    #[test]
    fn test_finalize_partitions_are_contiguous() {
        let dir = TempDir::new().unwrap();
        let templates = dir.path().join("templates");
        template_store(&templates, 5);
        let enroll = dir.path().join("enroll");

        let matcher = NullMatcher::new();
        let status =
            matcher.finalize_enrollment(dir.path(), &enroll, 2, 16 * 1024 * 1024, &templates);
        assert!(status.is_success(), "{}", status);

        let mut first = FileRecordStore::open(&enroll.join("0")).unwrap();
        let mut second = FileRecordStore::open(&enroll.join("1")).unwrap();
        assert_eq!(first.count(), 3);
        assert_eq!(second.count(), 2);
        assert_eq!(first.sequence_key().unwrap().unwrap(), "E0000");
        assert_eq!(second.sequence_key().unwrap().unwrap(), "E0003");
    }

    #[test]
    fn test_stage_one_then_stage_two() {
        let dir = TempDir::new().unwrap();
        write_config(dir.path());
        let templates = dir.path().join("templates");
        template_store(&templates, 8);
        let enroll = dir.path().join("enroll");

        let matcher = NullMatcher::new();
        assert!(matcher
            .finalize_enrollment(dir.path(), &enroll, 1, 16 * 1024 * 1024, &templates)
            .is_success());
        assert!(matcher
            .init_identification_stage_one(dir.path(), &enroll, InputClass::Capture, 0)
            .is_success());

        let evidence = dir.path().join("evidence");
        fs::create_dir(&evidence).unwrap();
        assert!(matcher
            .identify_stage_one("S1", b"tmpl", &evidence)
            .is_success());

        let (status, candidates) = matcher.identify_stage_two("S1", &evidence);
        assert!(status.is_success());
        assert_eq!(candidates.len(), STAGE_ONE_CANDIDATES);
        assert!(candidates
            .windows(2)
            .all(|w| w[0].similarity >= w[1].similarity));
    }

    #[test]
    fn test_stage_two_rejects_malformed_evidence() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("S1-0"), "not a csv line\n").unwrap();

        let matcher = NullMatcher::new();
        let (status, candidates) = matcher.identify_stage_two("S1", dir.path());
        assert_eq!(status.code, StatusCode::Vendor);
        assert!(candidates.is_empty());
    }
}
