// Mon Feb 2 2026 - Alex

use crate::error::HarnessError;
use crate::store::RecordStore;
use crate::utils::fs::{copy_dir_contents, remove_dir_best_effort};
use crate::utils::logging::scoped_timer;
use ahash::AHashSet;
use indexmap::IndexMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Which nodes contributed stage one output for one search identifier.
///
/// A missing contribution is not an error by itself: a node may legitimately
/// not have searched an identifier. It is recorded here and warned about so
/// a silently-failed node is observable instead of swallowed.
#[derive(Debug, Clone, Default)]
pub struct MergeEntry {
    pub contributing: Vec<u32>,
    pub missing: Vec<u32>,
}

#[derive(Debug, Default)]
pub struct MergeReport {
    pub searches: IndexMap<String, MergeEntry>,
}

impl MergeReport {
    pub fn merged_count(&self) -> usize {
        self.searches.len()
    }

    pub fn searches_with_missing_contributions(&self) -> usize {
        self.searches.values().filter(|e| !e.missing.is_empty()).count()
    }
}

/// Combines per-node stage one trees (`<root>/<node>/<search>/`) into one
/// tree per search identifier (`<root>/<search>/`).
///
/// Runs single-threaded, strictly after the all-nodes barrier. The merged
/// view is built in a `.merged` sibling, then the per-node trees are removed
/// and the sibling renamed over the root, which becomes the canonical stage
/// one output.
pub struct ResultMerger {
    node_count: u32,
}

impl ResultMerger {
    pub fn new(node_count: u32) -> Self {
        Self { node_count }
    }

    pub fn merge(
        &self,
        stage_one_root: &Path,
        search_store: &mut dyn RecordStore,
    ) -> Result<MergeReport, HarnessError> {
        let _timer = scoped_timer("stage one merge");
        let merge_root = merge_sibling(stage_one_root);
        fs::create_dir(&merge_root).map_err(|e| {
            HarnessError::Storage(format!(
                "could not create merge dir {}: {}",
                merge_root.display(),
                e
            ))
        })?;

        match self.build_merged_view(stage_one_root, &merge_root, search_store) {
            Ok(report) => {
                // The merged tree replaces the per-node trees as the
                // canonical stage one output
                fs::remove_dir_all(stage_one_root)?;
                fs::rename(&merge_root, stage_one_root)?;
                Ok(report)
            }
            Err(e) => {
                remove_dir_best_effort(&merge_root);
                remove_dir_best_effort(stage_one_root);
                Err(e)
            }
        }
    }

    fn build_merged_view(
        &self,
        stage_one_root: &Path,
        merge_root: &Path,
        search_store: &mut dyn RecordStore,
    ) -> Result<MergeReport, HarnessError> {
        let mut report = MergeReport::default();
        let mut seen: AHashSet<String> = AHashSet::new();

        while let Some(key) = search_store.sequence_key()? {
            if !seen.insert(key.clone()) {
                return Err(HarnessError::Storage(format!(
                    "duplicate search identifier \"{}\" in {}",
                    key,
                    search_store.pathname().display()
                )));
            }

            let merged_dir = merge_root.join(&key);
            fs::create_dir_all(&merged_dir)?;

            let mut entry = MergeEntry::default();
            for node in 0..self.node_count {
                let node_dir = stage_one_root.join(node.to_string()).join(&key);
                if node_dir.is_dir() {
                    copy_dir_contents(&node_dir, &merged_dir)?;
                    entry.contributing.push(node);
                } else {
                    log::warn!(
                        "no stage one contribution for search {} from node {}",
                        key,
                        node
                    );
                    entry.missing.push(node);
                }
            }
            report.searches.insert(key, entry);
        }

        Ok(report)
    }
}

fn merge_sibling(stage_one_root: &Path) -> PathBuf {
    let mut name = stage_one_root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(".merged");
    stage_one_root.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FileRecordStore;
    use tempfile::TempDir;

    fn search_store(path: &Path, keys: &[&str]) {
        let mut store = FileRecordStore::create(path).unwrap();
        for key in keys {
            store.insert(key, key.as_bytes()).unwrap();
        }
    }

    fn node_output(root: &Path, node: u32, key: &str, file: &str) {
        let dir = root.join(node.to_string()).join(key);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(file), file.as_bytes()).unwrap();
    }

    #[test]
    fn test_merge_combines_node_contributions() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("stage-one");
        fs::create_dir(&root).unwrap();

        // Node 0 searched only S1; node 1 searched S1 and S2
        node_output(&root, 0, "S1", "S1-0");
        node_output(&root, 1, "S1", "S1-1");
        node_output(&root, 1, "S2", "S2-1");

        let store_path = dir.path().join("searches");
        search_store(&store_path, &["S1", "S2"]);
        let mut store = FileRecordStore::open(&store_path).unwrap();

        let report = ResultMerger::new(2).merge(&root, &mut store).unwrap();

        assert_eq!(report.merged_count(), 2);
        assert!(root.join("S1").join("S1-0").is_file());
        assert!(root.join("S1").join("S1-1").is_file());
        assert!(root.join("S2").join("S2-1").is_file());
        assert!(!root.join("0").exists());
        assert!(!root.join("1").exists());

        let s1 = &report.searches["S1"];
        assert_eq!(s1.contributing, vec![0, 1]);
        assert!(s1.missing.is_empty());

        let s2 = &report.searches["S2"];
        assert_eq!(s2.contributing, vec![1]);
        assert_eq!(s2.missing, vec![0]);
        assert_eq!(report.searches_with_missing_contributions(), 1);
    }

    #[test]
    fn test_merge_only_covers_searched_identifiers() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("stage-one");
        fs::create_dir(&root).unwrap();
        node_output(&root, 0, "S1", "S1-0");
        // Stray output for an identifier outside the search set
        node_output(&root, 0, "SX", "SX-0");

        let store_path = dir.path().join("searches");
        search_store(&store_path, &["S1"]);
        let mut store = FileRecordStore::open(&store_path).unwrap();

        let report = ResultMerger::new(1).merge(&root, &mut store).unwrap();
        assert_eq!(report.merged_count(), 1);
        assert!(root.join("S1").is_dir());
        assert!(!root.join("SX").exists());
    }

    #[test]
    fn test_merge_failure_cleans_up_both_trees() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("stage-one");
        fs::create_dir(&root).unwrap();
        node_output(&root, 0, "S1", "S1-0");

        let store_path = dir.path().join("searches");
        // Duplicate identifiers make the merge fail partway through
        let mut store = FileRecordStore::create(&store_path).unwrap();
        store.insert("S1", b"x").unwrap();
        drop(store);
        let index = store_path.join("index.jsonl");
        let mut text = fs::read_to_string(&index).unwrap();
        text.push_str(&text.clone());
        fs::write(&index, text).unwrap();

        let mut store = FileRecordStore::open(&store_path).unwrap();
        let result = ResultMerger::new(1).merge(&root, &mut store);

        assert!(result.is_err());
        assert!(!root.exists());
        assert!(!merge_sibling(&root).exists());
    }
}
