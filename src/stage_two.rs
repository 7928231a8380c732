// Tue Feb 3 2026 - Alex

use crate::config::StageTwoConfig;
use crate::error::HarnessError;
use crate::invoke::TimedInvoker;
use crate::logsheet::{quoted, Logsheet};
use crate::matcher::{self, normalize_candidates, serialize_candidates, Matcher};
use crate::orchestrate::ProcessOrchestrator;
use crate::partition::{advance, plan_partitions};
use crate::store::{FileRecordStore, RecordStore};
use crate::utils::fs::set_readonly;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

/// Per-call budget for one stage two candidate list.
pub const STAGE_TWO_CALL_BUDGET: Duration = Duration::from_secs(5 * 60);
/// Budget for the single stage two initialization call.
pub const STAGE_TWO_INIT_BUDGET: Duration = Duration::from_secs(10 * 60);

pub const STAGE_TWO_LOG_FIELDS: &str =
    "EntryType EntryNum SearchID Time APIState RetCode Candidates RetInfo";

/// Drives the stage two pass: one bounded matcher initialization over the
/// merged enrollment view, then worker processes over a partition of the
/// search set, each producing a ranked candidate list per identifier.
pub struct StageTwoCoordinator {
    config: StageTwoConfig,
    config_path: PathBuf,
}

impl StageTwoCoordinator {
    pub fn new(config: StageTwoConfig, config_path: PathBuf) -> Self {
        Self {
            config,
            config_path,
        }
    }

    pub fn run(&self) -> Result<(), HarnessError> {
        self.config.validate()?;

        let matcher = matcher::for_name(&self.config.matcher)?;
        init_matcher(&matcher, &self.config)?;

        let exe = std::env::current_exe()?;
        let config_path = self.config_path.clone();
        let orchestrator = ProcessOrchestrator::new("stage two workers");
        orchestrator.run_stage(self.config.effective_processes(), |worker| {
            let mut command = Command::new(&exe);
            command
                .arg("stage-two-worker")
                .arg("--config")
                .arg(&config_path)
                .arg("--worker")
                .arg(worker.to_string());
            command
        })
    }
}

fn init_matcher(matcher: &Arc<dyn Matcher>, config: &StageTwoConfig) -> Result<(), HarnessError> {
    let invoker = TimedInvoker::new(STAGE_TWO_INIT_BUDGET);
    let result = {
        let matcher = Arc::clone(matcher);
        let config_dir = config.config_dir.clone();
        let enroll_dir = config.enroll_dir.clone();
        let class = config.input_class;
        invoker.invoke(move || {
            matcher.init_identification_stage_two(&config_dir, &enroll_dir, class)
        })
    };

    match result.output {
        Some(status) if status.is_success() => Ok(()),
        Some(status) => Err(HarnessError::Matcher(format!(
            "stage two initialization failed: {}",
            status
        ))),
        None => Err(HarnessError::Matcher(
            "stage two initialization did not complete".to_string(),
        )),
    }
}

/// Worker process body: one candidate list per search identifier in this
/// worker's partition. No retries; every outcome is logged and the loop
/// moves on.
pub fn run_worker(config: &StageTwoConfig, worker: u32) -> Result<(), HarnessError> {
    let matcher = matcher::for_name(&config.matcher)?;
    init_matcher(&matcher, config)?;

    let mut search_store = FileRecordStore::open(&config.search_store)?;
    let processes = config.effective_processes();
    if processes as u64 > search_store.count() {
        return Err(HarnessError::Config(format!(
            "not enough processes for data ({} processes, and {} searches in {})",
            processes,
            search_store.count(),
            search_store.pathname().display()
        )));
    }

    let partition = *plan_partitions(search_store.count(), processes)
        .get(worker as usize)
        .ok_or_else(|| {
            HarnessError::Config(format!("no partition for worker {} of {}", worker, processes))
        })?;
    advance(&mut search_store, partition.start)?;

    let log_path = config
        .output_dir
        .join(format!("{}{}.log", config.prefix, worker));
    let mut log = Logsheet::create(&log_path, STAGE_TWO_LOG_FIELDS).map_err(|e| {
        HarnessError::Storage(format!("could not create {}: {}", log_path.display(), e))
    })?;

    let invoker = TimedInvoker::new(STAGE_TWO_CALL_BUDGET);

    for _ in 0..partition.count {
        let key = match search_store.sequence_key()? {
            Some(key) => key,
            None => break,
        };

        let data_dir = config.stage_one_root.join(&key);
        if let Err(e) = set_readonly(&data_dir) {
            log::warn!("could not mark {} read-only: {}", data_dir.display(), e);
        }

        let result = {
            let matcher = Arc::clone(&matcher);
            let key = key.clone();
            let dir = data_dir.clone();
            invoker.invoke(move || matcher.identify_stage_two(&key, &dir))
        };

        let mut line = format!("{} {} {} ", key, result.elapsed.as_micros(), result.state.code());
        match result.output {
            Some((status, mut candidates)) => {
                normalize_candidates(&mut candidates);
                line.push_str(&format!(
                    "{} {} {}",
                    status.code.value(),
                    quoted(&serialize_candidates(&candidates)),
                    quoted(&status.info)
                ));
            }
            None => line.push_str("NA [<[]>] [<[]>]"),
        }
        log.append(&line)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StageOneConfig;
    use crate::matcher::InputClass;
    use crate::merge::ResultMerger;
    use crate::stage_one;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn make_store(path: &Path, keys: &[&str]) {
        let mut store = FileRecordStore::create(path).unwrap();
        for key in keys {
            store.insert(key, key.as_bytes()).unwrap();
        }
    }

    /// Build a finalized two-node enrollment plus a merged stage one tree,
    /// driving the worker bodies in-process.
    fn run_stage_one_pipeline(dir: &Path, tag: &str) -> StageOneConfig {
        fs::write(
            dir.join("NULLIMPL-1.json"),
            r#"{"enrollment_template_length": 64, "search_template_length": 32}"#,
        )
        .unwrap();

        let templates = dir.join(format!("templates-{}", tag));
        make_store(&templates, &["E1", "E2", "E3", "E4", "E5", "E6"]);

        let enroll = dir.join(format!("enroll-{}", tag));
        let matcher = matcher::for_name("null").unwrap();
        let status = matcher.finalize_enrollment(dir, &enroll, 2, 16 * 1024 * 1024, &templates);
        assert!(status.is_success(), "{}", status);

        let searches = dir.join(format!("searches-{}", tag));
        make_store(&searches, &["S1", "S2", "S3", "S4"]);

        let root = dir.join(format!("stage-one-{}", tag));
        fs::create_dir(&root).unwrap();
        for node in 0..2 {
            fs::create_dir(root.join(node.to_string())).unwrap();
        }

        let config = StageOneConfig {
            matcher: "null".to_string(),
            config_dir: dir.to_path_buf(),
            enroll_dir: enroll,
            stage_one_root: root,
            search_store: searches,
            input_class: InputClass::Capture,
            nodes: 2,
            processes: 1,
            prefix: format!("{}-s1-", tag),
            output_dir: dir.join(format!("logs-{}", tag)),
        };
        fs::create_dir(&config.output_dir).unwrap();

        for node in 0..2 {
            stage_one::run_worker(&config, node, 0).unwrap();
        }
        let mut search_store = FileRecordStore::open(&config.search_store).unwrap();
        let report = ResultMerger::new(2)
            .merge(&config.stage_one_root, &mut search_store)
            .unwrap();
        assert_eq!(report.merged_count(), 4);

        config
    }

    fn stage_two_config(stage_one: &StageOneConfig, tag: &str) -> StageTwoConfig {
        StageTwoConfig {
            matcher: "null".to_string(),
            config_dir: stage_one.config_dir.clone(),
            enroll_dir: stage_one.enroll_dir.clone(),
            stage_one_root: stage_one.stage_one_root.clone(),
            search_store: stage_one.search_store.clone(),
            input_class: InputClass::Capture,
            processes: 1,
            prefix: format!("{}-s2-", tag),
            output_dir: stage_one.output_dir.clone(),
        }
    }

    fn candidates_field(line: &str) -> &str {
        let start = line.find("[<[").unwrap();
        let end = line.find("]>]").unwrap();
        &line[start + 3..end]
    }

    #[test]
    fn test_full_pipeline_yields_ranked_lists() {
        let dir = TempDir::new().unwrap();
        let stage_one_config = run_stage_one_pipeline(dir.path(), "a");
        let config = stage_two_config(&stage_one_config, "a");

        run_worker(&config, 0).unwrap();

        let log = fs::read_to_string(config.output_dir.join("a-s2-0.log")).unwrap();
        let lines: Vec<&str> = log.lines().collect();
        assert_eq!(lines[0], format!("# {}", STAGE_TWO_LOG_FIELDS));
        assert_eq!(lines.len(), 5);

        for line in &lines[1..] {
            let fields: Vec<&str> = line.split_whitespace().collect();
            assert_eq!(fields[4], "0", "APIState in {}", line);
            assert_eq!(fields[5], "0", "RetCode in {}", line);

            // Candidate list is non-empty, capped, sorted descending
            let serialized = candidates_field(line);
            let scores: Vec<f64> = serialized
                .split(';')
                .map(|c| c.split(',').nth(1).unwrap().parse().unwrap())
                .collect();
            assert!(!scores.is_empty());
            assert!(scores.len() <= 100);
            assert!(scores.windows(2).all(|w| w[0] >= w[1]));
        }
    }

    #[test]
    fn test_pipeline_is_deterministic() {
        let dir = TempDir::new().unwrap();
        let first = run_stage_one_pipeline(dir.path(), "b1");
        let second = run_stage_one_pipeline(dir.path(), "b2");

        // Byte-identical merged trees
        assert_eq!(
            tree_contents(&first.stage_one_root),
            tree_contents(&second.stage_one_root)
        );

        // Identical candidate lists
        run_worker(&stage_two_config(&first, "b1"), 0).unwrap();
        run_worker(&stage_two_config(&second, "b2"), 0).unwrap();
        let first_log = fs::read_to_string(first.output_dir.join("b1-s2-0.log")).unwrap();
        let second_log = fs::read_to_string(second.output_dir.join("b2-s2-0.log")).unwrap();
        let lists = |log: &str| -> Vec<String> {
            log.lines()
                .skip(1)
                .map(|l| candidates_field(l).to_string())
                .collect()
        };
        assert_eq!(lists(&first_log), lists(&second_log));
    }

    fn tree_contents(root: &Path) -> Vec<(String, Vec<u8>)> {
        let mut out = Vec::new();
        let mut stack = vec![root.to_path_buf()];
        while let Some(dir) = stack.pop() {
            let mut entries: Vec<_> = fs::read_dir(&dir)
                .unwrap()
                .map(|e| e.unwrap().path())
                .collect();
            entries.sort();
            for path in entries {
                let relative = path
                    .strip_prefix(root)
                    .unwrap()
                    .to_string_lossy()
                    .into_owned();
                if path.is_dir() {
                    stack.push(path);
                } else {
                    out.push((relative, fs::read(&path).unwrap()));
                }
            }
        }
        out.sort();
        out
    }
}
