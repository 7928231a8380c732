// Tue Feb 3 2026 - Alex

use crate::config::StageOneConfig;
use crate::error::HarnessError;
use crate::invoke::TimedInvoker;
use crate::logsheet::{quoted, Logsheet};
use crate::matcher::{self, Matcher};
use crate::merge::{MergeReport, ResultMerger};
use crate::orchestrate::ProcessOrchestrator;
use crate::partition::{advance, plan_partitions};
use crate::store::{FileRecordStore, RecordStore};
use crate::utils::fs::sum_directory_usage;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

/// Per-call budget for one stage one search.
pub const STAGE_ONE_CALL_BUDGET: Duration = Duration::from_secs(5 * 60);
/// Budget for node-scoped matcher initialization.
pub const STAGE_ONE_INIT_BUDGET: Duration = Duration::from_secs(5 * 60);

pub const STAGE_ONE_LOG_FIELDS: &str =
    "EntryType EntryNum SearchID Time Size APIState RetCode RetInfo";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    Init,
    PartitionAssigned,
    PerNodeDispatch,
    AllNodesDone,
    Merged,
    Terminal,
}

/// Drives the distributed stage one scan: one process per node, each node
/// fanning out worker processes over a partition of the search set, then a
/// single-threaded merge of the per-node output trees.
pub struct StageOneCoordinator {
    config: StageOneConfig,
    config_path: PathBuf,
    state: StageState,
}

impl StageOneCoordinator {
    pub fn new(config: StageOneConfig, config_path: PathBuf) -> Self {
        Self {
            config,
            config_path,
            state: StageState::Init,
        }
    }

    pub fn state(&self) -> StageState {
        self.state
    }

    pub fn run(&mut self) -> Result<MergeReport, HarnessError> {
        self.state = StageState::Init;
        self.config.validate()?;

        fs::create_dir(&self.config.stage_one_root).map_err(|e| {
            HarnessError::Storage(format!(
                "could not create root dir {}: {}",
                self.config.stage_one_root.display(),
                e
            ))
        })?;

        // One private output subtree per node
        self.state = StageState::PartitionAssigned;
        for node in 0..self.config.nodes {
            fs::create_dir(self.config.stage_one_root.join(node.to_string()))?;
        }

        self.state = StageState::PerNodeDispatch;
        let exe = std::env::current_exe()?;
        let config_path = self.config_path.clone();
        let orchestrator = ProcessOrchestrator::new("stage one nodes");
        orchestrator.run_stage(self.config.nodes, |node| {
            let mut command = Command::new(&exe);
            command
                .arg("stage-one-node")
                .arg("--config")
                .arg(&config_path)
                .arg("--node")
                .arg(node.to_string());
            command
        })?;
        self.state = StageState::AllNodesDone;

        // Independent re-iteration of the search set drives the merge
        let mut search_store = match FileRecordStore::open(&self.config.search_store) {
            Ok(store) => store,
            Err(e) => {
                crate::utils::fs::remove_dir_best_effort(&self.config.stage_one_root);
                return Err(e);
            }
        };
        let merger = ResultMerger::new(self.config.nodes);
        let report = merger.merge(&self.config.stage_one_root, &mut search_store)?;
        self.state = StageState::Merged;

        log::info!(
            "stage one merged {} searches ({} with missing contributions)",
            report.merged_count(),
            report.searches_with_missing_contributions()
        );

        self.state = StageState::Terminal;
        Ok(report)
    }
}

/// Node process body: node-scoped matcher initialization, then worker
/// process fan-out over this node's copy of the search set.
pub fn run_node(config: &StageOneConfig, config_path: &Path, node: u32) -> Result<(), HarnessError> {
    let matcher = matcher::for_name(&config.matcher)?;
    init_node_matcher(&matcher, config, node)?;

    let exe = std::env::current_exe()?;
    let orchestrator = ProcessOrchestrator::new(format!("node {} workers", node));
    orchestrator.run_stage(config.effective_processes(), |worker| {
        let mut command = Command::new(&exe);
        command
            .arg("stage-one-worker")
            .arg("--config")
            .arg(config_path)
            .arg("--node")
            .arg(node.to_string())
            .arg("--worker")
            .arg(worker.to_string());
        command
    })
}

fn init_node_matcher(
    matcher: &Arc<dyn Matcher>,
    config: &StageOneConfig,
    node: u32,
) -> Result<(), HarnessError> {
    let invoker = TimedInvoker::new(STAGE_ONE_INIT_BUDGET);
    let result = {
        let matcher = Arc::clone(matcher);
        let config_dir = config.config_dir.clone();
        let enroll_dir = config.enroll_dir.clone();
        let class = config.input_class;
        invoker.invoke(move || {
            matcher.init_identification_stage_one(&config_dir, &enroll_dir, class, node)
        })
    };

    match result.output {
        Some(status) if status.is_success() => Ok(()),
        Some(status) => Err(HarnessError::Matcher(format!(
            "stage one initialization failed on node {}: {}",
            node, status
        ))),
        None => Err(HarnessError::Matcher(format!(
            "stage one initialization did not complete on node {}",
            node
        ))),
    }
}

/// Worker process body: drive one partition of the search set against this
/// node's enrollment shard, one log entry per search regardless of outcome.
pub fn run_worker(config: &StageOneConfig, node: u32, worker: u32) -> Result<(), HarnessError> {
    let matcher = matcher::for_name(&config.matcher)?;
    // Spawned processes share no matcher state with the node process, so
    // each worker carries its own node-scoped initialization
    init_node_matcher(&matcher, config, node)?;

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
        .join(format!("{}{}-{}.log", config.prefix, node, worker));
    let mut log = Logsheet::create(&log_path, STAGE_ONE_LOG_FIELDS).map_err(|e| {
        HarnessError::Storage(format!("could not create {}: {}", log_path.display(), e))
    })?;

    let node_dir = config.stage_one_root.join(node.to_string());
    let invoker = TimedInvoker::new(STAGE_ONE_CALL_BUDGET);

    for _ in 0..partition.count {
        let record = match search_store.sequence()? {
            Some(record) => record,
            None => break,
        };

        // Uniquely keyed output directory for this (node, search) pair
        let data_dir = node_dir.join(&record.key);
        fs::create_dir(&data_dir).map_err(|e| {
            HarnessError::Storage(format!(
                "could not create dir for search key {}: {}",
                data_dir.display(),
                e
            ))
        })?;

        let result = {
            let matcher = Arc::clone(&matcher);
            let key = record.key.clone();
            let template = record.data.clone();
            let dir = data_dir.clone();
            invoker.invoke(move || matcher.identify_stage_one(&key, &template, &dir))
        };

        let mut line = format!(
            "{} {} {} {} ",
            record.key,
            result.elapsed.as_micros(),
            sum_directory_usage(&data_dir),
            result.state.code()
        );
        match result.output {
            Some(status) => {
                line.push_str(&format!("{} {}", status.code.value(), quoted(&status.info)))
            }
            None => line.push_str("NA [<[]>]"),
        }
        log.append(&line)?;
    }

    Ok(())
}
