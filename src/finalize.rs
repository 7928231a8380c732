// Tue Feb 3 2026 - Alex

use crate::config::FinalizeConfig;
use crate::error::HarnessError;
use crate::invoke::{InvocationResult, TimedInvoker};
use crate::matcher::{self, ReturnStatus, StatusCode};
use crate::store::{FileRecordStore, RecordStore};
use crate::utils::logging::scoped_timer;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Every implementation must finalize with at most this many nodes.
pub const MAX_SUPPORTED_NODES: u32 = 5;

const BUDGET_PER_MILLION: Duration = Duration::from_secs(120 * 60);

pub const FINALIZE_REPORT_FIELDS: &str = "NumNodes RAMPerNode Time State StatusCode Info";

/// One finalize attempt, reported whether it succeeded or not.
#[derive(Debug, Clone)]
pub struct FinalizeAttempt {
    pub nodes: u32,
    pub node_memory_kib: u64,
    pub elapsed: Duration,
    pub state_code: u8,
    pub status: Option<ReturnStatus>,
}

impl fmt::Display for FinalizeAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} ",
            self.nodes,
            self.node_memory_kib,
            self.elapsed.as_micros(),
            self.state_code
        )?;
        match &self.status {
            Some(status) => write!(f, "{} [<[{}]>]", status.code.value(), status.info),
            None => write!(f, "NA [<[]>]"),
        }
    }
}

#[derive(Debug)]
pub struct FinalizeOutcome {
    pub status: ReturnStatus,
    pub attempts: Vec<FinalizeAttempt>,
}

/// Drives enrollment finalization: one bounded matcher call, retried with
/// one node more each time the matcher declines the resource budget, up to
/// the supported ceiling.
pub struct FinalizeCoordinator {
    config: FinalizeConfig,
}

impl FinalizeCoordinator {
    pub fn new(config: FinalizeConfig) -> Self {
        Self { config }
    }

    pub fn run(&self) -> Result<FinalizeOutcome, HarnessError> {
        self.config.validate()?;
        let _timer = scoped_timer("finalize enrollment");

        std::fs::create_dir_all(&self.config.enroll_dir).map_err(|e| {
            HarnessError::Storage(format!(
                "could not create enrollment directory ({}): {}",
                self.config.enroll_dir.display(),
                e
            ))
        })?;

        let template_count = FileRecordStore::open(&self.config.template_store)?.count();
        let millions = template_count.div_ceil(1_000_000).max(1);
        let invoker = TimedInvoker::new(BUDGET_PER_MILLION * millions as u32);

        let matcher = matcher::for_name(&self.config.matcher)?;
        let mut attempts = Vec::new();
        let mut nodes = self.config.nodes;

        loop {
            let result = {
                let matcher = Arc::clone(&matcher);
                let config_dir = self.config.config_dir.clone();
                let enroll_dir = self.config.enroll_dir.clone();
                let templates = self.config.template_store.clone();
                let memory = self.config.node_memory_kib;
                invoker.invoke(move || {
                    matcher.finalize_enrollment(&config_dir, &enroll_dir, nodes, memory, &templates)
                })
            };
            let attempt = record_attempt(&mut attempts, nodes, self.config.node_memory_kib, &result);
            log::info!("{}", attempt);

            let status = match result.output {
                Some(status) => status,
                None => {
                    return Err(HarnessError::Matcher(
                        "exceptional condition encountered during enrollment finalization"
                            .to_string(),
                    ))
                }
            };

            if status.code == StatusCode::InsufficientResources {
                if nodes >= MAX_SUPPORTED_NODES {
                    return Err(HarnessError::InsufficientResources(format!(
                        "could not finalize enrollment with <= {} nodes",
                        MAX_SUPPORTED_NODES
                    )));
                }
                nodes += 1;
                continue;
            }

            return Ok(FinalizeOutcome { status, attempts });
        }
    }
}

fn record_attempt(
    attempts: &mut Vec<FinalizeAttempt>,
    nodes: u32,
    node_memory_kib: u64,
    result: &InvocationResult<ReturnStatus>,
) -> FinalizeAttempt {
    let attempt = FinalizeAttempt {
        nodes,
        node_memory_kib,
        elapsed: result.elapsed,
        state_code: result.state.code(),
        status: result.output.clone(),
    };
    attempts.push(attempt.clone());
    attempt
}
