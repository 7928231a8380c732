// Mon Feb 2 2026 - Alex

use crate::error::HarnessError;
use std::process::{Child, Command};

/// Spawns a set of isolated worker processes and joins on all of them.
///
/// All-or-nothing: the stage succeeds iff every worker exits with status 0.
/// Output already written by clean workers stays on disk, but a failed stage
/// must never be merged or trusted; the operator re-runs after fixing the
/// cause. No per-worker retry.
pub struct ProcessOrchestrator {
    label: String,
}

impl ProcessOrchestrator {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }

    pub fn run_stage<F>(&self, worker_count: u32, mut factory: F) -> Result<(), HarnessError>
    where
        F: FnMut(u32) -> Command,
    {
        let mut children: Vec<(u32, Result<Child, std::io::Error>)> =
            Vec::with_capacity(worker_count as usize);

        for index in 0..worker_count {
            let mut command = factory(index);
            log::debug!("{}: spawning worker {}", self.label, index);
            children.push((index, command.spawn()));
        }

        // Join barrier: every spawned child is waited on, even after an
        // earlier spawn error, so nothing is left running unreaped
        let mut failures: Vec<String> = Vec::new();
        for (index, child) in children {
            match child {
                Ok(mut child) => match child.wait() {
                    Ok(status) if status.success() => {
                        log::debug!("{}: worker {} exited cleanly", self.label, index);
                    }
                    Ok(status) => {
                        log::error!("{}: worker {} did not exit cleanly", self.label, index);
                        failures.push(format!("worker {} exited with {}", index, status));
                    }
                    Err(e) => {
                        failures.push(format!("worker {} could not be joined: {}", index, e));
                    }
                },
                Err(e) => {
                    failures.push(format!("worker {} could not be spawned: {}", index, e));
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(HarnessError::WorkerFailure(format!(
                "{}: {}",
                self.label,
                failures.join("; ")
            )))
        }
    }
}
