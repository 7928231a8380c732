// Tue Feb 3 2026 - Alex

use crate::config::TemplatesConfig;
use crate::error::HarnessError;
use crate::invoke::TimedInvoker;
use crate::logsheet::{quoted, Logsheet};
use crate::matcher::{self, finger_images_from_record, InputClass, Matcher};
use crate::orchestrate::ProcessOrchestrator;
use crate::partition::{advance, plan_partitions};
use crate::store::{FileRecordStore, RecordStore};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

/// Per-call budget for one template generation.
pub const TEMPLATE_CALL_BUDGET: Duration = Duration::from_secs(5 * 60);
/// Budget for templating initialization.
pub const TEMPLATE_INIT_BUDGET: Duration = Duration::from_secs(5 * 60);

pub const TEMPLATE_LOG_FIELDS: &str = "EntryType EntryNum TemplateID NumStandardInput \
NumProprietaryInput Time TemplateSize APIState RetCode RetInfo";

const MAX_PROPRIETARY_PER_SUBJECT: u32 = 10;

/// Which kind of template a run produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TemplateKind {
    Enrollment,
    SearchLatent,
    SearchCapture,
}

impl TemplateKind {
    pub fn input_class(self) -> Option<InputClass> {
        match self {
            TemplateKind::Enrollment => None,
            TemplateKind::SearchLatent => Some(InputClass::Latent),
            TemplateKind::SearchCapture => Some(InputClass::Capture),
        }
    }
}

impl fmt::Display for TemplateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateKind::Enrollment => write!(f, "enrollment"),
            TemplateKind::SearchLatent => write!(f, "search-latent"),
            TemplateKind::SearchCapture => write!(f, "search-capture"),
        }
    }
}

/// Drives distributed template generation: worker processes over a
/// partition of the standard imagery store, one output store and one
/// logsheet per worker.
pub struct TemplateMaker {
    config: TemplatesConfig,
    config_path: PathBuf,
}

impl TemplateMaker {
    pub fn new(config: TemplatesConfig, config_path: PathBuf) -> Self {
        Self {
            config,
            config_path,
        }
    }

    pub fn run(&self) -> Result<(), HarnessError> {
        self.config.validate()?;

        let exe = std::env::current_exe()?;
        let config_path = self.config_path.clone();
        let orchestrator = ProcessOrchestrator::new("template workers");
        orchestrator.run_stage(self.config.effective_processes(), |worker| {
            let mut command = Command::new(&exe);
            command
                .arg("template-worker")
                .arg("--config")
                .arg(&config_path)
                .arg("--worker")
                .arg(worker.to_string());
            command
        })
    }
}

fn init_matcher(matcher: &Arc<dyn Matcher>, config: &TemplatesConfig) -> Result<(), HarnessError> {
    let invoker = TimedInvoker::new(TEMPLATE_INIT_BUDGET);
    let result = {
        let matcher = Arc::clone(matcher);
        let config_dir = config.config_dir.clone();
        let kind = config.kind;
        invoker.invoke(move || match kind.input_class() {
            None => matcher.init_enrollment_templating(&config_dir),
            Some(class) => matcher.init_search_templating(&config_dir, class),
        })
    };

    match result.output {
        Some(status) if status.is_success() => Ok(()),
        Some(status) => Err(HarnessError::Matcher(format!(
            "templating initialization failed: {}",
            status
        ))),
        None => Err(HarnessError::Matcher(
            "templating initialization did not complete".to_string(),
        )),
    }
}

/// Probe the proprietary store for up to ten per-finger payloads keyed
/// `<subject>_<i>`; absent fingers are simply skipped.
fn load_proprietary(
    store: Option<&mut FileRecordStore>,
    subject: &str,
) -> Result<Vec<Bytes>, HarnessError> {
    let store = match store {
        Some(store) => store,
        None => return Ok(Vec::new()),
    };

    let mut payloads = Vec::new();
    for i in 0..MAX_PROPRIETARY_PER_SUBJECT {
        if let Ok(data) = store.read(&format!("{}_{}", subject, i)) {
            payloads.push(data);
        }
    }
    Ok(payloads)
}

/// Worker process body: templates for one partition of the imagery store.
pub fn run_worker(config: &TemplatesConfig, worker: u32) -> Result<(), HarnessError> {
    let matcher = matcher::for_name(&config.matcher)?;
    init_matcher(&matcher, config)?;

    let mut standard = FileRecordStore::open(&config.standard_store)?;
    let mut proprietary = match config.proprietary_store {
        Some(ref path) => Some(FileRecordStore::open(path)?),
        None => None,
    };

    let processes = config.effective_processes();
    if processes as u64 > standard.count() {
        return Err(HarnessError::Config(format!(
            "not enough processes for data ({} processes, and {} subjects in {})",
            processes,
            standard.count(),
            standard.pathname().display()
        )));
    }

    let partition = *plan_partitions(standard.count(), processes)
        .get(worker as usize)
        .ok_or_else(|| {
            HarnessError::Config(format!("no partition for worker {} of {}", worker, processes))
        })?;
    advance(&mut standard, partition.start)?;

    let mut output = FileRecordStore::create(
        &config
            .output_dir
            .join(format!("{}{}.tpl", config.prefix, worker)),
    )?;
    let log_path = config
        .output_dir
        .join(format!("{}{}.log", config.prefix, worker));
    let mut log = Logsheet::create(&log_path, TEMPLATE_LOG_FIELDS).map_err(|e| {
        HarnessError::Storage(format!("could not create {}: {}", log_path.display(), e))
    })?;

    let invoker = TimedInvoker::new(TEMPLATE_CALL_BUDGET);

    for _ in 0..partition.count {
        let record = match standard.sequence()? {
            Some(record) => record,
            None => break,
        };

        let images = finger_images_from_record(&record.data);
        let proprietary_images = load_proprietary(proprietary.as_mut(), &record.key)?;

        let result = {
            let matcher = Arc::clone(&matcher);
            let kind = config.kind;
            let images = images.clone();
            let proprietary_images = proprietary_images.clone();
            invoker.invoke(move || match kind {
                TemplateKind::Enrollment => {
                    matcher.make_enrollment_template(&images, &proprietary_images)
                }
                TemplateKind::SearchLatent | TemplateKind::SearchCapture => {
                    matcher.make_search_template(&images, &proprietary_images)
                }
            })
        };

        let template = result
            .output
            .as_ref()
            .map(|(_, template)| template.clone())
            .unwrap_or_default();

        let mut line = format!(
            "{} {} {} {} {} {} ",
            record.key,
            images.len(),
            proprietary_images.len(),
            result.elapsed.as_micros(),
            template.len(),
            result.state.code()
        );
        match result.output.as_ref() {
            Some((status, _)) => {
                line.push_str(&format!("{} {}", status.code.value(), quoted(&status.info)))
            }
            None => line.push_str("NA [<[]>]"),
        }
        log.append(&line)?;

        match config.kind {
            // Every enrollment template goes to the finalization step,
            // whatever its status
            TemplateKind::Enrollment => output.insert(&record.key, &template)?,
            // Failed search extractions are not carried into identification
            TemplateKind::SearchLatent | TemplateKind::SearchCapture => {
                let succeeded = result
                    .output
                    .as_ref()
                    .map(|(status, _)| status.is_success())
                    .unwrap_or(false);
                if succeeded {
                    output.insert(&record.key, &template)?;
                }
            }
        }
    }

    Ok(())
}
