// Mon Feb 2 2026 - Alex

use crate::error::HarnessError;
use crate::matcher::InputClass;
use crate::store::FileRecordStore;
use crate::templates::TemplateKind;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

fn default_matcher() -> String {
    "null".to_string()
}

fn default_processes() -> u32 {
    1
}

fn default_nodes() -> u32 {
    1
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

/// Read one operation's configuration from a JSON file.
pub fn load_config<T: DeserializeOwned>(path: &Path) -> Result<T, HarnessError> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        HarnessError::Config(format!("could not open \"{}\": {}", path.display(), e))
    })?;
    serde_json::from_str(&text).map_err(|e| {
        HarnessError::Config(format!("could not parse \"{}\": {}", path.display(), e))
    })
}

fn check_store(path: &Path, what: &str) -> Result<(), HarnessError> {
    FileRecordStore::open(path)
        .map(|_| ())
        .map_err(|e| HarnessError::Config(format!("could not open {} ({}): {}", what, path.display(), e)))
}

fn check_output_dir(path: &Path) -> Result<(), HarnessError> {
    std::fs::create_dir_all(path).map_err(|e| {
        HarnessError::Config(format!(
            "could not make output directory ({}): {}",
            path.display(),
            e
        ))
    })
}

/// Configuration for distributed template generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplatesConfig {
    #[serde(default = "default_matcher")]
    pub matcher: String,
    pub config_dir: PathBuf,
    pub kind: TemplateKind,
    pub standard_store: PathBuf,
    #[serde(default)]
    pub proprietary_store: Option<PathBuf>,
    /// Worker process count; 0 means one per CPU.
    #[serde(default = "default_processes")]
    pub processes: u32,
    #[serde(default)]
    pub prefix: String,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl TemplatesConfig {
    pub fn effective_processes(&self) -> u32 {
        if self.processes == 0 {
            num_cpus::get() as u32
        } else {
            self.processes
        }
    }

    pub fn validate(&self) -> Result<(), HarnessError> {
        check_store(&self.standard_store, "standard imagery store")?;
        if let Some(ref proprietary) = self.proprietary_store {
            check_store(proprietary, "proprietary imagery store")?;
        }
        check_output_dir(&self.output_dir)
    }
}

/// Configuration for enrollment set finalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalizeConfig {
    #[serde(default = "default_matcher")]
    pub matcher: String,
    pub config_dir: PathBuf,
    pub enroll_dir: PathBuf,
    pub template_store: PathBuf,
    #[serde(default = "default_nodes")]
    pub nodes: u32,
    pub node_memory_kib: u64,
}

impl FinalizeConfig {
    pub fn validate(&self) -> Result<(), HarnessError> {
        if !self.config_dir.is_dir() {
            return Err(HarnessError::Config(format!(
                "configuration directory ({}) does not exist",
                self.config_dir.display()
            )));
        }
        if self.enroll_dir.exists() {
            return Err(HarnessError::Config(format!(
                "enrollment directory ({}) already exists",
                self.enroll_dir.display()
            )));
        }
        check_store(&self.template_store, "enrollment template store")?;
        if self.nodes == 0 {
            return Err(HarnessError::Config("node count can't be 0".to_string()));
        }
        if self.node_memory_kib == 0 {
            return Err(HarnessError::Config("node memory can't be 0".to_string()));
        }
        Ok(())
    }
}

/// Configuration for the distributed stage one scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageOneConfig {
    #[serde(default = "default_matcher")]
    pub matcher: String,
    pub config_dir: PathBuf,
    pub enroll_dir: PathBuf,
    pub stage_one_root: PathBuf,
    pub search_store: PathBuf,
    pub input_class: InputClass,
    pub nodes: u32,
    /// Worker processes per node; 0 means one per CPU.
    #[serde(default = "default_processes")]
    pub processes: u32,
    #[serde(default)]
    pub prefix: String,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl StageOneConfig {
    pub fn effective_processes(&self) -> u32 {
        if self.processes == 0 {
            num_cpus::get() as u32
        } else {
            self.processes
        }
    }

    pub fn validate(&self) -> Result<(), HarnessError> {
        if self.nodes == 0 {
            return Err(HarnessError::Config("node count can't be 0".to_string()));
        }
        if !self.enroll_dir.is_dir() {
            return Err(HarnessError::Config(format!(
                "cannot find enrollment directory: {}",
                self.enroll_dir.display()
            )));
        }
        if self.stage_one_root.exists() {
            return Err(HarnessError::Config(format!(
                "stage one data root ({}) already exists",
                self.stage_one_root.display()
            )));
        }
        check_store(&self.search_store, "search template store")?;
        check_output_dir(&self.output_dir)
    }
}

/// Configuration for the stage two candidate list pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageTwoConfig {
    #[serde(default = "default_matcher")]
    pub matcher: String,
    pub config_dir: PathBuf,
    pub enroll_dir: PathBuf,
    pub stage_one_root: PathBuf,
    pub search_store: PathBuf,
    pub input_class: InputClass,
    /// Worker process count; 0 means one per CPU.
    #[serde(default = "default_processes")]
    pub processes: u32,
    #[serde(default)]
    pub prefix: String,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl StageTwoConfig {
    pub fn effective_processes(&self) -> u32 {
        if self.processes == 0 {
            num_cpus::get() as u32
        } else {
            self.processes
        }
    }

    pub fn validate(&self) -> Result<(), HarnessError> {
        if !self.enroll_dir.is_dir() {
            return Err(HarnessError::Config(format!(
                "cannot find enrollment directory: {}",
                self.enroll_dir.display()
            )));
        }
        if !self.stage_one_root.is_dir() {
            return Err(HarnessError::Config(format!(
                "cannot find stage one data root: {}",
                self.stage_one_root.display()
            )));
        }
        check_store(&self.search_store, "search template store")?;
        check_output_dir(&self.output_dir)
    }
}
