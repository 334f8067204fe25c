//! The Scheduler Adapter: translates a task into a submission script and a
//! submit/status command line for a chosen batch-scheduler back-end (spec
//! §1/§6). An external collaborator by design — the actual `fork`/`exec` of
//! the submit command is the executor's job (`executor::invoke_submit`); this
//! module only knows how to render scheduler directives and commands.
//!
//! Grounded on `original_source/madats/core/scheduler.py::Scheduler`
//! (per-backend submit/status commands, dependency specifier/delimiter maps)
//! and `madats/utils/config.py::SchedulerConfig` (directive tables loaded
//! from `$MADATS_HOME/config/{slurm,pbs}.cfg`). REDESIGN FLAGS §9 ("global
//! singletons") drop the Python module-level `slurm_config`/`pbs_config`
//! singletons in favor of an explicit `SchedulerAdapter` value threaded
//! through `Executor::new`; the `.cfg` files themselves are read as YAML
//! (matching `storage.yaml`'s format) rather than the original's
//! `configparser` INI sections, since this rework standardizes every file
//! under `config/` on one serde_yaml-based loader.

use crate::config::MadatsConfig;
use crate::task::{Param, Task};
use crate::vds::VirtualDataSpace;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("unknown scheduler {0:?}")]
    UnknownScheduler(String),
    #[error("failed to read scheduler config {path:?}: {source}")]
    Read {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse scheduler config {path:?}: {source}")]
    Parse {
        path: std::path::PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

impl crate::ErrorClassification for SchedulerError {
    fn is_retryable(&self) -> bool {
        false
    }
}

/// Batch-scheduler back-end variant (spec §3: `Task::scheduler`).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Scheduler {
    #[default]
    None,
    Slurm,
    Pbs,
}

impl fmt::Display for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Scheduler::None => "none",
            Scheduler::Slurm => "slurm",
            Scheduler::Pbs => "pbs",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for Scheduler {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Scheduler, SchedulerError> {
        match s {
            "none" | "" => Ok(Scheduler::None),
            "slurm" => Ok(Scheduler::Slurm),
            "pbs" => Ok(Scheduler::Pbs),
            other => Err(SchedulerError::UnknownScheduler(other.to_string())),
        }
    }
}

/// Recognized scheduler options and the order the directive table is
/// consulted in when synthesizing a submit script (spec §6).
pub const RECOGNIZED_OPTIONS: &[&str] = &[
    "nodes", "cpus", "walltime", "memory", "queue", "jobname", "output", "error", "email",
];

#[derive(Clone, Debug, Deserialize)]
struct BackendConfig {
    submit: String,
    status: Option<String>,
    prefix: String,
    directives: BTreeMap<String, String>,
}

/// Config-driven reference implementation of the scheduler adapter (spec
/// §6: `MADATS_HOME/config/{slurm,pbs}.cfg`). Each loaded config carries the
/// back-end's submit/status commands, its directive-line prefix (`#SBATCH`,
/// `#PBS`) and the option-flag each recognized key renders to.
#[derive(Clone, Debug, Default)]
pub struct SchedulerAdapter {
    slurm: Option<BackendConfig>,
    pbs: Option<BackendConfig>,
}

impl SchedulerAdapter {
    /// An adapter with no back-ends configured; every scheduler other than
    /// `NONE` will fail with `SchedulerError::UnknownScheduler` at directive
    /// time. Useful for tests that only exercise `NONE`/`bash -c`.
    pub fn empty() -> SchedulerAdapter {
        SchedulerAdapter::default()
    }

    /// Loads whichever of `slurm.cfg`/`pbs.cfg` are present under
    /// `$MADATS_HOME/config`. Neither file is required: a workflow that only
    /// uses `scheduler: none` never touches the batch-scheduler back-end
    /// (spec §1: out-of-scope-as-external-collaborator until configured).
    pub fn from_config(config: &MadatsConfig) -> Result<SchedulerAdapter, SchedulerError> {
        Ok(SchedulerAdapter {
            slurm: load_backend(&config.scheduler_config_path("slurm"))?,
            pbs: load_backend(&config.scheduler_config_path("pbs"))?,
        })
    }

    fn backend(&self, scheduler: Scheduler) -> Option<&BackendConfig> {
        match scheduler {
            Scheduler::None => None,
            Scheduler::Slurm => self.slurm.as_ref(),
            Scheduler::Pbs => self.pbs.as_ref(),
        }
    }

    /// `bash -c` for `NONE`; otherwise the back-end's configured submit
    /// command (spec §6: "`NONE` means `bash -c`").
    pub fn submit_command(&self, scheduler: Scheduler) -> Result<String, SchedulerError> {
        match self.backend(scheduler) {
            Some(cfg) => Ok(cfg.submit.clone()),
            None if scheduler == Scheduler::None => Ok("bash -c".to_string()),
            None => Err(SchedulerError::UnknownScheduler(scheduler.to_string())),
        }
    }

    pub fn status_command(&self, scheduler: Scheduler) -> Option<String> {
        self.backend(scheduler).and_then(|c| c.status.clone())
    }

    /// Renders a full directive line (`#SBATCH --time=...`) for a recognized
    /// option, or `None` for an unrecognized key (spec §6: "Unknown keys are
    /// ignored (logged)").
    pub fn directive(&self, scheduler: Scheduler, option: &str, value: &str) -> Option<String> {
        let cfg = self.backend(scheduler)?;
        let template = cfg.directives.get(option)?;
        Some(format!("#{} {}", cfg.prefix, template.replace("{value}", value)))
    }

    /// `--dependency=afterok:<id>,...` (SLURM) / `-W depend=afterok:<id>:...`
    /// (PBS); empty for `NONE` (spec §6).
    pub fn dependency_specifier(&self, scheduler: Scheduler, predecessor_job_ids: &[String]) -> String {
        if predecessor_job_ids.is_empty() {
            return String::new();
        }
        let delimiter = match scheduler {
            Scheduler::None => return String::new(),
            Scheduler::Slurm => ",",
            Scheduler::Pbs => ":",
        };
        let prefix = match scheduler {
            Scheduler::None => return String::new(),
            Scheduler::Slurm => "--dependency=afterok:",
            Scheduler::Pbs => "-W depend=afterok:",
        };
        format!("{}{}", prefix, predecessor_job_ids.join(delimiter))
    }
}

fn load_backend(path: &Path) -> Result<Option<BackendConfig>, SchedulerError> {
    if !path.exists() {
        return Ok(None);
    }
    let text = fs::read_to_string(path).map_err(|source| SchedulerError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let cfg: BackendConfig = serde_yaml::from_str(&text).map_err(|source| SchedulerError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Some(cfg))
}

/// Renders the submission script for one task (spec §6: shebang, one
/// directive per recognized `scheduler_opts` key, then the command line with
/// VDO parameters materialized to `abs_path`).
pub fn render_script(
    task: &Task,
    vds: &VirtualDataSpace,
    adapter: &SchedulerAdapter,
    predecessor_job_ids: &[String],
) -> Result<String, SchedulerError> {
    let scheduler: Scheduler = task.scheduler.as_deref().unwrap_or("none").parse()?;
    let mut lines = vec!["#!/bin/bash".to_string()];

    for option in RECOGNIZED_OPTIONS {
        if let Some(value) = task.scheduler_opts.get(*option) {
            if let Some(line) = adapter.directive(scheduler, option, value) {
                lines.push(line);
            }
        }
    }

    let dependency = adapter.dependency_specifier(scheduler, predecessor_job_ids);
    if !dependency.is_empty() {
        if let Some(line) = adapter.directive(scheduler, "dependency", &dependency) {
            lines.push(line);
        }
    }

    for snippet in &task.prerun {
        lines.push(snippet.clone());
    }

    let params = task
        .params
        .iter()
        .map(|p| match p {
            Param::Literal(s) => Ok(s.clone()),
            Param::Ref(vdo_id) => vds
                .vdo(*vdo_id)
                .map(|v| v.abs_path().to_string())
                .map_err(|_| SchedulerError::UnknownScheduler(format!("unmapped vdo {}", vdo_id))),
        })
        .collect::<Result<Vec<String>, SchedulerError>>()?;

    if params.is_empty() {
        lines.push(task.command.clone());
    } else {
        lines.push(format!("{} {}", task.command, params.join(" ")));
    }

    for snippet in &task.postrun {
        lines.push(snippet.clone());
    }

    lines.push(String::new());
    Ok(lines.join("\n"))
}
