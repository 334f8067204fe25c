//! The workflow description surface (spec §6): a mapping-based external
//! interface deserialized via `serde_yaml`, and the function that walks it
//! to build a `VirtualDataSpace`.
//!
//! Grounded on `original_source/plugins/workflow/madats_workflow.py::MadatsWorkflow.parse`
//! (one `Task` built per mapping entry, `inputs`/`outputs`/`params` lifted
//! straight from the dict) and `original_source/core/vds_coordinator.py::DataManagement.create_vdo`
//! (map a datapath to a VDO, then wire it onto the owning task as
//! consumer/producer).

use crate::storage::StorageCatalog;
use crate::task::{Param, Task};
use crate::vds::VirtualDataSpace;
use serde::Deserialize;
use slog::Logger;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("failed to read workflow description {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse workflow description {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

impl crate::ErrorClassification for WorkflowError {
    fn is_retryable(&self) -> bool {
        false
    }
}

/// One entry of the mapping-based workflow surface: `task-name → {command,
/// params, vin, vout, scheduler, scheduler_opts, name}` (spec §6).
#[derive(Clone, Debug, Deserialize)]
pub struct WorkflowTask {
    pub command: String,
    #[serde(default)]
    pub params: Vec<String>,
    #[serde(default)]
    pub vin: Vec<String>,
    #[serde(default)]
    pub vout: Vec<String>,
    #[serde(default)]
    pub scheduler: Option<String>,
    #[serde(default)]
    pub scheduler_opts: BTreeMap<String, String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// A parsed workflow description. `BTreeMap` keeps iteration deterministic
/// across runs, which matters for reproducible VDS insertion order (DAG
/// topological tie-breaks are keyed on insertion order, spec §4.6).
#[derive(Clone, Debug, Deserialize)]
pub struct Workflow(pub BTreeMap<String, WorkflowTask>);

impl Workflow {
    pub fn from_path(path: &Path) -> Result<Workflow, WorkflowError> {
        let text = fs::read_to_string(path).map_err(|source| WorkflowError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&text).map_err(|source| WorkflowError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Builds a `VirtualDataSpace` from a parsed workflow (spec §6): maps every
/// `vin`/`vout` datapath to a VDO, registers one COMPUTE task per entry,
/// wires `vin` as the task's consumer edge and `vout` as its producer edge,
/// and substitutes any `params` entry that textually matches a `vin`/`vout`
/// datapath with a `Param::Ref` to that VDO (everything else stays a
/// `Param::Literal`).
pub fn build_vds(logger: Logger, catalog: Arc<dyn StorageCatalog>, workflow: &Workflow) -> VirtualDataSpace {
    let mut vds = VirtualDataSpace::new(logger, catalog);

    for (entry_name, wf_task) in &workflow.0 {
        let task_name = wf_task.name.clone().unwrap_or_else(|| entry_name.clone());
        let mut task = Task::new_compute(task_name, wf_task.command.clone());
        task.scheduler = wf_task.scheduler.clone();
        task.scheduler_opts = wf_task.scheduler_opts.clone();

        let vin_ids: Vec<_> = wf_task.vin.iter().map(|path| vds.map(path)).collect();
        let vout_ids: Vec<_> = wf_task.vout.iter().map(|path| vds.map(path)).collect();

        let datapath_ids: BTreeMap<&str, crate::vdo::VdoId> = wf_task
            .vin
            .iter()
            .map(String::as_str)
            .zip(vin_ids.iter().copied())
            .chain(wf_task.vout.iter().map(String::as_str).zip(vout_ids.iter().copied()))
            .collect();

        for p in &wf_task.params {
            task.params.push(match datapath_ids.get(p.as_str()) {
                Some(&id) => Param::Ref(id),
                None => Param::Literal(p.clone()),
            });
        }

        let task_id = vds.register_task(task);
        for vdo_id in vin_ids {
            vds.vdo_mut(vdo_id).expect("just mapped").add_consumer(task_id);
        }
        for vdo_id in vout_ids {
            vds.vdo_mut(vdo_id).expect("just mapped").add_producer(task_id);
        }
    }

    vds
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::setup_test_logging;
    use crate::storage::{TierInfo, YamlStorageCatalog};
    use std::collections::BTreeMap as Map;

    fn catalog() -> Arc<dyn StorageCatalog> {
        let mut tiers = Map::new();
        tiers.insert(
            "scratch".to_string(),
            TierInfo {
                mount: "/s".to_string(),
                persist: "short_term".to_string(),
                interface: "posix".to_string(),
                bandwidth: 700,
            },
        );
        Arc::new(YamlStorageCatalog::from_tiers(tiers))
    }

    #[test]
    fn build_vds_wires_vin_vout_and_substitutes_params() {
        let text = r#"
task1:
  command: cat
  params: ["/s/in1", "/s/in2", "-o", "/s/out"]
  vin: ["/s/in1", "/s/in2"]
  vout: ["/s/out"]
"#;
        let workflow: Workflow = serde_yaml::from_str(text).unwrap();
        let vds = build_vds(setup_test_logging(), catalog(), &workflow);

        assert_eq!(vds.vdo_ids().len(), 3);
        assert_eq!(vds.task_ids().len(), 1);
        let task_id = vds.task_ids()[0];
        let task = vds.task(task_id).unwrap();
        assert_eq!(task.params.len(), 4);
        assert!(matches!(task.params[0], Param::Ref(_)));
        assert!(matches!(task.params[1], Param::Ref(_)));
        assert_eq!(task.params[2], Param::Literal("-o".to_string()));
        assert!(matches!(task.params[3], Param::Ref(_)));

        let out_id = vds.map("/s/out");
        assert!(vds.vdo(out_id).unwrap().producers().contains(&task_id));
        let in1_id = vds.map("/s/in1");
        assert!(vds.vdo(in1_id).unwrap().consumers().contains(&task_id));
    }

    #[test]
    fn entries_without_an_explicit_name_use_the_mapping_key() {
        let text = r#"
stage_one:
  command: "./run.sh"
"#;
        let workflow: Workflow = serde_yaml::from_str(text).unwrap();
        let vds = build_vds(setup_test_logging(), catalog(), &workflow);
        let task = vds.task(vds.task_ids()[0]).unwrap();
        assert_eq!(task.name, "stage_one");
    }

    #[test]
    fn unreadable_path_is_a_read_error() {
        let err = Workflow::from_path(Path::new("/no/such/workflow.yaml")).unwrap_err();
        assert!(matches!(err, WorkflowError::Read { .. }));
    }
}
