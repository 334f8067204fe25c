//! Tasks: the compute and data-management nodes of a workflow, and the
//! parameter representation used to describe their command lines.

use crate::vdo::VdoId;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Unique task identifier. COMPUTE tasks get a random v4 id; DATA tasks are
/// fingerprinted from their kind and endpoints so that re-running the
/// mutation protocol over an unchanged VDS always produces the same id for
/// "the same" stage-in/stage-out/preparer/cleanup task (idempotent
/// insertion), matching `core/vds.py::DataTask`'s use of a digest of
/// `(type, src, dest)` as its task id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> TaskId {
        TaskId(Uuid::new_v4())
    }

    /// Deterministic id for a data task, derived from its kind and the VDO
    /// endpoints it moves between. `dest` is always present; `src` is absent
    /// for a PREPARER (there is no source side, only a directory to create).
    pub fn fingerprint(kind: DataTaskKind, src: Option<VdoId>, dest: VdoId) -> TaskId {
        let mut hasher = Sha256::new();
        hasher.update(kind.as_str().as_bytes());
        if let Some(src) = src {
            hasher.update(src.to_string().as_bytes());
        }
        hasher.update(dest.to_string().as_bytes());
        let digest = hasher.finalize();
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest[0..16]);
        TaskId(Uuid::from_bytes(bytes))
    }
}

impl Default for TaskId {
    fn default() -> Self {
        TaskId::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A parameter in a task's command line: either a literal string or a
/// reference to a VDO, resolved to that VDO's path at script-synthesis time.
/// Replaces a dynamically-typed parameter list mixing `str` and VDO objects.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Param {
    Literal(String),
    Ref(VdoId),
}

/// What kind of work a task performs. COMPUTE tasks run user commands; DATA
/// and CLEANUP tasks are synthesized by the mutation protocol (`DataTask`
/// below carries the finer-grained kind for DATA tasks).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TaskType {
    #[default]
    Compute,
    Data,
    Cleanup,
}

/// The three kinds of synthesized data-management task, per spec §3/§4.3.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataTaskKind {
    Preparer,
    Mover,
    Cleaner,
}

impl DataTaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataTaskKind::Preparer => "preparer",
            DataTaskKind::Mover => "mover",
            DataTaskKind::Cleaner => "cleaner",
        }
    }
}

impl fmt::Display for DataTaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A node in the workflow graph: a user-described COMPUTE step, or a
/// synthesized DATA/CLEANUP step. Predecessor/successor edges are DAG-level
/// concerns, filled in by `dag::build`, not by the VDS mutation protocol
/// (which only wires VDO producers/consumers).
#[derive(Clone, Debug)]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    pub task_type: TaskType,
    pub command: String,
    pub params: Vec<Param>,
    pub scheduler: Option<String>,
    pub scheduler_opts: BTreeMap<String, String>,
    pub prerun: Vec<String>,
    pub postrun: Vec<String>,

    /// Data-task specifics; `None` for COMPUTE tasks.
    pub data_task: Option<DataTaskInfo>,

    /// Assigned by `dag::bin_execution_order`; `None` until planned.
    pub bin: Option<i64>,

    /// Filled in by `dag::build` from the VDS's producer/consumer links;
    /// empty until the DAG has been built. Duplicate-free, insertion-order
    /// preserved, same as `Vdo::producers`/`consumers`.
    predecessors: Vec<TaskId>,
    predecessors_set: std::collections::HashSet<TaskId>,
    successors: Vec<TaskId>,
    successors_set: std::collections::HashSet<TaskId>,
}

/// Extra fields carried only by synthesized DATA tasks: which kind of
/// operation it performs and which VDOs it moves data between.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataTaskInfo {
    pub kind: DataTaskKind,
    pub src: Option<VdoId>,
    pub dest: VdoId,
}

impl Task {
    pub fn new_compute(name: impl Into<String>, command: impl Into<String>) -> Task {
        Task {
            id: TaskId::new(),
            name: name.into(),
            task_type: TaskType::Compute,
            command: command.into(),
            params: Vec::new(),
            scheduler: None,
            scheduler_opts: BTreeMap::new(),
            prerun: Vec::new(),
            postrun: Vec::new(),
            data_task: None,
            bin: None,
            predecessors: Vec::new(),
            predecessors_set: std::collections::HashSet::new(),
            successors: Vec::new(),
            successors_set: std::collections::HashSet::new(),
        }
    }

    /// Builds a synthesized data task with a deterministic id, command, and
    /// name derived from its kind, per spec §3/§4.3.
    pub fn new_data(kind: DataTaskKind, src: Option<VdoId>, dest: VdoId, command: String) -> Task {
        let id = TaskId::fingerprint(kind, src, dest);
        let task_type = match kind {
            DataTaskKind::Preparer | DataTaskKind::Mover => TaskType::Data,
            DataTaskKind::Cleaner => TaskType::Cleanup,
        };
        Task {
            id,
            name: format!("{}-{}", kind, dest),
            task_type,
            command,
            params: Vec::new(),
            scheduler: None,
            scheduler_opts: BTreeMap::new(),
            prerun: Vec::new(),
            postrun: Vec::new(),
            data_task: Some(DataTaskInfo { kind, src, dest }),
            bin: None,
            predecessors: Vec::new(),
            predecessors_set: std::collections::HashSet::new(),
            successors: Vec::new(),
            successors_set: std::collections::HashSet::new(),
        }
    }

    pub fn is_data(&self) -> bool {
        self.task_type == TaskType::Data
    }

    /// True for any synthesized data-management task (PREPARER, MOVER or
    /// CLEANER), regardless of whether its overall `task_type` is DATA or
    /// CLEANUP.
    pub fn is_data_task(&self) -> bool {
        self.data_task.is_some()
    }

    pub fn predecessors(&self) -> &[TaskId] {
        &self.predecessors
    }

    pub fn successors(&self) -> &[TaskId] {
        &self.successors
    }

    pub fn predecessors_is_empty(&self) -> bool {
        self.predecessors.is_empty()
    }

    pub fn successors_is_empty(&self) -> bool {
        self.successors.is_empty()
    }

    /// Set-insertion of a predecessor edge (P1-style duplicate-free,
    /// insertion-order preserved). Wired by `dag::build`, not by the VDS
    /// mutation protocol.
    pub fn add_predecessor(&mut self, task: TaskId) {
        if self.predecessors_set.insert(task) {
            self.predecessors.push(task);
        }
    }

    pub fn add_successor(&mut self, task: TaskId) {
        if self.successors_set.insert(task) {
            self.successors.push(task);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_task_id_is_deterministic() {
        let dest = VdoId::of_path("/scratch/out");
        let src = VdoId::of_path("/archive/in");
        let a = TaskId::fingerprint(DataTaskKind::Mover, Some(src), dest);
        let b = TaskId::fingerprint(DataTaskKind::Mover, Some(src), dest);
        assert_eq!(a, b);

        let preparer = TaskId::fingerprint(DataTaskKind::Preparer, None, dest);
        assert_ne!(a, preparer);
    }

    #[test]
    fn compute_task_ids_are_unique() {
        let a = Task::new_compute("t1", "echo hi");
        let b = Task::new_compute("t1", "echo hi");
        assert_ne!(a.id, b.id);
    }
}
