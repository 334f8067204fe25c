//! Virtual Data Objects (VDOs): the typed records the VDS uses to track one
//! logical datum's producers, consumers and data-management properties.

use crate::task::TaskId;
use std::collections::HashSet;

/// Deterministic fingerprint of an absolute path. Stable across runs so that
/// re-mapping the same datapath always yields the same identity (I1: `id` is
/// injective in `abs_path`), matching `madats.core.storage.get_data_id`'s use
/// of an MD5 digest of the path as the VDO dict key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VdoId([u8; 16]);

impl VdoId {
    pub fn of_path(abs_path: &str) -> VdoId {
        let digest = md5_like(abs_path.as_bytes());
        VdoId(digest)
    }
}

impl std::fmt::Display for VdoId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// A small self-contained digest so VDO identity doesn't depend on the
/// content-hashing stack used elsewhere (sha2 is reserved for data-task
/// fingerprints, see [`crate::task::DataTaskId`]). Not cryptographic; only
/// needs to be stable and low-collision for paths within one workflow.
fn md5_like(bytes: &[u8]) -> [u8; 16] {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let full = hasher.finalize();
    let mut out = [0u8; 16];
    out.copy_from_slice(&full[0..16]);
    out
}

/// How long data mapped to a VDO should be retained once the workflow
/// finishes writing it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Persistence {
    #[default]
    None,
    ShortTerm,
    LongTerm,
    FixedTerm,
}

/// A virtual data object: the data-centric abstraction the VDS manages.
/// Tracks producers/consumers as duplicate-free, insertion-order-preserving
/// sets (P1), plus the properties that drive data-management decisions.
#[derive(Clone, Debug)]
pub struct Vdo {
    pub(crate) id: VdoId,
    pub(crate) abs_path: String,
    pub(crate) storage_id: String,
    pub(crate) relative_path: String,

    producers: Vec<TaskId>,
    producers_set: HashSet<TaskId>,
    consumers: Vec<TaskId>,
    consumers_set: HashSet<TaskId>,

    pub size: u64,
    persistence: Persistence,
    pub replication: u32,
    pub deadline: i64,
    pub destination: Option<String>,
    pub qos: std::collections::BTreeMap<String, String>,
    pub non_movable: bool,
    pub is_temporary: bool,

    copy_to: Vec<VdoId>,
    copy_to_set: HashSet<VdoId>,
    pub copy_from: Option<VdoId>,
}

impl Vdo {
    pub fn new(id: VdoId, abs_path: String, storage_id: String, relative_path: String) -> Vdo {
        Vdo {
            id,
            abs_path,
            storage_id,
            relative_path,
            producers: Vec::new(),
            producers_set: HashSet::new(),
            consumers: Vec::new(),
            consumers_set: HashSet::new(),
            size: 0,
            persistence: Persistence::None,
            replication: 0,
            deadline: 0,
            destination: None,
            qos: std::collections::BTreeMap::new(),
            non_movable: false,
            is_temporary: false,
            copy_to: Vec::new(),
            copy_to_set: HashSet::new(),
            copy_from: None,
        }
    }

    pub fn copy_to(&self) -> &[VdoId] {
        &self.copy_to
    }

    /// Set-insertion of a copy-destination lineage entry (`copy_to` is an
    /// ordered set of VDO refs per spec §3).
    pub fn add_copy_to(&mut self, dest: VdoId) {
        if self.copy_to_set.insert(dest) {
            self.copy_to.push(dest);
        }
    }

    pub fn id(&self) -> VdoId {
        self.id
    }

    pub fn abs_path(&self) -> &str {
        &self.abs_path
    }

    pub fn storage_id(&self) -> &str {
        &self.storage_id
    }

    pub fn relative_path(&self) -> &str {
        &self.relative_path
    }

    pub fn producers(&self) -> &[TaskId] {
        &self.producers
    }

    pub fn consumers(&self) -> &[TaskId] {
        &self.consumers
    }

    /// Set-insertion of a producer task: no duplicates (P1), insertion order
    /// preserved.
    pub fn add_producer(&mut self, task: TaskId) {
        if self.producers_set.insert(task) {
            self.producers.push(task);
        }
    }

    pub fn add_consumer(&mut self, task: TaskId) {
        if self.consumers_set.insert(task) {
            self.consumers.push(task);
        }
    }

    /// Replaces the whole producer list. Used by the VDS when rewiring a VDO
    /// after a data-task insertion (e.g. "dest.producers := {mover}").
    pub fn set_producers(&mut self, tasks: impl IntoIterator<Item = TaskId>) {
        self.producers.clear();
        self.producers_set.clear();
        for t in tasks {
            self.add_producer(t);
        }
    }

    pub fn set_consumers(&mut self, tasks: impl IntoIterator<Item = TaskId>) {
        self.consumers.clear();
        self.consumers_set.clear();
        for t in tasks {
            self.add_consumer(t);
        }
    }

    pub fn persistence(&self) -> Persistence {
        self.persistence
    }

    pub fn set_persistence(&mut self, persistence: Persistence) {
        self.persistence = persistence;
    }

    /// `persist ⇔ persistence ≠ NONE` (I4). Derived, never set directly.
    pub fn persist(&self) -> bool {
        self.persistence != Persistence::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskId;

    #[test]
    fn vdo_id_is_injective_in_path() {
        let a = VdoId::of_path("/scratch/in1");
        let b = VdoId::of_path("/scratch/in2");
        let a2 = VdoId::of_path("/scratch/in1");
        assert_ne!(a, b);
        assert_eq!(a, a2);
    }

    #[test]
    fn producers_and_consumers_are_duplicate_free() {
        let mut vdo = Vdo::new(
            VdoId::of_path("/s/x"),
            "/s/x".into(),
            "scratch".into(),
            "x".into(),
        );
        let t1 = TaskId::new();
        vdo.add_producer(t1);
        vdo.add_producer(t1);
        assert_eq!(vdo.producers().len(), 1);

        let t2 = TaskId::new();
        vdo.add_consumer(t2);
        vdo.add_consumer(t2);
        vdo.add_consumer(t2);
        assert_eq!(vdo.consumers().len(), 1);
    }

    #[test]
    fn persist_is_derived_from_persistence() {
        let mut vdo = Vdo::new(
            VdoId::of_path("/s/y"),
            "/s/y".into(),
            "scratch".into(),
            "y".into(),
        );
        assert!(!vdo.persist());
        vdo.set_persistence(Persistence::LongTerm);
        assert!(vdo.persist());
        vdo.set_persistence(Persistence::None);
        assert!(!vdo.persist());
    }
}
