//! The DAG builder and DAG algorithms (spec §4.5/§4.6): projects the VDS's
//! producer/consumer links into an immutable task graph, then computes a
//! topological linearization and a bin (level) order over it.
//!
//! Grounded on `original_source/core/vds_coordinator.py::Coordinator.manage_vds`
//! (the adjacency-list projection) and `core/vds_coordinator.py::DAGManagement`
//! (topological + bin order), reworked per REDESIGN FLAGS §9: the VDS owns
//! tasks by value, so the DAG here only records edges (`HashMap<TaskId,
//! Vec<TaskId>>`) and leaves `Task::predecessors`/`successors` as the
//! materialized view callers read bins/order from.

use crate::task::TaskId;
use crate::vds::VirtualDataSpace;
use std::collections::{HashMap, HashSet, VecDeque};

#[derive(Debug, thiserror::Error)]
pub enum DagError {
    #[error("task {task} references VDO {vdo} which was never mapped into the VDS")]
    UnmappedVdo {
        task: TaskId,
        vdo: crate::vdo::VdoId,
    },
    #[error("cycle detected in task graph, involving task {0}")]
    Cycle(TaskId),
}

impl crate::ErrorClassification for DagError {
    fn is_retryable(&self) -> bool {
        false
    }
}

/// An immutable, frozen view of the task graph (spec §3: "DAG: built
/// immutably from the VDS at executor entry; not persisted").
pub struct Dag {
    /// Tasks in VDS insertion order, the tie-break order for topological
    /// sort and bin placement (spec §4.6).
    order: Vec<TaskId>,
    successors: HashMap<TaskId, Vec<TaskId>>,
    predecessors: HashMap<TaskId, Vec<TaskId>>,
}

impl Dag {
    pub fn tasks(&self) -> &[TaskId] {
        &self.order
    }

    pub fn successors(&self, task: TaskId) -> &[TaskId] {
        self.successors.get(&task).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn predecessors(&self, task: TaskId) -> &[TaskId] {
        self.predecessors.get(&task).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Topological order (batch mode): DFS-based post-order with
    /// start-of-list insertion, tie-broken by VDS insertion order (spec
    /// §4.6). Every task precedes its successors (P4).
    pub fn batch_execution_order(&self) -> Result<Vec<TaskId>, DagError> {
        let mut visited: HashSet<TaskId> = HashSet::new();
        let mut in_progress: HashSet<TaskId> = HashSet::new();
        let mut out: Vec<TaskId> = Vec::new();

        for &root in &self.order {
            if !visited.contains(&root) {
                self.visit(root, &mut visited, &mut in_progress, &mut out)?;
            }
        }
        Ok(out)
    }

    fn visit(
        &self,
        task: TaskId,
        visited: &mut HashSet<TaskId>,
        in_progress: &mut HashSet<TaskId>,
        out: &mut Vec<TaskId>,
    ) -> Result<(), DagError> {
        if visited.contains(&task) {
            return Ok(());
        }
        if !in_progress.insert(task) {
            return Err(DagError::Cycle(task));
        }
        for &succ in self.successors(task) {
            self.visit(succ, visited, in_progress, out)?;
        }
        in_progress.remove(&task);
        visited.insert(task);
        out.insert(0, task);
        Ok(())
    }

    /// Bin (level) order (spec §4.6): two passes. Pass 1 pushes every task
    /// forward to `max(bin(pred)) + 1` via forward BFS from the roots. Pass
    /// 2 pulls each task as late as possible — `min(bin(successors)) - 1` —
    /// without violating any predecessor's bin (P6). Returns bins ordered by
    /// index; bin `i` depends only on bins `< i` (P5).
    pub fn bin_execution_order(&self) -> Result<Vec<Vec<TaskId>>, DagError> {
        let topo = self.batch_execution_order()?;

        let mut bin: HashMap<TaskId, i64> = HashMap::new();
        for &t in &topo {
            bin.insert(t, 0);
        }
        for &t in &topo {
            let my_bin = bin[&t];
            for &succ in self.successors(t) {
                let entry = bin.entry(succ).or_insert(0);
                *entry = (*entry).max(my_bin + 1);
            }
        }
        let max_bin = bin.values().copied().max().unwrap_or(0);

        // Pass 2: just-in-time readjustment, processed in reverse
        // topological order so a task's successors have already settled
        // their final bin before it readjusts (P6).
        for &t in topo.iter().rev() {
            let succs = self.successors(t);
            let min_succ_bin = succs
                .iter()
                .map(|s| bin[s])
                .min()
                .unwrap_or(max_bin + 1);
            let candidate = min_succ_bin - 1;
            let entry = bin.get_mut(&t).unwrap();
            *entry = (*entry).max(candidate);
        }

        let bin_count = bin.values().copied().max().unwrap_or(0) + 1;
        let mut bins: Vec<Vec<TaskId>> = vec![Vec::new(); bin_count as usize];
        for &t in &topo {
            bins[bin[&t] as usize].push(t);
        }
        Ok(bins)
    }
}

/// Freezes the VDS into a `Dag`, for every VDO wiring each producer to each
/// consumer (spec §4.5). Self-edges are dropped; consumers with no
/// producers still appear as keys with an empty successor set.
pub fn build(vds: &VirtualDataSpace) -> Result<Dag, DagError> {
    let mut successors: HashMap<TaskId, Vec<TaskId>> = HashMap::new();
    let mut successors_set: HashMap<TaskId, HashSet<TaskId>> = HashMap::new();
    let mut predecessors: HashMap<TaskId, Vec<TaskId>> = HashMap::new();
    let mut predecessors_set: HashMap<TaskId, HashSet<TaskId>> = HashMap::new();

    for &task in vds.task_ids() {
        successors.entry(task).or_default();
        predecessors.entry(task).or_default();
    }

    for &vdo_id in vds.vdo_ids() {
        let vdo = vds.vdo(vdo_id).expect("vdo_ids() only lists live VDOs");
        for &p in vdo.producers() {
            for &c in vdo.consumers() {
                if p == c {
                    continue;
                }
                if successors_set.entry(p).or_default().insert(c) {
                    successors.entry(p).or_default().push(c);
                }
                if predecessors_set.entry(c).or_default().insert(p) {
                    predecessors.entry(c).or_default().push(p);
                }
            }
        }
    }

    check_unmapped_vdos(vds)?;

    Ok(Dag {
        order: vds.task_ids().to_vec(),
        successors,
        predecessors,
    })
}

/// Validation error (spec §7/I3): every VDO a task references in its
/// `params` must have been mapped into the VDS.
fn check_unmapped_vdos(vds: &VirtualDataSpace) -> Result<(), DagError> {
    for &task_id in vds.task_ids() {
        let task = vds.task(task_id).expect("task_ids() only lists live tasks");
        for param in &task.params {
            if let crate::task::Param::Ref(vdo_id) = *param {
                if !vds.vdo_exists(vdo_id) {
                    return Err(DagError::UnmappedVdo {
                        task: task_id,
                        vdo: vdo_id,
                    });
                }
            }
        }
    }
    Ok(())
}

/// Materializes `Task::predecessors`/`successors` on every task in `vds`
/// from the frozen `Dag`, for callers (e.g. the policy engine's
/// WORKFLOW_AWARE predicate, spec §4.4) that inspect edges through the
/// `Task` value rather than the `Dag` directly.
pub fn materialize_edges(vds: &mut VirtualDataSpace, dag: &Dag) -> Result<(), DagError> {
    let tasks = vds.task_ids().to_vec();
    for task_id in tasks {
        let preds = dag.predecessors(task_id).to_vec();
        let succs = dag.successors(task_id).to_vec();
        let task = vds.task_mut(task_id).expect("task present in VDS");
        for p in preds {
            task.add_predecessor(p);
        }
        for s in succs {
            task.add_successor(s);
        }
    }
    Ok(())
}

/// Not currently exercised by `Dag` (no BFS-queue consumer yet) but kept for
/// the executor's `BIN` mode, which needs a plain FIFO of ready tasks rather
/// than the borrow-friendly `Vec` the bin algorithm builds up internally.
#[allow(dead_code)]
pub(crate) fn to_queue(tasks: &[TaskId]) -> VecDeque<TaskId> {
    tasks.iter().copied().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::setup_test_logging;
    use crate::storage::{TierInfo, YamlStorageCatalog};
    use crate::task::Task;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn catalog() -> Arc<YamlStorageCatalog> {
        let mut tiers = BTreeMap::new();
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

    fn chain_vds() -> (VirtualDataSpace, TaskId, TaskId, TaskId) {
        let mut vds = VirtualDataSpace::new(setup_test_logging(), catalog());
        let a = vds.map("/s/a");
        let b = vds.map("/s/b");
        let c = vds.map("/s/c");

        let t1 = vds.register_task(Task::new_compute("t1", "make-b"));
        let t2 = vds.register_task(Task::new_compute("t2", "make-c"));
        let t3 = vds.register_task(Task::new_compute("t3", "use-all"));

        vds.vdo_mut(a).unwrap().add_consumer(t1);
        vds.vdo_mut(b).unwrap().add_producer(t1);
        vds.vdo_mut(b).unwrap().add_consumer(t2);
        vds.vdo_mut(c).unwrap().add_producer(t2);
        vds.vdo_mut(c).unwrap().add_consumer(t3);
        (vds, t1, t2, t3)
    }

    #[test]
    fn topological_order_respects_edges_p4() {
        let (vds, t1, t2, t3) = chain_vds();
        let dag = build(&vds).unwrap();
        let order = dag.batch_execution_order().unwrap();
        let pos = |t: TaskId| order.iter().position(|&x| x == t).unwrap();
        assert!(pos(t1) < pos(t2));
        assert!(pos(t2) < pos(t3));
    }

    #[test]
    fn bin_order_is_monotonic_and_disjoint_p5_p6() {
        let (vds, t1, t2, t3) = chain_vds();
        let dag = build(&vds).unwrap();
        let bins = dag.bin_execution_order().unwrap();
        let bin_of = |t: TaskId| bins.iter().position(|b| b.contains(&t)).unwrap();
        assert!(bin_of(t1) < bin_of(t2));
        assert!(bin_of(t2) < bin_of(t3));
        for b in &bins {
            for &x in b {
                for &y in b {
                    if x != y {
                        assert!(!dag.successors(x).contains(&y));
                    }
                }
            }
        }
    }

    #[test]
    fn self_edges_are_dropped() {
        let mut vds = VirtualDataSpace::new(setup_test_logging(), catalog());
        let a = vds.map("/s/loop");
        let t = vds.register_task(Task::new_compute("t", "noop"));
        // A pathological producer+consumer-of-itself wiring; the DAG must not
        // create a self-loop deadlock.
        vds.vdo_mut(a).unwrap().add_producer(t);
        vds.vdo_mut(a).unwrap().add_consumer(t);

        let dag = build(&vds).unwrap();
        assert!(dag.successors(t).is_empty());
    }

    #[test]
    fn consumer_with_no_producer_still_appears_as_key() {
        let mut vds = VirtualDataSpace::new(setup_test_logging(), catalog());
        let a = vds.map("/s/in");
        let t = vds.register_task(Task::new_compute("t", "cat"));
        vds.vdo_mut(a).unwrap().add_consumer(t);

        let dag = build(&vds).unwrap();
        assert!(dag.predecessors(t).is_empty());
        assert!(dag.tasks().contains(&t));
    }
}
