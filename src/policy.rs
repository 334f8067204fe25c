//! The policy engine: decides which VDOs to relocate before execution and
//! invokes VDS mutations to do it (spec §4.4).

use crate::storage::StorageCatalog;
use crate::vds::{VdsError, VirtualDataSpace};
use crate::vdo::VdoId;
use slog::{debug, info};

/// Data-management strategies, per spec §4.4.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Policy {
    #[default]
    None,
    WorkflowAware,
    StorageAware,
}

impl std::fmt::Display for Policy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Policy::None => "none",
            Policy::WorkflowAware => "workflow-aware",
            Policy::StorageAware => "storage-aware",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for Policy {
    type Err = String;

    fn from_str(s: &str) -> Result<Policy, String> {
        match s {
            "none" => Ok(Policy::None),
            "workflow-aware" | "workflow_aware" => Ok(Policy::WorkflowAware),
            "storage-aware" | "storage_aware" => Ok(Policy::StorageAware),
            other => Err(format!("unknown policy {:?}", other)),
        }
    }
}

/// Picks the tier with the highest bandwidth from the catalog (spec §4.4:
/// `argmax_bandwidth(list_tiers())`).
fn fastest_tier(catalog: &dyn StorageCatalog) -> Option<String> {
    catalog
        .list_tiers()
        .into_iter()
        .max_by_key(|(_, info)| info.bandwidth)
        .map(|(id, _)| id)
}

/// Runs the VDS's configured policy over a snapshot of its current VDOs
/// (spec §4.4: "Executed on a snapshot of `vds.vdos`... to avoid visiting
/// newly inserted VDOs").
pub fn apply(vds: &mut VirtualDataSpace) -> Result<(), VdsError> {
    match vds.strategy() {
        Policy::None => Ok(()),
        Policy::WorkflowAware => apply_workflow_aware(vds),
        Policy::StorageAware => apply_storage_aware(vds),
    }
}

fn apply_storage_aware(vds: &mut VirtualDataSpace) -> Result<(), VdsError> {
    let catalog = vds.catalog().clone();
    let Some(fast_tier) = fastest_tier(catalog.as_ref()) else {
        return Ok(());
    };
    let snapshot: Vec<VdoId> = vds.vdo_ids().to_vec();
    for vdo in snapshot {
        if !vds.vdo_exists(vdo) {
            continue;
        }
        if vds.vdo(vdo)?.non_movable {
            debug!(vds.child_logger("policy"), "skipping non-movable VDO"; "vdo_id" => vdo.to_string());
            continue;
        }
        vds.copy(vdo, &fast_tier)?;
    }
    Ok(())
}

fn apply_workflow_aware(vds: &mut VirtualDataSpace) -> Result<(), VdsError> {
    let catalog = vds.catalog().clone();
    let Some(fast_tier) = fastest_tier(catalog.as_ref()) else {
        return Ok(());
    };
    let snapshot: Vec<VdoId> = vds.vdo_ids().to_vec();
    for vdo_id in snapshot {
        if !vds.vdo_exists(vdo_id) {
            continue;
        }
        let vdo = vds.vdo(vdo_id)?;
        if vdo.non_movable {
            continue;
        }
        let producers = vdo.producers().to_vec();
        let consumers = vdo.consumers().to_vec();

        let should_relocate = if producers.is_empty() && !consumers.is_empty() {
            // Input: relocate only if staging-in can overlap upstream work.
            consumers
                .iter()
                .any(|&c| !vds.task(c).map(|t| t.predecessors_is_empty()).unwrap_or(true))
        } else if consumers.is_empty() && !producers.is_empty() {
            // Output: relocate only if staging-out can overlap downstream work.
            producers
                .iter()
                .any(|&p| !vds.task(p).map(|t| t.successors_is_empty()).unwrap_or(true))
        } else if !producers.is_empty() && !consumers.is_empty() {
            // Intermediate: always relocate.
            true
        } else {
            false
        };

        if should_relocate {
            vds.copy(vdo_id, &fast_tier)?;
        }
    }
    Ok(())
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
        tiers.insert(
            "burst".to_string(),
            TierInfo {
                mount: "/b".to_string(),
                persist: "none".to_string(),
                interface: "posix".to_string(),
                bandwidth: 1600,
            },
        );
        Arc::new(YamlStorageCatalog::from_tiers(tiers))
    }

    #[test]
    fn storage_aware_covers_every_movable_vdo_p10() {
        let mut vds = VirtualDataSpace::new(setup_test_logging(), catalog());
        vds.set_strategy(Policy::StorageAware);
        let a = vds.map("/s/in1");
        let b = vds.map("/s/in2");
        let task = vds.register_task(Task::new_compute("t", "cat"));
        vds.vdo_mut(a).unwrap().add_consumer(task);
        vds.vdo_mut(b).unwrap().add_consumer(task);

        apply(&mut vds).unwrap();

        assert_eq!(vds.vdo(a).unwrap().copy_to().len(), 1);
        assert_eq!(vds.vdo(b).unwrap().copy_to().len(), 1);
    }

    #[test]
    fn storage_aware_skips_non_movable() {
        let mut vds = VirtualDataSpace::new(setup_test_logging(), catalog());
        vds.set_strategy(Policy::StorageAware);
        let a = vds.map("/s/in2");
        vds.vdo_mut(a).unwrap().non_movable = true;
        let task = vds.register_task(Task::new_compute("t", "cat"));
        vds.vdo_mut(a).unwrap().add_consumer(task);

        apply(&mut vds).unwrap();
        assert!(vds.vdo(a).unwrap().copy_to().is_empty());
    }

    #[test]
    fn workflow_aware_skips_input_with_no_upstream_work() {
        let mut vds = VirtualDataSpace::new(setup_test_logging(), catalog());
        vds.set_strategy(Policy::WorkflowAware);
        let a = vds.map("/s/in1");
        let task = vds.register_task(Task::new_compute("t", "cat"));
        vds.vdo_mut(a).unwrap().add_consumer(task);

        apply(&mut vds).unwrap();
        // task has no predecessor, so staging-in cannot overlap anything.
        assert!(vds.vdo(a).unwrap().copy_to().is_empty());
    }

    #[test]
    fn workflow_aware_relocates_intermediate_always() {
        let mut vds = VirtualDataSpace::new(setup_test_logging(), catalog());
        vds.set_strategy(Policy::WorkflowAware);
        let a = vds.map("/s/tmp");
        let producer = vds.register_task(Task::new_compute("p", "make"));
        let consumer = vds.register_task(Task::new_compute("c", "use"));
        vds.vdo_mut(a).unwrap().add_producer(producer);
        vds.vdo_mut(a).unwrap().add_consumer(consumer);

        apply(&mut vds).unwrap();
        assert!(!vds.vdo_exists(a), "intermediate VDO should be folded via replace()");
    }

    #[test]
    fn policy_parses_from_cli_strings() {
        assert_eq!("none".parse::<Policy>().unwrap(), Policy::None);
        assert_eq!("workflow-aware".parse::<Policy>().unwrap(), Policy::WorkflowAware);
        assert_eq!("storage-aware".parse::<Policy>().unwrap(), Policy::StorageAware);
        assert!("bogus".parse::<Policy>().is_err());
    }
}
