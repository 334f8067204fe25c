//! Shared test fixtures (spec §8: "integration tests... using temp-directory
//! storage tiers"), mirroring `facilitator::test_utils`'s role as a small
//! library of default values reused by both unit and integration tests.
//! Kept dependency-free beyond what the library already needs, so it can stay
//! a plain (non-`cfg(test)`) module the way the teacher's is.

use crate::config::MadatsConfig;
use crate::storage::{TierInfo, YamlStorageCatalog};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Builds a `YamlStorageCatalog` in memory from `(tier_id, mount, bandwidth)`
/// triples, without touching disk. Every tier is given `persist: "none"` and
/// `interface: "posix"`; callers that need a different persistence class
/// should follow up with `VirtualDataSpace::set_persistence` on the VDOs that
/// matter rather than varying it per tier.
pub fn catalog_with_tiers(tiers: &[(&str, &str, u64)]) -> Arc<YamlStorageCatalog> {
    let mut map = BTreeMap::new();
    for &(id, mount, bandwidth) in tiers {
        map.insert(
            id.to_string(),
            TierInfo {
                mount: mount.to_string(),
                persist: "none".to_string(),
                interface: "posix".to_string(),
                bandwidth,
            },
        );
    }
    Arc::new(YamlStorageCatalog::from_tiers(map))
}

/// Writes a `storage.yaml` under `home/config/` naming a single system with
/// the given `(tier_id, mount, bandwidth)` tiers, and returns a `MadatsConfig`
/// rooted at `home`. `home` must already exist (callers typically pass a
/// `tempfile::TempDir::path()`).
pub fn write_madats_home(home: &Path, tiers: &[(&str, &str, u64)]) -> MadatsConfig {
    let config_dir = home.join("config");
    std::fs::create_dir_all(&config_dir).expect("create config dir");

    let mut yaml = String::from("system: test\ntest:\n");
    for &(id, mount, bandwidth) in tiers {
        yaml.push_str(&format!(
            "  {id}:\n    mount: \"{mount}\"\n    persist: \"none\"\n    interface: \"posix\"\n    bandwidth: {bandwidth}\n",
            id = id,
            mount = mount,
            bandwidth = bandwidth,
        ));
    }
    std::fs::write(config_dir.join("storage.yaml"), yaml).expect("write storage.yaml");

    MadatsConfig::from_home(home.to_path_buf()).expect("home is a directory")
}
