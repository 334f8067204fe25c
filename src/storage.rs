//! The storage-tier catalog: a black-box collaborator (spec §1, §4.1/§6)
//! that maps datapaths to `(tier_id, relative_path)` pairs and answers
//! cheap content-comparison queries. A `YamlStorageCatalog` reads
//! `$MADATS_HOME/config/storage.yaml`, mirroring
//! `madats.core.storage.StorageHierarchy` in `original_source`.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("failed to read storage catalog {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse storage catalog {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("storage catalog has no 'system' key, or the named system is undefined")]
    MissingSystem,
}

impl crate::ErrorClassification for StorageError {
    fn is_retryable(&self) -> bool {
        false
    }
}

/// Properties of one storage tier, as listed by `list_tiers` (spec §4.1).
#[derive(Clone, Debug, Default, Deserialize)]
pub struct TierInfo {
    pub mount: String,
    #[serde(default)]
    pub persist: String,
    #[serde(default)]
    pub interface: String,
    #[serde(default)]
    pub bandwidth: u64,
}

/// Whether two datapaths currently hold identical content. `Unknown` is
/// returned instead of propagating a transient I/O failure (REDESIGN FLAGS
/// §9: "exception-for-control-flow in `same_content`"); callers must treat
/// `Unknown` as `Different` (spec §5).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContentComparison {
    Same,
    Different,
    Unknown,
}

impl ContentComparison {
    /// `Unknown` conservatively counts as `Different`, per spec §5/§9.
    pub fn is_same(self) -> bool {
        matches!(self, ContentComparison::Same)
    }
}

/// The external collaborator interface consumed by the VDS (spec §4.1).
/// `YamlStorageCatalog` is the reference implementation; tests substitute a
/// smaller in-memory catalog over temp directories.
pub trait StorageCatalog: Send + Sync {
    fn list_tiers(&self) -> BTreeMap<String, TierInfo>;
    fn tier_of(&self, abs_path: &str) -> (String, String);
    fn build_path(&self, tier_id: &str, relative_path: &str) -> String;
    fn same_content(&self, path_a: &str, path_b: &str) -> ContentComparison;
}

/// Reads `$MADATS_HOME/config/storage.yaml`. Unrecognized paths synthesize a
/// default tier id from the longest mount ancestor and register it so a
/// later lookup on the same prefix is stable within a run (spec §4.1,
/// mirroring `storage.py::StorageHierarchy.get_storage_id`).
pub struct YamlStorageCatalog {
    hierarchy: Mutex<BTreeMap<String, TierInfo>>,
}

#[derive(Deserialize)]
struct StorageYaml {
    system: String,
    #[serde(flatten)]
    systems: BTreeMap<String, BTreeMap<String, TierInfo>>,
}

impl YamlStorageCatalog {
    pub fn from_path(path: &Path) -> Result<YamlStorageCatalog, StorageError> {
        let text = fs::read_to_string(path).map_err(|source| StorageError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let parsed: StorageYaml =
            serde_yaml::from_str(&text).map_err(|source| StorageError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        let hierarchy = parsed
            .systems
            .get(&parsed.system)
            .cloned()
            .ok_or(StorageError::MissingSystem)?;
        Ok(YamlStorageCatalog {
            hierarchy: Mutex::new(hierarchy),
        })
    }

    pub fn from_tiers(tiers: BTreeMap<String, TierInfo>) -> YamlStorageCatalog {
        YamlStorageCatalog {
            hierarchy: Mutex::new(tiers),
        }
    }

    fn mount_for(&self, path: &str) -> (String, String) {
        let hierarchy = self.hierarchy.lock().unwrap();
        let mut best: Option<(&str, &str)> = None;
        for (id, info) in hierarchy.iter() {
            if path == info.mount || path.starts_with(&format!("{}/", info.mount)) {
                let better = match best {
                    Some((_, mount)) => info.mount.len() > mount.len(),
                    None => true,
                };
                if better {
                    best = Some((id, info.mount.as_str()));
                }
            }
        }
        match best {
            Some((id, mount)) => (id.to_string(), mount.to_string()),
            None => (String::new(), String::new()),
        }
    }
}

impl StorageCatalog for YamlStorageCatalog {
    fn list_tiers(&self) -> BTreeMap<String, TierInfo> {
        self.hierarchy.lock().unwrap().clone()
    }

    fn tier_of(&self, abs_path: &str) -> (String, String) {
        let (tier_id, mount) = self.mount_for(abs_path);
        if !tier_id.is_empty() {
            let relative = abs_path
                .strip_prefix(&mount)
                .unwrap_or(abs_path)
                .trim_start_matches('/')
                .to_string();
            return (tier_id, relative);
        }

        // Unrecognized path: synthesize a default id from the longest
        // mount-ish ancestor, never failing (spec §4.1).
        let ancestor = longest_existing_ancestor(abs_path);
        let synthesized = ancestor.replace('/', "_");
        let default_id = if synthesized == "_" {
            "root".to_string()
        } else {
            synthesized
        };

        let mut hierarchy = self.hierarchy.lock().unwrap();
        hierarchy.entry(default_id.clone()).or_insert(TierInfo {
            mount: ancestor.clone(),
            persist: "None".to_string(),
            interface: "posix".to_string(),
            bandwidth: 0,
        });
        drop(hierarchy);

        let relative = abs_path
            .strip_prefix(&ancestor)
            .unwrap_or(abs_path)
            .trim_start_matches('/')
            .to_string();
        (default_id, relative)
    }

    fn build_path(&self, tier_id: &str, relative_path: &str) -> String {
        let hierarchy = self.hierarchy.lock().unwrap();
        let mount = hierarchy
            .get(tier_id)
            .map(|t| t.mount.clone())
            .unwrap_or_else(|| format!("/{}", tier_id));
        if relative_path.is_empty() {
            mount
        } else {
            format!("{}/{}", mount.trim_end_matches('/'), relative_path)
        }
    }

    fn same_content(&self, path_a: &str, path_b: &str) -> ContentComparison {
        let (a, b) = (Path::new(path_a), Path::new(path_b));
        if !a.exists() || !b.exists() {
            return ContentComparison::Different;
        }
        if a.is_dir() != b.is_dir() {
            return ContentComparison::Different;
        }
        if a.is_dir() {
            return compare_dirs_shallow(a, b);
        }
        match (fs::read(a), fs::read(b)) {
            (Ok(ca), Ok(cb)) => {
                if ca == cb {
                    ContentComparison::Same
                } else {
                    ContentComparison::Different
                }
            }
            _ => ContentComparison::Unknown,
        }
    }
}

/// One-level directory compare: entry sets and immediate common files, not
/// a recursive walk (spec §4.1: "single-level directory compare").
fn compare_dirs_shallow(a: &Path, b: &Path) -> ContentComparison {
    let names = |dir: &Path| -> Option<std::collections::BTreeSet<std::ffi::OsString>> {
        fs::read_dir(dir)
            .ok()?
            .filter_map(|e| e.ok().map(|e| e.file_name()))
            .collect::<std::collections::BTreeSet<_>>()
            .into()
    };
    let (Some(names_a), Some(names_b)) = (names(a), names(b)) else {
        return ContentComparison::Unknown;
    };
    if names_a != names_b {
        return ContentComparison::Different;
    }
    for name in &names_a {
        let (pa, pb) = (a.join(name), b.join(name));
        if pa.is_file() && pb.is_file() {
            match (fs::read(&pa), fs::read(&pb)) {
                (Ok(ca), Ok(cb)) if ca == cb => continue,
                (Ok(_), Ok(_)) => return ContentComparison::Different,
                _ => return ContentComparison::Unknown,
            }
        }
    }
    ContentComparison::Same
}

fn longest_existing_ancestor(path: &str) -> String {
    let mut current = PathBuf::from(path);
    loop {
        if current.parent().is_none() || current.as_os_str() == "/" {
            return "/".to_string();
        }
        current = current.parent().unwrap().to_path_buf();
        if current.is_dir() || current.as_os_str() == "/" {
            return current.to_string_lossy().to_string();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiers() -> BTreeMap<String, TierInfo> {
        let mut m = BTreeMap::new();
        m.insert(
            "scratch".to_string(),
            TierInfo {
                mount: "/s".to_string(),
                persist: "short_term".to_string(),
                interface: "posix".to_string(),
                bandwidth: 700,
            },
        );
        m.insert(
            "burst".to_string(),
            TierInfo {
                mount: "/b".to_string(),
                persist: "none".to_string(),
                interface: "posix".to_string(),
                bandwidth: 1600,
            },
        );
        m
    }

    #[test]
    fn tier_of_matches_longest_mount() {
        let cat = YamlStorageCatalog::from_tiers(tiers());
        let (id, rel) = cat.tier_of("/s/in1");
        assert_eq!(id, "scratch");
        assert_eq!(rel, "in1");
    }

    #[test]
    fn build_path_roundtrips_tier_of() {
        let cat = YamlStorageCatalog::from_tiers(tiers());
        let (id, rel) = cat.tier_of("/b/dir/out");
        let rebuilt = cat.build_path(&id, &rel);
        assert_eq!(rebuilt, "/b/dir/out");
    }

    #[test]
    fn unrecognized_path_gets_synthesized_tier() {
        let cat = YamlStorageCatalog::from_tiers(tiers());
        let (id, _) = cat.tier_of("/tmp/elsewhere/file");
        assert!(!id.is_empty());
        // Stable across repeated lookups within a run.
        let (id2, _) = cat.tier_of("/tmp/elsewhere/other");
        assert_eq!(id, id2);
    }

    #[test]
    fn same_content_is_different_when_missing() {
        let cat = YamlStorageCatalog::from_tiers(tiers());
        assert_eq!(
            cat.same_content("/no/such/a", "/no/such/b"),
            ContentComparison::Different
        );
    }
}
