//! Runtime configuration: `MADATS_HOME` resolution and the small set of
//! config-adjacent value types (durations) shared across modules.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::{
    env,
    fmt::{self, Display},
    path::{Path, PathBuf},
    str::FromStr,
};

/// Environment variable naming the madats home directory, per spec §6.
pub const MADATS_HOME_VAR: &str = "MADATS_HOME";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("MADATS_HOME is not set")]
    MissingHome,
    #[error("MADATS_HOME {0:?} does not exist or is not a directory")]
    InvalidHome(PathBuf),
}

impl crate::ErrorClassification for ConfigError {
    fn is_retryable(&self) -> bool {
        false
    }
}

/// Resolves the madats home directory and the config/outdir paths rooted
/// under it, as named in spec §6.
#[derive(Clone, Debug)]
pub struct MadatsConfig {
    home: PathBuf,
}

impl MadatsConfig {
    /// Reads `MADATS_HOME` from the environment. A missing or non-directory
    /// value is a configuration error (spec §7, exit code 3).
    pub fn from_env() -> Result<MadatsConfig, ConfigError> {
        let home = env::var_os(MADATS_HOME_VAR).ok_or(ConfigError::MissingHome)?;
        MadatsConfig::from_home(PathBuf::from(home))
    }

    pub fn from_home(home: PathBuf) -> Result<MadatsConfig, ConfigError> {
        if !home.is_dir() {
            return Err(ConfigError::InvalidHome(home));
        }
        Ok(MadatsConfig { home })
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn storage_catalog_path(&self) -> PathBuf {
        self.home.join("config").join("storage.yaml")
    }

    pub fn scheduler_config_path(&self, name: &str) -> PathBuf {
        self.home.join("config").join(format!("{}.cfg", name))
    }

    /// Directory scripts for `workflow_id` are synthesized into, per spec
    /// §4.7/§6: `MADATS_HOME/outdir/<workflow_id>/`.
    pub fn outdir(&self, workflow_id: &str) -> PathBuf {
        self.home.join("outdir").join(workflow_id)
    }
}

/// A duration expressed in whole hours/minutes/seconds, as used in scheduler
/// option values (e.g. a walltime directive). Parsed and displayed like
/// `1h30m20s`; kept as a plain value type rather than a `chrono::Duration`
/// since scheduler config values are read from disk as strings.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub struct WallDuration {
    hours: u32,
    minutes: u32,
    seconds: u32,
}

impl WallDuration {
    pub fn from_hms(hours: u32, minutes: u32, seconds: u32) -> WallDuration {
        WallDuration {
            hours,
            minutes,
            seconds,
        }
    }

    pub fn to_chrono(&self) -> chrono::Duration {
        chrono::Duration::hours(self.hours.into())
            + chrono::Duration::minutes(self.minutes.into())
            + chrono::Duration::seconds(self.seconds.into())
    }
}

impl Display for WallDuration {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.hours != 0 {
            write!(f, "{}h", self.hours)?;
        }
        if self.minutes != 0 {
            write!(f, "{}m", self.minutes)?;
        }
        if self.seconds != 0 || (self.hours == 0 && self.minutes == 0) {
            write!(f, "{}s", self.seconds)?;
        }
        Ok(())
    }
}

impl FromStr for WallDuration {
    type Err = String;

    /// Parses `<N>h<N>m<N>s`, each component optional, in that order, with no
    /// separators other than the unit letters (e.g. `1h30m`, `45s`, `2h`).
    fn from_str(s: &str) -> Result<WallDuration, String> {
        let mut rest = s;
        let mut take = |unit: char| -> Result<u32, String> {
            let end = match rest.find(unit) {
                Some(idx) => idx,
                None => return Ok(0),
            };
            let digits = &rest[..end];
            rest = &rest[end + unit.len_utf8()..];
            if digits.is_empty() {
                return Err(format!("expected digits before '{}'", unit));
            }
            digits
                .parse()
                .map_err(|e| format!("failed to parse {}: {}", unit, e))
        };

        let hours = take('h')?;
        let minutes = take('m')?;
        let seconds = take('s')?;

        if !rest.is_empty() {
            return Err("not in expected format (e.g. 1h30m20s)".to_string());
        }
        if s.is_empty() {
            return Err("not in expected format (e.g. 1h30m20s)".to_string());
        }
        Ok(WallDuration {
            hours,
            minutes,
            seconds,
        })
    }
}

impl Serialize for WallDuration {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for WallDuration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<WallDuration, D::Error> {
        String::deserialize(deserializer)?
            .parse()
            .map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wallduration_roundtrip() {
        let cases = [
            (WallDuration::from_hms(0, 0, 0), "0s"),
            (WallDuration::from_hms(11, 0, 0), "11h"),
            (WallDuration::from_hms(0, 22, 0), "22m"),
            (WallDuration::from_hms(0, 0, 33), "33s"),
            (WallDuration::from_hms(11, 22, 33), "11h22m33s"),
        ];
        for (duration, text) in cases {
            assert_eq!(duration.to_string(), text);
            assert_eq!(WallDuration::from_str(text).unwrap(), duration);
        }
    }

    #[test]
    fn wallduration_rejects_garbage() {
        assert!(WallDuration::from_str("not-a-duration").is_err());
        assert!(WallDuration::from_str("h30m").is_err());
    }

    #[test]
    fn config_requires_existing_directory() {
        let err = MadatsConfig::from_home(PathBuf::from("/no/such/madats/home")).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidHome(_)));
    }

    #[test]
    fn config_paths_are_rooted_under_home() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = MadatsConfig::from_home(tmp.path().to_path_buf()).unwrap();
        assert_eq!(
            cfg.storage_catalog_path(),
            tmp.path().join("config").join("storage.yaml")
        );
        assert_eq!(
            cfg.scheduler_config_path("slurm"),
            tmp.path().join("config").join("slurm.cfg")
        );
        assert_eq!(cfg.outdir("wf-1"), tmp.path().join("outdir").join("wf-1"));
    }
}
