//! Configuration file parsing for alloc-track.toml.

use alloc_track::TrackerConfig;
use alloc_track_gc::GcConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Config file names to search for
const CONFIG_NAMES: &[&str] = &["alloc-track.toml", ".alloc-track.toml"];

/// Main configuration structure.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// Tracker settings
    #[serde(default)]
    pub tracker: TrackerConfig,

    /// Heap settings
    #[serde(default)]
    pub heap: HeapConfig,
}

/// Heap configuration.
#[derive(Debug, Deserialize)]
pub struct HeapConfig {
    /// Allocations between automatic collections (0 = never collect
    /// automatically)
    #[serde(default = "default_collect_threshold")]
    pub collect_threshold: usize,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            collect_threshold: default_collect_threshold(),
        }
    }
}

impl HeapConfig {
    /// Heap config for the reference runtime
    pub fn gc_config(&self) -> GcConfig {
        GcConfig {
            collect_threshold: (self.collect_threshold > 0).then_some(self.collect_threshold),
        }
    }
}

fn default_collect_threshold() -> usize {
    GcConfig::default().collect_threshold.unwrap_or(0)
}

/// Load configuration from a file or search for default config files.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let config_path = match path {
        Some(path) => Some(path.to_path_buf()),
        None => std::env::current_dir()
            .ok()
            .and_then(|cwd| find_config_file(&cwd)),
    };

    match config_path {
        Some(path) if path.exists() => {
            let content = std::fs::read_to_string(&path)?;
            let config: Config = toml::from_str(&content)
                .map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", path.display(), e))?;
            tracing::debug!(path = %path.display(), "loaded config");
            Ok(config)
        }
        _ => Ok(Config::default()),
    }
}

/// Search for a configuration file in `start` and its parent directories.
fn find_config_file(start: &Path) -> Option<PathBuf> {
    let mut dir = Some(start);
    while let Some(current) = dir {
        for name in CONFIG_NAMES {
            let path = current.join(name);
            if path.exists() {
                return Some(path);
            }
        }
        dir = current.parent();
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc_track::TrackingPolicy;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.tracker.policy, TrackingPolicy::Exclusive);
        assert!(config.tracker.reprieve);
        assert_eq!(config.heap.collect_threshold, 10_000);
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[tracker]
policy = "per-thread"
reprieve = false

[heap]
collect_threshold = 0
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.tracker.policy, TrackingPolicy::PerThread);
        assert!(!config.tracker.reprieve);
        assert_eq!(config.heap.gc_config().collect_threshold, None);
    }

    #[test]
    fn test_parse_partial_config() {
        let config: Config = toml::from_str("[heap]\ncollect_threshold = 500\n").unwrap();
        assert!(config.tracker.reprieve);
        assert_eq!(config.heap.gc_config().collect_threshold, Some(500));
    }

    #[test]
    fn test_unknown_policy_is_rejected() {
        let result: Result<Config, _> = toml::from_str("[tracker]\npolicy = \"global\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_load_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "[tracker]\nreprieve = false\n").unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert!(!config.tracker.reprieve);
    }

    #[test]
    fn test_load_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alloc-track.toml");
        std::fs::write(&path, "[tracker\n").unwrap();

        let err = load_config(Some(&path)).unwrap_err();
        assert!(err.to_string().starts_with("Failed to parse"));
    }

    #[test]
    fn test_find_config_in_ancestors() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(dir.path().join(".alloc-track.toml"), "").unwrap();

        let found = find_config_file(&nested).unwrap();
        assert_eq!(found, dir.path().join(".alloc-track.toml"));
    }
}
