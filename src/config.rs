//! TOML configuration for the `tw` CLI and the index engine.
//!
//! ```toml
//! [vault]
//! root = "./notes"
//! include_globs = ["**/*.md"]
//!
//! [registry]
//! path = ".tagweave/registry.json"
//!
//! [index]
//! batch_size = 50
//! max_relation_documents = 500
//! exclude_paths = [".trash/", "templates/"]
//!
//! [cost]
//! usd_per_million_tokens = 0.15
//! ```
//!
//! Every section except `[vault]` is optional and falls back to defaults.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub vault: VaultConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub cost: CostConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct VaultConfig {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string(), "**/*.txt".to_string()]
}

/// Where the concept registry lives, relative to the vault root.
#[derive(Debug, Deserialize, Clone)]
pub struct RegistryConfig {
    #[serde(default = "default_registry_path")]
    pub path: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            path: default_registry_path(),
        }
    }
}

fn default_registry_path() -> String {
    ".tagweave/registry.json".to_string()
}

/// Capacity limits and scheduling for index runs.
#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// Documents processed between yield/cancellation points.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Hard cap on documents per run; extra documents are dropped with a warning.
    #[serde(default = "default_max_documents")]
    pub max_documents: usize,
    /// Relations are skipped when more documents than this carry tags.
    #[serde(default = "default_max_relation_documents")]
    pub max_relation_documents: usize,
    /// Related concepts are skipped when the index holds more concepts than this.
    #[serde(default = "default_max_related_concept_pool")]
    pub max_related_concept_pool: usize,
    /// Maximum related concepts kept per concept.
    #[serde(default = "default_max_related_concepts")]
    pub max_related_concepts: usize,
    /// Iterations of the pairwise loops between yield/cancellation points.
    #[serde(default = "default_yield_interval")]
    pub yield_interval: usize,
    /// Documents whose path contains any of these substrings are skipped.
    #[serde(default = "default_exclude_paths")]
    pub exclude_paths: Vec<String>,
    /// Where `tw index` saves the snapshot, relative to the vault root.
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_documents: default_max_documents(),
            max_relation_documents: default_max_relation_documents(),
            max_related_concept_pool: default_max_related_concept_pool(),
            max_related_concepts: default_max_related_concepts(),
            yield_interval: default_yield_interval(),
            exclude_paths: default_exclude_paths(),
            snapshot_path: default_snapshot_path(),
        }
    }
}

fn default_batch_size() -> usize {
    50
}
fn default_max_documents() -> usize {
    5000
}
fn default_max_relation_documents() -> usize {
    500
}
fn default_max_related_concept_pool() -> usize {
    2000
}
fn default_max_related_concepts() -> usize {
    10
}
fn default_yield_interval() -> usize {
    1000
}
fn default_exclude_paths() -> Vec<String> {
    vec![".tagweave/".to_string(), ".trash/".to_string()]
}
fn default_snapshot_path() -> String {
    ".tagweave/index.json".to_string()
}

/// Inputs for [`estimate_cost`](crate::engine::IndexEngine::estimate_cost).
#[derive(Debug, Deserialize, Clone)]
pub struct CostConfig {
    #[serde(default = "default_chars_per_token")]
    pub chars_per_token: usize,
    #[serde(default = "default_usd_per_million_tokens")]
    pub usd_per_million_tokens: f64,
    /// Estimates above this amount carry a warning.
    #[serde(default = "default_warn_above_usd")]
    pub warn_above_usd: f64,
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            chars_per_token: default_chars_per_token(),
            usd_per_million_tokens: default_usd_per_million_tokens(),
            warn_above_usd: default_warn_above_usd(),
        }
    }
}

fn default_chars_per_token() -> usize {
    4
}
fn default_usd_per_million_tokens() -> f64 {
    0.15
}
fn default_warn_above_usd() -> f64 {
    1.0
}

impl IndexConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            anyhow::bail!("index.batch_size must be > 0");
        }
        if self.max_documents == 0 {
            anyhow::bail!("index.max_documents must be > 0");
        }
        if self.yield_interval == 0 {
            anyhow::bail!("index.yield_interval must be > 0");
        }
        if self.snapshot_path.trim().is_empty() {
            anyhow::bail!("index.snapshot_path must not be empty");
        }
        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.registry.path.trim().is_empty() {
        anyhow::bail!("registry.path must not be empty");
    }

    config.index.validate()?;

    if config.cost.chars_per_token == 0 {
        anyhow::bail!("cost.chars_per_token must be > 0");
    }
    if config.cost.usd_per_million_tokens < 0.0 {
        anyhow::bail!("cost.usd_per_million_tokens must be >= 0");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let f = write_config("[vault]\nroot = \"./notes\"\n");
        let config = load_config(f.path()).unwrap();
        assert_eq!(config.registry.path, ".tagweave/registry.json");
        assert_eq!(config.index.batch_size, 50);
        assert_eq!(config.index.max_relation_documents, 500);
        assert_eq!(config.cost.chars_per_token, 4);
        assert_eq!(config.vault.include_globs.len(), 2);
    }

    #[test]
    fn test_overrides() {
        let f = write_config(
            r#"
[vault]
root = "./notes"
include_globs = ["**/*.md"]

[index]
batch_size = 10
exclude_paths = ["templates/"]

[cost]
usd_per_million_tokens = 2.5
"#,
        );
        let config = load_config(f.path()).unwrap();
        assert_eq!(config.index.batch_size, 10);
        assert_eq!(config.index.exclude_paths, vec!["templates/".to_string()]);
        assert_eq!(config.index.max_documents, 5000);
        assert!((config.cost.usd_per_million_tokens - 2.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_rejects_zero_batch_size() {
        let f = write_config("[vault]\nroot = \".\"\n\n[index]\nbatch_size = 0\n");
        let err = load_config(f.path()).unwrap_err();
        assert!(err.to_string().contains("batch_size"));
    }

    #[test]
    fn test_rejects_empty_registry_path() {
        let f = write_config("[vault]\nroot = \".\"\n\n[registry]\npath = \"\"\n");
        assert!(load_config(f.path()).is_err());
    }

    #[test]
    fn test_missing_vault_section_fails() {
        let f = write_config("[index]\nbatch_size = 5\n");
        assert!(load_config(f.path()).is_err());
    }
}
