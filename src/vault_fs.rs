//! Filesystem [`Vault`] rooted at a directory.
//!
//! Listing walks the root with `walkdir`, applying include/exclude globs
//! against vault-relative paths. Reads and writes go through `tokio::fs`.
//! Paths handed to the vault are always relative and may not escape the
//! root.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

use crate::config::VaultConfig;
use crate::traits::{in_folder, DocumentInfo, Vault};

pub struct FsVault {
    root: PathBuf,
    include_set: GlobSet,
    exclude_set: GlobSet,
    follow_symlinks: bool,
}

impl FsVault {
    pub fn from_config(config: &VaultConfig) -> Result<Self> {
        if !config.root.exists() {
            bail!("Vault root does not exist: {}", config.root.display());
        }

        let include_set = build_globset(&config.include_globs)?;

        let mut default_excludes = vec![
            "**/.git/**".to_string(),
            "**/.obsidian/**".to_string(),
            "**/node_modules/**".to_string(),
        ];
        default_excludes.extend(config.exclude_globs.clone());
        let exclude_set = build_globset(&default_excludes)?;

        Ok(Self {
            root: config.root.clone(),
            include_set,
            exclude_set,
            follow_symlinks: config.follow_symlinks,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if path.is_empty() || escapes {
            bail!("Invalid vault path: {}", path);
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl Vault for FsVault {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let full = self.resolve(path)?;
        tokio::fs::read(&full)
            .await
            .with_context(|| format!("Failed to read {}", full.display()))
    }

    async fn write(&self, path: &str, contents: &[u8]) -> Result<()> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        tokio::fs::write(&full, contents)
            .await
            .with_context(|| format!("Failed to write {}", full.display()))
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let full = self.resolve(path)?;
        Ok(tokio::fs::try_exists(&full).await.unwrap_or(false))
    }

    async fn list(&self, folder: Option<&str>) -> Result<Vec<DocumentInfo>> {
        let mut docs = Vec::new();

        let walker = WalkDir::new(&self.root).follow_links(self.follow_symlinks);
        for entry in walker {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let relative = path.strip_prefix(&self.root).unwrap_or(path);
            let rel_str = relative.to_string_lossy().replace('\\', "/");

            if self.exclude_set.is_match(&rel_str) {
                continue;
            }
            if !self.include_set.is_match(&rel_str) {
                continue;
            }
            if let Some(folder) = folder {
                if !in_folder(&rel_str, folder) {
                    continue;
                }
            }

            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            docs.push(DocumentInfo {
                path: rel_str,
                size,
            });
        }

        // Sort for deterministic ordering
        docs.sort_by(|a, b| a.path.cmp(&b.path));

        Ok(docs)
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn vault_in(tmp: &TempDir) -> FsVault {
        FsVault::from_config(&VaultConfig {
            root: tmp.path().to_path_buf(),
            include_globs: vec!["**/*.md".to_string()],
            exclude_globs: vec!["drafts/**".to_string()],
            follow_symlinks: false,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_list_applies_globs_and_sorts() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("notes")).unwrap();
        fs::create_dir_all(tmp.path().join("drafts")).unwrap();
        fs::write(tmp.path().join("notes/b.md"), "b").unwrap();
        fs::write(tmp.path().join("a.md"), "a").unwrap();
        fs::write(tmp.path().join("notes/skip.txt"), "x").unwrap();
        fs::write(tmp.path().join("drafts/c.md"), "c").unwrap();

        let vault = vault_in(&tmp);
        let paths: Vec<String> = vault
            .list(None)
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.path)
            .collect();
        assert_eq!(paths, vec!["a.md".to_string(), "notes/b.md".to_string()]);

        let scoped = vault.list(Some("notes")).await.unwrap();
        assert_eq!(scoped.len(), 1);
    }

    #[tokio::test]
    async fn test_write_creates_parent_dirs() {
        let tmp = TempDir::new().unwrap();
        let vault = vault_in(&tmp);
        vault
            .write_text(".tagweave/registry.json", "{}")
            .await
            .unwrap();
        assert!(vault.exists(".tagweave/registry.json").await.unwrap());
        assert_eq!(
            vault.read_text(".tagweave/registry.json").await.unwrap(),
            "{}"
        );
    }

    #[tokio::test]
    async fn test_rejects_escaping_paths() {
        let tmp = TempDir::new().unwrap();
        let vault = vault_in(&tmp);
        assert!(vault.read("../etc/passwd").await.is_err());
        assert!(vault.write("/abs.md", b"x").await.is_err());
    }

    #[test]
    fn test_missing_root_fails() {
        let result = FsVault::from_config(&VaultConfig {
            root: PathBuf::from("/definitely/not/here"),
            include_globs: vec![],
            exclude_globs: vec![],
            follow_symlinks: false,
        });
        assert!(result.is_err());
    }
}
