//! In-memory [`Vault`] implementation for tests and embedding.
//!
//! Documents live in a `BTreeMap` behind `std::sync::RwLock`, so listing is
//! naturally sorted by path.

use std::collections::BTreeMap;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::traits::{in_folder, DocumentInfo, Vault};

/// In-memory vault keyed by vault-relative path.
pub struct MemoryVault {
    docs: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryVault {
    pub fn new() -> Self {
        Self {
            docs: RwLock::new(BTreeMap::new()),
        }
    }

    /// Build a vault from `(path, text)` pairs.
    pub fn with_documents<I, P, T>(docs: I) -> Self
    where
        I: IntoIterator<Item = (P, T)>,
        P: Into<String>,
        T: Into<String>,
    {
        let map = docs
            .into_iter()
            .map(|(p, t)| (p.into(), t.into().into_bytes()))
            .collect();
        Self {
            docs: RwLock::new(map),
        }
    }

    /// Insert or replace a document synchronously.
    pub fn insert(&self, path: impl Into<String>, contents: impl Into<Vec<u8>>) -> Result<()> {
        let mut docs = self.docs.write().map_err(|_| anyhow!("vault lock poisoned"))?;
        docs.insert(path.into(), contents.into());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.docs.read().map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryVault {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Vault for MemoryVault {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let docs = self.docs.read().map_err(|_| anyhow!("vault lock poisoned"))?;
        docs.get(path)
            .cloned()
            .ok_or_else(|| anyhow!("document not found: {}", path))
    }

    async fn write(&self, path: &str, contents: &[u8]) -> Result<()> {
        let mut docs = self.docs.write().map_err(|_| anyhow!("vault lock poisoned"))?;
        docs.insert(path.to_string(), contents.to_vec());
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let docs = self.docs.read().map_err(|_| anyhow!("vault lock poisoned"))?;
        Ok(docs.contains_key(path))
    }

    async fn list(&self, folder: Option<&str>) -> Result<Vec<DocumentInfo>> {
        let docs = self.docs.read().map_err(|_| anyhow!("vault lock poisoned"))?;
        Ok(docs
            .iter()
            .filter(|(path, _)| folder.map(|f| in_folder(path, f)).unwrap_or(true))
            .map(|(path, body)| DocumentInfo {
                path: path.clone(),
                size: body.len() as u64,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_write_roundtrip() {
        let vault = MemoryVault::new();
        vault.write_text("a.md", "hello").await.unwrap();
        assert_eq!(vault.read_text("a.md").await.unwrap(), "hello");
        assert!(vault.exists("a.md").await.unwrap());
        assert!(!vault.exists("b.md").await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_document_is_an_error() {
        let vault = MemoryVault::new();
        assert!(vault.read("missing.md").await.is_err());
    }

    #[tokio::test]
    async fn test_list_filters_by_folder() {
        let vault = MemoryVault::with_documents([
            ("physics/energy.md", "x"),
            ("physics/mass.md", "yy"),
            ("biology/cell.md", "z"),
        ]);
        let all = vault.list(None).await.unwrap();
        assert_eq!(all.len(), 3);
        let physics = vault.list(Some("physics")).await.unwrap();
        let paths: Vec<&str> = physics.iter().map(|d| d.path.as_str()).collect();
        assert_eq!(paths, vec!["physics/energy.md", "physics/mass.md"]);
        assert_eq!(physics[1].size, 2);
    }

    #[tokio::test]
    async fn test_invalid_utf8_fails_read_text() {
        let vault = MemoryVault::new();
        vault.insert("bad.md", vec![0xff, 0xfe]).unwrap();
        assert!(vault.read_text("bad.md").await.is_err());
    }
}
