//! Snapshot persistence.
//!
//! `tw index` writes the snapshot it built to `[index].snapshot_path` inside
//! the vault; the query commands (`stats`, `search`, `concept`, ...) load it
//! back instead of rescanning.

use anyhow::{Context, Result};

use crate::snapshot::IndexSnapshot;
use crate::traits::Vault;

/// Write `snapshot` as pretty-printed JSON.
pub async fn save_snapshot(vault: &dyn Vault, path: &str, snapshot: &IndexSnapshot) -> Result<()> {
    let json = serde_json::to_string_pretty(snapshot)?;
    vault
        .write_text(path, &json)
        .await
        .with_context(|| format!("Failed to save index snapshot to {}", path))?;
    tracing::debug!(path, bytes = json.len(), "saved index snapshot");
    Ok(())
}

/// Load a saved snapshot. `None` when nothing has been indexed yet.
pub async fn load_snapshot(vault: &dyn Vault, path: &str) -> Result<Option<IndexSnapshot>> {
    if !vault.exists(path).await? {
        return Ok(None);
    }
    let text = vault.read_text(path).await?;
    let snapshot = serde_json::from_str(&text)
        .with_context(|| format!("Corrupt index snapshot at {}; run `tw index` again", path))?;
    Ok(Some(snapshot))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{ConceptEntry, IndexMetadata, Scope};
    use crate::vault_memory::MemoryVault;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn test_missing_snapshot_is_none() {
        let vault = MemoryVault::new();
        assert!(load_snapshot(&vault, ".tagweave/index.json")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let vault = MemoryVault::new();
        let mut metadata = IndexMetadata::new(&Scope::Folder("notes".to_string()));
        metadata.total_documents = 7;
        let snapshot = IndexSnapshot::new(
            metadata,
            vec![ConceptEntry::new("Energy", "energy", "notes/a.md")],
            Vec::new(),
            BTreeMap::new(),
        );
        save_snapshot(&vault, ".tagweave/index.json", &snapshot)
            .await
            .unwrap();

        let loaded = load_snapshot(&vault, ".tagweave/index.json")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.metadata, snapshot.metadata);
        assert!(loaded.get_concept("Energy").is_some());
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_errors() {
        let vault = MemoryVault::with_documents([(".tagweave/index.json", "{ nope")]);
        assert!(load_snapshot(&vault, ".tagweave/index.json").await.is_err());
    }
}
