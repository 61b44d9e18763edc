//! Collaborator traits: document storage and classification.
//!
//! tagweave never touches storage or language models directly. The host
//! supplies a [`Vault`] (byte-level document storage keyed by path) and,
//! optionally, a [`Classifier`] that proposes annotations for a document.
//!
//! ```text
//! ┌────────────┐     ┌──────────────┐     ┌──────────────┐
//! │ Classifier │──▶ │   TagStore    │──▶ │    Vault      │
//! │ (external) │     │ codec+registry│     │ FS / memory  │
//! └────────────┘     └──────┬───────┘     └──────────────┘
//!                           ▼
//!                    IndexEngine → IndexSnapshot
//! ```
//!
//! Built-in vaults: [`FsVault`](crate::vault_fs::FsVault) and
//! [`MemoryVault`](crate::vault_memory::MemoryVault).

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

// ═══════════════════════════════════════════════════════════════════════
// Vault Trait
// ═══════════════════════════════════════════════════════════════════════

/// A document visible in the vault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentInfo {
    /// Vault-relative path using `/` separators (e.g. `physics/energy.md`).
    pub path: String,
    /// Size in bytes.
    pub size: u64,
}

/// Byte-oriented document storage keyed by vault-relative path.
///
/// Implementations must be `Send + Sync` so the index engine can hold one
/// behind an `Arc` across await points.
#[async_trait]
pub trait Vault: Send + Sync {
    /// Read a document's raw bytes.
    async fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// Create or overwrite a document.
    async fn write(&self, path: &str, contents: &[u8]) -> Result<()>;

    /// Whether a document exists at `path`.
    async fn exists(&self, path: &str) -> Result<bool>;

    /// List indexable documents, optionally restricted to a folder prefix.
    async fn list(&self, folder: Option<&str>) -> Result<Vec<DocumentInfo>>;

    /// Read a document as UTF-8 text.
    async fn read_text(&self, path: &str) -> Result<String> {
        let bytes = self.read(path).await?;
        String::from_utf8(bytes).with_context(|| format!("Document is not valid UTF-8: {}", path))
    }

    /// Write a document from UTF-8 text.
    async fn write_text(&self, path: &str, contents: &str) -> Result<()> {
        self.write(path, contents.as_bytes()).await
    }
}

/// Whether `path` lies inside `folder` (a vault-relative prefix).
pub fn in_folder(path: &str, folder: &str) -> bool {
    let folder = folder.trim_matches('/');
    if folder.is_empty() {
        return true;
    }
    path.strip_prefix(folder)
        .map(|rest| rest.starts_with('/'))
        .unwrap_or(false)
}

// ═══════════════════════════════════════════════════════════════════════
// Classifier Trait
// ═══════════════════════════════════════════════════════════════════════

/// One annotation proposed by a classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    /// Type name; vocabulary names map to standard types, anything else
    /// becomes a custom type.
    pub tag_type: String,
    pub label: String,
    #[serde(default)]
    pub parent_label: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

/// Proposes annotations for a document's text.
///
/// Typically backed by a language model. Only used to populate annotations;
/// indexing never calls it.
///
/// # Example
///
/// ```rust
/// use anyhow::Result;
/// use async_trait::async_trait;
/// use tagweave::traits::{Classification, Classifier};
///
/// struct HeadingClassifier;
///
/// #[async_trait]
/// impl Classifier for HeadingClassifier {
///     async fn classify(&self, text: &str, _vocabulary: &[String]) -> Result<Vec<Classification>> {
///         Ok(text
///             .lines()
///             .filter_map(|l| l.strip_prefix("# "))
///             .map(|h| Classification {
///                 tag_type: "Concept".to_string(),
///                 label: h.to_string(),
///                 parent_label: None,
///                 confidence: None,
///             })
///             .collect())
///     }
/// }
/// ```
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, text: &str, vocabulary: &[String]) -> Result<Vec<Classification>>;
}
