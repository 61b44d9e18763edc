//! Concept identity registry.
//!
//! Maps a normalized label to one stable UUID for the whole corpus, so that
//! "Conservation of Energy" in one note and "conservation of energy!" in
//! another resolve to the same concept. Supports alias links and merging of
//! duplicate concepts, and persists as a versioned JSON document stored
//! through the [`Vault`].
//!
//! # Persisted layout
//!
//! ```text
//! {
//!   "version": 1,
//!   "lastUpdated": "2026-10-19T08:00:00Z",
//!   "concepts":  { "<normalized label>": { "id": "...", "canonicalLabel": "...", ... } },
//!   "uuidIndex": { "<uuid>": "<normalized label>" },
//!   "redirects": { "<merged uuid>": "<surviving uuid>" }
//! }
//! ```
//!
//! The registry is an owned value: load it once, pass it by reference to
//! whatever needs identity resolution, and call [`ConceptRegistry::save`]
//! after a batch of mutations. `save` only writes when something changed.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

use crate::models::{TagMetadata, TagType};
use crate::traits::Vault;

/// Current on-disk format version.
pub const REGISTRY_VERSION: u32 = 1;

/// Fold a label to its identity key: lowercase, trimmed, punctuation
/// stripped (letters, digits, whitespace and `-` survive), internal
/// whitespace collapsed to single spaces.
pub fn normalize(label: &str) -> String {
    let lowered = label.to_lowercase();
    let kept: String = lowered
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || *c == '-')
        .collect();
    kept.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Registry key for a label. Labels made entirely of stripped characters
/// fall back to their trimmed lowercase form so they still get an identity.
pub fn concept_key(label: &str) -> String {
    let key = normalize(label);
    if key.is_empty() {
        label.trim().to_lowercase()
    } else {
        key
    }
}

/// One concept known to the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConceptRegistryEntry {
    pub id: Uuid,
    /// Label as first seen, original casing.
    pub canonical_label: String,
    /// Primary lookup key.
    pub normalized_label: String,
    #[serde(rename = "type")]
    pub tag_type: TagType,
    pub first_seen_document: String,
    pub first_seen_timestamp: DateTime<Utc>,
    /// Normalized alternative labels that resolve to this concept.
    #[serde(default)]
    pub aliases: BTreeSet<String>,
    #[serde(default)]
    pub metadata: TagMetadata,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedRegistry {
    version: u32,
    last_updated: DateTime<Utc>,
    #[serde(default)]
    concepts: BTreeMap<String, ConceptRegistryEntry>,
    #[serde(default)]
    uuid_index: BTreeMap<Uuid, String>,
    #[serde(default)]
    redirects: BTreeMap<Uuid, Uuid>,
}

pub struct ConceptRegistry {
    path: String,
    concepts: BTreeMap<String, ConceptRegistryEntry>,
    uuid_index: BTreeMap<Uuid, String>,
    redirects: BTreeMap<Uuid, Uuid>,
    last_updated: DateTime<Utc>,
    dirty: bool,
}

impl ConceptRegistry {
    /// An empty registry that will persist to `path` inside the vault.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            concepts: BTreeMap::new(),
            uuid_index: BTreeMap::new(),
            redirects: BTreeMap::new(),
            last_updated: Utc::now(),
            dirty: false,
        }
    }

    /// Load the registry from the vault.
    ///
    /// A missing file is a first run: an empty registry is created and
    /// persisted immediately. A file that is not valid registry JSON is
    /// copied to `<path>.bak` and replaced by an empty registry.
    pub async fn load(vault: &dyn Vault, path: &str) -> Result<Self> {
        if !vault.exists(path).await? {
            tracing::info!(path, "no concept registry found, creating an empty one");
            let mut registry = Self::new(path);
            registry.dirty = true;
            registry.save(vault).await?;
            return Ok(registry);
        }

        let raw = vault
            .read_text(path)
            .await
            .with_context(|| format!("Failed to read concept registry: {}", path))?;

        match Self::parse(path, &raw) {
            Ok(registry) => {
                tracing::debug!(path, concepts = registry.len(), "loaded concept registry");
                Ok(registry)
            }
            Err(e) => {
                tracing::warn!(path, error = %e, "concept registry is corrupt, starting fresh");
                let backup = format!("{}.bak", path);
                if let Err(e) = vault.write_text(&backup, &raw).await {
                    tracing::warn!(path = %backup, error = %e, "could not back up corrupt registry");
                }
                let mut registry = Self::new(path);
                registry.dirty = true;
                Ok(registry)
            }
        }
    }

    fn parse(path: &str, raw: &str) -> Result<Self> {
        let mut value: serde_json::Value =
            serde_json::from_str(raw).with_context(|| "Registry is not valid JSON")?;
        let version = value
            .get("version")
            .and_then(|v| v.as_u64())
            .map(|v| v as u32)
            .ok_or_else(|| anyhow::anyhow!("Registry has no version"))?;

        let migrated = version != REGISTRY_VERSION;
        if migrated {
            value = migrate(value, version)?;
        }

        let persisted: PersistedRegistry =
            serde_json::from_value(value).with_context(|| "Registry has an unexpected shape")?;

        Ok(Self {
            path: path.to_string(),
            concepts: persisted.concepts,
            uuid_index: persisted.uuid_index,
            redirects: persisted.redirects,
            last_updated: persisted.last_updated,
            dirty: migrated,
        })
    }

    /// Persist the registry if it changed since the last save.
    ///
    /// Returns whether anything was written.
    pub async fn save(&mut self, vault: &dyn Vault) -> Result<bool> {
        if !self.dirty {
            return Ok(false);
        }
        self.last_updated = Utc::now();
        let persisted = PersistedRegistry {
            version: REGISTRY_VERSION,
            last_updated: self.last_updated,
            concepts: self.concepts.clone(),
            uuid_index: self.uuid_index.clone(),
            redirects: self.redirects.clone(),
        };
        let json = serde_json::to_string_pretty(&persisted)?;
        vault
            .write_text(&self.path, &json)
            .await
            .with_context(|| format!("Failed to write concept registry: {}", self.path))?;
        self.dirty = false;
        Ok(true)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn len(&self) -> usize {
        self.concepts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.concepts.is_empty()
    }

    pub fn last_updated(&self) -> DateTime<Utc> {
        self.last_updated
    }

    /// All entries, ordered by normalized label.
    pub fn entries(&self) -> impl Iterator<Item = &ConceptRegistryEntry> {
        self.concepts.values()
    }

    /// Primary key for a label, resolving aliases. No mutation.
    pub fn canonical_key(&self, label: &str) -> Option<&str> {
        let key = concept_key(label);
        if let Some((k, _)) = self.concepts.get_key_value(&key) {
            return Some(k.as_str());
        }
        // Alias scan is linear; concept counts stay in the low thousands.
        self.concepts
            .iter()
            .find(|(_, entry)| entry.aliases.contains(&key))
            .map(|(k, _)| k.as_str())
    }

    pub fn get_entry(&self, label: &str) -> Option<&ConceptRegistryEntry> {
        let key = self.canonical_key(label)?;
        self.concepts.get(key)
    }

    pub fn get_uuid(&self, label: &str) -> Option<Uuid> {
        self.get_entry(label).map(|e| e.id)
    }

    /// Reverse lookup by id, following merge redirects.
    pub fn get_by_uuid(&self, id: &Uuid) -> Option<&ConceptRegistryEntry> {
        let mut current = *id;
        // A redirect chain can never be longer than the number of merges.
        for _ in 0..=self.redirects.len() {
            if let Some(key) = self.uuid_index.get(&current) {
                return self.concepts.get(key);
            }
            current = *self.redirects.get(&current)?;
        }
        None
    }

    /// Resolve `label` to its concept id, creating the concept on first sight.
    ///
    /// Idempotent for labels with the same normalized form.
    pub fn get_or_create(&mut self, label: &str, tag_type: &TagType, source_document: &str) -> Uuid {
        if let Some(id) = self.get_uuid(label) {
            return id;
        }

        let key = concept_key(label);
        let id = Uuid::new_v4();
        let entry = ConceptRegistryEntry {
            id,
            canonical_label: label.trim().to_string(),
            normalized_label: key.clone(),
            tag_type: tag_type.clone(),
            first_seen_document: source_document.to_string(),
            first_seen_timestamp: Utc::now(),
            aliases: BTreeSet::new(),
            metadata: TagMetadata::new(),
        };
        tracing::debug!(label, %id, "registered new concept");
        self.uuid_index.insert(id, key.clone());
        self.concepts.insert(key, entry);
        self.dirty = true;
        id
    }

    /// Link `alias` to the concept `label` resolves to.
    ///
    /// Returns false when `label` is unknown, or when the alias already
    /// names a different concept (as its key or one of its aliases).
    pub fn add_alias(&mut self, label: &str, alias: &str) -> bool {
        let key = match self.canonical_key(label) {
            Some(k) => k.to_string(),
            None => return false,
        };
        let alias_key = concept_key(alias);
        if alias_key.is_empty() {
            return false;
        }

        if let Some(owner) = self.canonical_key(alias) {
            if owner != key {
                tracing::warn!(
                    alias,
                    owner,
                    target = %key,
                    "alias already resolves to another concept, not adding"
                );
                return false;
            }
            if owner == alias_key {
                // The alias is the concept's own key.
                return true;
            }
        }

        if let Some(entry) = self.concepts.get_mut(&key) {
            if entry.aliases.insert(alias_key) {
                self.dirty = true;
            }
            return true;
        }
        false
    }

    /// Fold the concept `merge_label` into `keep_label`.
    ///
    /// The merged concept's key and aliases become aliases of the kept
    /// concept, its entry and reverse-index row are removed, and its id is
    /// recorded as a redirect to the kept id so [`get_by_uuid`] keeps
    /// resolving annotations that still carry the old id. Annotation text is
    /// not rewritten.
    ///
    /// [`get_by_uuid`]: ConceptRegistry::get_by_uuid
    pub fn merge(&mut self, keep_label: &str, merge_label: &str) -> bool {
        let keep_key = match self.canonical_key(keep_label) {
            Some(k) => k.to_string(),
            None => return false,
        };
        let merge_key = match self.canonical_key(merge_label) {
            Some(k) => k.to_string(),
            None => return false,
        };
        if keep_key == merge_key {
            return false;
        }

        let merged = match self.concepts.remove(&merge_key) {
            Some(e) => e,
            None => return false,
        };
        self.uuid_index.remove(&merged.id);

        let keep_id = match self.concepts.get_mut(&keep_key) {
            Some(keep) => {
                keep.aliases.insert(merged.normalized_label.clone());
                keep.aliases.extend(merged.aliases.iter().cloned());
                keep.id
            }
            None => return false,
        };

        for target in self.redirects.values_mut() {
            if *target == merged.id {
                *target = keep_id;
            }
        }
        self.redirects.insert(merged.id, keep_id);

        tracing::info!(keep = %keep_key, merged = %merge_key, "merged concepts");
        self.dirty = true;
        true
    }

    /// Set one metadata value on the concept `id` resolves to, following
    /// merge redirects. Returns false for an unknown id.
    pub fn set_metadata(&mut self, id: &Uuid, key: &str, value: serde_json::Value) -> bool {
        let concept_key = match self.get_by_uuid(id) {
            Some(entry) => entry.normalized_label.clone(),
            None => return false,
        };
        let entry = match self.concepts.get_mut(&concept_key) {
            Some(entry) => entry,
            None => return false,
        };
        if entry.metadata.get(key) != Some(&value) {
            entry.metadata.insert(key.to_string(), value);
            self.dirty = true;
        }
        true
    }

    /// Forget every concept. Used for a corpus-wide reset.
    pub fn reset(&mut self) {
        self.concepts.clear();
        self.uuid_index.clear();
        self.redirects.clear();
        self.dirty = true;
    }
}

/// Bring an older registry document up to [`REGISTRY_VERSION`].
///
/// Only one format exists so far; the document is passed through and the
/// version is stamped.
fn migrate(mut value: serde_json::Value, from: u32) -> Result<serde_json::Value> {
    tracing::info!(from, to = REGISTRY_VERSION, "migrating concept registry");
    if let Some(obj) = value.as_object_mut() {
        obj.insert("version".to_string(), serde_json::json!(REGISTRY_VERSION));
    }
    Ok(value)
}
