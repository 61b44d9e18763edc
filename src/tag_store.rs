//! Per-document tag operations.
//!
//! Every operation reads the whole document, rewrites its tag block through
//! the [codec](crate::tag_codec) and writes the document back when the text
//! changed. There is no locking: two writers racing on the same document is
//! the caller's problem.

use anyhow::{Context, Result};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{SemanticTag, TagDraft, TagUpdate};
use crate::registry::{normalize, ConceptRegistry};
use crate::tag_codec::{self, DecodedTag, WriteMode};
use crate::traits::Vault;

/// Tags found in one document plus the number of malformed fragments skipped.
#[derive(Debug, Clone, Default)]
pub struct DocumentTags {
    pub tags: Vec<DecodedTag>,
    pub skipped: usize,
}

impl DocumentTags {
    /// Decode a document's text; the first occurrence of each id wins.
    pub fn from_text(text: &str) -> Self {
        let report = tag_codec::decode_all_with_report(text);
        let mut seen = HashSet::new();
        let tags = report
            .tags
            .into_iter()
            .filter(|d| seen.insert(d.tag.id))
            .collect();
        Self {
            tags,
            skipped: report.skipped,
        }
    }

    pub fn into_tags(self) -> Vec<SemanticTag> {
        self.tags.into_iter().map(|d| d.tag).collect()
    }
}

#[derive(Clone)]
pub struct TagStore {
    vault: Arc<dyn Vault>,
}

impl TagStore {
    pub fn new(vault: Arc<dyn Vault>) -> Self {
        Self { vault }
    }

    pub fn vault(&self) -> &Arc<dyn Vault> {
        &self.vault
    }

    /// All tags in the document, first occurrence of each id wins.
    pub async fn read(&self, path: &str) -> Result<Vec<SemanticTag>> {
        Ok(self.read_with_report(path).await?.into_tags())
    }

    /// Like [`read`](TagStore::read), keeping line numbers and the skip count.
    pub async fn read_with_report(&self, path: &str) -> Result<DocumentTags> {
        let text = self.vault.read_text(path).await?;
        let tags = DocumentTags::from_text(&text);
        if tags.skipped > 0 {
            tracing::debug!(path, skipped = tags.skipped, "skipped malformed tag fragments");
        }
        Ok(tags)
    }

    /// Write `tags` into the document's block. Returns the resulting block
    /// contents; tags that came from `tags` keep their in-memory metadata.
    pub async fn write(
        &self,
        path: &str,
        tags: &[SemanticTag],
        mode: WriteMode,
    ) -> Result<Vec<SemanticTag>> {
        let text = self.vault.read_text(path).await?;
        let updated = tag_codec::write_block(&text, tags, mode);
        self.persist(path, &text, &updated).await?;

        let mut written = block_tags(&updated);
        for tag in written.iter_mut() {
            if let Some(source) = tags.iter().find(|t| t.id == tag.id) {
                tag.metadata = source.metadata.clone();
            }
        }
        Ok(written)
    }

    /// Remove the tags with the given ids, inside the block or not.
    /// Returns how many distinct ids were removed.
    pub async fn remove(&self, path: &str, ids: &[Uuid]) -> Result<usize> {
        let text = self.vault.read_text(path).await?;
        let present: HashSet<Uuid> = tag_codec::decode_all(&text)
            .into_iter()
            .map(|d| d.tag.id)
            .filter(|id| ids.contains(id))
            .collect();
        if present.is_empty() {
            return Ok(0);
        }

        let remaining: Vec<SemanticTag> = block_tags(&text)
            .into_iter()
            .filter(|t| !present.contains(&t.id))
            .collect();
        let stripped = tag_codec::strip_fragments(&text, &present);
        let updated = tag_codec::write_block(&stripped, &remaining, WriteMode::Replace);
        self.persist(path, &text, &updated).await?;
        Ok(present.len())
    }

    /// Apply a partial update to the tag with `id`. The id itself never changes.
    ///
    /// The tag is edited as [`read`](TagStore::read) sees it. Every copy of
    /// its fragment is dropped and the updated tag is written into the block,
    /// in place when it was already there.
    ///
    /// Returns false when the document has no such tag.
    pub async fn update(&self, path: &str, id: Uuid, update: &TagUpdate) -> Result<bool> {
        let text = self.vault.read_text(path).await?;
        let mut tag = match dedup(tag_codec::decode_all(&text))
            .into_iter()
            .find(|t| t.id == id)
        {
            Some(t) => t,
            None => return Ok(false),
        };
        update.apply(&mut tag);

        let mut block = block_tags(&text);
        match block.iter_mut().find(|t| t.id == id) {
            Some(slot) => *slot = tag,
            None => block.push(tag),
        }
        let stripped = tag_codec::strip_fragments(&text, &HashSet::from([id]));
        let updated = tag_codec::write_block(&stripped, &block, WriteMode::Replace);
        self.persist(path, &text, &updated).await?;
        Ok(true)
    }

    /// Drop the tag block entirely. Returns whether the document had one.
    pub async fn clear(&self, path: &str) -> Result<bool> {
        let text = self.vault.read_text(path).await?;
        if !tag_codec::has_block(&text) {
            return Ok(false);
        }
        let updated = tag_codec::remove_block(&text);
        self.persist(path, &text, &updated).await?;
        Ok(true)
    }

    /// Resolve drafts to registry ids and write them.
    ///
    /// Each draft's label goes through [`ConceptRegistry::get_or_create`], so
    /// the same concept carries the same id in every document. A parent label
    /// resolves against the other drafts first and then the registry; unknown
    /// parents are dropped. The caller saves the registry afterwards.
    pub async fn write_drafts(
        &self,
        registry: &mut ConceptRegistry,
        path: &str,
        drafts: &[TagDraft],
        mode: WriteMode,
    ) -> Result<Vec<SemanticTag>> {
        let tags = resolve_drafts(registry, path, drafts);
        self.write(path, &tags, mode)
            .await
            .with_context(|| format!("Failed to write tags to {}", path))
    }

    async fn persist(&self, path: &str, before: &str, after: &str) -> Result<()> {
        if before == after {
            return Ok(());
        }
        self.vault.write_text(path, after).await
    }
}

/// Turn drafts into tags with registry-assigned ids.
pub fn resolve_drafts(
    registry: &mut ConceptRegistry,
    path: &str,
    drafts: &[TagDraft],
) -> Vec<SemanticTag> {
    let mut batch_ids: HashMap<String, Uuid> = HashMap::new();
    let mut tags = Vec::with_capacity(drafts.len());

    for draft in drafts {
        let label = draft.label.trim();
        if label.is_empty() {
            continue;
        }
        let id = registry.get_or_create(label, &draft.tag_type, path);
        batch_ids.entry(normalize(label)).or_insert(id);
        tags.push(SemanticTag {
            tag_type: draft.tag_type.clone(),
            id,
            label: label.to_string(),
            parent_id: None,
            metadata: draft.metadata.clone(),
        });
    }

    let labelled = drafts.iter().filter(|d| !d.label.trim().is_empty());
    for (tag, draft) in tags.iter_mut().zip(labelled) {
        let parent_label = match draft.parent_label.as_deref() {
            Some(p) if !p.trim().is_empty() => p,
            _ => continue,
        };
        let parent_id = batch_ids
            .get(&normalize(parent_label))
            .copied()
            .or_else(|| registry.get_uuid(parent_label));
        match parent_id {
            Some(pid) if pid != tag.id => tag.parent_id = Some(pid),
            Some(_) => {}
            None => {
                tracing::debug!(path, parent = parent_label, "unknown parent label, dropping link");
            }
        }
    }

    tags
}

fn dedup(decoded: Vec<DecodedTag>) -> Vec<SemanticTag> {
    let mut seen = HashSet::new();
    decoded
        .into_iter()
        .map(|d| d.tag)
        .filter(|t| seen.insert(t.id))
        .collect()
}

fn block_tags(text: &str) -> Vec<SemanticTag> {
    tag_codec::extract_block(text)
        .map(|inner| dedup(tag_codec::decode_all(inner)))
        .unwrap_or_default()
}
