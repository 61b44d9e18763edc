//! Classification pipeline: classifier output → registry ids → tag block.
//!
//! The classifier sees the document body with the tag block stripped, so
//! earlier annotations never feed back into new ones.

use anyhow::{Context, Result};
use serde_json::json;

use crate::models::{SemanticTag, StandardType, TagDraft, TagMetadata, TagType};
use crate::registry::ConceptRegistry;
use crate::tag_codec::{self, WriteMode};
use crate::tag_store::TagStore;
use crate::traits::{Classification, Classifier};

/// Metadata key for the classifier's confidence in a tag.
pub const CONFIDENCE_KEY: &str = "confidence";

/// The standard vocabulary as type names, for passing to a classifier.
pub fn default_vocabulary() -> Vec<String> {
    StandardType::ALL
        .iter()
        .map(|t| t.as_str().to_string())
        .collect()
}

/// Map classifier output to drafts. Empty labels are dropped; confidence is
/// kept in the draft's metadata.
pub fn to_drafts(classifications: &[Classification]) -> Vec<TagDraft> {
    classifications
        .iter()
        .filter(|c| !c.label.trim().is_empty())
        .map(|c| {
            let metadata = c.confidence.map(|conf| {
                let mut m = TagMetadata::new();
                m.insert(CONFIDENCE_KEY.to_string(), json!(conf));
                m
            });
            TagDraft {
                tag_type: TagType::from_name(&c.tag_type),
                label: c.label.trim().to_string(),
                parent_label: c.parent_label.clone(),
                metadata,
            }
        })
        .collect()
}

/// Classify one document and write the resulting tags.
///
/// The returned tags carry the classifier's confidence in their metadata,
/// and the confidence is also recorded on each concept's registry entry,
/// which is where it persists. The registry is mutated but not saved; save
/// it once the batch of documents is done.
pub async fn classify_document(
    classifier: &dyn Classifier,
    store: &TagStore,
    registry: &mut ConceptRegistry,
    path: &str,
    vocabulary: &[String],
    mode: WriteMode,
) -> Result<Vec<SemanticTag>> {
    let text = store.vault().read_text(path).await?;
    let body = tag_codec::remove_block(&text);

    let classifications = classifier
        .classify(&body, vocabulary)
        .await
        .with_context(|| format!("Classifier failed for {}", path))?;
    let drafts = to_drafts(&classifications);
    tracing::debug!(path, proposed = classifications.len(), kept = drafts.len(), "classified document");

    let tags = store.write_drafts(registry, path, &drafts, mode).await?;
    for tag in &tags {
        if let Some(confidence) = tag.metadata.as_ref().and_then(|m| m.get(CONFIDENCE_KEY)) {
            registry.set_metadata(&tag.id, CONFIDENCE_KEY, confidence.clone());
        }
    }
    Ok(tags)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault_memory::MemoryVault;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    /// Returns fixed classifications and records the text it was given.
    struct FixedClassifier {
        output: Vec<Classification>,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Classifier for FixedClassifier {
        async fn classify(&self, text: &str, _vocabulary: &[String]) -> Result<Vec<Classification>> {
            self.seen.lock().unwrap().push(text.to_string());
            Ok(self.output.clone())
        }
    }

    fn classification(tag_type: &str, label: &str, parent: Option<&str>) -> Classification {
        Classification {
            tag_type: tag_type.to_string(),
            label: label.to_string(),
            parent_label: parent.map(|p| p.to_string()),
            confidence: Some(0.9),
        }
    }

    #[test]
    fn test_to_drafts_maps_types() {
        let drafts = to_drafts(&[
            classification("axiom", "Energy", None),
            classification("Lemma", "Small result", Some("Energy")),
            classification("Claim", "  ", None),
        ]);
        assert_eq!(drafts.len(), 2);
        assert_eq!(drafts[0].tag_type, TagType::Standard(StandardType::Axiom));
        assert_eq!(drafts[1].tag_type, TagType::Custom("Lemma".to_string()));
        assert_eq!(
            drafts[0].metadata.as_ref().unwrap().get("confidence"),
            Some(&json!(0.9))
        );
    }

    #[test]
    fn test_default_vocabulary_lists_standard_types() {
        let vocab = default_vocabulary();
        assert_eq!(vocab.len(), StandardType::ALL.len());
        assert!(vocab.contains(&"Hypothesis".to_string()));
    }

    #[tokio::test]
    async fn test_classify_document_writes_resolved_tags() {
        let vault = Arc::new(MemoryVault::with_documents([("a.md", "Energy is conserved.")]));
        let store = TagStore::new(vault.clone());
        let mut registry = ConceptRegistry::new(".tagweave/registry.json");
        let classifier = FixedClassifier {
            output: vec![
                classification("Concept", "Energy", None),
                classification("Claim", "Energy is conserved", Some("Energy")),
            ],
            seen: Mutex::new(Vec::new()),
        };

        let tags = classify_document(
            &classifier,
            &store,
            &mut registry,
            "a.md",
            &default_vocabulary(),
            WriteMode::Replace,
        )
        .await
        .unwrap();
        assert_eq!(tags.len(), 2);
        assert_eq!(tags[1].parent_id, Some(tags[0].id));
        assert_eq!(registry.get_uuid("energy"), Some(tags[0].id));
        assert!(registry.is_dirty());
        assert_eq!(
            tags[0].metadata.as_ref().unwrap().get(CONFIDENCE_KEY),
            Some(&json!(0.9))
        );
        assert_eq!(
            registry.get_entry("Energy").unwrap().metadata.get(CONFIDENCE_KEY),
            Some(&json!(0.9))
        );

        // Second pass: the classifier must not see the block written by the first.
        classify_document(
            &classifier,
            &store,
            &mut registry,
            "a.md",
            &default_vocabulary(),
            WriteMode::Merge,
        )
        .await
        .unwrap();
        assert_eq!(store.read("a.md").await.unwrap().len(), 2);
        let seen = classifier.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(!seen[1].contains("%%tag::"));
    }
}
