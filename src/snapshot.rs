//! Index snapshot data model.
//!
//! A snapshot is the complete result of one index run:
//!
//! ```text
//! IndexSnapshot
//! ├── metadata                  counts, timing, capacity flags, warnings
//! ├── concepts                  insertion-ordered, keyed by normalized label
//! │   └── ConceptEntry          occurrences, counts, types, related concepts
//! ├── relations                 one row per document pair sharing a concept
//! └── per_document_annotations  path → tags as read from the document
//! ```
//!
//! Concepts keep the order in which the scan first met them. The lookup
//! table from normalized label to position is not serialized; it is rebuilt
//! when a snapshot is deserialized.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use uuid::Uuid;

use crate::models::{SemanticTag, TagType};
use crate::traits::in_folder;

/// Which part of the vault an index run covers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Scope {
    #[default]
    All,
    Folder(String),
}

impl Scope {
    pub fn from_folder(folder: Option<&str>) -> Self {
        match folder {
            Some(f) if !f.trim_matches('/').is_empty() => Scope::Folder(f.to_string()),
            _ => Scope::All,
        }
    }

    pub fn folder(&self) -> Option<&str> {
        match self {
            Scope::All => None,
            Scope::Folder(f) => Some(f),
        }
    }

    pub fn contains(&self, path: &str) -> bool {
        match self {
            Scope::All => true,
            Scope::Folder(f) => in_folder(path, f),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Scope::All => "all".to_string(),
            Scope::Folder(f) => format!("folder:{}", f.trim_matches('/')),
        }
    }
}

/// Lifecycle of an index run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexState {
    Idle,
    Scanning,
    AggregatingRelations,
    SkippingRelations,
    Done,
    Aborted,
}

/// One tag instance of a concept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Occurrence {
    pub document_path: String,
    pub annotation_id: Uuid,
    pub tag_type: TagType,
    /// 1-based line of the fragment in the document.
    pub position: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConceptEntry {
    /// Display label: the registry's canonical label when known, otherwise
    /// the label of the first occurrence.
    pub label: String,
    pub normalized_label: String,
    pub occurrences: Vec<Occurrence>,
    /// Path of the document where the scan first met this concept.
    pub first_seen: String,
    pub total_count: usize,
    pub distinct_document_count: usize,
    pub types_seen: BTreeSet<TagType>,
    /// Normalized labels of co-occurring concepts, strongest first.
    pub related_concept_labels: Vec<String>,
}

impl ConceptEntry {
    pub(crate) fn new(label: &str, normalized_label: &str, first_seen: &str) -> Self {
        Self {
            label: label.to_string(),
            normalized_label: normalized_label.to_string(),
            occurrences: Vec::new(),
            first_seen: first_seen.to_string(),
            total_count: 0,
            distinct_document_count: 0,
            types_seen: BTreeSet::new(),
            related_concept_labels: Vec::new(),
        }
    }

    /// Distinct documents among the occurrences.
    pub fn document_paths(&self) -> BTreeSet<&str> {
        self.occurrences
            .iter()
            .map(|o| o.document_path.as_str())
            .collect()
    }

    /// Add one occurrence. `first_in_document` marks the first occurrence
    /// of this concept in its document; the caller tracks that per scan.
    pub(crate) fn record(&mut self, occurrence: Occurrence, first_in_document: bool) {
        self.types_seen.insert(occurrence.tag_type.clone());
        self.occurrences.push(occurrence);
        self.total_count += 1;
        if first_in_document {
            self.distinct_document_count += 1;
        }
    }
}

/// Two documents sharing at least one concept. `document_a < document_b`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossDocumentRelation {
    pub document_a: String,
    pub document_b: String,
    pub shared_normalized_labels: Vec<String>,
    /// Shared count over the larger document's distinct concept count.
    pub strength: f64,
}

impl CrossDocumentRelation {
    pub(crate) fn new(
        path_a: &str,
        path_b: &str,
        shared: Vec<String>,
        concepts_a: usize,
        concepts_b: usize,
    ) -> Self {
        let (document_a, document_b) = if path_a <= path_b {
            (path_a, path_b)
        } else {
            (path_b, path_a)
        };
        let denominator = concepts_a.max(concepts_b).max(1);
        Self {
            document_a: document_a.to_string(),
            document_b: document_b.to_string(),
            strength: shared.len() as f64 / denominator as f64,
            shared_normalized_labels: shared,
        }
    }

    /// The document on the other side of this relation, if `path` is on one.
    pub fn other(&self, path: &str) -> Option<&str> {
        if self.document_a == path {
            Some(&self.document_b)
        } else if self.document_b == path {
            Some(&self.document_a)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub scope: String,
    /// Documents actually scanned. Lower than the in-scope count when the
    /// run was aborted or truncated.
    pub total_documents: usize,
    pub documents_with_tags: usize,
    pub total_annotations: usize,
    pub total_concepts: usize,
    pub timing_ms: u64,
    pub generated_at: DateTime<Utc>,
    pub was_aborted: bool,
    pub skipped_relations: bool,
    pub skipped_related_concepts: bool,
    pub truncated_documents: bool,
    pub failed_documents: usize,
    pub skipped_fragments: usize,
    pub warnings: Vec<String>,
}

impl IndexMetadata {
    pub(crate) fn new(scope: &Scope) -> Self {
        Self {
            scope: scope.describe(),
            total_documents: 0,
            documents_with_tags: 0,
            total_annotations: 0,
            total_concepts: 0,
            timing_ms: 0,
            generated_at: Utc::now(),
            was_aborted: false,
            skipped_relations: false,
            skipped_related_concepts: false,
            truncated_documents: false,
            failed_documents: 0,
            skipped_fragments: 0,
            warnings: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "SnapshotData")]
pub struct IndexSnapshot {
    pub metadata: IndexMetadata,
    concepts: Vec<ConceptEntry>,
    #[serde(skip)]
    concept_index: HashMap<String, usize>,
    pub relations: Vec<CrossDocumentRelation>,
    pub per_document_annotations: BTreeMap<String, Vec<SemanticTag>>,
}

#[derive(Deserialize)]
struct SnapshotData {
    metadata: IndexMetadata,
    concepts: Vec<ConceptEntry>,
    relations: Vec<CrossDocumentRelation>,
    per_document_annotations: BTreeMap<String, Vec<SemanticTag>>,
}

impl From<SnapshotData> for IndexSnapshot {
    fn from(data: SnapshotData) -> Self {
        IndexSnapshot::new(
            data.metadata,
            data.concepts,
            data.relations,
            data.per_document_annotations,
        )
    }
}

impl IndexSnapshot {
    pub fn new(
        metadata: IndexMetadata,
        concepts: Vec<ConceptEntry>,
        relations: Vec<CrossDocumentRelation>,
        per_document_annotations: BTreeMap<String, Vec<SemanticTag>>,
    ) -> Self {
        let concept_index = concepts
            .iter()
            .enumerate()
            .map(|(i, c)| (c.normalized_label.clone(), i))
            .collect();
        Self {
            metadata,
            concepts,
            concept_index,
            relations,
            per_document_annotations,
        }
    }

    /// Concepts in first-seen order.
    pub fn concepts(&self) -> &[ConceptEntry] {
        &self.concepts
    }

    /// Exact lookup by normalized label.
    pub fn concept_by_key(&self, key: &str) -> Option<&ConceptEntry> {
        self.concept_index.get(key).map(|&i| &self.concepts[i])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StandardType;

    fn entry(key: &str) -> ConceptEntry {
        let mut e = ConceptEntry::new(key, key, "a.md");
        e.record(
            Occurrence {
                document_path: "a.md".to_string(),
                annotation_id: Uuid::new_v4(),
                tag_type: TagType::Standard(StandardType::Concept),
                position: Some(3),
            },
            true,
        );
        e
    }

    #[test]
    fn test_scope_describe_and_contains() {
        assert_eq!(Scope::from_folder(None), Scope::All);
        assert_eq!(Scope::from_folder(Some("/")), Scope::All);
        let scope = Scope::from_folder(Some("notes/"));
        assert_eq!(scope.describe(), "folder:notes");
        assert!(scope.contains("notes/a.md"));
        assert!(!scope.contains("notebook/a.md"));
    }

    #[test]
    fn test_relation_orders_paths_and_computes_strength() {
        let r = CrossDocumentRelation::new("z.md", "a.md", vec!["energy".to_string()], 2, 4);
        assert_eq!(r.document_a, "a.md");
        assert_eq!(r.document_b, "z.md");
        assert!((r.strength - 0.25).abs() < f64::EPSILON);
        assert_eq!(r.other("a.md"), Some("z.md"));
        assert_eq!(r.other("m.md"), None);
    }

    #[test]
    fn test_record_updates_counts() {
        let mut e = entry("energy");
        e.record(
            Occurrence {
                document_path: "a.md".to_string(),
                annotation_id: Uuid::new_v4(),
                tag_type: TagType::Standard(StandardType::Claim),
                position: None,
            },
            false,
        );
        e.record(
            Occurrence {
                document_path: "b.md".to_string(),
                annotation_id: Uuid::new_v4(),
                tag_type: TagType::Standard(StandardType::Claim),
                position: None,
            },
            true,
        );
        assert_eq!(e.total_count, 3);
        assert_eq!(e.distinct_document_count, 2);
        assert_eq!(e.types_seen.len(), 2);
    }

    #[test]
    fn test_lookup_survives_serde() {
        let snapshot = IndexSnapshot::new(
            IndexMetadata::new(&Scope::All),
            vec![entry("energy"), entry("entropy")],
            Vec::new(),
            BTreeMap::new(),
        );
        let json = serde_json::to_string(&snapshot).unwrap();
        let loaded: IndexSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(loaded.concepts().len(), 2);
        assert_eq!(loaded.concepts()[1].normalized_label, "entropy");
        assert!(loaded.concept_by_key("entropy").is_some());
        assert!(loaded.concept_by_key("missing").is_none());
    }
}
