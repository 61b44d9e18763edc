//! Corpus indexing engine.
//!
//! Builds an [`IndexSnapshot`] from the tags in every in-scope document:
//!
//! ```text
//!   enumerate ──► sort by path ──► denylist ──► cap at max_documents
//!        │
//!        ▼
//!   scan in batches ─── report · yield · check cancel ───┐
//!        │                                                │
//!        ▼                                                ▼
//!   relations (≤ max_relation_documents)           aborted: partial
//!        │                                          snapshot, was_aborted
//!        ▼
//!   related concepts (≤ max_related_concept_pool)
//!        │
//!        ▼
//!   snapshot ──► stored as the engine's current snapshot
//! ```
//!
//! # Cooperative scheduling
//!
//! Everything runs on one logical thread. The engine yields to the tokio
//! runtime after every batch and every `yield_interval` iterations of the
//! pairwise loops; those are the only points where cancellation is noticed.
//! Starting a run cancels whatever run was in flight, and [`IndexEngine::abort`]
//! cancels the current one. A cancelled run still returns a valid snapshot.
//!
//! # Concept identity
//!
//! Each tag resolves to a concept key by, in order: the registry's reverse
//! index on the tag id, the registry's label lookup (primary key or alias),
//! and finally the normalized label itself. Tags the registry knows about
//! therefore group under the registry's canonical entry even when their
//! label text differs.

use anyhow::Result;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, CostConfig, IndexConfig};
use crate::models::{SemanticTag, TagType};
use crate::progress::{IndexProgressEvent, IndexProgressReporter};
use crate::registry::{concept_key, ConceptRegistry};
use crate::relations::{compute_related_concepts, compute_relations, DocumentConcepts};
use crate::search::RelatedDocument;
use crate::snapshot::{
    ConceptEntry, IndexMetadata, IndexSnapshot, IndexState, Occurrence, Scope,
};
use crate::stats::IndexStatistics;
use crate::tag_codec;
use crate::tag_store::{DocumentTags, TagStore};
use crate::traits::DocumentInfo;

/// Pre-flight estimate for classifying a scope.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct CostEstimate {
    pub document_count: usize,
    pub total_characters: usize,
    pub estimated_tokens: u64,
    pub estimated_cost_usd: f64,
    pub warning: Option<String>,
}

struct CurrentRun {
    generation: u64,
    token: CancellationToken,
}

struct RunSlot {
    next_generation: u64,
    current: Option<CurrentRun>,
}

pub struct IndexEngine {
    store: TagStore,
    config: IndexConfig,
    cost: CostConfig,
    run: Mutex<RunSlot>,
    state: Mutex<IndexState>,
    snapshot: RwLock<Option<Arc<IndexSnapshot>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl IndexEngine {
    pub fn new(store: TagStore, config: IndexConfig, cost: CostConfig) -> Self {
        Self {
            store,
            config,
            cost,
            run: Mutex::new(RunSlot {
                next_generation: 0,
                current: None,
            }),
            state: Mutex::new(IndexState::Idle),
            snapshot: RwLock::new(None),
        }
    }

    pub fn from_config(store: TagStore, config: &Config) -> Self {
        Self::new(store, config.index.clone(), config.cost.clone())
    }

    pub fn store(&self) -> &TagStore {
        &self.store
    }

    pub fn state(&self) -> IndexState {
        *lock(&self.state)
    }

    /// Cancel the run in flight, if any. It stops at its next yield point.
    pub fn abort(&self) {
        if let Some(run) = &lock(&self.run).current {
            tracing::info!("abort requested for index run");
            run.token.cancel();
        }
    }

    /// The snapshot of the last completed (or aborted) run.
    pub fn snapshot(&self) -> Option<Arc<IndexSnapshot>> {
        self.snapshot
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Install a snapshot, e.g. one loaded from disk.
    pub fn set_snapshot(&self, snapshot: IndexSnapshot) {
        *self
            .snapshot
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(Arc::new(snapshot));
    }

    // ═══════════════════════════════════════════════════════════════════
    // Cost estimate
    // ═══════════════════════════════════════════════════════════════════

    /// Character and token counts for the document bodies in scope, tag
    /// blocks excluded. Unreadable documents are skipped.
    pub async fn estimate_cost(&self, scope: &Scope) -> Result<CostEstimate> {
        let mut warnings = Vec::new();
        let (documents, _) = self.enumerate(scope, &mut warnings).await?;

        let mut total_characters = 0usize;
        let mut document_count = 0usize;
        for doc in &documents {
            match self.store.vault().read_text(&doc.path).await {
                Ok(text) => {
                    total_characters += tag_codec::remove_block(&text).chars().count();
                    document_count += 1;
                }
                Err(e) => tracing::warn!(path = %doc.path, error = %e, "skipping unreadable document"),
            }
        }

        let per_token = self.cost.chars_per_token.max(1) as u64;
        let estimated_tokens = (total_characters as u64).div_ceil(per_token);
        let estimated_cost_usd =
            estimated_tokens as f64 / 1_000_000.0 * self.cost.usd_per_million_tokens;

        if estimated_cost_usd > self.cost.warn_above_usd {
            warnings.push(format!(
                "Estimated cost ${:.2} exceeds ${:.2}",
                estimated_cost_usd, self.cost.warn_above_usd
            ));
        }

        Ok(CostEstimate {
            document_count,
            total_characters,
            estimated_tokens,
            estimated_cost_usd,
            warning: if warnings.is_empty() {
                None
            } else {
                Some(warnings.join("; "))
            },
        })
    }

    // ═══════════════════════════════════════════════════════════════════
    // Index build
    // ═══════════════════════════════════════════════════════════════════

    /// Build a snapshot of `scope`.
    ///
    /// Fails only when the vault cannot be enumerated. Unreadable documents
    /// are counted in `failed_documents`; cancellation yields a partial
    /// snapshot with `was_aborted` set.
    pub async fn build_index(
        &self,
        registry: &ConceptRegistry,
        scope: &Scope,
        progress: &dyn IndexProgressReporter,
    ) -> Result<Arc<IndexSnapshot>> {
        let (generation, token) = self.begin_run();
        let started = Instant::now();
        let mut metadata = IndexMetadata::new(scope);

        let (documents, truncated) = match self.enumerate(scope, &mut metadata.warnings).await {
            Ok(listed) => listed,
            Err(e) => {
                self.finish_run(generation, IndexState::Idle, None);
                return Err(e);
            }
        };
        metadata.truncated_documents = truncated;

        let mut aggregator = ConceptAggregator::default();
        let total = documents.len();
        let batch_size = self.config.batch_size.max(1);

        for batch in documents.chunks(batch_size) {
            if token.is_cancelled() {
                metadata.was_aborted = true;
                break;
            }

            for doc in batch {
                metadata.total_documents += 1;
                match self.store.read_with_report(&doc.path).await {
                    Ok(tags) => aggregator.add_document(registry, &doc.path, tags),
                    Err(e) => {
                        tracing::warn!(path = %doc.path, error = %e, "skipping unreadable document");
                        metadata.failed_documents += 1;
                    }
                }
            }

            if let Some(last) = batch.last() {
                progress.report(&IndexProgressEvent::Scanning {
                    current: metadata.total_documents,
                    total,
                    document: last.path.clone(),
                });
            }
            tokio::task::yield_now().await;
            if token.is_cancelled() {
                metadata.was_aborted = true;
                break;
            }
        }

        let doc_concepts = aggregator.document_concepts();
        let mut relations = Vec::new();
        let mut related = HashMap::new();

        if !metadata.was_aborted {
            if doc_concepts.len() > self.config.max_relation_documents {
                self.set_state(generation, IndexState::SkippingRelations);
                metadata.skipped_relations = true;
                let warning = format!(
                    "Skipped cross-document relations: {} tagged documents exceeds limit of {}",
                    doc_concepts.len(),
                    self.config.max_relation_documents
                );
                tracing::warn!("{}", warning);
                metadata.warnings.push(warning);
            } else {
                self.set_state(generation, IndexState::AggregatingRelations);
                let outcome =
                    compute_relations(&doc_concepts, self.config.yield_interval, &token, progress)
                        .await;
                relations = outcome.value;
                metadata.was_aborted = !outcome.completed;
            }
        }

        if !metadata.was_aborted {
            if aggregator.concepts.len() > self.config.max_related_concept_pool {
                metadata.skipped_related_concepts = true;
                let warning = format!(
                    "Skipped related concepts: {} concepts exceeds pool limit of {}",
                    aggregator.concepts.len(),
                    self.config.max_related_concept_pool
                );
                tracing::warn!("{}", warning);
                metadata.warnings.push(warning);
            } else {
                let outcome = compute_related_concepts(
                    &doc_concepts,
                    self.config.max_related_concepts,
                    self.config.yield_interval,
                    &token,
                    progress,
                )
                .await;
                related = outcome.value;
                metadata.was_aborted = !outcome.completed;
            }
        }

        for concept in aggregator.concepts.iter_mut() {
            if let Some(labels) = related.remove(&concept.normalized_label) {
                concept.related_concept_labels = labels;
            }
        }

        metadata.documents_with_tags = doc_concepts.len();
        metadata.total_annotations = aggregator.total_annotations;
        metadata.total_concepts = aggregator.concepts.len();
        metadata.skipped_fragments = aggregator.skipped_fragments;
        metadata.timing_ms = started.elapsed().as_millis() as u64;

        tracing::info!(
            scope = %metadata.scope,
            documents = metadata.total_documents,
            concepts = metadata.total_concepts,
            relations = relations.len(),
            aborted = metadata.was_aborted,
            elapsed_ms = metadata.timing_ms,
            "index run finished"
        );

        let final_state = if metadata.was_aborted {
            IndexState::Aborted
        } else {
            IndexState::Done
        };
        let snapshot = Arc::new(IndexSnapshot::new(
            metadata,
            aggregator.concepts,
            relations,
            aggregator.per_document,
        ));
        self.finish_run(generation, final_state, Some(snapshot.clone()));
        Ok(snapshot)
    }

    /// In-scope documents, sorted, filtered by the path denylist and capped.
    async fn enumerate(
        &self,
        scope: &Scope,
        warnings: &mut Vec<String>,
    ) -> Result<(Vec<DocumentInfo>, bool)> {
        let mut documents: Vec<DocumentInfo> = self
            .store
            .vault()
            .list(scope.folder())
            .await?
            .into_iter()
            .filter(|d| scope.contains(&d.path))
            .filter(|d| !self.config.exclude_paths.iter().any(|p| d.path.contains(p.as_str())))
            .collect();
        documents.sort_by(|a, b| a.path.cmp(&b.path));

        let truncated = documents.len() > self.config.max_documents;
        if truncated {
            let warning = format!(
                "Scope has {} documents; only the first {} were indexed",
                documents.len(),
                self.config.max_documents
            );
            tracing::warn!("{}", warning);
            warnings.push(warning);
            documents.truncate(self.config.max_documents);
        }
        Ok((documents, truncated))
    }

    fn begin_run(&self) -> (u64, CancellationToken) {
        let mut slot = lock(&self.run);
        if let Some(previous) = slot.current.take() {
            tracing::info!("new index run supersedes the one in flight");
            previous.token.cancel();
        }
        slot.next_generation += 1;
        let generation = slot.next_generation;
        let token = CancellationToken::new();
        slot.current = Some(CurrentRun {
            generation,
            token: token.clone(),
        });
        *lock(&self.state) = IndexState::Scanning;
        (generation, token)
    }

    fn is_current(slot: &RunSlot, generation: u64) -> bool {
        slot.current
            .as_ref()
            .map(|run| run.generation == generation)
            .unwrap_or(false)
    }

    fn set_state(&self, generation: u64, state: IndexState) {
        let slot = lock(&self.run);
        if Self::is_current(&slot, generation) {
            *lock(&self.state) = state;
        }
    }

    /// Publish the outcome of a run unless a newer run has replaced it.
    fn finish_run(&self, generation: u64, state: IndexState, snapshot: Option<Arc<IndexSnapshot>>) {
        let mut slot = lock(&self.run);
        if !Self::is_current(&slot, generation) {
            return;
        }
        slot.current = None;
        *lock(&self.state) = state;
        if let Some(snapshot) = snapshot {
            *self
                .snapshot
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(snapshot);
        }
    }

    // ═══════════════════════════════════════════════════════════════════
    // Queries over the current snapshot
    // ═══════════════════════════════════════════════════════════════════

    pub fn search_concepts(&self, query: &str) -> Vec<ConceptEntry> {
        self.snapshot()
            .map(|s| s.search_concepts(query).into_iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn get_concept(&self, label: &str) -> Option<ConceptEntry> {
        self.snapshot()?.get_concept(label).cloned()
    }

    pub fn get_related_documents(&self, path: &str) -> Vec<RelatedDocument> {
        self.snapshot()
            .map(|s| s.get_related_documents(path))
            .unwrap_or_default()
    }

    pub fn get_top_concepts(&self, n: usize) -> Vec<ConceptEntry> {
        self.snapshot()
            .map(|s| s.get_top_concepts(n).into_iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn get_concepts_by_type(&self, tag_type: &TagType) -> Vec<ConceptEntry> {
        self.snapshot()
            .map(|s| s.get_concepts_by_type(tag_type).into_iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn get_statistics(&self) -> Option<IndexStatistics> {
        self.snapshot().map(|s| s.get_statistics())
    }
}

/// Accumulates concepts while documents are scanned.
#[derive(Default)]
struct ConceptAggregator {
    concepts: Vec<ConceptEntry>,
    index: HashMap<String, usize>,
    per_document: BTreeMap<String, Vec<SemanticTag>>,
    concepts_by_document: BTreeMap<String, BTreeSet<String>>,
    total_annotations: usize,
    skipped_fragments: usize,
}

impl ConceptAggregator {
    fn add_document(&mut self, registry: &ConceptRegistry, path: &str, tags: DocumentTags) {
        self.skipped_fragments += tags.skipped;
        if tags.tags.is_empty() {
            return;
        }

        let mut keys = BTreeSet::new();
        let mut seen_here: HashSet<usize> = HashSet::new();
        let mut annotations = Vec::with_capacity(tags.tags.len());
        for decoded in tags.tags {
            let (key, label) = resolve_concept(registry, &decoded.tag);
            let idx = match self.index.get(&key) {
                Some(&idx) => idx,
                None => {
                    self.concepts.push(ConceptEntry::new(&label, &key, path));
                    self.index.insert(key.clone(), self.concepts.len() - 1);
                    self.concepts.len() - 1
                }
            };
            self.concepts[idx].record(
                Occurrence {
                    document_path: path.to_string(),
                    annotation_id: decoded.tag.id,
                    tag_type: decoded.tag.tag_type.clone(),
                    position: Some(decoded.line),
                },
                seen_here.insert(idx),
            );
            keys.insert(key);
            annotations.push(decoded.tag);
            self.total_annotations += 1;
        }

        self.per_document.insert(path.to_string(), annotations);
        self.concepts_by_document.insert(path.to_string(), keys);
    }

    /// Concept sets of tagged documents, in path order.
    fn document_concepts(&self) -> Vec<DocumentConcepts> {
        self.concepts_by_document
            .iter()
            .map(|(path, keys)| (path.clone(), keys.clone()))
            .collect()
    }
}

/// Concept key and display label for a tag.
fn resolve_concept(registry: &ConceptRegistry, tag: &SemanticTag) -> (String, String) {
    if let Some(entry) = registry
        .get_by_uuid(&tag.id)
        .or_else(|| registry.get_entry(&tag.label))
    {
        return (entry.normalized_label.clone(), entry.canonical_label.clone());
    }
    (concept_key(&tag.label), tag.label.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StandardType;
    use crate::progress::{NoProgress, ScanCallback};
    use crate::tag_codec::WriteMode;
    use crate::vault_memory::MemoryVault;
    use uuid::Uuid;

    fn concept(label: &str) -> SemanticTag {
        SemanticTag::new(TagType::Standard(StandardType::Concept), Uuid::new_v4(), label)
    }

    async fn engine_with(docs: &[(&str, Vec<SemanticTag>)], config: IndexConfig) -> IndexEngine {
        let vault = Arc::new(MemoryVault::new());
        let store = TagStore::new(vault.clone());
        for (path, tags) in docs {
            vault
                .insert(*path, format!("# {}\n\nBody text.\n", path).into_bytes())
                .unwrap();
            if !tags.is_empty() {
                store.write(path, tags, WriteMode::Replace).await.unwrap();
            }
        }
        IndexEngine::new(store, config, CostConfig::default())
    }

    #[tokio::test]
    async fn test_build_groups_by_normalized_label() {
        let engine = engine_with(
            &[
                ("a.md", vec![concept("Entropy"), concept("Heat")]),
                ("b.md", vec![concept("entropy!")]),
                ("c.md", vec![]),
            ],
            IndexConfig::default(),
        )
        .await;
        let registry = ConceptRegistry::new("registry.json");
        let snapshot = engine
            .build_index(&registry, &Scope::All, &NoProgress)
            .await
            .unwrap();

        assert_eq!(snapshot.metadata.total_documents, 3);
        assert_eq!(snapshot.metadata.documents_with_tags, 2);
        assert_eq!(snapshot.metadata.total_annotations, 3);
        assert_eq!(snapshot.metadata.total_concepts, 2);
        let entropy = snapshot.concept_by_key("entropy").unwrap();
        assert_eq!(entropy.label, "Entropy");
        assert_eq!(entropy.first_seen, "a.md");
        assert_eq!(entropy.distinct_document_count, 2);
        assert_eq!(snapshot.relations.len(), 1);
        assert_eq!(entropy.related_concept_labels, vec!["heat".to_string()]);
        assert_eq!(engine.state(), IndexState::Done);
        assert!(engine.snapshot().is_some());
    }

    #[tokio::test]
    async fn test_repeated_concept_in_one_document_counts_once() {
        let engine = engine_with(
            &[
                ("a.md", vec![concept("Energy"), concept("energy"), concept("ENERGY.")]),
                ("b.md", vec![concept("Energy")]),
            ],
            IndexConfig::default(),
        )
        .await;
        let registry = ConceptRegistry::new("registry.json");
        let snapshot = engine
            .build_index(&registry, &Scope::All, &NoProgress)
            .await
            .unwrap();

        let energy = snapshot.concept_by_key("energy").unwrap();
        assert_eq!(energy.total_count, 4);
        assert_eq!(energy.distinct_document_count, 2);
        assert_eq!(energy.document_paths().len(), 2);
    }

    #[tokio::test]
    async fn test_registry_id_wins_over_label_text() {
        let mut registry = ConceptRegistry::new("registry.json");
        let id = registry.get_or_create(
            "Conservation of Energy",
            &TagType::Standard(StandardType::Axiom),
            "a.md",
        );
        let renamed = SemanticTag::new(TagType::Standard(StandardType::Axiom), id, "Energy is kept");
        let engine = engine_with(&[("a.md", vec![renamed])], IndexConfig::default()).await;

        let snapshot = engine
            .build_index(&registry, &Scope::All, &NoProgress)
            .await
            .unwrap();
        let entry = snapshot.concept_by_key("conservation of energy").unwrap();
        assert_eq!(entry.label, "Conservation of Energy");
    }

    #[tokio::test]
    async fn test_exclude_paths_and_cap() {
        let config = IndexConfig {
            max_documents: 2,
            ..IndexConfig::default()
        };
        let engine = engine_with(
            &[
                (".trash/old.md", vec![concept("Old")]),
                ("a.md", vec![concept("A")]),
                ("b.md", vec![concept("B")]),
                ("c.md", vec![concept("C")]),
            ],
            config,
        )
        .await;
        let registry = ConceptRegistry::new("registry.json");
        let snapshot = engine
            .build_index(&registry, &Scope::All, &NoProgress)
            .await
            .unwrap();
        assert!(snapshot.metadata.truncated_documents);
        assert_eq!(snapshot.metadata.total_documents, 2);
        assert!(snapshot.concept_by_key("old").is_none());
        assert!(snapshot.concept_by_key("c").is_none());
        assert_eq!(snapshot.metadata.warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_progress_reports_each_batch() {
        let config = IndexConfig {
            batch_size: 2,
            ..IndexConfig::default()
        };
        let docs: Vec<(String, Vec<SemanticTag>)> = (0..5)
            .map(|i| (format!("{}.md", i), vec![concept("shared")]))
            .collect();
        let doc_refs: Vec<(&str, Vec<SemanticTag>)> =
            docs.iter().map(|(p, t)| (p.as_str(), t.clone())).collect();
        let engine = engine_with(&doc_refs, config).await;
        let registry = ConceptRegistry::new("registry.json");

        let seen = Mutex::new(Vec::new());
        let reporter = ScanCallback(|current: usize, total: usize, _doc: &str| {
            seen.lock().unwrap().push((current, total));
        });
        engine
            .build_index(&registry, &Scope::All, &reporter)
            .await
            .unwrap();
        drop(reporter);
        assert_eq!(seen.into_inner().unwrap(), vec![(2, 5), (4, 5), (5, 5)]);
    }

    #[tokio::test]
    async fn test_estimate_excludes_tag_block() {
        let vault = Arc::new(MemoryVault::with_documents([("a.md", "abcdefgh")]));
        let store = TagStore::new(vault.clone());
        store
            .write("a.md", &[concept("Energy")], WriteMode::Replace)
            .await
            .unwrap();
        let engine = IndexEngine::new(
            store,
            IndexConfig::default(),
            CostConfig {
                chars_per_token: 4,
                usd_per_million_tokens: 1.0,
                warn_above_usd: 0.0,
            },
        );

        let estimate = engine.estimate_cost(&Scope::All).await.unwrap();
        assert_eq!(estimate.document_count, 1);
        // "abcdefgh\n" after the block is stripped
        assert_eq!(estimate.total_characters, 9);
        assert_eq!(estimate.estimated_tokens, 3);
        assert!(estimate.warning.is_some());
    }

    #[tokio::test]
    async fn test_queries_without_snapshot_are_empty() {
        let engine = engine_with(&[], IndexConfig::default()).await;
        assert_eq!(engine.state(), IndexState::Idle);
        assert!(engine.search_concepts("x").is_empty());
        assert!(engine.get_concept("x").is_none());
        assert!(engine.get_statistics().is_none());
    }
}
