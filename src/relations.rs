//! Cross-document relations and concept co-occurrence.
//!
//! Both passes are quadratic and run on the cooperative runtime: every
//! `yield_interval` iterations they report progress, yield, and check the
//! run's cancellation token. A cancelled pass returns what it has so far
//! together with `completed = false`.
//!
//! Input is the per-document concept set, in path order:
//!
//! ```text
//! [("a.md", {"energy", "entropy"}), ("b.md", {"energy"}), ...]
//! ```

use std::collections::{BTreeSet, HashMap};
use tokio_util::sync::CancellationToken;

use crate::progress::{IndexProgressEvent, IndexProgressReporter};
use crate::snapshot::CrossDocumentRelation;

/// Concept keys of one document.
pub type DocumentConcepts = (String, BTreeSet<String>);

/// Output of a pass that may be cancelled midway.
#[derive(Debug)]
pub struct PassOutcome<T> {
    pub value: T,
    pub completed: bool,
}

/// Counts iterations and decides when a pass should yield.
struct Pacer<'a> {
    interval: usize,
    since_yield: usize,
    token: &'a CancellationToken,
}

impl<'a> Pacer<'a> {
    fn new(interval: usize, token: &'a CancellationToken) -> Self {
        Self {
            interval: interval.max(1),
            since_yield: 0,
            token,
        }
    }

    fn tick(&mut self) -> bool {
        self.since_yield += 1;
        if self.since_yield >= self.interval {
            self.since_yield = 0;
            true
        } else {
            false
        }
    }

    /// Yield to the runtime; returns false when the run was cancelled.
    async fn pause(&self) -> bool {
        tokio::task::yield_now().await;
        !self.token.is_cancelled()
    }
}

/// Every document pair sharing at least one concept, each pair once.
pub async fn compute_relations(
    docs: &[DocumentConcepts],
    yield_interval: usize,
    token: &CancellationToken,
    progress: &dyn IndexProgressReporter,
) -> PassOutcome<Vec<CrossDocumentRelation>> {
    let mut relations = Vec::new();
    let mut pacer = Pacer::new(yield_interval, token);
    let total = docs.len();

    for (i, (path_a, concepts_a)) in docs.iter().enumerate() {
        for (path_b, concepts_b) in &docs[i + 1..] {
            let shared: Vec<String> = concepts_a.intersection(concepts_b).cloned().collect();
            if !shared.is_empty() {
                relations.push(CrossDocumentRelation::new(
                    path_a,
                    path_b,
                    shared,
                    concepts_a.len(),
                    concepts_b.len(),
                ));
            }

            if pacer.tick() {
                progress.report(&IndexProgressEvent::Relations { current: i + 1, total });
                if !pacer.pause().await {
                    return PassOutcome {
                        value: relations,
                        completed: false,
                    };
                }
            }
        }
    }

    progress.report(&IndexProgressEvent::Relations { current: total, total });
    PassOutcome {
        value: relations,
        completed: true,
    }
}

/// For each concept, up to `max_related` co-occurring concepts ranked by the
/// number of documents they share, ties broken by label.
pub async fn compute_related_concepts(
    docs: &[DocumentConcepts],
    max_related: usize,
    yield_interval: usize,
    token: &CancellationToken,
    progress: &dyn IndexProgressReporter,
) -> PassOutcome<HashMap<String, Vec<String>>> {
    let mut counts: HashMap<&str, HashMap<&str, usize>> = HashMap::new();
    let mut pacer = Pacer::new(yield_interval, token);
    let total = docs.len();

    for (i, (_, concepts)) in docs.iter().enumerate() {
        for a in concepts {
            for b in concepts {
                if a == b {
                    continue;
                }
                *counts
                    .entry(a.as_str())
                    .or_default()
                    .entry(b.as_str())
                    .or_default() += 1;

                if pacer.tick() {
                    progress.report(&IndexProgressEvent::RelatedConcepts { current: i + 1, total });
                    if !pacer.pause().await {
                        return PassOutcome {
                            value: rank(counts, max_related),
                            completed: false,
                        };
                    }
                }
            }
        }
    }

    progress.report(&IndexProgressEvent::RelatedConcepts { current: total, total });
    PassOutcome {
        value: rank(counts, max_related),
        completed: true,
    }
}

fn rank(counts: HashMap<&str, HashMap<&str, usize>>, max_related: usize) -> HashMap<String, Vec<String>> {
    counts
        .into_iter()
        .map(|(concept, others)| {
            let mut ranked: Vec<(&str, usize)> = others.into_iter().collect();
            ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
            let labels = ranked
                .into_iter()
                .take(max_related)
                .map(|(label, _)| label.to_string())
                .collect();
            (concept.to_string(), labels)
        })
        .collect()
}
