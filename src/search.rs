//! Queries over an index snapshot.
//!
//! All queries are synchronous reads of an [`IndexSnapshot`]; the engine
//! exposes the same surface over its current snapshot.
//!
//! Concept search ranks by how the normalized query matches the concept
//! key, then by occurrence count:
//!
//! | Rank | Match                         |
//! |------|-------------------------------|
//! | 0    | key equals the query          |
//! | 1    | key starts with the query     |
//! | 2    | key or label contains it      |

use anyhow::Result;
use serde::Serialize;

use crate::models::TagType;
use crate::registry::{concept_key, normalize};
use crate::snapshot::{ConceptEntry, IndexSnapshot};

/// A document related to a queried one.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelatedDocument {
    pub path: String,
    pub strength: f64,
    pub shared_normalized_labels: Vec<String>,
}

fn match_rank(concept: &ConceptEntry, query: &str) -> Option<u8> {
    let key = concept.normalized_label.as_str();
    if key == query {
        Some(0)
    } else if key.starts_with(query) {
        Some(1)
    } else if key.contains(query) || concept.label.to_lowercase().contains(query) {
        Some(2)
    } else {
        None
    }
}

impl IndexSnapshot {
    /// Concepts whose key or label matches `query`, best match first.
    pub fn search_concepts(&self, query: &str) -> Vec<&ConceptEntry> {
        let query = normalize(query);
        if query.is_empty() {
            return Vec::new();
        }

        let mut hits: Vec<(u8, &ConceptEntry)> = self
            .concepts()
            .iter()
            .filter_map(|c| match_rank(c, &query).map(|rank| (rank, c)))
            .collect();
        hits.sort_by(|a, b| {
            a.0.cmp(&b.0)
                .then(b.1.total_count.cmp(&a.1.total_count))
                .then(a.1.normalized_label.cmp(&b.1.normalized_label))
        });
        hits.into_iter().map(|(_, c)| c).collect()
    }

    /// Exact concept lookup; `label` is normalized first.
    pub fn get_concept(&self, label: &str) -> Option<&ConceptEntry> {
        self.concept_by_key(&concept_key(label))
    }

    /// Documents sharing concepts with `path`, strongest first.
    pub fn get_related_documents(&self, path: &str) -> Vec<RelatedDocument> {
        let mut related: Vec<RelatedDocument> = self
            .relations
            .iter()
            .filter_map(|r| {
                r.other(path).map(|other| RelatedDocument {
                    path: other.to_string(),
                    strength: r.strength,
                    shared_normalized_labels: r.shared_normalized_labels.clone(),
                })
            })
            .collect();
        related.sort_by(|a, b| {
            b.strength
                .partial_cmp(&a.strength)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.path.cmp(&b.path))
        });
        related
    }

    /// The `n` concepts with the most occurrences.
    pub fn get_top_concepts(&self, n: usize) -> Vec<&ConceptEntry> {
        let mut concepts: Vec<&ConceptEntry> = self.concepts().iter().collect();
        concepts.sort_by(|a, b| {
            b.total_count
                .cmp(&a.total_count)
                .then(b.distinct_document_count.cmp(&a.distinct_document_count))
                .then(a.normalized_label.cmp(&b.normalized_label))
        });
        concepts.truncate(n);
        concepts
    }

    /// Concepts tagged at least once with `tag_type`, in first-seen order.
    pub fn get_concepts_by_type(&self, tag_type: &TagType) -> Vec<&ConceptEntry> {
        self.concepts()
            .iter()
            .filter(|c| c.types_seen.contains(tag_type))
            .collect()
    }
}

// ============ CLI output ============

fn print_concepts(concepts: &[&ConceptEntry]) {
    if concepts.is_empty() {
        println!("No concepts.");
        return;
    }
    for (i, c) in concepts.iter().enumerate() {
        let types: Vec<String> = c.types_seen.iter().map(|t| t.to_string()).collect();
        println!(
            "{}. {}  ({} occurrence{}, {} document{})",
            i + 1,
            c.label,
            c.total_count,
            if c.total_count == 1 { "" } else { "s" },
            c.distinct_document_count,
            if c.distinct_document_count == 1 { "" } else { "s" }
        );
        println!("    key: {}", c.normalized_label);
        println!("    types: {}", types.join(", "));
    }
}

pub fn run_search(snapshot: &IndexSnapshot, query: &str) -> Result<()> {
    print_concepts(&snapshot.search_concepts(query));
    Ok(())
}

pub fn run_top(snapshot: &IndexSnapshot, limit: usize) -> Result<()> {
    print_concepts(&snapshot.get_top_concepts(limit));
    Ok(())
}

pub fn run_by_type(snapshot: &IndexSnapshot, tag_type: &TagType) -> Result<()> {
    print_concepts(&snapshot.get_concepts_by_type(tag_type));
    Ok(())
}

pub fn run_concept(snapshot: &IndexSnapshot, label: &str) -> Result<()> {
    let Some(concept) = snapshot.get_concept(label) else {
        println!("Concept not found: {}", label);
        return Ok(());
    };

    println!("{}", concept.label);
    println!("  key:         {}", concept.normalized_label);
    println!("  first seen:  {}", concept.first_seen);
    println!("  occurrences: {}", concept.total_count);
    println!("  documents:   {}", concept.distinct_document_count);
    let types: Vec<String> = concept.types_seen.iter().map(|t| t.to_string()).collect();
    println!("  types:       {}", types.join(", "));
    if !concept.related_concept_labels.is_empty() {
        println!("  related:     {}", concept.related_concept_labels.join(", "));
    }
    println!();
    for o in &concept.occurrences {
        match o.position {
            Some(line) => println!("  {}:{}  {}  {}", o.document_path, line, o.tag_type, o.annotation_id),
            None => println!("  {}  {}  {}", o.document_path, o.tag_type, o.annotation_id),
        }
    }
    Ok(())
}

pub fn run_related(snapshot: &IndexSnapshot, path: &str) -> Result<()> {
    let related = snapshot.get_related_documents(path);
    if related.is_empty() {
        println!("No related documents.");
        return Ok(());
    }
    for (i, r) in related.iter().enumerate() {
        println!("{}. [{:.2}] {}", i + 1, r.strength, r.path);
        println!("    shared: {}", r.shared_normalized_labels.join(", "));
    }
    Ok(())
}
