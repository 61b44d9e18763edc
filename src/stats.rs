//! Index statistics and health overview.
//!
//! Summarizes a snapshot: document and annotation counts, concept counts by
//! type, and the capacity flags of the run that produced it. Used by
//! `tw stats` to show whether the last index run covered the whole vault.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::snapshot::IndexSnapshot;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexStatistics {
    pub scope: String,
    pub total_documents: usize,
    pub documents_with_tags: usize,
    pub total_annotations: usize,
    pub total_concepts: usize,
    pub total_relations: usize,
    /// Annotation count per wire type name.
    pub annotations_by_type: BTreeMap<String, usize>,
    pub average_annotations_per_document: f64,
    pub generated_at: DateTime<Utc>,
    pub timing_ms: u64,
    pub was_aborted: bool,
    pub skipped_relations: bool,
    pub skipped_related_concepts: bool,
    pub truncated_documents: bool,
    pub failed_documents: usize,
    pub skipped_fragments: usize,
}

impl IndexSnapshot {
    pub fn get_statistics(&self) -> IndexStatistics {
        let mut annotations_by_type = BTreeMap::new();
        for concept in self.concepts() {
            for o in &concept.occurrences {
                *annotations_by_type.entry(o.tag_type.to_string()).or_insert(0) += 1;
            }
        }

        let m = &self.metadata;
        IndexStatistics {
            scope: m.scope.clone(),
            total_documents: m.total_documents,
            documents_with_tags: m.documents_with_tags,
            total_annotations: m.total_annotations,
            total_concepts: m.total_concepts,
            total_relations: self.relations.len(),
            annotations_by_type,
            average_annotations_per_document: if m.documents_with_tags > 0 {
                m.total_annotations as f64 / m.documents_with_tags as f64
            } else {
                0.0
            },
            generated_at: m.generated_at,
            timing_ms: m.timing_ms,
            was_aborted: m.was_aborted,
            skipped_relations: m.skipped_relations,
            skipped_related_concepts: m.skipped_related_concepts,
            truncated_documents: m.truncated_documents,
            failed_documents: m.failed_documents,
            skipped_fragments: m.skipped_fragments,
        }
    }
}

/// Run the stats command: print a summary of a saved snapshot.
pub fn run_stats(snapshot: &IndexSnapshot, snapshot_path: &str) -> Result<()> {
    let stats = snapshot.get_statistics();

    println!("tagweave index stats");
    println!("====================");
    println!();
    println!("  Snapshot:     {}", snapshot_path);
    println!("  Scope:        {}", stats.scope);
    println!(
        "  Generated:    {} ({})",
        stats.generated_at.format("%Y-%m-%d %H:%M"),
        format_relative(stats.generated_at)
    );
    println!("  Took:         {}", format_duration(stats.timing_ms));
    println!();
    println!("  Documents:    {}", stats.total_documents);
    println!(
        "  Tagged:       {} / {} ({}%)",
        stats.documents_with_tags,
        stats.total_documents,
        if stats.total_documents > 0 {
            (stats.documents_with_tags * 100) / stats.total_documents
        } else {
            0
        }
    );
    println!("  Annotations:  {}", stats.total_annotations);
    println!("  Concepts:     {}", stats.total_concepts);
    println!("  Relations:    {}", stats.total_relations);
    println!(
        "  Per document: {:.1} annotations",
        stats.average_annotations_per_document
    );

    if !stats.annotations_by_type.is_empty() {
        println!();
        println!("  By type:");
        println!("  {:<24} {:>8}", "TYPE", "COUNT");
        println!("  {}", "-".repeat(33));
        for (tag_type, count) in &stats.annotations_by_type {
            println!("  {:<24} {:>8}", tag_type, count);
        }
    }

    let flags = [
        (stats.was_aborted, "run was aborted"),
        (stats.truncated_documents, "document cap reached"),
        (stats.skipped_relations, "relations skipped"),
        (stats.skipped_related_concepts, "related concepts skipped"),
    ];
    let raised: Vec<&str> = flags.iter().filter(|(on, _)| *on).map(|(_, s)| *s).collect();
    if !raised.is_empty() || stats.failed_documents > 0 || stats.skipped_fragments > 0 {
        println!();
        println!("  Notes:");
        for note in raised {
            println!("    - {}", note);
        }
        if stats.failed_documents > 0 {
            println!("    - {} unreadable documents", stats.failed_documents);
        }
        if stats.skipped_fragments > 0 {
            println!("    - {} malformed tag fragments", stats.skipped_fragments);
        }
    }
    for warning in &snapshot.metadata.warnings {
        println!("  warning: {}", warning);
    }

    println!();
    Ok(())
}

fn format_duration(ms: u64) -> String {
    if ms < 1000 {
        format!("{} ms", ms)
    } else {
        format!("{:.1} s", ms as f64 / 1000.0)
    }
}

/// Format a timestamp as a relative time string (e.g. "3 hours ago").
fn format_relative(ts: DateTime<Utc>) -> String {
    let delta = (Utc::now() - ts).num_seconds();

    if delta < 0 {
        return ts.format("%Y-%m-%d %H:%M").to_string();
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    }
}
