//! Tag listing for a single document.
//!
//! Reads one document's annotations for the `tw tags` command, including
//! the line each fragment sits on and how many malformed fragments were
//! skipped.

use anyhow::Result;
use serde::Serialize;

use crate::models::SemanticTag;
use crate::tag_codec;
use crate::tag_store::{DocumentTags, TagStore};

#[derive(Debug, Clone, Serialize)]
pub struct DocumentTagsResponse {
    pub path: String,
    pub has_block: bool,
    pub tags: Vec<TagListing>,
    pub skipped: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct TagListing {
    pub line: usize,
    #[serde(flatten)]
    pub tag: SemanticTag,
}

pub async fn get_document_tags(store: &TagStore, path: &str) -> Result<DocumentTagsResponse> {
    let text = store.vault().read_text(path).await?;
    let report = DocumentTags::from_text(&text);
    Ok(DocumentTagsResponse {
        path: path.to_string(),
        has_block: tag_codec::has_block(&text),
        skipped: report.skipped,
        tags: report
            .tags
            .into_iter()
            .map(|d| TagListing {
                line: d.line,
                tag: d.tag,
            })
            .collect(),
    })
}

/// CLI entry point: print a document's tags to stdout.
pub async fn run_tags(store: &TagStore, path: &str) -> Result<()> {
    let doc = get_document_tags(store, path).await?;

    println!("--- {} ---", doc.path);
    if doc.tags.is_empty() {
        println!("No tags.");
    }
    for listing in &doc.tags {
        let tag = &listing.tag;
        println!("{:>5}  {:<14} {}", listing.line, tag.tag_type, tag.label);
        println!("       id:     {}", tag.id);
        if let Some(parent) = tag.parent_id {
            println!("       parent: {}", parent);
        }
    }
    if !doc.has_block && !doc.tags.is_empty() {
        println!();
        println!("(tags found outside a tag block)");
    }
    if doc.skipped > 0 {
        println!();
        println!("{} malformed fragment(s) skipped", doc.skipped);
    }
    Ok(())
}
