//! Tag fragment codec and tag block boundaries.
//!
//! An annotation is serialized as a single-line fragment:
//!
//! ```text
//! %%tag::TYPE::UUID::"Label"::parentUUIDOrNull%%
//! ```
//!
//! and a document carries at most one block of fragments at its end:
//!
//! ```text
//! %%--- SEMANTIC TAGS ---%%
//! %%tag::Claim::0b6c...::"Energy is conserved"::null%%
//! %%--- END SEMANTIC TAGS ---%%
//! ```
//!
//! Markers only count when they stand alone on a line. Labels are escaped
//! (`\\`, `\"`, `\n`, `\r`) so any label survives a round trip, including
//! one that quotes a marker. Decoding is independent of the block markers:
//! fragments are recovered from anywhere in the text, which keeps annotations
//! readable even when a marker line has been damaged by hand editing.
//!
//! Everything here is pure text-in/text-out; persistence belongs to
//! [`TagStore`](crate::tag_store::TagStore).

use std::collections::HashSet;

use thiserror::Error;
use uuid::Uuid;

use crate::models::{SemanticTag, TagType};

pub const TAG_PREFIX: &str = "%%tag::";
pub const FRAGMENT_END: &str = "%%";
pub const FIELD_SEP: &str = "::";
pub const NULL_PARENT: &str = "null";
pub const BLOCK_START: &str = "%%--- SEMANTIC TAGS ---%%";
pub const BLOCK_END: &str = "%%--- END SEMANTIC TAGS ---%%";

/// How [`write_block`] combines new tags with the ones already in the block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// The block is rewritten to contain exactly the given tags.
    Replace,
    /// Tags already in the block win; tags with new ids are appended.
    Merge,
}

/// Why a fragment was skipped.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("missing {0} field")]
    MissingField(&'static str),
    #[error("unknown tag type '{0}'")]
    UnknownType(String),
    #[error("invalid uuid '{0}'")]
    InvalidUuid(String),
    #[error("label is not quoted")]
    UnquotedLabel,
    #[error("label has no closing quote")]
    UnterminatedLabel,
    #[error("fragment has extra fields")]
    ExtraFields,
    #[error("fragment has no closing %%")]
    Unterminated,
}

/// A fragment found in a document.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedTag {
    /// The raw fragment text, markers included.
    pub fragment: String,
    pub tag: SemanticTag,
    /// 1-based line number.
    pub line: usize,
}

/// Result of scanning a document, including the count of skipped fragments.
#[derive(Debug, Clone, Default)]
pub struct DecodeReport {
    pub tags: Vec<DecodedTag>,
    pub skipped: usize,
}

/// Serialize one annotation to its single-line fragment.
pub fn encode(tag: &SemanticTag) -> String {
    let parent = tag
        .parent_id
        .map(|p| p.to_string())
        .unwrap_or_else(|| NULL_PARENT.to_string());
    format!(
        "{}{}{}{}{}\"{}\"{}{}{}",
        TAG_PREFIX,
        tag.tag_type.wire_name(),
        FIELD_SEP,
        tag.id,
        FIELD_SEP,
        escape_label(&tag.label),
        FIELD_SEP,
        parent,
        FRAGMENT_END
    )
}

/// Extract every well-formed fragment from `text`, in document order.
pub fn decode_all(text: &str) -> Vec<DecodedTag> {
    decode_all_with_report(text).tags
}

/// Like [`decode_all`], also counting malformed fragments that were skipped.
pub fn decode_all_with_report(text: &str) -> DecodeReport {
    let mut report = DecodeReport::default();

    for (idx, line) in text.lines().enumerate() {
        for (start, parsed) in scan_line(line) {
            match parsed {
                Ok((tag, consumed)) => report.tags.push(DecodedTag {
                    fragment: line[start..start + consumed].to_string(),
                    tag,
                    line: idx + 1,
                }),
                Err(e) => {
                    tracing::debug!(line = idx + 1, error = %e, "skipping malformed tag fragment");
                    report.skipped += 1;
                }
            }
        }
    }

    report
}

type Parsed = Result<(SemanticTag, usize), DecodeError>;

/// Every fragment start in one line, with its byte offset and parse result.
/// A malformed fragment only consumes its prefix, so a good fragment later
/// on the line is still found.
fn scan_line(line: &str) -> Vec<(usize, Parsed)> {
    let mut found = Vec::new();
    let mut pos = 0;
    while let Some(offset) = line[pos..].find(TAG_PREFIX) {
        let start = pos + offset;
        let parsed = parse_fragment(&line[start..]);
        pos = match &parsed {
            Ok((_, consumed)) => start + consumed,
            Err(_) => start + TAG_PREFIX.len(),
        };
        found.push((start, parsed));
    }
    found
}

/// Remove every well-formed fragment whose id is in `ids`, wherever it
/// sits in the text. A line left blank by the removal is dropped; all other
/// text is kept byte for byte.
pub fn strip_fragments(text: &str, ids: &HashSet<Uuid>) -> String {
    let mut out = String::with_capacity(text.len());
    for raw in text.split_inclusive('\n') {
        let line = raw.strip_suffix('\n').unwrap_or(raw);
        let mut kept = String::with_capacity(line.len());
        let mut pos = 0;
        for (start, parsed) in scan_line(line) {
            if let Ok((tag, consumed)) = parsed {
                if ids.contains(&tag.id) {
                    kept.push_str(&line[pos..start]);
                    pos = start + consumed;
                }
            }
        }
        if pos == 0 {
            out.push_str(raw);
            continue;
        }
        kept.push_str(&line[pos..]);
        if kept.trim().is_empty() {
            continue;
        }
        out.push_str(&kept);
        out.push_str(&raw[line.len()..]);
    }
    out
}

/// Parse one fragment at the start of `s`. Returns the tag and the number of
/// bytes consumed.
fn parse_fragment(s: &str) -> Result<(SemanticTag, usize), DecodeError> {
    let mut rest = s
        .strip_prefix(TAG_PREFIX)
        .ok_or(DecodeError::MissingField("prefix"))?;

    // TYPE
    let sep = rest.find(FIELD_SEP).ok_or(DecodeError::MissingField("id"))?;
    let type_str = &rest[..sep];
    if type_str.contains(FRAGMENT_END) {
        return Err(DecodeError::MissingField("id"));
    }
    let tag_type: TagType = type_str
        .parse()
        .map_err(|_| DecodeError::UnknownType(type_str.to_string()))?;
    rest = &rest[sep + FIELD_SEP.len()..];

    // UUID
    let sep = rest
        .find(FIELD_SEP)
        .ok_or(DecodeError::MissingField("label"))?;
    let id_str = &rest[..sep];
    let id = Uuid::parse_str(id_str).map_err(|_| DecodeError::InvalidUuid(id_str.to_string()))?;
    rest = &rest[sep + FIELD_SEP.len()..];

    // "Label"
    let (label, label_len) = parse_quoted(rest)?;
    rest = &rest[label_len..];
    rest = rest
        .strip_prefix(FIELD_SEP)
        .ok_or(DecodeError::MissingField("parent"))?;

    // parent
    let end = rest.find(FRAGMENT_END).ok_or(DecodeError::Unterminated)?;
    let parent_str = &rest[..end];
    if parent_str.contains(FIELD_SEP) {
        return Err(DecodeError::ExtraFields);
    }
    let parent_id = if parent_str == NULL_PARENT {
        None
    } else {
        Some(
            Uuid::parse_str(parent_str)
                .map_err(|_| DecodeError::InvalidUuid(parent_str.to_string()))?,
        )
    };
    rest = &rest[end + FRAGMENT_END.len()..];

    let consumed = s.len() - rest.len();
    Ok((
        SemanticTag {
            tag_type,
            id,
            label,
            parent_id,
            metadata: None,
        },
        consumed,
    ))
}

/// Parse a `"..."` label with backslash escapes. Returns the unescaped label
/// and the byte length of the quoted form.
fn parse_quoted(s: &str) -> Result<(String, usize), DecodeError> {
    let body = s.strip_prefix('"').ok_or(DecodeError::UnquotedLabel)?;
    let mut label = String::new();
    let mut chars = body.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '"' => return Ok((label, 1 + i + 1)),
            '\\' => match chars.next() {
                Some((_, 'n')) => label.push('\n'),
                Some((_, 'r')) => label.push('\r'),
                Some((_, other)) => label.push(other),
                None => return Err(DecodeError::UnterminatedLabel),
            },
            other => label.push(other),
        }
    }
    Err(DecodeError::UnterminatedLabel)
}

fn escape_label(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    for c in label.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out
}

/// Byte offsets of a tag block: the start marker line through the end
/// marker line, and the lines between them.
struct BlockSpan {
    start: usize,
    inner_start: usize,
    inner_end: usize,
    end: usize,
}

/// Locate the last complete block.
///
/// Markers count only as whole lines, so a marker quoted inside a label or
/// a sentence is plain text. Each end marker pairs with the closest start
/// marker above it that is not already paired; unpaired markers are left
/// as prose.
fn find_block(text: &str) -> Option<BlockSpan> {
    let mut open: Option<(usize, usize)> = None;
    let mut block = None;
    let mut offset = 0;
    for raw in text.split_inclusive('\n') {
        let line_start = offset;
        offset += raw.len();
        match raw.trim() {
            BLOCK_START => open = Some((line_start, offset)),
            BLOCK_END => {
                if let Some((start, inner_start)) = open.take() {
                    block = Some(BlockSpan {
                        start,
                        inner_start,
                        inner_end: line_start,
                        end: line_start + raw.trim_end().len(),
                    });
                }
            }
            _ => {}
        }
    }
    block
}

/// Whether `text` contains a complete tag block.
pub fn has_block(text: &str) -> bool {
    find_block(text).is_some()
}

/// The lines between the block markers, if a block exists.
pub fn extract_block(text: &str) -> Option<&str> {
    let span = find_block(text)?;
    let inner = &text[span.inner_start..span.inner_end];
    Some(inner.trim_matches(|c| c == '\n' || c == '\r'))
}

/// Remove the tag block and canonicalize trailing whitespace.
///
/// Content before and after the block is kept; the document ends with
/// exactly one newline (or is empty). Applying this twice equals applying
/// it once.
pub fn remove_block(text: &str) -> String {
    let mut body = text.to_string();
    while let Some(span) = find_block(&body) {
        let before = body[..span.start].trim_end();
        let after = body[span.end..].trim_start();
        body = if before.is_empty() || after.is_empty() {
            format!("{}{}", before, after)
        } else {
            format!("{}\n\n{}", before, after)
        };
    }

    let trimmed = body.trim_end();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{}\n", trimmed)
    }
}

/// Render the block for `tags`, markers included, without a trailing newline.
pub fn render_block(tags: &[SemanticTag]) -> String {
    let mut out = String::from(BLOCK_START);
    for tag in tags {
        out.push('\n');
        out.push_str(&encode(tag));
    }
    out.push('\n');
    out.push_str(BLOCK_END);
    out
}

/// Return `text` with its tag block rewritten.
///
/// The block is always placed at the end of the document, separated from the
/// body by a blank line. Duplicate ids keep their first occurrence. An empty
/// resulting tag set removes the block entirely.
pub fn write_block(text: &str, tags: &[SemanticTag], mode: WriteMode) -> String {
    let mut combined: Vec<SemanticTag> = Vec::new();
    let mut seen: HashSet<Uuid> = HashSet::new();

    if mode == WriteMode::Merge {
        if let Some(inner) = extract_block(text) {
            for decoded in decode_all(inner) {
                if seen.insert(decoded.tag.id) {
                    combined.push(decoded.tag);
                }
            }
        }
    }
    for tag in tags {
        if seen.insert(tag.id) {
            combined.push(tag.clone());
        }
    }

    let base = remove_block(text);
    if combined.is_empty() {
        return base;
    }

    let block = render_block(&combined);
    let body = base.trim_end();
    if body.is_empty() {
        format!("{}\n", block)
    } else {
        format!("{}\n\n{}\n", body, block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StandardType;

    fn claim(label: &str) -> SemanticTag {
        SemanticTag::new(TagType::Standard(StandardType::Claim), Uuid::new_v4(), label)
    }

    fn sorted_ids(tags: &[SemanticTag]) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = tags.iter().map(|t| t.id).collect();
        ids.sort();
        ids
    }

    #[test]
    fn test_encode_format() {
        let id = Uuid::parse_str("0b6c3e1a-8a47-4c7e-9a64-2f1d7c9b0e11").unwrap();
        let tag = SemanticTag::new(TagType::Standard(StandardType::Axiom), id, "Conservation of Energy");
        assert_eq!(
            encode(&tag),
            "%%tag::Axiom::0b6c3e1a-8a47-4c7e-9a64-2f1d7c9b0e11::\"Conservation of Energy\"::null%%"
        );
    }

    #[test]
    fn test_round_trip_with_parent_and_custom_type() {
        let parent = claim("Parent");
        let child = SemanticTag::new(TagType::Custom("Lemma".to_string()), Uuid::new_v4(), "Child")
            .with_parent(parent.id);
        let text = write_block("# Notes\n", &[parent.clone(), child.clone()], WriteMode::Replace);

        let decoded: Vec<SemanticTag> = decode_all(&text).into_iter().map(|d| d.tag).collect();
        assert_eq!(decoded, vec![parent, child]);
    }

    #[test]
    fn test_labels_with_grammar_characters_survive() {
        let tags = vec![
            claim("He said \"hello\""),
            claim("a::b::c"),
            claim("100%% sure"),
            claim("back\\slash"),
            claim("two\nlines"),
        ];
        let text = write_block("body", &tags, WriteMode::Replace);
        let decoded: Vec<SemanticTag> = decode_all(&text).into_iter().map(|d| d.tag).collect();
        assert_eq!(decoded, tags);
    }

    #[test]
    fn test_label_quoting_a_marker_stays_inside_the_block() {
        let original = claim("see %%--- END SEMANTIC TAGS ---%% here");
        let text = write_block("Body\n", &[original.clone()], WriteMode::Replace);
        assert_eq!(remove_block(&text), "Body\n");

        let extra = claim("B");
        let merged = write_block(&text, &[extra.clone()], WriteMode::Merge);
        let decoded: Vec<SemanticTag> = decode_all(&merged).into_iter().map(|d| d.tag).collect();
        assert_eq!(decoded, vec![original, extra]);
        assert_eq!(merged.matches(BLOCK_START).count(), 1);
        assert_eq!(remove_block(&merged), "Body\n");
    }

    #[test]
    fn test_stray_markers_in_prose_are_kept() {
        let docs = [
            "intro\n%%--- SEMANTIC TAGS ---%%\nuser prose after a stray marker\n",
            "intro\n%%--- END SEMANTIC TAGS ---%%\nmore prose\n",
            "quoted inline %%--- SEMANTIC TAGS ---%% marker\n",
        ];
        for d in docs {
            let base = remove_block(d);
            assert_eq!(base, d);
            let tagged = write_block(&base, &[claim("A")], WriteMode::Replace);
            assert!(tagged.starts_with(d));
            assert_eq!(remove_block(&tagged), base);
        }
    }

    #[test]
    fn test_end_marker_pairs_with_nearest_start() {
        let tag = claim("A");
        let text = format!(
            "intro\n{}\nprose\n\n{}\n{}\n{}\n",
            BLOCK_START,
            BLOCK_START,
            encode(&tag),
            BLOCK_END
        );
        assert_eq!(extract_block(&text), Some(encode(&tag).as_str()));
        assert_eq!(remove_block(&text), format!("intro\n{}\nprose\n", BLOCK_START));
    }

    #[test]
    fn test_strip_fragments_removes_only_listed_ids() {
        let gone = claim("Gone");
        let kept = claim("Kept");
        let text = format!(
            "Body\n{}\ninline {} and {} end\n",
            encode(&gone),
            encode(&kept),
            encode(&gone)
        );
        let ids: HashSet<Uuid> = [gone.id].into_iter().collect();
        let stripped = strip_fragments(&text, &ids);
        assert_eq!(stripped, format!("Body\ninline {} and  end\n", encode(&kept)));
        assert_eq!(strip_fragments(&text, &HashSet::new()), text);
    }

    #[test]
    fn test_malformed_fragments_are_skipped() {
        let good = claim("Good");
        let text = format!(
            "%%tag::Claim::not-a-uuid::\"x\"::null%%\n%%tag::Bogus::{}::\"x\"::null%%\n{}\n%%tag::Claim::{}::\"open::null%%\n",
            Uuid::new_v4(),
            encode(&good),
            Uuid::new_v4()
        );
        let report = decode_all_with_report(&text);
        assert_eq!(report.tags.len(), 1);
        assert_eq!(report.tags[0].tag, good);
        assert_eq!(report.tags[0].line, 3);
        assert_eq!(report.skipped, 3);
    }

    #[test]
    fn test_wrong_field_count_is_skipped() {
        let text = format!(
            "%%tag::Claim::{}::\"x\"::null::extra%%",
            Uuid::new_v4()
        );
        let report = decode_all_with_report(&text);
        assert!(report.tags.is_empty());
        assert_eq!(report.skipped, 1);
    }

    #[test]
    fn test_multiple_fragments_on_one_line() {
        let a = claim("A");
        let b = claim("B");
        let text = format!("inline {} and {} here", encode(&a), encode(&b));
        let decoded = decode_all(&text);
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].tag, a);
        assert_eq!(decoded[1].tag, b);
        assert_eq!(decoded[1].line, 1);
    }

    #[test]
    fn test_fragments_recovered_without_markers() {
        let tag = claim("Orphan");
        let text = format!("Body\n{}\n%%--- END SEMANTIC TAGS ---%%\n", encode(&tag));
        assert!(!has_block(&text));
        assert_eq!(decode_all(&text)[0].tag, tag);
    }

    #[test]
    fn test_block_boundaries() {
        let text = write_block("Body text\n", &[claim("A")], WriteMode::Replace);
        assert!(has_block(&text));
        assert!(text.starts_with("Body text\n\n%%--- SEMANTIC TAGS ---%%\n"));
        assert!(text.ends_with("%%--- END SEMANTIC TAGS ---%%\n"));
        let inner = extract_block(&text).unwrap();
        assert_eq!(inner.lines().count(), 1);
        assert!(inner.starts_with(TAG_PREFIX));
    }

    #[test]
    fn test_remove_block_keeps_surrounding_content() {
        let tagged = write_block("Intro\n\nMore", &[claim("A")], WriteMode::Replace);
        let with_trailer = format!("{}\nWritten after the block\n", tagged);
        assert_eq!(
            remove_block(&with_trailer),
            "Intro\n\nMore\n\nWritten after the block\n"
        );
    }

    #[test]
    fn test_remove_block_idempotent() {
        let docs = ["", "plain", "plain\n\n\n", "text\n", "  \n"];
        for d in docs {
            let tagged = write_block(d, &[claim("A"), claim("B")], WriteMode::Replace);
            let once = remove_block(&tagged);
            assert_eq!(remove_block(&once), once);

            let base = remove_block(d);
            let rewritten = write_block(&base, &[claim("C")], WriteMode::Replace);
            assert_eq!(remove_block(&rewritten), base);
        }
    }

    #[test]
    fn test_write_block_replace_is_idempotent() {
        let tags = vec![claim("A"), claim("B")];
        let once = write_block("Body\n", &tags, WriteMode::Replace);
        let twice = write_block(&once, &tags, WriteMode::Replace);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_merge_mode_first_write_wins() {
        let original = claim("Original");
        let text = write_block("Body", &[original.clone()], WriteMode::Replace);

        let mut changed = original.clone();
        changed.label = "Changed".to_string();
        let extra = claim("Extra");
        let merged = write_block(&text, &[changed, extra.clone()], WriteMode::Merge);

        let decoded: Vec<SemanticTag> = decode_all(&merged).into_iter().map(|d| d.tag).collect();
        assert_eq!(decoded, vec![original, extra]);
    }

    #[test]
    fn test_merge_twice_has_no_duplicates() {
        let tags = vec![claim("A"), claim("B")];
        let once = write_block("Body", &tags, WriteMode::Merge);
        let twice = write_block(&once, &tags, WriteMode::Merge);
        let decoded: Vec<SemanticTag> = decode_all(&twice).into_iter().map(|d| d.tag).collect();
        assert_eq!(sorted_ids(&decoded), sorted_ids(&tags));
        assert_eq!(once, twice);
    }

    #[test]
    fn test_empty_tag_set_removes_block() {
        let tagged = write_block("Body", &[claim("A")], WriteMode::Replace);
        let cleared = write_block(&tagged, &[], WriteMode::Replace);
        assert_eq!(cleared, "Body\n");
        assert!(!has_block(&cleared));
    }

    #[test]
    fn test_duplicate_ids_in_input_keep_first() {
        let a = claim("A");
        let mut dup = a.clone();
        dup.label = "Duplicate".to_string();
        let text = write_block("", &[a.clone(), dup], WriteMode::Replace);
        let decoded = decode_all(&text);
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].tag, a);
    }
}
