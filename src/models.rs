//! Core data models used throughout tagweave.
//!
//! These types represent the annotations that live inside a document's tag
//! block and the drafts that become annotations once the concept registry
//! has assigned them an identity.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Wire prefix for custom annotation types (`Custom:<name>`).
pub const CUSTOM_TYPE_PREFIX: &str = "Custom:";

/// Opaque per-annotation metadata. Not part of the wire format: it lives in
/// memory and in registry entries only.
pub type TagMetadata = BTreeMap<String, serde_json::Value>;

/// The fixed annotation vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StandardType {
    Axiom,
    Assumption,
    Claim,
    Evidence,
    Definition,
    Concept,
    Entity,
    Hypothesis,
    Question,
    Method,
    Result,
    Conclusion,
}

impl StandardType {
    pub const ALL: [StandardType; 12] = [
        StandardType::Axiom,
        StandardType::Assumption,
        StandardType::Claim,
        StandardType::Evidence,
        StandardType::Definition,
        StandardType::Concept,
        StandardType::Entity,
        StandardType::Hypothesis,
        StandardType::Question,
        StandardType::Method,
        StandardType::Result,
        StandardType::Conclusion,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StandardType::Axiom => "Axiom",
            StandardType::Assumption => "Assumption",
            StandardType::Claim => "Claim",
            StandardType::Evidence => "Evidence",
            StandardType::Definition => "Definition",
            StandardType::Concept => "Concept",
            StandardType::Entity => "Entity",
            StandardType::Hypothesis => "Hypothesis",
            StandardType::Question => "Question",
            StandardType::Method => "Method",
            StandardType::Result => "Result",
            StandardType::Conclusion => "Conclusion",
        }
    }

    /// Case-insensitive lookup by name.
    pub fn parse(name: &str) -> Option<StandardType> {
        let name = name.trim();
        StandardType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str().eq_ignore_ascii_case(name))
    }
}

/// Annotation type: one of the standard vocabulary or a user-named custom type.
///
/// On the wire a custom type is written as `Custom:<name>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TagType {
    Standard(StandardType),
    Custom(String),
}

impl TagType {
    /// Maps a free-form type name (e.g. from a classifier) to a tag type.
    ///
    /// Known vocabulary names become [`TagType::Standard`]; anything else,
    /// including an explicit `Custom:<name>`, becomes [`TagType::Custom`].
    pub fn from_name(name: &str) -> TagType {
        let name = name.trim();
        if let Some(custom) = name.strip_prefix(CUSTOM_TYPE_PREFIX) {
            return TagType::Custom(custom.trim().to_string());
        }
        match StandardType::parse(name) {
            Some(t) => TagType::Standard(t),
            None => TagType::Custom(name.to_string()),
        }
    }

    /// Wire representation: `Claim` or `Custom:<name>`.
    pub fn wire_name(&self) -> String {
        match self {
            TagType::Standard(t) => t.as_str().to_string(),
            TagType::Custom(name) => format!("{}{}", CUSTOM_TYPE_PREFIX, sanitize_custom_name(name)),
        }
    }

    pub fn is_custom(&self) -> bool {
        matches!(self, TagType::Custom(_))
    }
}

/// Custom names may not contain characters that would break the fragment grammar.
pub(crate) fn sanitize_custom_name(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, ':' | '%' | '"' | '\n' | '\r'))
        .collect::<String>()
        .trim()
        .to_string()
}

impl fmt::Display for TagType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.wire_name())
    }
}

/// Strict wire parse used by the codec. Unknown non-custom names are rejected.
impl FromStr for TagType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(custom) = s.strip_prefix(CUSTOM_TYPE_PREFIX) {
            if custom.is_empty() {
                return Err("empty custom type name".to_string());
            }
            return Ok(TagType::Custom(custom.to_string()));
        }
        StandardType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .map(TagType::Standard)
            .ok_or_else(|| format!("unknown tag type: {}", s))
    }
}

impl Serialize for TagType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.wire_name())
    }
}

impl<'de> Deserialize<'de> for TagType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(TagType::from_name(&s))
    }
}

/// A typed, identified, labeled assertion attached to a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticTag {
    pub tag_type: TagType,
    pub id: Uuid,
    pub label: String,
    pub parent_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<TagMetadata>,
}

impl SemanticTag {
    pub fn new(tag_type: TagType, id: Uuid, label: impl Into<String>) -> Self {
        Self {
            tag_type,
            id,
            label: label.into(),
            parent_id: None,
            metadata: None,
        }
    }

    pub fn with_parent(mut self, parent_id: Uuid) -> Self {
        self.parent_id = Some(parent_id);
        self
    }
}

/// Partial field update for an existing annotation. The id is never updated.
#[derive(Debug, Clone, Default)]
pub struct TagUpdate {
    pub tag_type: Option<TagType>,
    pub label: Option<String>,
    /// `Some(None)` clears the parent.
    pub parent_id: Option<Option<Uuid>>,
}

impl TagUpdate {
    pub fn apply(&self, tag: &mut SemanticTag) {
        if let Some(t) = &self.tag_type {
            tag.tag_type = t.clone();
        }
        if let Some(label) = &self.label {
            tag.label = label.clone();
        }
        if let Some(parent) = self.parent_id {
            tag.parent_id = parent;
        }
    }
}

/// An annotation before identity resolution: labels only, no ids.
#[derive(Debug, Clone)]
pub struct TagDraft {
    pub tag_type: TagType,
    pub label: String,
    pub parent_label: Option<String>,
    pub metadata: Option<TagMetadata>,
}

impl TagDraft {
    pub fn new(tag_type: TagType, label: impl Into<String>) -> Self {
        Self {
            tag_type,
            label: label.into(),
            parent_label: None,
            metadata: None,
        }
    }

    pub fn with_parent(mut self, parent_label: impl Into<String>) -> Self {
        self.parent_label = Some(parent_label.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_name_maps_vocabulary_case_insensitively() {
        assert_eq!(
            TagType::from_name("claim"),
            TagType::Standard(StandardType::Claim)
        );
        assert_eq!(
            TagType::from_name("Custom:Lemma"),
            TagType::Custom("Lemma".to_string())
        );
        assert_eq!(
            TagType::from_name("Lemma"),
            TagType::Custom("Lemma".to_string())
        );
    }

    #[test]
    fn test_wire_parse_is_strict() {
        assert!("claim".parse::<TagType>().is_err());
        assert!("Custom:".parse::<TagType>().is_err());
        assert_eq!(
            "Axiom".parse::<TagType>().unwrap(),
            TagType::Standard(StandardType::Axiom)
        );
    }

    #[test]
    fn test_custom_wire_name_is_sanitized() {
        let t = TagType::Custom("a::b%\"c".to_string());
        assert_eq!(t.wire_name(), "Custom:abc");
    }

    #[test]
    fn test_update_keeps_id() {
        let id = Uuid::new_v4();
        let mut tag = SemanticTag::new(TagType::Standard(StandardType::Claim), id, "Old");
        let update = TagUpdate {
            label: Some("New".to_string()),
            parent_id: Some(Some(Uuid::new_v4())),
            ..Default::default()
        };
        update.apply(&mut tag);
        assert_eq!(tag.id, id);
        assert_eq!(tag.label, "New");
        assert!(tag.parent_id.is_some());
    }
}
