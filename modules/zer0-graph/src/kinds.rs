//! Node kinds: label, id field, capability flags and parent link per content type.
//!
//! A schema is generic over one `ContentNodeKind`. Kinds are unit structs; all
//! behavior that differs between node types is answered here.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use zer0_common::validators::DEFAULT_TEXT_MAX_LENGTH;
use zer0_common::{CategoryRef, ContentNode, KeywordWithFrequency, VoteTally};

use crate::cypher::Fragment;
use crate::query_builder::{node_projection, quote_identifier};
use crate::store::{Record, StoreError};

/// How a kind hangs off its parent node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParentLink {
    /// `None` accepts any node carrying the id field.
    pub label: Option<&'static str>,
    pub id_field: &'static str,
    pub relationship: &'static str,
    pub requires_inclusion: bool,
    /// `(parent)-[rel]->(child)` when true, `(child)-[rel]->(parent)` otherwise.
    pub parent_to_child: bool,
}

pub trait ContentNodeKind: Send + Sync + 'static {
    fn label(&self) -> &'static str;

    fn id_field(&self) -> &'static str {
        "id"
    }

    /// Lowercase type name used on CREATED edges and graph nodes.
    fn type_name(&self) -> &'static str;

    fn supports_content_voting(&self) -> bool;

    /// Main free-text property, validated on create.
    fn text_field(&self) -> Option<&'static str> {
        None
    }

    fn max_text_length(&self) -> usize {
        DEFAULT_TEXT_MAX_LENGTH
    }

    fn updatable_fields(&self) -> &'static [&'static str];

    fn parent(&self) -> Option<ParentLink> {
        None
    }

    /// Build a `ContentNode` from a row whose `n` column is a node projection.
    /// Optional columns: `keywords`, `categories`, `discussionId`.
    fn map_record(&self, record: &Record) -> Result<ContentNode, StoreError> {
        map_content_node(record, self.type_name(), self.id_field(), self.supports_content_voting())
    }

    /// `MATCH ... SET n.field = $field ... RETURN` for a property update.
    fn build_update_fragment(&self, fields: &[&str]) -> Fragment {
        let mut assignments: Vec<String> = fields
            .iter()
            .map(|f| format!("n.{} = ${f}", quote_identifier(f)))
            .collect();
        assignments.push("n.updatedAt = datetime()".to_string());

        Fragment::new()
            .match_(format!(
                "(n:{} {{{}: $id}})",
                quote_identifier(self.label()),
                quote_identifier(self.id_field())
            ))
            .set(assignments.join(", "))
            .return_(format!("{} AS n", node_projection("n")))
    }
}

fn take_i64(props: &mut Map<String, Value>, key: &str) -> i64 {
    props.remove(key).and_then(|v| v.as_i64()).unwrap_or(0)
}

fn take_string(props: &mut Map<String, Value>, key: &str) -> Option<String> {
    match props.remove(key) {
        Some(Value::String(s)) => Some(s),
        _ => None,
    }
}

fn take_timestamp(props: &mut Map<String, Value>, key: &str) -> Option<DateTime<Utc>> {
    take_string(props, key)
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

pub fn map_content_node(
    record: &Record,
    node_type: &str,
    id_field: &str,
    content_voting: bool,
) -> Result<ContentNode, StoreError> {
    let mut props: Map<String, Value> = record.get("n")?;

    let id = take_string(&mut props, id_field).ok_or_else(|| StoreError::Decode {
        field: id_field.to_string(),
        message: format!("{node_type} row has no {id_field}"),
    })?;
    let created_by = take_string(&mut props, "createdBy");
    let public_credit = props
        .remove("publicCredit")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let created_at = take_timestamp(&mut props, "createdAt");
    let updated_at = take_timestamp(&mut props, "updatedAt");

    let inclusion_votes = VoteTally {
        positive: take_i64(&mut props, "inclusionPositiveVotes"),
        negative: take_i64(&mut props, "inclusionNegativeVotes"),
        net: take_i64(&mut props, "inclusionNetVotes"),
    };
    let content = VoteTally {
        positive: take_i64(&mut props, "contentPositiveVotes"),
        negative: take_i64(&mut props, "contentNegativeVotes"),
        net: take_i64(&mut props, "contentNetVotes"),
    };

    Ok(ContentNode {
        id,
        node_type: node_type.to_string(),
        created_by,
        public_credit,
        created_at,
        updated_at,
        inclusion_votes,
        content_votes: content_voting.then_some(content),
        properties: props,
        keywords: record
            .get_opt::<Vec<KeywordWithFrequency>>("keywords")
            .unwrap_or_default(),
        categories: record.get_opt::<Vec<CategoryRef>>("categories").unwrap_or_default(),
        discussion_id: record.get_opt("discussionId"),
    })
}

macro_rules! content_kind {
    (
        $(#[$meta:meta])*
        $name:ident {
            label: $label:literal,
            type_name: $type_name:literal,
            content_voting: $voting:literal,
            updatable: [$($field:literal),* $(,)?]
            $(, id_field: $id_field:literal)?
            $(, text_field: $text:literal)?
            $(, max_text_length: $max:literal)?
            $(, parent: $parent:expr)?
            $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
        pub struct $name;

        impl ContentNodeKind for $name {
            fn label(&self) -> &'static str {
                $label
            }
            $(fn id_field(&self) -> &'static str {
                $id_field
            })?
            fn type_name(&self) -> &'static str {
                $type_name
            }
            fn supports_content_voting(&self) -> bool {
                $voting
            }
            $(fn text_field(&self) -> Option<&'static str> {
                Some($text)
            })?
            $(fn max_text_length(&self) -> usize {
                $max
            })?
            fn updatable_fields(&self) -> &'static [&'static str] {
                &[$($field),*]
            }
            $(fn parent(&self) -> Option<ParentLink> {
                Some($parent)
            })?
        }
    };
}

content_kind!(StatementKind {
    label: "StatementNode",
    type_name: "statement",
    content_voting: true,
    updatable: ["statement", "publicCredit"],
    text_field: "statement",
});

content_kind!(OpenQuestionKind {
    label: "OpenQuestionNode",
    type_name: "openquestion",
    content_voting: true,
    updatable: ["questionText", "publicCredit"],
    text_field: "questionText",
});

content_kind!(AnswerKind {
    label: "AnswerNode",
    type_name: "answer",
    content_voting: true,
    updatable: ["answerText", "publicCredit"],
    text_field: "answerText",
    parent: ParentLink {
        label: Some("OpenQuestionNode"),
        id_field: "id",
        relationship: "HAS_ANSWER",
        requires_inclusion: true,
        parent_to_child: true,
    },
});

content_kind!(
    /// Collects numeric responses instead of agree/disagree content votes.
    QuantityKind {
        label: "QuantityNode",
        type_name: "quantity",
        content_voting: false,
        updatable: ["question", "unitCategoryId", "defaultUnitId", "publicCredit"],
        text_field: "question",
    }
);

content_kind!(EvidenceKind {
    label: "EvidenceNode",
    type_name: "evidence",
    content_voting: true,
    updatable: ["title", "url", "evidenceType", "publicCredit"],
    text_field: "title",
    max_text_length: 500,
    parent: ParentLink {
        label: None,
        id_field: "id",
        relationship: "EVIDENCE_FOR",
        requires_inclusion: true,
        parent_to_child: false,
    },
});

content_kind!(CategoryKind {
    label: "CategoryNode",
    type_name: "category",
    content_voting: false,
    updatable: ["name", "description", "publicCredit"],
    text_field: "name",
    max_text_length: 100,
});

content_kind!(WordKind {
    label: "WordNode",
    type_name: "word",
    content_voting: false,
    updatable: ["publicCredit"],
    id_field: "word",
});
