use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use typed_builder::TypedBuilder;

// --- Votes ---

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteTally {
    pub positive: i64,
    pub negative: i64,
    pub net: i64,
}

impl VoteTally {
    pub fn new(positive: i64, negative: i64) -> Self {
        Self {
            positive,
            negative,
            net: positive - negative,
        }
    }

    /// Inclusion threshold: net votes must exceed zero.
    pub fn passed(&self) -> bool {
        self.net > 0
    }

    pub fn total(&self) -> i64 {
        self.positive + self.negative
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteKind {
    Inclusion,
    Content,
}

impl VoteKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoteKind::Inclusion => "inclusion",
            VoteKind::Content => "content",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteStatus {
    Agree,
    Disagree,
}

impl VoteStatus {
    pub fn from_positive(is_positive: bool) -> Self {
        if is_positive {
            VoteStatus::Agree
        } else {
            VoteStatus::Disagree
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VoteStatus::Agree => "agree",
            VoteStatus::Disagree => "disagree",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "agree" => Some(VoteStatus::Agree),
            "disagree" => Some(VoteStatus::Disagree),
            _ => None,
        }
    }
}

/// Both tallies of a node after a vote operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteResult {
    pub inclusion: VoteTally,
    pub content: Option<VoteTally>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserVoteStatus {
    pub inclusion_status: Option<VoteStatus>,
    pub content_status: Option<VoteStatus>,
    pub votes: VoteResult,
}

// --- Keywords & categories ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeywordSource {
    Ai,
    User,
}

impl KeywordSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeywordSource::Ai => "ai",
            KeywordSource::User => "user",
        }
    }
}

/// A keyword as produced by extraction or supplied by a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordWithFrequency {
    pub word: String,
    pub frequency: f64,
    pub source: KeywordSource,
}

impl KeywordWithFrequency {
    pub fn new(word: impl Into<String>, frequency: f64, source: KeywordSource) -> Self {
        Self {
            word: word.into(),
            frequency,
            source,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryRef {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub inclusion_net_votes: i64,
}

/// How many relationship targets were requested versus actually linked.
/// Keyword attachment skips unapproved words, so `attached` may be lower.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachOutcome {
    pub requested: usize,
    pub attached: usize,
}

impl AttachOutcome {
    pub fn skipped(&self) -> usize {
        self.requested.saturating_sub(self.attached)
    }
}

/// Categories count double toward relatedness compared with tags.
pub const CATEGORY_RELATEDNESS_WEIGHT: f64 = 2.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelatedNode {
    pub id: String,
    /// Words or category names the two nodes have in common.
    pub shared: Vec<String>,
    pub strength: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CombinedRelatedNode {
    pub id: String,
    pub tag_strength: f64,
    pub category_strength: f64,
    pub score: f64,
}

impl CombinedRelatedNode {
    pub fn new(id: impl Into<String>, tag_strength: f64, category_strength: f64) -> Self {
        Self {
            id: id.into(),
            tag_strength,
            category_strength,
            score: tag_strength + category_strength * CATEGORY_RELATEDNESS_WEIGHT,
        }
    }
}

// --- Content nodes ---

/// Any taggable/categorizable node, with kind-specific fields kept in `properties`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentNode {
    pub id: String,
    pub node_type: String,
    pub created_by: Option<String>,
    pub public_credit: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub inclusion_votes: VoteTally,
    pub content_votes: Option<VoteTally>,
    pub properties: Map<String, Value>,
    #[serde(default)]
    pub keywords: Vec<KeywordWithFrequency>,
    #[serde(default)]
    pub categories: Vec<CategoryRef>,
    pub discussion_id: Option<String>,
}

impl ContentNode {
    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(Value::as_str)
    }
}

/// Input for composed node creation.
#[derive(Debug, Clone, TypedBuilder)]
pub struct CreateNodeInput {
    #[builder(setter(into))]
    pub id: String,
    #[builder(setter(into))]
    pub created_by: String,
    #[builder(default)]
    pub public_credit: bool,
    /// Kind-specific properties (statement text, question text, ...).
    #[builder(default)]
    pub properties: BTreeMap<String, Value>,
    #[builder(default, setter(strip_option, into))]
    pub parent_id: Option<String>,
    #[builder(default)]
    pub keywords: Vec<KeywordWithFrequency>,
    #[builder(default)]
    pub category_ids: Vec<String>,
}

/// Property changes for an update. Relationship replacement is requested separately.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeUpdate {
    pub properties: BTreeMap<String, Value>,
}

impl NodeUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }
}

// --- Filtering, sorting, paging ---

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    /// At least one requested value present.
    #[default]
    Any,
    /// Every requested value present.
    All,
    /// Member set equals the requested set.
    Exact,
}

/// Set-membership filter over a node's keywords or category ids.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SetFilter {
    pub mode: FilterMode,
    pub values: Vec<String>,
}

impl SetFilter {
    /// Repeated values are dropped; first occurrence wins.
    pub fn new(mode: FilterMode, values: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let mut distinct: Vec<String> = Vec::new();
        for value in values.into_iter().map(Into::into) {
            if !distinct.contains(&value) {
                distinct.push(value);
            }
        }
        Self { mode, values: distinct }
    }

    pub fn any(values: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self::new(FilterMode::Any, values)
    }

    pub fn all(values: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self::new(FilterMode::All, values)
    }

    pub fn exact(values: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self::new(FilterMode::Exact, values)
    }

    /// An empty value list filters nothing.
    pub fn is_active(&self) -> bool {
        !self.values.is_empty()
    }

    pub fn matches(&self, members: &[String]) -> bool {
        if !self.is_active() {
            return true;
        }
        let present = |v: &String| members.iter().any(|m| m == v);
        match self.mode {
            FilterMode::Any => self.values.iter().any(present),
            FilterMode::All => self.values.iter().all(present),
            FilterMode::Exact => {
                self.values.iter().all(present) && members.iter().all(|m| self.values.contains(m))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl SortDirection {
    pub fn as_cypher(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserFilterMode {
    /// Nodes the user created.
    Created,
    /// Nodes the user voted on.
    Interacted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserFilter {
    pub mode: UserFilterMode,
    pub user_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TypedBuilder)]
#[serde(default, rename_all = "camelCase")]
pub struct FindAllOptions {
    #[builder(default, setter(strip_option))]
    pub min_inclusion_votes: Option<i64>,
    #[builder(default, setter(strip_option))]
    pub keywords: Option<SetFilter>,
    #[builder(default, setter(strip_option, into))]
    pub created_by: Option<String>,
    #[builder(default, setter(strip_option, into))]
    pub sort_by: Option<String>,
    #[builder(default)]
    pub sort_direction: SortDirection,
    #[builder(default, setter(strip_option))]
    pub offset: Option<i64>,
    #[builder(default, setter(strip_option))]
    pub limit: Option<i64>,
    #[builder(default)]
    pub include_discussion: bool,
    #[builder(default)]
    pub include_keywords: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TypedBuilder)]
#[serde(default, rename_all = "camelCase")]
pub struct GraphFilters {
    #[builder(default, setter(strip_option))]
    pub min_inclusion_votes: Option<i64>,
    #[builder(default, setter(strip_option))]
    pub keywords: Option<SetFilter>,
    #[builder(default, setter(strip_option))]
    pub categories: Option<SetFilter>,
    #[builder(default, setter(strip_option))]
    pub user: Option<UserFilter>,
    #[builder(default, setter(strip_option, into))]
    pub sort_by: Option<String>,
    #[builder(default, setter(strip_option))]
    pub sort_direction: Option<SortDirection>,
    #[builder(default, setter(strip_option))]
    pub offset: Option<i64>,
    #[builder(default, setter(strip_option))]
    pub limit: Option<i64>,
    #[builder(default)]
    pub include_word_nodes: bool,
    #[builder(default)]
    pub include_category_nodes: bool,
}

// --- Graph projection (wire contract for the graph renderer) ---

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphNodeMetadata {
    pub inclusion_votes: i64,
    pub total_votes: i64,
    pub has_discussion: bool,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    pub data: Value,
    pub metadata: GraphNodeMetadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GraphEdgeType {
    SharedTag,
    SharedCategory,
    ParentChild,
}

impl GraphEdgeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GraphEdgeType::SharedTag => "SHARED_TAG",
            GraphEdgeType::SharedCategory => "SHARED_CATEGORY",
            GraphEdgeType::ParentChild => "PARENT_CHILD",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(rename = "type")]
    pub edge_type: GraphEdgeType,
    pub weight: f64,
    pub metadata: Value,
}

impl GraphEdge {
    /// Key that is identical for (a, b) and (b, a).
    pub fn pair_key(a: &str, b: &str, edge_type: GraphEdgeType) -> (String, String, GraphEdgeType) {
        if a <= b {
            (a.to_string(), b.to_string(), edge_type)
        } else {
            (b.to_string(), a.to_string(), edge_type)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphData {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}
