//! Neo4jQueryBuilder: pure fragment factories shared by every node schema.
//!
//! Nothing here touches a connection. The same inputs always produce the same
//! fragment, so voting-field initialization and shared-edge weighting are
//! identical for every node kind.
//!
//! Conventions: the node being written is bound to `n`; keyword input is
//! `$keywords` (list of `{word, frequency, source}` maps); category input is
//! `$categoryIds`; parent id is `$parentId`; creator is `$createdBy`.

use zer0_common::SortDirection;

use crate::cypher::Fragment;

pub const TAGGED: &str = "TAGGED";
pub const SHARED_TAG: &str = "SHARED_TAG";
pub const CATEGORIZED_AS: &str = "CATEGORIZED_AS";
pub const SHARED_CATEGORY: &str = "SHARED_CATEGORY";
pub const CREATED: &str = "CREATED";
pub const HAS_DISCUSSION: &str = "HAS_DISCUSSION";
pub const HAS_COMMENT: &str = "HAS_COMMENT";
pub const VOTED_ON: &str = "VOTED_ON";

pub const WORD_LABEL: &str = "WordNode";
pub const CATEGORY_LABEL: &str = "CategoryNode";
pub const DISCUSSION_LABEL: &str = "DiscussionNode";
pub const COMMENT_LABEL: &str = "CommentNode";
pub const USER_LABEL: &str = "User";

/// Inclusion votes cast either way.
pub const TOTAL_VOTES: &str =
    "coalesce(n.inclusionPositiveVotes, 0) + coalesce(n.inclusionNegativeVotes, 0)";

/// Sort field naming the projected `totalVotes` column instead of a property.
pub const TOTAL_VOTES_FIELD: &str = "totalVotes";

/// Quote a label, property or relationship name for interpolation into query
/// text. Plain identifiers pass through; anything else is backtick-escaped.
pub fn quote_identifier(name: &str) -> String {
    let mut chars = name.chars();
    let plain = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if plain {
        name.to_string()
    } else {
        format!("`{}`", name.replace('`', "``"))
    }
}

/// Single-quoted string literal.
pub fn string_literal(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

/// Map projection of a node with temporal properties rendered as strings.
pub fn node_projection(var: &str) -> String {
    format!(
        "{var} {{.*, createdAt: toString({var}.createdAt), updatedAt: toString({var}.updatedAt)}}"
    )
}

/// `{word, frequency, source}` for every TAGGED edge of `var`.
pub fn keyword_list(var: &str) -> String {
    format!(
        "[({var})-[t:{TAGGED}]->(w:{WORD_LABEL}) | {{word: w.word, frequency: t.frequency, source: coalesce(t.source, 'ai')}}]"
    )
}

/// `{id, name, inclusionNetVotes}` for every category of `var`.
pub fn category_list(var: &str) -> String {
    format!(
        "[({var})-[:{CATEGORIZED_AS}]->(c:{CATEGORY_LABEL}) | {{id: c.id, name: c.name, inclusionNetVotes: coalesce(c.inclusionNetVotes, 0)}}]"
    )
}

/// Id of the discussion attached to `var`, or null.
pub fn discussion_id(var: &str) -> String {
    format!("head([({var})-[:{HAS_DISCUSSION}]->(d:{DISCUSSION_LABEL}) | d.id])")
}

/// CREATE a node with the given parameterized properties, timestamps and
/// zeroed vote counters. Content counters only when `has_content_voting`.
pub fn create_node_with_voting(label: &str, property_names: &[&str], has_content_voting: bool) -> Fragment {
    let mut fields: Vec<String> = property_names
        .iter()
        .map(|p| format!("{}: ${p}", quote_identifier(p)))
        .collect();
    fields.push("createdAt: datetime()".to_string());
    fields.push("updatedAt: datetime()".to_string());
    fields.push("inclusionPositiveVotes: 0".to_string());
    fields.push("inclusionNegativeVotes: 0".to_string());
    fields.push("inclusionNetVotes: 0".to_string());
    if has_content_voting {
        fields.push("contentPositiveVotes: 0".to_string());
        fields.push("contentNegativeVotes: 0".to_string());
        fields.push("contentNetVotes: 0".to_string());
    }

    Fragment::new().create(format!(
        "(n:{} {{\n  {}\n}})",
        quote_identifier(label),
        fields.join(",\n  ")
    ))
}

/// Link `n` to every id in `$categoryIds`.
///
/// Rejects (drops the row) when more than `max_categories` ids are given, and
/// again when fewer categories matched than were requested, so a missing or
/// not-yet-included category never produces a partial write. Leaves
/// `n, categoryIds, attachedCategories` in scope.
pub fn attach_categories(max_categories: usize) -> Fragment {
    let inner = Fragment::new()
        .with("n, categoryIds")
        .unwind("categoryIds AS categoryId")
        .match_(format!("(cat:{CATEGORY_LABEL} {{id: categoryId}})"))
        .where_("cat.inclusionNetVotes > 0")
        .create(format!("(n)-[:{CATEGORIZED_AS} {{createdAt: datetime()}}]->(cat)"))
        .return_("count(cat) AS attachedCategories");

    Fragment::new()
        .with("n, $categoryIds AS categoryIds")
        .where_(format!("size(categoryIds) <= {max_categories}"))
        .call(inner)
        .with("n, categoryIds, attachedCategories")
        .where_("attachedCategories = size(categoryIds) OR size(categoryIds) = 0")
}

/// Link `n` to the words in `$keywords`. Words that do not exist, or have not
/// passed inclusion when `validate_inclusion` is set, are skipped without
/// dropping the row. Leaves `n, attachedKeywords` in scope.
pub fn attach_keywords(validate_inclusion: bool) -> Fragment {
    let mut inner = Fragment::new()
        .with("n")
        .unwind("$keywords AS keyword")
        .match_(format!("(w:{WORD_LABEL} {{word: keyword.word}})"));
    if validate_inclusion {
        inner = inner.where_("w.inclusionNetVotes > 0");
    }
    let inner = inner
        .create(format!(
            "(n)-[:{TAGGED} {{frequency: keyword.frequency, source: keyword.source, createdAt: datetime()}}]->(w)"
        ))
        .return_("count(w) AS attachedKeywords");

    Fragment::new().call(inner).with("n, attachedKeywords")
}

fn peer_pattern(target_label: Option<&str>) -> (String, Option<&'static str>) {
    match target_label {
        Some(label) => (format!("(o:{})", quote_identifier(label)), None),
        None => ("(o)".to_string(), Some("labels(o) = labels(n)")),
    }
}

/// Merge SHARED_TAG edges from `n` to every other node tagging one of its
/// words. Strength grows by `freqSelf * freqOther` each time the pair is seen
/// for a word. Peers are restricted to `target_label`, or to `n`'s own labels.
pub fn create_shared_tags(target_label: Option<&str>) -> Fragment {
    let (peer, same_labels) = peer_pattern(target_label);
    let mut conditions = vec!["o <> n".to_string()];
    conditions.extend(same_labels.map(str::to_string));

    let inner = Fragment::new()
        .with("n")
        .match_(format!("(n)-[t1:{TAGGED}]->(w:{WORD_LABEL})<-[t2:{TAGGED}]-{peer}"))
        .where_all(&conditions)
        .merge(format!("(n)-[st:{SHARED_TAG} {{word: w.word}}]->(o)"))
        .on_create_set("st.strength = t1.frequency * t2.frequency, st.createdAt = datetime()")
        .on_match_set(
            "st.strength = st.strength + t1.frequency * t2.frequency, st.updatedAt = datetime()",
        );

    Fragment::new().call(inner)
}

/// Merge SHARED_CATEGORY edges from `n` to included peers sharing a category.
/// Strength grows by 1 per shared category.
pub fn create_shared_categories(target_label: Option<&str>) -> Fragment {
    let (peer, same_labels) = peer_pattern(target_label);
    let mut conditions = vec!["o <> n".to_string(), "o.inclusionNetVotes > 0".to_string()];
    conditions.extend(same_labels.map(str::to_string));

    let inner = Fragment::new()
        .with("n")
        .match_(format!(
            "(n)-[:{CATEGORIZED_AS}]->(cat:{CATEGORY_LABEL})<-[:{CATEGORIZED_AS}]-{peer}"
        ))
        .where_all(&conditions)
        .merge(format!("(n)-[sc:{SHARED_CATEGORY} {{categoryId: cat.id}}]->(o)"))
        .on_create_set("sc.strength = 1, sc.categoryName = cat.name, sc.createdAt = datetime()")
        .on_match_set("sc.strength = sc.strength + 1, sc.updatedAt = datetime()");

    Fragment::new().call(inner)
}

/// Delete every relationship of the given types touching `n`. Derived
/// `SHARED_*` edges are removed in both directions, owned edges outgoing only.
pub fn delete_relationships(type_names: &[&str]) -> Fragment {
    type_names
        .iter()
        .enumerate()
        .fold(Fragment::new(), |f, (i, rel)| {
            let var = format!("r{i}");
            let pattern = if rel.starts_with("SHARED_") {
                format!("(n)-[{var}:{}]-()", quote_identifier(rel))
            } else {
                format!("(n)-[{var}:{}]->()", quote_identifier(rel))
            };
            f.optional_match(pattern).delete(var).with("DISTINCT n")
        })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationDirection {
    Outgoing,
    Incoming,
    Either,
}

/// One optional traversal for `get_node_with_relations`, collected under `alias`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationTraversal {
    pub rel_type: String,
    pub direction: RelationDirection,
    pub target_label: Option<String>,
    pub alias: String,
}

impl RelationTraversal {
    pub fn new(rel_type: &str, direction: RelationDirection, target_label: Option<&str>, alias: &str) -> Self {
        Self {
            rel_type: rel_type.to_string(),
            direction,
            target_label: target_label.map(str::to_string),
            alias: alias.to_string(),
        }
    }
}

/// Fetch `n` by id with collected related nodes per traversal plus its
/// discussion id.
pub fn get_node_with_relations(label: &str, id_field: &str, relations: &[RelationTraversal]) -> Fragment {
    let mut f = Fragment::new().match_(format!(
        "(n:{} {{{}: $id}})",
        quote_identifier(label),
        quote_identifier(id_field)
    ));
    let mut carried: Vec<String> = Vec::new();

    for rel in relations {
        let alias = quote_identifier(&rel.alias);
        let target_var = format!("{}Node", rel.alias.replace(|c: char| !c.is_ascii_alphanumeric(), "_"));
        let target = match &rel.target_label {
            Some(l) => format!("({target_var}:{})", quote_identifier(l)),
            None => format!("({target_var})"),
        };
        let edge = format!("[:{}]", quote_identifier(&rel.rel_type));
        let pattern = match rel.direction {
            RelationDirection::Outgoing => format!("(n)-{edge}->{target}"),
            RelationDirection::Incoming => format!("(n)<-{edge}-{target}"),
            RelationDirection::Either => format!("(n)-{edge}-{target}"),
        };

        let mut projection = vec!["n".to_string()];
        projection.extend(carried.iter().cloned());
        projection.push(collect_aggregations(&[Aggregation::distinct(
            &rel.alias,
            &node_projection(&target_var),
        )]));

        f = f.optional_match(pattern).with(projection.join(", "));
        carried.push(alias);
    }

    let mut returns = vec![format!("{} AS n", node_projection("n"))];
    returns.extend(carried);
    returns.push("d.id AS discussionId".to_string());

    f.optional_match(format!("(n)-[:{HAS_DISCUSSION}]->(d:{DISCUSSION_LABEL})"))
        .return_(returns.join(", "))
}

/// MATCH the parent as `parent`, optionally requiring it passed inclusion.
/// An unlabeled parent matches any node with the id field.
pub fn validate_parent_node(parent_label: Option<&str>, parent_id_field: &str, requires_inclusion: bool) -> Fragment {
    let label = parent_label
        .map(|l| format!(":{}", quote_identifier(l)))
        .unwrap_or_default();
    let f = Fragment::new().match_(format!(
        "(parent{label} {{{}: $parentId}})",
        quote_identifier(parent_id_field)
    ));
    if requires_inclusion {
        f.where_("parent.inclusionNetVotes > 0")
    } else {
        f
    }
}

/// Edge between `parent` and `n`; `parent_to_child` picks the direction.
pub fn create_parent_relationship(relationship: &str, parent_to_child: bool) -> Fragment {
    let rel = quote_identifier(relationship);
    let body = if parent_to_child {
        format!("(parent)-[:{rel} {{createdAt: datetime()}}]->(n)")
    } else {
        format!("(n)-[:{rel} {{createdAt: datetime()}}]->(parent)")
    };
    Fragment::new().create(body)
}

/// Ensure the creating user exists and record authorship.
pub fn create_user_relationship(node_type: &str) -> Fragment {
    Fragment::new()
        .with("n")
        .merge(format!("(u:{USER_LABEL} {{sub: $createdBy}})"))
        .create(format!(
            "(u)-[:{CREATED} {{createdAt: datetime(), type: {}}}]->(n)",
            string_literal(node_type)
        ))
}

/// SKIP/LIMIT with integer literals; negative offsets clamp to zero.
pub fn paginate(offset: i64, limit: Option<i64>) -> Fragment {
    let f = Fragment::new().skip(offset.max(0).to_string());
    match limit {
        Some(l) => f.limit(l.max(0).to_string()),
        None => f,
    }
}

fn sort_key(field: &str) -> String {
    if field == TOTAL_VOTES_FIELD {
        field.to_string()
    } else {
        format!("n.{}", quote_identifier(field))
    }
}

/// ORDER BY `n.field` then each tiebreaker. `totalVotes` sorts on the
/// projected column, so the caller must carry `TOTAL_VOTES AS totalVotes`.
pub fn order_by(field: &str, direction: SortDirection, tiebreakers: &[(&str, SortDirection)]) -> Fragment {
    let keys: Vec<String> = std::iter::once((field, direction))
        .chain(tiebreakers.iter().copied())
        .map(|(f, d)| format!("{} {}", sort_key(f), d.as_cypher()))
        .collect();
    Fragment::new().order_by(keys.join(", "))
}

/// WHERE `n.field >= $param` AND any extra conditions.
pub fn filter_by_votes(field: &str, param: &str, extra_conditions: &[String]) -> Fragment {
    let mut conditions = vec![format!("n.{} >= ${param}", quote_identifier(field))];
    conditions.extend(extra_conditions.iter().cloned());
    Fragment::new().where_all(&conditions)
}

/// One `collect(...) AS alias` projection item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aggregation {
    pub alias: String,
    pub expression: String,
    pub distinct: bool,
}

impl Aggregation {
    pub fn distinct(alias: &str, expression: &str) -> Self {
        Self {
            alias: alias.to_string(),
            expression: expression.to_string(),
            distinct: true,
        }
    }
}

/// Comma-separated collect projections for use inside WITH or RETURN.
pub fn collect_aggregations(specs: &[Aggregation]) -> String {
    specs
        .iter()
        .map(|s| {
            let distinct = if s.distinct { "DISTINCT " } else { "" };
            format!("collect({distinct}{}) AS {}", s.expression, quote_identifier(&s.alias))
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cypher::ClauseKind;

    #[test]
    fn create_node_is_pure_and_gates_content_votes() {
        let a = create_node_with_voting("StatementNode", &["id", "statement", "createdBy"], true);
        let b = create_node_with_voting("StatementNode", &["id", "statement", "createdBy"], true);
        assert_eq!(a.render(), b.render());
        assert!(a.contains("contentPositiveVotes: 0"));
        assert!(a.contains("contentNetVotes: 0"));

        let c = create_node_with_voting("QuantityNode", &["id"], false);
        assert!(!c.contains("contentPositiveVotes"));
        assert!(c.contains("inclusionNetVotes: 0"));
        assert!(c.contains("createdAt: datetime()"));
        assert!(c.contains("updatedAt: datetime()"));
    }

    #[test]
    fn create_node_preserves_property_order() {
        let text = create_node_with_voting("StatementNode", &["id", "statement", "createdBy"], false).render();
        let id = text.find("id: $id").unwrap();
        let statement = text.find("statement: $statement").unwrap();
        let created_by = text.find("createdBy: $createdBy").unwrap();
        assert!(id < statement && statement < created_by);
    }

    #[test]
    fn attach_categories_guards_count_twice() {
        let f = attach_categories(3);
        let text = f.render();
        assert!(text.contains("WHERE size(categoryIds) <= 3"));
        assert!(text.contains("WHERE cat.inclusionNetVotes > 0"));
        assert!(text.contains("attachedCategories = size(categoryIds) OR size(categoryIds) = 0"));
        assert!(text.find("<= 3").unwrap() < text.find("CATEGORIZED_AS").unwrap());
    }

    #[test]
    fn keyword_inclusion_check_is_optional() {
        assert!(attach_keywords(true).contains("w.inclusionNetVotes > 0"));
        assert!(!attach_keywords(false).contains("w.inclusionNetVotes > 0"));
        assert!(attach_keywords(false).contains("source: keyword.source"));
    }

    #[test]
    fn shared_tags_multiply_frequencies() {
        let text = create_shared_tags(Some("StatementNode")).render();
        assert!(text.contains("MERGE (n)-[st:SHARED_TAG {word: w.word}]->(o)"));
        assert!(text.contains("ON CREATE SET st.strength = t1.frequency * t2.frequency"));
        assert!(text.contains("ON MATCH SET st.strength = st.strength + t1.frequency * t2.frequency"));
        assert!(text.contains("(o:StatementNode)"));
        assert!(!text.contains("labels(o) = labels(n)"));
    }

    #[test]
    fn shared_tags_default_to_own_labels() {
        assert!(create_shared_tags(None).contains("labels(o) = labels(n)"));
    }

    #[test]
    fn shared_categories_require_included_peer() {
        let text = create_shared_categories(None).render();
        assert!(text.contains("o.inclusionNetVotes > 0"));
        assert!(text.contains("sc.strength = sc.strength + 1"));
        assert!(text.contains("SHARED_CATEGORY {categoryId: cat.id}"));
    }

    #[test]
    fn delete_relationships_one_pair_per_type() {
        let f = delete_relationships(&[TAGGED, SHARED_TAG]);
        assert_eq!(
            f.kinds(),
            vec![
                ClauseKind::OptionalMatch,
                ClauseKind::Delete,
                ClauseKind::With,
                ClauseKind::OptionalMatch,
                ClauseKind::Delete,
                ClauseKind::With,
            ]
        );
        let text = f.render();
        assert!(text.contains("(n)-[r0:TAGGED]->()"));
        assert!(text.contains("(n)-[r1:SHARED_TAG]-()"));
    }

    #[test]
    fn node_with_relations_carries_collections_and_discussion() {
        let f = get_node_with_relations(
            "AnswerNode",
            "id",
            &[
                RelationTraversal::new(TAGGED, RelationDirection::Outgoing, Some(WORD_LABEL), "keywords"),
                RelationTraversal::new("HAS_ANSWER", RelationDirection::Incoming, None, "question"),
            ],
        );
        let text = f.render();
        assert!(text.contains("(n)-[:TAGGED]->(keywordsNode:WordNode)"));
        assert!(text.contains("(n)<-[:HAS_ANSWER]-(questionNode)"));
        assert!(text.contains("WITH n, keywords, collect(DISTINCT questionNode"));
        assert!(text.contains("HAS_DISCUSSION"));
        assert!(text.ends_with("keywords, question, d.id AS discussionId"));
    }

    #[test]
    fn parent_validation_and_creator_edge() {
        let f = validate_parent_node(Some("OpenQuestionNode"), "id", true);
        assert_eq!(
            f.render(),
            "MATCH (parent:OpenQuestionNode {id: $parentId})\nWHERE parent.inclusionNetVotes > 0"
        );
        assert!(!validate_parent_node(None, "id", false).contains("inclusionNetVotes"));

        let user = create_user_relationship("statement").render();
        assert!(user.contains("MERGE (u:User {sub: $createdBy})"));
        assert!(user.contains("type: 'statement'"));
    }

    #[test]
    fn paging_and_ordering() {
        assert_eq!(paginate(-4, Some(20)).render(), "SKIP 0\nLIMIT 20");
        assert_eq!(paginate(10, None).render(), "SKIP 10");
        assert_eq!(
            order_by("inclusionNetVotes", SortDirection::Desc, &[("createdAt", SortDirection::Asc)]).render(),
            "ORDER BY n.inclusionNetVotes DESC, n.createdAt ASC"
        );
        assert_eq!(
            order_by("totalVotes", SortDirection::Asc, &[("id", SortDirection::Asc)]).render(),
            "ORDER BY totalVotes ASC, n.id ASC"
        );
    }

    #[test]
    fn identifiers_are_escaped() {
        assert_eq!(quote_identifier("inclusionNetVotes"), "inclusionNetVotes");
        assert_eq!(quote_identifier("bad name`) DETACH DELETE n //"), "`bad name``) DETACH DELETE n //`");
        assert_eq!(string_literal("it's"), "'it\\'s'");
    }

    #[test]
    fn relation_lists_use_pattern_comprehensions() {
        assert!(keyword_list("n").starts_with("[(n)-[t:TAGGED]->(w:WordNode) |"));
        assert!(category_list("n").contains("(n)-[:CATEGORIZED_AS]->(c:CategoryNode)"));
        assert_eq!(
            discussion_id("n"),
            "head([(n)-[:HAS_DISCUSSION]->(d:DiscussionNode) | d.id])"
        );
    }

    #[test]
    fn vote_filter_and_aggregations() {
        let f = filter_by_votes("inclusionNetVotes", "minInclusionVotes", &["n.createdBy = $createdBy".to_string()]);
        assert_eq!(
            f.render(),
            "WHERE n.inclusionNetVotes >= $minInclusionVotes\n  AND n.createdBy = $createdBy"
        );
        let aggs = collect_aggregations(&[
            Aggregation::distinct("keywords", "w.word"),
            Aggregation {
                alias: "categories".to_string(),
                expression: "c.id".to_string(),
                distinct: false,
            },
        ]);
        assert_eq!(aggs, "collect(DISTINCT w.word) AS keywords, collect(c.id) AS categories");
    }
}
