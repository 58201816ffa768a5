//! Graph projection: the filtered node query and client-side edge assembly.
//!
//! The query keeps one row per retained node with its outgoing shared-edge
//! descriptors restricted to the retained window. Assembly drops descriptors
//! whose target fell outside the window, merges the two directions of each
//! pair, and re-applies the set filters as a safety net.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use zer0_common::{
    FilterMode, GraphData, GraphEdge, GraphEdgeType, GraphFilters, GraphNode, GraphNodeMetadata,
    SetFilter, SortDirection, UserFilterMode,
};

use crate::cypher::{Fragment, Statement};
use crate::kinds::{map_content_node, ContentNodeKind, ParentLink};
use crate::query_builder::{
    category_list, discussion_id, filter_by_votes, keyword_list, node_projection, order_by, paginate,
    quote_identifier, CATEGORIZED_AS, CATEGORY_LABEL, CREATED, SHARED_CATEGORY, SHARED_TAG, TAGGED,
    TOTAL_VOTES, USER_LABEL, VOTED_ON, WORD_LABEL,
};
use crate::store::{Record, StoreError};

/// Predicate over a list expression for one set filter, or `None` when the
/// filter is empty.
pub fn set_filter_condition(list_expr: &str, param: &str, filter: &SetFilter) -> Option<String> {
    if !filter.is_active() {
        return None;
    }
    let condition = match filter.mode {
        FilterMode::Any => format!("any(v IN ${param} WHERE v IN {list_expr})"),
        FilterMode::All => format!("all(v IN ${param} WHERE v IN {list_expr})"),
        FilterMode::Exact => format!(
            "all(v IN ${param} WHERE v IN {list_expr}) AND all(v IN {list_expr} WHERE v IN ${param})"
        ),
    };
    Some(condition)
}

/// ORDER BY `totalVotes`, `inclusionNetVotes` (default) or any node field,
/// with the id as a stable tiebreaker.
pub fn graph_order(sort_by: Option<&str>, direction: SortDirection, id_field: &str) -> Fragment {
    let field = match sort_by {
        None | Some("") => "inclusionNetVotes",
        Some(field) => field,
    };
    order_by(field, direction, &[(id_field, SortDirection::Asc)])
}

fn shared_edges_call(rel: &str, shared_field: &str, id_field: &str, alias: &str) -> Fragment {
    let inner = Fragment::new()
        .with("n, retained")
        .optional_match(format!("(n)-[e:{rel}]-(o)"))
        .where_("o IN retained")
        .with(format!(
            "o, avg(e.strength) AS strength, collect(DISTINCT e.{shared_field}) AS shared"
        ))
        .return_(format!(
            "collect({{target: o.{}, weight: strength, shared: shared}}) AS {alias}",
            quote_identifier(id_field)
        ));
    Fragment::new().call(inner)
}

fn parent_id_expression(link: &ParentLink) -> String {
    let label = link
        .label
        .map(|l| format!(":{}", quote_identifier(l)))
        .unwrap_or_default();
    let rel = quote_identifier(link.relationship);
    let pattern = if link.parent_to_child {
        format!("(n)<-[:{rel}]-(p{label})")
    } else {
        format!("(n)-[:{rel}]->(p{label})")
    };
    format!("head([{pattern} | p.{}])", quote_identifier(link.id_field))
}

/// Filtered, sorted and paginated node query with shared-edge descriptors.
pub fn graph_nodes_statement<K: ContentNodeKind>(
    kind: &K,
    filters: &GraphFilters,
    default_min_inclusion_votes: i64,
    default_limit: i64,
) -> Statement {
    let id_field = kind.id_field();
    let mut params: Vec<(String, Value)> = vec![(
        "minInclusionVotes".to_string(),
        json!(filters
            .min_inclusion_votes
            .unwrap_or(default_min_inclusion_votes)),
    )];

    let mut conditions = Vec::new();
    if let Some(keywords) = &filters.keywords {
        if let Some(c) = set_filter_condition("nodeKeywords", "keywordValues", keywords) {
            conditions.push(c);
            params.push(("keywordValues".to_string(), json!(keywords.values)));
        }
    }
    if let Some(categories) = &filters.categories {
        if let Some(c) = set_filter_condition("nodeCategories", "categoryValues", categories) {
            conditions.push(c);
            params.push(("categoryValues".to_string(), json!(categories.values)));
        }
    }
    if let Some(user) = &filters.user {
        let rel = match user.mode {
            UserFilterMode::Created => CREATED,
            UserFilterMode::Interacted => VOTED_ON,
        };
        conditions.push(format!(
            "size([(u:{USER_LABEL} {{sub: $userId}})-[:{rel}]->(n) | u]) > 0"
        ));
        params.push(("userId".to_string(), json!(user.user_id)));
    }

    let sort = graph_order(
        filters.sort_by.as_deref(),
        filters.sort_direction.unwrap_or_default(),
        id_field,
    );

    let mut returns = vec![
        format!("{} AS n", node_projection("n")),
        "nodeKeywords".to_string(),
        "nodeCategories".to_string(),
        "totalVotes".to_string(),
        format!("{} AS discussionId", discussion_id("n")),
        "tagEdges".to_string(),
        "categoryEdges".to_string(),
    ];
    if let Some(link) = kind.parent() {
        returns.push(format!("{} AS parentId", parent_id_expression(&link)));
    }

    let f = Fragment::new()
        .match_(format!("(n:{})", quote_identifier(kind.label())))
        .with(format!(
            "n, [(n)-[:{TAGGED}]->(w:{WORD_LABEL}) | w.word] AS nodeKeywords, \
             [(n)-[:{CATEGORIZED_AS}]->(c:{CATEGORY_LABEL}) | c.id] AS nodeCategories"
        ))
        .append(filter_by_votes("inclusionNetVotes", "minInclusionVotes", &conditions))
        .with(format!("n, nodeKeywords, nodeCategories, {TOTAL_VOTES} AS totalVotes"))
        .append(sort)
        .append(paginate(
            filters.offset.unwrap_or(0),
            Some(filters.limit.unwrap_or(default_limit)),
        ))
        .with(
            "collect({node: n, keywords: nodeKeywords, categories: nodeCategories, totalVotes: totalVotes}) AS rows",
        )
        .with("rows, [row IN rows | row.node] AS retained")
        .unwind("rows AS row")
        .with(
            "row.node AS n, row.keywords AS nodeKeywords, row.categories AS nodeCategories, \
             row.totalVotes AS totalVotes, retained",
        )
        .append(shared_edges_call(SHARED_TAG, "word", id_field, "tagEdges"))
        .append(shared_edges_call(SHARED_CATEGORY, "categoryName", id_field, "categoryEdges"))
        .return_(returns.join(", "));

    Statement::new(f).params(params)
}

/// Included word or category nodes for the graph overlay.
pub fn special_nodes_statement(label: &str, limit: i64) -> Statement {
    let f = Fragment::new()
        .match_(format!("(n:{})", quote_identifier(label)))
        .where_("n.inclusionNetVotes > 0")
        .with("n")
        .order_by("n.inclusionNetVotes DESC")
        .append(paginate(0, Some(limit)))
        .return_(format!(
            "{} AS n, {TOTAL_VOTES} AS totalVotes, {} AS discussionId",
            node_projection("n"),
            discussion_id("n")
        ));
    Statement::new(f)
}

/// Nodes by id, optionally with their keyword and category lists.
pub fn bulk_nodes_statement<K: ContentNodeKind>(kind: &K, ids: &[String], include_relationships: bool) -> Statement {
    let mut returns = vec![
        format!("{} AS n", node_projection("n")),
        format!("{TOTAL_VOTES} AS totalVotes"),
        format!("{} AS discussionId", discussion_id("n")),
    ];
    if include_relationships {
        returns.push(format!("{} AS keywords", keyword_list("n")));
        returns.push(format!("{} AS categories", category_list("n")));
    }

    let f = Fragment::new()
        .match_(format!("(n:{})", quote_identifier(kind.label())))
        .where_(format!("n.{} IN $ids", quote_identifier(kind.id_field())))
        .return_(returns.join(", "));
    Statement::new(f).param("ids", json!(ids))
}

/// Graph node for one projected row.
pub fn graph_node_from_record(
    record: &Record,
    node_type: &str,
    id_field: &str,
    content_voting: bool,
) -> Result<GraphNode, StoreError> {
    let node = map_content_node(record, node_type, id_field, content_voting)?;
    let metadata = GraphNodeMetadata {
        inclusion_votes: node.inclusion_votes.net,
        total_votes: record
            .get_opt::<i64>("totalVotes")
            .unwrap_or_else(|| node.inclusion_votes.total()),
        has_discussion: node.discussion_id.is_some(),
        created_at: node.created_at,
    };
    let data = serde_json::to_value(&node).map_err(|e| StoreError::Decode {
        field: "n".to_string(),
        message: e.to_string(),
    })?;

    Ok(GraphNode {
        id: node.id,
        node_type: node_type.to_string(),
        data,
        metadata,
    })
}

#[derive(Debug, Default, Deserialize)]
struct EdgeDescriptor {
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    weight: Option<f64>,
    #[serde(default)]
    shared: Vec<String>,
}

#[derive(Default)]
struct PairAccumulator {
    total: f64,
    count: usize,
    shared: BTreeSet<String>,
}

/// Build `GraphData` from `graph_nodes_statement` rows.
pub fn assemble_graph<K: ContentNodeKind>(
    kind: &K,
    records: &[Record],
    filters: &GraphFilters,
) -> Result<GraphData, StoreError> {
    let mut nodes = Vec::new();
    let mut retained: Vec<(&Record, String)> = Vec::new();

    for record in records {
        let keywords: Vec<String> = record.get_opt("nodeKeywords").unwrap_or_default();
        let categories: Vec<String> = record.get_opt("nodeCategories").unwrap_or_default();
        let keep = filters.keywords.as_ref().map_or(true, |f| f.matches(&keywords))
            && filters.categories.as_ref().map_or(true, |f| f.matches(&categories));
        if !keep {
            warn!(label = kind.label(), "Graph row failed set filters, dropped");
            continue;
        }

        let node = graph_node_from_record(
            record,
            kind.type_name(),
            kind.id_field(),
            kind.supports_content_voting(),
        )?;
        retained.push((record, node.id.clone()));
        nodes.push(node);
    }

    let ids: HashSet<&str> = retained.iter().map(|(_, id)| id.as_str()).collect();
    let mut pairs: BTreeMap<(String, String, GraphEdgeType), PairAccumulator> = BTreeMap::new();
    let mut edges = Vec::new();
    let mut parent_edges: BTreeSet<(String, String)> = BTreeSet::new();

    for (record, source) in &retained {
        for (column, edge_type) in [
            ("tagEdges", GraphEdgeType::SharedTag),
            ("categoryEdges", GraphEdgeType::SharedCategory),
        ] {
            let descriptors: Vec<EdgeDescriptor> = record.get_opt(column).unwrap_or_default();
            for d in descriptors {
                let (Some(target), Some(weight)) = (d.target, d.weight) else {
                    continue;
                };
                if target == *source || !ids.contains(target.as_str()) {
                    continue;
                }
                let acc = pairs
                    .entry(GraphEdge::pair_key(source, &target, edge_type))
                    .or_default();
                acc.total += weight;
                acc.count += 1;
                acc.shared.extend(d.shared);
            }
        }

        if let Some(parent) = record.get_opt::<String>("parentId") {
            if ids.contains(parent.as_str()) {
                parent_edges.insert((parent, source.clone()));
            }
        }
    }

    for ((a, b, edge_type), acc) in pairs {
        edges.push(GraphEdge {
            id: format!("{a}-{b}-{}", edge_type.as_str()),
            weight: acc.total / acc.count as f64,
            metadata: json!({ "shared": acc.shared }),
            source: a,
            target: b,
            edge_type,
        });
    }
    for (parent, child) in parent_edges {
        edges.push(GraphEdge {
            id: format!("{parent}-{child}-{}", GraphEdgeType::ParentChild.as_str()),
            source: parent,
            target: child,
            edge_type: GraphEdgeType::ParentChild,
            weight: 1.0,
            metadata: json!({}),
        });
    }

    Ok(GraphData { nodes, edges })
}
