//! Category lifecycle and graph composition. Wraps a `TaggedSchema`; tag and
//! category state are independent.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::json;
use tracing::info;

use zer0_common::validators::{validate_category_count, validate_id, validate_pagination};
use zer0_common::{
    CategoryRef, CombinedRelatedNode, ContentNode, CreateNodeInput, GraphData, GraphFilters,
    GraphNode, KeywordWithFrequency, NodeUpdate, RelatedNode, SchemaConfig, Zer0Error,
};

use crate::cypher::Statement;
use crate::graph::{
    assemble_graph, bulk_nodes_statement, graph_node_from_record, graph_nodes_statement,
    special_nodes_statement,
};
use crate::kinds::ContentNodeKind;
use crate::node_schema::{storage_failure, NodeSchema};
use crate::query_builder::{
    attach_categories, create_shared_categories, delete_relationships,
    CATEGORIZED_AS, CATEGORY_LABEL, SHARED_CATEGORY, WORD_LABEL,
};
use crate::store::GraphStore;
use crate::tagged::TaggedSchema;

/// Merge tag and category relatedness, highest score first.
pub fn combine_related(tags: &[RelatedNode], categories: &[RelatedNode], limit: usize) -> Vec<CombinedRelatedNode> {
    let mut strengths: BTreeMap<&str, (f64, f64)> = BTreeMap::new();
    for r in tags {
        strengths.entry(r.id.as_str()).or_default().0 += r.strength;
    }
    for r in categories {
        strengths.entry(r.id.as_str()).or_default().1 += r.strength;
    }

    let mut combined: Vec<CombinedRelatedNode> = strengths
        .into_iter()
        .map(|(id, (tag, category))| CombinedRelatedNode::new(id, tag, category))
        .collect();
    combined.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
    combined.truncate(limit);
    combined
}

pub struct CategorizedSchema<K: ContentNodeKind> {
    tagged: TaggedSchema<K>,
}

impl<K: ContentNodeKind> CategorizedSchema<K> {
    pub fn new(store: Arc<dyn GraphStore>, kind: K, config: SchemaConfig) -> Self {
        Self {
            tagged: TaggedSchema::new(store, kind, config),
        }
    }

    pub fn tagged(&self) -> &TaggedSchema<K> {
        &self.tagged
    }

    pub fn base(&self) -> &NodeSchema<K> {
        self.tagged.base()
    }

    fn kind(&self) -> &K {
        self.base().kind()
    }

    fn config(&self) -> &SchemaConfig {
        self.base().config()
    }

    fn id_label(&self) -> String {
        format!("{} ID", self.kind().type_name())
    }

    fn category_failure(&self, node_id: &str) -> String {
        format!(
            "{} {node_id}: every category must exist and have passed inclusion",
            self.kind().type_name()
        )
    }

    /// Link the node to every category or to none. Returns the number linked.
    pub async fn attach_categories(&self, node_id: &str, category_ids: &[String]) -> Result<usize, Zer0Error> {
        validate_id(node_id, &self.id_label())?;
        validate_category_count(category_ids, self.config().max_categories)?;
        if category_ids.is_empty() {
            return Ok(0);
        }

        let f = self
            .base()
            .match_node()
            .append(attach_categories(self.config().max_categories))
            .return_("attachedCategories");
        let statement = Statement::new(f)
            .param("id", node_id)
            .param("categoryIds", json!(category_ids))
            .expect_rows(self.category_failure(node_id));

        let records = self.base().write("attach categories", statement).await?;
        let attached = records
            .first()
            .and_then(|r| r.get_opt::<usize>("attachedCategories"))
            .unwrap_or(0);
        info!(node_id, label = self.kind().label(), attached, "Attached categories");
        Ok(attached)
    }

    pub async fn create_shared_category_relationships(
        &self,
        node_id: &str,
        target_label: Option<&str>,
    ) -> Result<(), Zer0Error> {
        validate_id(node_id, &self.id_label())?;
        let f = self
            .base()
            .match_node()
            .append(create_shared_categories(target_label))
            .return_("count(n) AS touched");
        self.base()
            .write("create shared categories", Statement::new(f).param("id", node_id))
            .await?;
        Ok(())
    }

    pub async fn get_categories(&self, node_id: &str) -> Result<Vec<CategoryRef>, Zer0Error> {
        validate_id(node_id, &self.id_label())?;
        let f = self
            .base()
            .match_node()
            .match_(format!("(n)-[:{CATEGORIZED_AS}]->(c:{CATEGORY_LABEL})"))
            .return_("c.id AS id, c.name AS name, coalesce(c.inclusionNetVotes, 0) AS inclusionNetVotes")
            .order_by("name ASC");
        let records = self
            .base()
            .read("get categories", Statement::new(f).param("id", node_id))
            .await?;

        self.base().map_rows("get categories", &records, |r| {
            Ok(CategoryRef {
                id: r.get("id")?,
                name: r.get("name")?,
                inclusion_net_votes: r.get("inclusionNetVotes")?,
            })
        })
    }

    /// Peers by summed shared-category strength.
    pub async fn find_related_by_categories(&self, node_id: &str, limit: i64) -> Result<Vec<RelatedNode>, Zer0Error> {
        self.tagged
            .find_related(
                "find related by categories",
                node_id,
                limit,
                (SHARED_CATEGORY, "categoryId", "categoryName"),
            )
            .await
    }

    /// Score = tag strength + category strength × 2.
    pub async fn find_related_by_combined(
        &self,
        node_id: &str,
        limit: i64,
    ) -> Result<Vec<CombinedRelatedNode>, Zer0Error> {
        validate_pagination(None, Some(limit), self.config().max_page_size)?;
        let window = self.config().max_page_size;
        let tags = self.tagged.find_related_by_tags(node_id, window).await?;
        let categories = self.find_related_by_categories(node_id, window).await?;
        Ok(combine_related(&tags, &categories, limit as usize))
    }

    fn category_replacement(&self, node_id: &str, category_ids: &[String]) -> Vec<Statement> {
        let clear = self
            .base()
            .match_node()
            .append(delete_relationships(&[CATEGORIZED_AS, SHARED_CATEGORY]))
            .return_("true AS cleared");
        let mut statements = vec![Statement::new(clear)
            .param("id", node_id)
            .expect_rows(format!("{} {node_id} not found", self.kind().type_name()))];

        if !category_ids.is_empty() {
            let attach = self
                .base()
                .match_node()
                .append(attach_categories(self.config().max_categories))
                .append(create_shared_categories(None))
                .return_("attachedCategories");
            statements.push(
                Statement::new(attach)
                    .param("id", node_id)
                    .param("categoryIds", json!(category_ids))
                    .expect_rows(self.category_failure(node_id)),
            );
        }
        statements
    }

    /// Replace the node's categories in one unit of work.
    pub async fn update_categories(&self, node_id: &str, category_ids: &[String]) -> Result<usize, Zer0Error> {
        validate_id(node_id, &self.id_label())?;
        validate_category_count(category_ids, self.config().max_categories)?;

        let results = self
            .base()
            .write_unit("update categories", self.category_replacement(node_id, category_ids))
            .await?;
        let attached = results
            .get(1)
            .and_then(|rows| rows.first())
            .and_then(|r| r.get_opt::<usize>("attachedCategories"))
            .unwrap_or(0);
        info!(node_id, label = self.kind().label(), attached, "Replaced categories");
        Ok(attached)
    }

    /// Property update plus optional keyword and category replacement, all in
    /// one unit of work. `None` leaves that relationship set untouched.
    pub async fn update_with_relationships(
        &self,
        node_id: &str,
        update: NodeUpdate,
        keywords: Option<&[KeywordWithFrequency]>,
        category_ids: Option<&[String]>,
    ) -> Result<ContentNode, Zer0Error> {
        validate_id(node_id, &self.id_label())?;
        if !update.is_empty() {
            self.base().validate_update(&update)?;
        }
        if let Some(ids) = category_ids {
            validate_category_count(ids, self.config().max_categories)?;
        }

        let mut statements = Vec::new();
        if !update.is_empty() {
            statements.push(
                self.base()
                    .update_statement(node_id, &update)
                    .expect_rows(format!("{} {node_id} not found", self.kind().type_name())),
            );
        }
        if let Some(keywords) = keywords {
            statements.extend(self.tagged.keyword_replacement(node_id, keywords));
        }
        if let Some(ids) = category_ids {
            statements.extend(self.category_replacement(node_id, ids));
        }
        statements.push(
            self.base()
                .detail_statement(node_id)
                .expect_rows(format!("{} {node_id} not found", self.kind().type_name())),
        );

        let results = self.base().write_unit("update node", statements).await?;
        let detail = results.last().map(Vec::as_slice).unwrap_or_default();
        let node = self
            .base()
            .map_first("update node", detail)?
            .ok_or_else(|| Zer0Error::NotFound(format!("{} {node_id}", self.kind().type_name())))?;
        info!(
            node_id,
            label = self.kind().label(),
            retagged = keywords.is_some(),
            recategorized = category_ids.is_some(),
            "Updated node with relationships"
        );
        Ok(node)
    }

    /// Tagged create with category attachment and shared-category derivation
    /// spliced in before the final projection. Does not execute.
    pub fn build_categorized_create_query(&self, input: &CreateNodeInput) -> Statement {
        let mut statement = self.tagged.build_tagged_create_query(input);
        if input.category_ids.is_empty() {
            return statement;
        }

        let ret = statement.fragment.take_return();
        let mut fragment = std::mem::take(&mut statement.fragment)
            .append(attach_categories(self.config().max_categories))
            .append(create_shared_categories(None));
        if let Some(ret) = ret {
            fragment = fragment.push_clause(ret);
        }
        statement.fragment = fragment;
        statement.param("categoryIds", json!(input.category_ids))
    }

    /// Validate (including the category ceiling), then create atomically.
    pub async fn create(&self, input: CreateNodeInput) -> Result<ContentNode, Zer0Error> {
        self.tagged.validate_create(&input, self.config().max_categories)?;
        let statement = self.build_categorized_create_query(&input);
        self.tagged.execute_create(statement).await
    }

    fn validate_graph_filters(&self, filters: &GraphFilters) -> Result<(), Zer0Error> {
        validate_pagination(filters.offset, filters.limit, self.config().max_page_size)
    }

    /// Filtered node window with shared edges between retained nodes.
    pub async fn get_nodes_for_graph_with_filters(&self, filters: &GraphFilters) -> Result<GraphData, Zer0Error> {
        self.validate_graph_filters(filters)?;
        let config = self.config();
        let statement = graph_nodes_statement(
            self.kind(),
            filters,
            config.default_min_inclusion_votes,
            config.max_page_size,
        );
        let records = self.base().read("get graph nodes", statement).await?;
        let data = assemble_graph(self.kind(), &records, filters)
            .map_err(|e| storage_failure("get graph nodes", self.kind().label(), e))?;
        info!(
            label = self.kind().label(),
            nodes = data.nodes.len(),
            edges = data.edges.len(),
            "Built graph window"
        );
        Ok(data)
    }

    /// Graph window plus opted-in word and category nodes.
    pub async fn get_graph_data(&self, filters: &GraphFilters) -> Result<GraphData, Zer0Error> {
        let mut data = self.get_nodes_for_graph_with_filters(filters).await?;
        let special = self.get_special_nodes_for_graph(filters).await?;
        data.nodes.extend(special);
        Ok(data)
    }

    pub async fn get_special_nodes_for_graph(&self, filters: &GraphFilters) -> Result<Vec<GraphNode>, Zer0Error> {
        let mut nodes = Vec::new();
        let limit = filters.limit.unwrap_or(self.config().max_page_size);

        let overlays = [
            (filters.include_word_nodes, WORD_LABEL, "word", "word"),
            (filters.include_category_nodes, CATEGORY_LABEL, "category", "id"),
        ];
        for (enabled, label, node_type, id_field) in overlays {
            if !enabled {
                continue;
            }
            let records = self
                .base()
                .read("get special graph nodes", special_nodes_statement(label, limit))
                .await?;
            for record in &records {
                let node = graph_node_from_record(record, node_type, id_field, false)
                    .map_err(|e| storage_failure("get special graph nodes", label, e))?;
                nodes.push(node);
            }
        }
        Ok(nodes)
    }

    /// id → graph node for the requested ids that exist.
    pub async fn get_bulk_nodes_with_relationships(
        &self,
        node_ids: &[String],
        include_relationships: bool,
    ) -> Result<BTreeMap<String, GraphNode>, Zer0Error> {
        if node_ids.is_empty() {
            return Ok(BTreeMap::new());
        }
        let statement = bulk_nodes_statement(self.kind(), node_ids, include_relationships);
        let records = self.base().read("get bulk nodes", statement).await?;

        let nodes = self.base().map_rows("get bulk nodes", &records, |r| {
            graph_node_from_record(
                r,
                self.kind().type_name(),
                self.kind().id_field(),
                self.kind().supports_content_voting(),
            )
        })?;
        Ok(nodes.into_iter().map(|n| (n.id.clone(), n)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cypher::ClauseKind;
    use crate::kinds::StatementKind;
    use crate::testing::{CallKind, RecordingStore};
    use zer0_common::{KeywordSource, SetFilter};

    fn schema(store: &Arc<RecordingStore>) -> CategorizedSchema<StatementKind> {
        CategorizedSchema::new(store.clone(), StatementKind, SchemaConfig::default())
    }

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn related(id: &str, strength: f64) -> RelatedNode {
        RelatedNode {
            id: id.to_string(),
            shared: Vec::new(),
            strength,
        }
    }

    fn input(category_ids: &[&str]) -> CreateNodeInput {
        CreateNodeInput::builder()
            .id("s1")
            .created_by("user-1")
            .properties(BTreeMap::from([("statement".to_string(), json!("Rivers flow"))]))
            .keywords(vec![KeywordWithFrequency::new("river", 0.7, KeywordSource::User)])
            .category_ids(ids(category_ids))
            .build()
    }

    #[tokio::test]
    async fn over_max_categories_rejected_without_io() {
        let store = Arc::new(RecordingStore::new());
        let s = schema(&store);
        let four = ids(&["c1", "c2", "c3", "c4"]);

        assert!(s.attach_categories("s1", &four).await.unwrap_err().is_bad_request());
        assert!(s.update_categories("s1", &four).await.unwrap_err().is_bad_request());
        assert!(s.create(input(&["c1", "c2", "c3", "c4"])).await.unwrap_err().is_bad_request());
        assert_eq!(store.call_count(), 0);
    }

    #[tokio::test]
    async fn empty_categories_short_circuit() {
        let store = Arc::new(RecordingStore::new());
        assert_eq!(schema(&store).attach_categories("s1", &[]).await.unwrap(), 0);
        assert_eq!(store.call_count(), 0);
    }

    #[tokio::test]
    async fn missing_category_is_business_rule() {
        let store = Arc::new(RecordingStore::new());
        store.respond_empty();
        let err = schema(&store)
            .attach_categories("s1", &ids(&["c1", "ghost"]))
            .await
            .unwrap_err();
        assert!(err.is_business_rule());
    }

    #[tokio::test]
    async fn update_categories_is_one_unit() {
        let store = Arc::new(RecordingStore::new());
        store.respond(vec![json!({"cleared": true})]);
        store.respond(vec![json!({"attachedCategories": 2})]);
        let attached = schema(&store)
            .update_categories("s1", &ids(&["c1", "c2"]))
            .await
            .unwrap();
        assert_eq!(attached, 2);
        let calls = store.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].kind, CallKind::Unit);
        assert!(calls[0].statements[0].text().contains("(n)-[r1:SHARED_CATEGORY]-()"));
    }

    #[test]
    fn categorized_create_splices_before_return() {
        let store = Arc::new(RecordingStore::new());
        let s = schema(&store).build_categorized_create_query(&input(&["c1", "c2"]));
        let kinds = s.fragment.kinds();
        assert_eq!(kinds.last(), Some(&ClauseKind::Return));
        assert_eq!(kinds.iter().filter(|k| **k == ClauseKind::Return).count(), 1);

        let text = s.text();
        let creator = text.find("MERGE (u:User").unwrap();
        let categories = text.find("$categoryIds AS categoryIds").unwrap();
        let shared = text.find("SHARED_CATEGORY").unwrap();
        let ret = text.rfind("RETURN n {").unwrap();
        assert!(creator < categories && categories < shared && shared < ret);
        assert_eq!(s.params["categoryIds"], json!(["c1", "c2"]));
        assert_eq!(store.call_count(), 0);
    }

    #[test]
    fn categorized_create_without_categories_matches_tagged() {
        let store = Arc::new(RecordingStore::new());
        let s = schema(&store);
        let plain = input(&[]);
        assert_eq!(
            s.build_categorized_create_query(&plain),
            s.tagged().build_tagged_create_query(&plain)
        );
    }

    #[tokio::test]
    async fn create_returns_categories_read_back_from_the_graph() {
        let store = Arc::new(RecordingStore::new());
        store.respond(vec![json!({
            "n": {"id": "s1", "statement": "Rivers flow"},
            "keywords": [],
            "categories": [{"id": "c1", "name": "Nature", "inclusionNetVotes": 4}]
        })]);
        let node = schema(&store).create(input(&["c1"])).await.unwrap();
        assert_eq!(node.categories.len(), 1);
        assert_eq!(node.categories[0].name, "Nature");
        assert_eq!(node.categories[0].inclusion_net_votes, 4);
        assert!(node.keywords.is_empty());
    }

    #[tokio::test]
    async fn update_with_relationships_runs_single_unit() {
        let store = Arc::new(RecordingStore::new());
        store.respond(vec![json!({"n": {"id": "s1"}})]);
        store.respond(vec![json!({"cleared": true})]);
        store.respond(vec![json!({"attachedKeywords": 1})]);
        store.respond(vec![json!({"cleared": true})]);
        store.respond(vec![json!({"n": {"id": "s1", "statement": "New"}, "keywords": [], "categories": []})]);

        let keywords = vec![KeywordWithFrequency::new("river", 1.0, KeywordSource::Ai)];
        let no_categories: Vec<String> = Vec::new();
        let node = schema(&store)
            .update_with_relationships(
                "s1",
                NodeUpdate::new().set("statement", "New"),
                Some(keywords.as_slice()),
                Some(no_categories.as_slice()),
            )
            .await
            .unwrap();
        assert_eq!(node.text("statement"), Some("New"));
        let calls = store.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].statements.len(), 5);
    }

    #[test]
    fn combined_relatedness_weights_categories() {
        let combined = combine_related(
            &[related("a", 3.0), related("b", 0.5)],
            &[related("b", 2.0), related("c", 1.0)],
            10,
        );
        let order: Vec<(&str, f64)> = combined.iter().map(|c| (c.id.as_str(), c.score)).collect();
        assert_eq!(order, vec![("b", 4.5), ("a", 3.0), ("c", 2.0)]);
        assert_eq!(combine_related(&[related("a", 1.0)], &[], 0).len(), 0);
    }

    #[tokio::test]
    async fn special_nodes_skip_query_when_not_requested() {
        let store = Arc::new(RecordingStore::new());
        let nodes = schema(&store)
            .get_special_nodes_for_graph(&GraphFilters::default())
            .await
            .unwrap();
        assert!(nodes.is_empty());
        assert_eq!(store.call_count(), 0);
    }

    #[tokio::test]
    async fn special_word_nodes_are_keyed_by_word() {
        let store = Arc::new(RecordingStore::new());
        store.respond(vec![json!({"n": {"word": "river", "inclusionNetVotes": 2}, "totalVotes": 2})]);
        let filters = GraphFilters::builder().include_word_nodes(true).build();
        let nodes = schema(&store).get_special_nodes_for_graph(&filters).await.unwrap();
        assert_eq!(nodes[0].id, "river");
        assert_eq!(nodes[0].node_type, "word");
        assert_eq!(store.call_count(), 1);
    }

    #[tokio::test]
    async fn bulk_lookup_of_nothing_is_empty() {
        let store = Arc::new(RecordingStore::new());
        let nodes = schema(&store).get_bulk_nodes_with_relationships(&[], true).await.unwrap();
        assert!(nodes.is_empty());
        assert_eq!(store.call_count(), 0);
    }

    #[tokio::test]
    async fn bulk_lookup_maps_by_id() {
        let store = Arc::new(RecordingStore::new());
        store.respond(vec![
            json!({"n": {"id": "s1"}, "totalVotes": 3, "discussionId": "d1"}),
            json!({"n": {"id": "s2"}, "totalVotes": 0, "discussionId": null}),
        ]);
        let nodes = schema(&store)
            .get_bulk_nodes_with_relationships(&ids(&["s1", "s2", "s3"]), false)
            .await
            .unwrap();
        assert_eq!(nodes.len(), 2);
        assert!(nodes["s1"].metadata.has_discussion);
        assert_eq!(nodes["s1"].metadata.total_votes, 3);
        assert!(!store.statements()[0].text().contains("AS keywords"));
    }

    #[tokio::test]
    async fn combined_filter_scenario_keeps_only_matching_node() {
        // The store returns both rows as if the server-side filter had been
        // bypassed; the safety net must still drop A.
        let store = Arc::new(RecordingStore::new());
        store.respond(vec![
            json!({"n": {"id": "A", "inclusionNetVotes": 1}, "nodeKeywords": ["x", "y"], "nodeCategories": ["c1"],
                   "totalVotes": 1, "tagEdges": [{"target": "B", "weight": 1.0, "shared": ["x"]}], "categoryEdges": []}),
            json!({"n": {"id": "B", "inclusionNetVotes": 1}, "nodeKeywords": ["x"], "nodeCategories": ["c1", "c2"],
                   "totalVotes": 1, "tagEdges": [{"target": "A", "weight": 1.0, "shared": ["x"]}], "categoryEdges": []}),
        ]);
        let filters = GraphFilters::builder()
            .keywords(SetFilter::any(["x"]))
            .categories(SetFilter::all(["c1", "c2"]))
            .build();
        let data = schema(&store).get_graph_data(&filters).await.unwrap();
        let node_ids: Vec<&str> = data.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(node_ids, vec!["B"]);
        assert!(data.edges.is_empty());
        // No overlay flags, so only the window query ran.
        assert_eq!(store.call_count(), 1);
    }
}
