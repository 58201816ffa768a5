use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{error, info, warn};

use zer0_common::validators::{validate_id, validate_inclusion_threshold, validate_update_data, validate_user_id};
use zer0_common::{ContentNode, NodeUpdate, SchemaConfig, UserVoteStatus, VoteKind, VoteResult, VoteStatus, Zer0Error};

use crate::cypher::{Fragment, Statement};
use crate::kinds::ContentNodeKind;
use crate::query_builder::{
    category_list, discussion_id, get_node_with_relations, keyword_list, node_projection,
    quote_identifier, RelationTraversal, COMMENT_LABEL, DISCUSSION_LABEL, HAS_COMMENT,
    HAS_DISCUSSION,
};
use crate::store::{GraphStore, Record, StoreError};
use crate::votes;

/// Log a storage failure and convert it for callers. A guarded write that
/// matched nothing is a business-rule failure, not an outage.
pub(crate) fn storage_failure(operation: &str, label: &str, err: StoreError) -> Zer0Error {
    match err {
        StoreError::ExpectationFailed(message) => {
            warn!(operation, label, %message, "Guarded write rolled back");
            Zer0Error::BusinessRule(message)
        }
        other => {
            error!(operation, label, error = %other, "Graph operation failed");
            Zer0Error::operation_failed(operation, other.to_string())
        }
    }
}

/// A node plus the related nodes collected by `find_with_relations`.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeWithRelations {
    pub node: ContentNode,
    pub related: BTreeMap<String, Vec<Value>>,
}

/// CRUD and dual voting for one node kind.
pub struct NodeSchema<K: ContentNodeKind> {
    store: Arc<dyn GraphStore>,
    kind: K,
    config: SchemaConfig,
}

impl<K: ContentNodeKind> NodeSchema<K> {
    pub fn new(store: Arc<dyn GraphStore>, kind: K, config: SchemaConfig) -> Self {
        Self { store, kind, config }
    }

    pub fn kind(&self) -> &K {
        &self.kind
    }

    pub fn config(&self) -> &SchemaConfig {
        &self.config
    }

    pub(crate) fn label(&self) -> &'static str {
        self.kind.label()
    }

    /// `MATCH (n:Label {idField: $id})`.
    pub(crate) fn match_node(&self) -> Fragment {
        Fragment::new().match_(format!(
            "(n:{} {{{}: $id}})",
            quote_identifier(self.kind.label()),
            quote_identifier(self.kind.id_field())
        ))
    }

    pub(crate) async fn read(&self, operation: &str, statement: Statement) -> Result<Vec<Record>, Zer0Error> {
        self.store
            .read(statement)
            .await
            .map_err(|e| storage_failure(operation, self.label(), e))
    }

    pub(crate) async fn write(&self, operation: &str, statement: Statement) -> Result<Vec<Record>, Zer0Error> {
        self.store
            .write(statement)
            .await
            .map_err(|e| storage_failure(operation, self.label(), e))
    }

    pub(crate) async fn write_unit(
        &self,
        operation: &str,
        statements: Vec<Statement>,
    ) -> Result<Vec<Vec<Record>>, Zer0Error> {
        self.store
            .write_unit(statements)
            .await
            .map_err(|e| storage_failure(operation, self.label(), e))
    }

    pub(crate) fn map_first(&self, operation: &str, records: &[Record]) -> Result<Option<ContentNode>, Zer0Error> {
        records
            .first()
            .map(|r| self.kind.map_record(r))
            .transpose()
            .map_err(|e| storage_failure(operation, self.label(), e))
    }

    /// Decode every row; the first failure is reported like any storage error.
    pub(crate) fn map_rows<T>(
        &self,
        operation: &str,
        records: &[Record],
        decode: impl Fn(&Record) -> Result<T, StoreError>,
    ) -> Result<Vec<T>, Zer0Error> {
        records
            .iter()
            .map(decode)
            .collect::<Result<_, _>>()
            .map_err(|e| storage_failure(operation, self.label(), e))
    }

    fn not_found(&self, id: &str) -> Zer0Error {
        Zer0Error::NotFound(format!("{} {id}", self.kind.type_name()))
    }

    /// Node with keywords, categories and discussion id.
    pub(crate) fn detail_statement(&self, id: &str) -> Statement {
        let f = self.match_node().return_(format!(
            "{} AS n, {} AS keywords, {} AS categories, {} AS discussionId",
            node_projection("n"),
            keyword_list("n"),
            category_list("n"),
            discussion_id("n")
        ));
        Statement::new(f).param("id", id)
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<ContentNode>, Zer0Error> {
        validate_id(id, &format!("{} ID", self.kind.type_name()))?;
        let records = self.read("find node", self.detail_statement(id)).await?;
        self.map_first("find node", &records)
    }

    /// Fetch a node together with arbitrary related nodes, keyed by traversal alias.
    pub async fn find_with_relations(
        &self,
        id: &str,
        relations: &[RelationTraversal],
    ) -> Result<Option<NodeWithRelations>, Zer0Error> {
        validate_id(id, &format!("{} ID", self.kind.type_name()))?;
        let f = get_node_with_relations(self.kind.label(), self.kind.id_field(), relations);
        let records = self.read("find node relations", Statement::new(f).param("id", id)).await?;

        let Some(record) = records.first() else {
            return Ok(None);
        };
        let node = self
            .kind
            .map_record(record)
            .map_err(|e| storage_failure("find node relations", self.label(), e))?;
        let related = relations
            .iter()
            .map(|r| {
                let items = record.get_opt::<Vec<Value>>(&r.alias).unwrap_or_default();
                (r.alias.clone(), items)
            })
            .collect();
        Ok(Some(NodeWithRelations { node, related }))
    }

    pub(crate) fn update_statement(&self, id: &str, update: &NodeUpdate) -> Statement {
        let fields: Vec<&str> = update.properties.keys().map(String::as_str).collect();
        Statement::new(self.kind.build_update_fragment(&fields))
            .params(update.properties.clone())
            .param("id", id)
    }

    pub(crate) fn validate_update(&self, update: &NodeUpdate) -> Result<(), Zer0Error> {
        validate_update_data(
            &update.properties,
            self.kind.updatable_fields(),
            self.kind.type_name(),
        )
    }

    pub async fn update(&self, id: &str, update: NodeUpdate) -> Result<ContentNode, Zer0Error> {
        validate_id(id, &format!("{} ID", self.kind.type_name()))?;
        self.validate_update(&update)?;

        let records = self.write("update node", self.update_statement(id, &update)).await?;
        let node = self
            .map_first("update node", &records)?
            .ok_or_else(|| self.not_found(id))?;
        info!(node_id = id, label = self.label(), fields = update.properties.len(), "Updated node");
        Ok(node)
    }

    /// Delete the node, its discussion and the discussion's comments.
    pub async fn delete(&self, id: &str) -> Result<(), Zer0Error> {
        validate_id(id, &format!("{} ID", self.kind.type_name()))?;

        let f = self
            .match_node()
            .optional_match(format!("(n)-[:{HAS_DISCUSSION}]->(d:{DISCUSSION_LABEL})"))
            .optional_match(format!("(d)-[:{HAS_COMMENT}]->(c:{COMMENT_LABEL})"))
            .with("n, collect(DISTINCT d) AS discussions, collect(DISTINCT c) AS comments")
            .foreach("(x IN comments | DETACH DELETE x)")
            .foreach("(x IN discussions | DETACH DELETE x)")
            .detach_delete("n")
            .return_("count(*) AS deleted");

        let records = self.write("delete node", Statement::new(f).param("id", id)).await?;
        let deleted = records
            .first()
            .and_then(|r| r.get_opt::<i64>("deleted"))
            .unwrap_or(0);
        if deleted == 0 {
            return Err(self.not_found(id));
        }
        info!(node_id = id, label = self.label(), "Deleted node");
        Ok(())
    }

    pub async fn vote_inclusion(&self, id: &str, user_id: &str, is_positive: bool) -> Result<VoteResult, Zer0Error> {
        validate_id(id, &format!("{} ID", self.kind.type_name()))?;
        validate_user_id(user_id)?;

        let statement = votes::cast_vote(
            self.kind.label(),
            self.kind.id_field(),
            id,
            user_id,
            VoteKind::Inclusion,
            VoteStatus::from_positive(is_positive),
            false,
        );
        let records = self.write("vote on inclusion", statement).await?;
        let record = records.first().ok_or_else(|| self.not_found(id))?;
        Ok(votes::vote_result_from_record(record, self.kind.supports_content_voting()))
    }

    /// Content votes require the kind to support them and the node to have
    /// passed inclusion.
    pub async fn vote_content(&self, id: &str, user_id: &str, is_positive: bool) -> Result<VoteResult, Zer0Error> {
        validate_id(id, &format!("{} ID", self.kind.type_name()))?;
        validate_user_id(user_id)?;
        if !self.kind.supports_content_voting() {
            return Err(Zer0Error::bad_request(format!(
                "{} does not support content voting",
                self.kind.type_name()
            )));
        }

        let current = self.get_votes(id).await?.ok_or_else(|| self.not_found(id))?;
        validate_inclusion_threshold(current.inclusion.net, "content voting", self.kind.type_name())?;

        let statement = votes::cast_vote(
            self.kind.label(),
            self.kind.id_field(),
            id,
            user_id,
            VoteKind::Content,
            VoteStatus::from_positive(is_positive),
            true,
        )
        .expect_rows(format!(
            "{} must pass inclusion threshold before content voting",
            self.kind.type_name()
        ));
        let records = self.write("vote on content", statement).await?;
        let record = records.first().ok_or_else(|| self.not_found(id))?;
        Ok(votes::vote_result_from_record(record, true))
    }

    pub async fn get_vote_status(&self, id: &str, user_id: &str) -> Result<Option<UserVoteStatus>, Zer0Error> {
        validate_id(id, &format!("{} ID", self.kind.type_name()))?;
        validate_user_id(user_id)?;

        let statement = votes::vote_status(self.kind.label(), self.kind.id_field(), id, user_id);
        let records = self.read("get vote status", statement).await?;
        records
            .first()
            .map(|r| votes::vote_status_from_record(r, self.kind.supports_content_voting()))
            .transpose()
            .map_err(|e| storage_failure("get vote status", self.label(), e))
    }

    pub async fn remove_vote(&self, id: &str, user_id: &str, kind: VoteKind) -> Result<VoteResult, Zer0Error> {
        validate_id(id, &format!("{} ID", self.kind.type_name()))?;
        validate_user_id(user_id)?;
        if kind == VoteKind::Content && !self.kind.supports_content_voting() {
            return Err(Zer0Error::bad_request(format!(
                "{} does not support content voting",
                self.kind.type_name()
            )));
        }

        let statement = votes::remove_vote(self.kind.label(), self.kind.id_field(), id, user_id, kind);
        let records = self.write("remove vote", statement).await?;
        let record = records.first().ok_or_else(|| self.not_found(id))?;
        Ok(votes::vote_result_from_record(record, self.kind.supports_content_voting()))
    }

    pub async fn get_votes(&self, id: &str) -> Result<Option<VoteResult>, Zer0Error> {
        validate_id(id, &format!("{} ID", self.kind.type_name()))?;
        let statement = votes::get_votes(self.kind.label(), self.kind.id_field(), id);
        let records = self.read("get votes", statement).await?;
        Ok(records
            .first()
            .map(|r| votes::vote_result_from_record(r, self.kind.supports_content_voting())))
    }

    /// Comments in the node's discussion. Storage errors read as zero.
    pub async fn get_comment_count(&self, id: &str) -> i64 {
        let f = self
            .match_node()
            .optional_match(format!(
                "(n)-[:{HAS_DISCUSSION}]->(:{DISCUSSION_LABEL})-[:{HAS_COMMENT}]->(c:{COMMENT_LABEL})"
            ))
            .return_("count(c) AS commentCount");

        match self.store.read(Statement::new(f).param("id", id)).await {
            Ok(records) => records
                .first()
                .and_then(|r| r.get_opt::<i64>("commentCount"))
                .unwrap_or(0),
            Err(e) => {
                warn!(node_id = id, label = self.label(), error = %e, "Comment count failed, reporting 0");
                0
            }
        }
    }

    /// Whether the node has passed inclusion. Storage errors read as false.
    pub async fn is_approved(&self, id: &str) -> bool {
        let f = self
            .match_node()
            .return_("coalesce(n.inclusionNetVotes, 0) > 0 AS approved");

        match self.store.read(Statement::new(f).param("id", id)).await {
            Ok(records) => records
                .first()
                .and_then(|r| r.get_opt::<bool>("approved"))
                .unwrap_or(false),
            Err(e) => {
                warn!(node_id = id, label = self.label(), error = %e, "Approval check failed, reporting false");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinds::{QuantityKind, StatementKind};
    use crate::query_builder::{RelationDirection, TAGGED, WORD_LABEL};
    use crate::testing::{CallKind, RecordingStore};
    use serde_json::json;

    fn statements(store: &Arc<RecordingStore>) -> NodeSchema<StatementKind> {
        NodeSchema::new(store.clone(), StatementKind, SchemaConfig::default())
    }

    fn tally_row(inclusion_net: i64) -> Value {
        json!({
            "inclusionPositiveVotes": inclusion_net.max(0),
            "inclusionNegativeVotes": (-inclusion_net).max(0),
            "inclusionNetVotes": inclusion_net,
            "contentPositiveVotes": 0,
            "contentNegativeVotes": 0,
            "contentNetVotes": 0
        })
    }

    #[tokio::test]
    async fn content_vote_rejected_before_inclusion() {
        let store = Arc::new(RecordingStore::new());
        store.respond(vec![tally_row(0)]);
        let schema = statements(&store);

        let err = schema.vote_content("s1", "u1", true).await.unwrap_err();
        assert!(err.is_business_rule());
        // Only the tally read ran; no vote was written.
        assert_eq!(store.call_count(), 1);
        assert_eq!(store.calls()[0].kind, CallKind::Read);
    }

    #[tokio::test]
    async fn content_vote_allowed_after_inclusion() {
        let store = Arc::new(RecordingStore::new());
        store.respond(vec![tally_row(1)]);
        let mut after = tally_row(1);
        after["contentPositiveVotes"] = json!(1);
        after["contentNetVotes"] = json!(1);
        store.respond(vec![after]);
        let schema = statements(&store);

        let result = schema.vote_content("s1", "u1", true).await.unwrap();
        assert_eq!(result.content.unwrap().net, 1);
        let write = &store.calls()[1];
        assert_eq!(write.kind, CallKind::Write);
        assert!(write.statements[0].expect_rows.is_some());
    }

    #[tokio::test]
    async fn content_vote_unsupported_kind_is_bad_request() {
        let store = Arc::new(RecordingStore::new());
        let schema = NodeSchema::new(store.clone(), QuantityKind, SchemaConfig::default());
        let err = schema.vote_content("q1", "u1", true).await.unwrap_err();
        assert!(err.is_bad_request());
        assert_eq!(store.call_count(), 0);
    }

    #[tokio::test]
    async fn inclusion_vote_needs_user() {
        let store = Arc::new(RecordingStore::new());
        let err = statements(&store).vote_inclusion("s1", " ", true).await.unwrap_err();
        assert!(err.is_bad_request());
        assert_eq!(store.call_count(), 0);
    }

    #[tokio::test]
    async fn update_rejects_unknown_fields_without_io() {
        let store = Arc::new(RecordingStore::new());
        let update = NodeUpdate::new().set("inclusionNetVotes", 99);
        let err = statements(&store).update("s1", update).await.unwrap_err();
        assert!(err.is_bad_request());
        assert_eq!(store.call_count(), 0);
    }

    #[tokio::test]
    async fn update_returns_mapped_node() {
        let store = Arc::new(RecordingStore::new());
        store.respond(vec![json!({"n": {"id": "s1", "statement": "Edited"}})]);
        let node = statements(&store)
            .update("s1", NodeUpdate::new().set("statement", "Edited"))
            .await
            .unwrap();
        assert_eq!(node.text("statement"), Some("Edited"));
        let sent = &store.statements()[0];
        assert_eq!(sent.params["statement"], json!("Edited"));
        assert_eq!(sent.params["id"], json!("s1"));
    }

    #[tokio::test]
    async fn delete_missing_node_is_not_found() {
        let store = Arc::new(RecordingStore::new());
        store.respond(vec![json!({"deleted": 0})]);
        let err = statements(&store).delete("missing").await.unwrap_err();
        assert!(matches!(err, Zer0Error::NotFound(_)));
        assert!(store.statements()[0].text().contains("DETACH DELETE x"));
    }

    #[tokio::test]
    async fn storage_errors_are_wrapped_with_operation() {
        let store = Arc::new(RecordingStore::new());
        store.fail_next("connection reset");
        let err = statements(&store).find_by_id("s1").await.unwrap_err();
        match err {
            Zer0Error::OperationFailed { operation, message } => {
                assert_eq!(operation, "find node");
                assert!(message.contains("connection reset"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn comment_count_and_approval_swallow_errors() {
        let store = Arc::new(RecordingStore::new());
        store.fail_next("boom").fail_next("boom");
        let schema = statements(&store);
        assert_eq!(schema.get_comment_count("s1").await, 0);
        assert!(!schema.is_approved("s1").await);

        store.respond(vec![json!({"commentCount": 4})]);
        store.respond(vec![json!({"approved": true})]);
        assert_eq!(schema.get_comment_count("s1").await, 4);
        assert!(schema.is_approved("s1").await);
    }

    #[tokio::test]
    async fn find_with_relations_groups_by_alias() {
        let store = Arc::new(RecordingStore::new());
        store.respond(vec![json!({
            "n": {"id": "s1"},
            "keywords": [{"word": "water"}],
            "discussionId": null
        })]);
        let found = statements(&store)
            .find_with_relations(
                "s1",
                &[RelationTraversal::new(TAGGED, RelationDirection::Outgoing, Some(WORD_LABEL), "keywords")],
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.node.id, "s1");
        assert_eq!(found.related["keywords"].len(), 1);
    }
}
