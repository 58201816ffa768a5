//! Keyword lifecycle for taggable node kinds.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, info};

use zer0_common::validators::{validate_id, validate_node_creation, validate_pagination, NodeCreationCheck};
use zer0_common::{
    AttachOutcome, ContentNode, CreateNodeInput, FindAllOptions, KeywordWithFrequency, RelatedNode,
    SchemaConfig, SortDirection, Zer0Error,
};

use crate::cypher::{Fragment, Statement};
use crate::graph::set_filter_condition;
use crate::kinds::ContentNodeKind;
use crate::node_schema::NodeSchema;
use crate::query_builder::{
    attach_keywords, category_list, create_node_with_voting, create_parent_relationship,
    create_shared_tags, create_user_relationship, delete_relationships, discussion_id,
    filter_by_votes, keyword_list, node_projection, order_by, paginate, quote_identifier,
    validate_parent_node, SHARED_TAG, TAGGED, TOTAL_VOTES, WORD_LABEL,
};
use crate::store::{GraphStore, Record, StoreError};

pub(crate) fn keywords_param(keywords: &[KeywordWithFrequency]) -> Value {
    Value::Array(
        keywords
            .iter()
            .map(|k| json!({"word": k.word, "frequency": k.frequency, "source": k.source.as_str()}))
            .collect(),
    )
}

pub(crate) fn related_node(r: &Record) -> Result<RelatedNode, StoreError> {
    Ok(RelatedNode {
        id: r.get("id")?,
        shared: r.get_opt("shared").unwrap_or_default(),
        strength: r.get("strength")?,
    })
}

pub struct TaggedSchema<K: ContentNodeKind> {
    base: NodeSchema<K>,
}

impl<K: ContentNodeKind> TaggedSchema<K> {
    pub fn new(store: Arc<dyn GraphStore>, kind: K, config: SchemaConfig) -> Self {
        Self {
            base: NodeSchema::new(store, kind, config),
        }
    }

    /// CRUD and voting.
    pub fn base(&self) -> &NodeSchema<K> {
        &self.base
    }

    fn kind(&self) -> &K {
        self.base.kind()
    }

    fn id_label(&self) -> String {
        format!("{} ID", self.kind().type_name())
    }

    /// TAGGED edges for approved words. Unknown or unapproved words are
    /// skipped and counted in the outcome.
    pub async fn attach_keywords(
        &self,
        node_id: &str,
        keywords: &[KeywordWithFrequency],
    ) -> Result<AttachOutcome, Zer0Error> {
        validate_id(node_id, &self.id_label())?;
        if keywords.is_empty() {
            return Ok(AttachOutcome::default());
        }

        let f = self
            .base
            .match_node()
            .append(attach_keywords(self.base.config().validate_keyword_inclusion))
            .return_("attachedKeywords");
        let statement = Statement::new(f)
            .param("id", node_id)
            .param("keywords", keywords_param(keywords));

        let records = self.base.write("attach keywords", statement).await?;
        let record = records
            .first()
            .ok_or_else(|| Zer0Error::NotFound(format!("{} {node_id}", self.kind().type_name())))?;
        let outcome = AttachOutcome {
            requested: keywords.len(),
            attached: record.get_opt::<usize>("attachedKeywords").unwrap_or(0),
        };
        info!(
            node_id,
            label = self.kind().label(),
            requested = outcome.requested,
            attached = outcome.attached,
            "Attached keywords"
        );
        Ok(outcome)
    }

    /// Derive SHARED_TAG edges from `node_id` to peers of `target_label`
    /// (or the node's own labels).
    pub async fn create_shared_tag_relationships(
        &self,
        node_id: &str,
        target_label: Option<&str>,
    ) -> Result<(), Zer0Error> {
        validate_id(node_id, &self.id_label())?;
        let f = self
            .base
            .match_node()
            .append(create_shared_tags(target_label))
            .return_("count(n) AS touched");
        self.base
            .write("create shared tags", Statement::new(f).param("id", node_id))
            .await?;
        Ok(())
    }

    /// Keywords by descending frequency.
    pub async fn get_keywords(&self, node_id: &str) -> Result<Vec<KeywordWithFrequency>, Zer0Error> {
        validate_id(node_id, &self.id_label())?;
        let f = self
            .base
            .match_node()
            .match_(format!("(n)-[t:{TAGGED}]->(w:{WORD_LABEL})"))
            .return_("w.word AS word, t.frequency AS frequency, coalesce(t.source, 'ai') AS source")
            .order_by("frequency DESC, word ASC");
        let records = self
            .base
            .read("get keywords", Statement::new(f).param("id", node_id))
            .await?;

        self.base.map_rows("get keywords", &records, |r| {
            Ok(KeywordWithFrequency {
                word: r.get("word")?,
                frequency: r.get("frequency")?,
                source: r.get("source")?,
            })
        })
    }

    /// Peers over a shared-edge type, strongest first. Each `key` counts once
    /// per pair even when both directions exist; `name` is reported as shared.
    pub(crate) async fn find_related(
        &self,
        operation: &str,
        node_id: &str,
        limit: i64,
        (rel, key, name): (&str, &str, &str),
    ) -> Result<Vec<RelatedNode>, Zer0Error> {
        validate_id(node_id, &self.id_label())?;
        validate_pagination(None, Some(limit), self.base.config().max_page_size)?;

        let f = self
            .base
            .match_node()
            .match_(format!("(n)-[e:{rel}]-(o)"))
            .with(format!(
                "o, e.{key} AS sharedKey, e.{name} AS sharedName, max(e.strength) AS keyStrength"
            ))
            .with("o, collect(sharedName) AS shared, sum(keyStrength) AS strength")
            .return_(format!(
                "o.{} AS id, shared, strength",
                quote_identifier(self.kind().id_field())
            ))
            .order_by("strength DESC, id ASC")
            .limit(limit.to_string());
        let records = self
            .base
            .read(operation, Statement::new(f).param("id", node_id))
            .await?;
        self.base.map_rows(operation, &records, related_node)
    }

    /// Peers by summed shared-tag strength.
    pub async fn find_related_by_tags(&self, node_id: &str, limit: i64) -> Result<Vec<RelatedNode>, Zer0Error> {
        self.find_related("find related by tags", node_id, limit, (SHARED_TAG, "word", "word"))
            .await
    }

    /// Delete TAGGED and SHARED_TAG edges; re-attach and re-derive when
    /// `keywords` is non-empty. The first statement fails the unit when the
    /// node does not exist.
    pub(crate) fn keyword_replacement(&self, node_id: &str, keywords: &[KeywordWithFrequency]) -> Vec<Statement> {
        let clear = self
            .base
            .match_node()
            .append(delete_relationships(&[TAGGED, SHARED_TAG]))
            .return_("true AS cleared");
        let mut statements = vec![Statement::new(clear)
            .param("id", node_id)
            .expect_rows(format!("{} {node_id} not found", self.kind().type_name()))];

        if !keywords.is_empty() {
            let attach = self
                .base
                .match_node()
                .append(attach_keywords(self.base.config().validate_keyword_inclusion))
                .append(create_shared_tags(None))
                .return_("attachedKeywords");
            statements.push(
                Statement::new(attach)
                    .param("id", node_id)
                    .param("keywords", keywords_param(keywords)),
            );
        }
        statements
    }

    /// Replace the node's keywords in one unit of work.
    pub async fn update_keywords(
        &self,
        node_id: &str,
        keywords: &[KeywordWithFrequency],
    ) -> Result<AttachOutcome, Zer0Error> {
        validate_id(node_id, &self.id_label())?;
        let results = self
            .base
            .write_unit("update keywords", self.keyword_replacement(node_id, keywords))
            .await?;

        let attached = results
            .get(1)
            .and_then(|rows| rows.first())
            .and_then(|r| r.get_opt::<usize>("attachedKeywords"))
            .unwrap_or(0);
        info!(node_id, label = self.kind().label(), attached, "Replaced keywords");
        Ok(AttachOutcome {
            requested: keywords.len(),
            attached,
        })
    }

    /// Composed create: parent check, node, parent edge, keywords with
    /// shared-tag derivation, creator edge, projection. Does not execute.
    pub fn build_tagged_create_query(&self, input: &CreateNodeInput) -> Statement {
        let kind = self.kind();
        let mut f = Fragment::new();
        let parent = kind.parent().zip(input.parent_id.as_deref());

        if let Some((link, _)) = parent {
            f = f.append(validate_parent_node(link.label, link.id_field, link.requires_inclusion));
        }

        let mut property_names: Vec<&str> = vec![kind.id_field(), "createdBy", "publicCredit"];
        property_names.extend(
            input
                .properties
                .keys()
                .map(String::as_str)
                .filter(|k| !matches!(*k, "createdBy" | "publicCredit") && *k != kind.id_field()),
        );
        f = f.append(create_node_with_voting(
            kind.label(),
            &property_names,
            kind.supports_content_voting(),
        ));

        if let Some((link, _)) = parent {
            f = f.append(create_parent_relationship(link.relationship, link.parent_to_child));
        }
        if !input.keywords.is_empty() {
            f = f
                .append(attach_keywords(self.base.config().validate_keyword_inclusion))
                .append(create_shared_tags(None));
        }
        f = f
            .append(create_user_relationship(kind.type_name()))
            .return_(format!(
                "{} AS n, {} AS keywords, {} AS categories",
                node_projection("n"),
                keyword_list("n"),
                category_list("n")
            ));

        let mut statement = Statement::new(f)
            .params(input.properties.clone())
            .param(kind.id_field(), input.id.as_str())
            .param("createdBy", input.created_by.as_str())
            .param("publicCredit", input.public_credit)
            .expect_rows(format!(
                "{} could not be created: parent or relationship targets failed validation",
                kind.type_name()
            ));
        if let Some((_, parent_id)) = parent {
            statement = statement.param("parentId", parent_id);
        }
        if !input.keywords.is_empty() {
            statement = statement.param("keywords", keywords_param(&input.keywords));
        }
        statement
    }

    pub(crate) fn validate_create(&self, input: &CreateNodeInput, max_categories: usize) -> Result<(), Zer0Error> {
        let kind = self.kind();
        let allowed: Vec<&str> = kind
            .updatable_fields()
            .iter()
            .copied()
            .filter(|f| *f != "publicCredit")
            .collect();
        validate_node_creation(NodeCreationCheck {
            node_type: kind.type_name(),
            id: &input.id,
            created_by: &input.created_by,
            properties: &input.properties,
            allowed_properties: &allowed,
            text: kind
                .text_field()
                .map(|field| (field, input.properties.get(field).and_then(Value::as_str))),
            max_text_length: kind.max_text_length(),
            category_ids: &input.category_ids,
            max_categories,
        })?;

        if let Some(link) = kind.parent() {
            let parent_id = input.parent_id.as_deref().unwrap_or_default();
            validate_id(parent_id, &format!("{} parent ID", kind.type_name()))?;
            debug!(parent_id, relationship = link.relationship, "Parent link requested");
        }
        Ok(())
    }

    /// Run a composed create. Keywords and categories on the returned node are
    /// the edges that were actually written.
    pub(crate) async fn execute_create(&self, statement: Statement) -> Result<ContentNode, Zer0Error> {
        let records = self.base.write("create node", statement).await?;
        let node = self
            .base
            .map_first("create node", &records)?
            .ok_or_else(|| Zer0Error::operation_failed("create node", "no row returned"))?;
        info!(
            node_id = %node.id,
            label = self.kind().label(),
            keywords = node.keywords.len(),
            categories = node.categories.len(),
            "Created node"
        );
        Ok(node)
    }

    /// Validate, then create the node and its keyword relationships atomically.
    pub async fn create(&self, input: CreateNodeInput) -> Result<ContentNode, Zer0Error> {
        self.validate_create(&input, self.base.config().max_categories)?;
        let statement = self.build_tagged_create_query(&input);
        self.execute_create(statement).await
    }

    pub async fn find_all(&self, options: FindAllOptions) -> Result<Vec<ContentNode>, Zer0Error> {
        let config = self.base.config();
        validate_pagination(options.offset, options.limit, config.max_page_size)?;
        let kind = self.kind();

        let mut conditions = Vec::new();
        let mut statement_params: Vec<(String, Value)> = vec![(
            "minInclusionVotes".to_string(),
            json!(options
                .min_inclusion_votes
                .unwrap_or(config.default_min_inclusion_votes)),
        )];
        if let Some(created_by) = &options.created_by {
            conditions.push("n.createdBy = $createdBy".to_string());
            statement_params.push(("createdBy".to_string(), json!(created_by)));
        }
        if let Some(filter) = &options.keywords {
            if let Some(c) = set_filter_condition("nodeKeywords", "keywordValues", filter) {
                conditions.push(c);
                statement_params.push(("keywordValues".to_string(), json!(filter.values)));
            }
        }

        let mut returns = vec![format!("{} AS n", node_projection("n"))];
        if options.include_keywords {
            returns.push(format!("{} AS keywords", keyword_list("n")));
        }
        if options.include_discussion {
            returns.push(format!("{} AS discussionId", discussion_id("n")));
        }

        let sort_field = options.sort_by.as_deref().unwrap_or("createdAt");
        let f = Fragment::new()
            .match_(format!("(n:{})", quote_identifier(kind.label())))
            .with(format!("n, [(n)-[:{TAGGED}]->(w:{WORD_LABEL}) | w.word] AS nodeKeywords"))
            .append(filter_by_votes("inclusionNetVotes", "minInclusionVotes", &conditions))
            .with(format!("n, {TOTAL_VOTES} AS totalVotes"))
            .append(order_by(
                sort_field,
                options.sort_direction,
                &[(kind.id_field(), SortDirection::Asc)],
            ))
            .append(paginate(options.offset.unwrap_or(0), options.limit))
            .return_(returns.join(", "));

        let records = self
            .base
            .read("find nodes", Statement::new(f).params(statement_params))
            .await?;
        self.base.map_rows("find nodes", &records, |r| kind.map_record(r))
    }
}
