use neo4rs::query;
use tracing::{info, warn};

use crate::kinds::{
    AnswerKind, CategoryKind, ContentNodeKind, EvidenceKind, OpenQuestionKind, QuantityKind,
    StatementKind, WordKind,
};
use crate::query_builder::{
    quote_identifier, COMMENT_LABEL, DISCUSSION_LABEL, USER_LABEL,
};
use crate::GraphClient;

fn content_kinds() -> [&'static dyn ContentNodeKind; 7] {
    [
        &StatementKind,
        &OpenQuestionKind,
        &AnswerKind,
        &QuantityKind,
        &EvidenceKind,
        &CategoryKind,
        &WordKind,
    ]
}

/// Uniqueness constraint on `label.field`.
pub fn unique_constraint(label: &str, field: &str) -> String {
    format!(
        "CREATE CONSTRAINT {}_{}_unique IF NOT EXISTS FOR (n:{}) REQUIRE n.{} IS UNIQUE",
        label.to_lowercase(),
        field.to_lowercase(),
        quote_identifier(label),
        quote_identifier(field)
    )
}

pub fn property_index(label: &str, field: &str) -> String {
    format!(
        "CREATE INDEX {}_{}_idx IF NOT EXISTS FOR (n:{}) ON (n.{})",
        label.to_lowercase(),
        field.to_lowercase(),
        quote_identifier(label),
        quote_identifier(field)
    )
}

/// Every schema statement, in execution order.
pub fn schema_statements() -> Vec<String> {
    let mut statements: Vec<String> = content_kinds()
        .iter()
        .map(|k| unique_constraint(k.label(), k.id_field()))
        .collect();
    statements.push(unique_constraint(DISCUSSION_LABEL, "id"));
    statements.push(unique_constraint(COMMENT_LABEL, "id"));
    statements.push(unique_constraint(USER_LABEL, "sub"));

    statements.extend(
        content_kinds()
            .iter()
            .map(|k| property_index(k.label(), "inclusionNetVotes")),
    );
    statements.extend(
        content_kinds()
            .iter()
            .filter(|k| k.id_field() == "id")
            .map(|k| property_index(k.label(), "createdBy")),
    );
    statements
}

/// Run idempotent schema migrations: constraints, indexes.
pub async fn migrate(client: &GraphClient) -> Result<(), neo4rs::Error> {
    let g = &client.graph;

    info!("Running schema migrations...");
    let statements = schema_statements();
    for s in &statements {
        run_ignoring_exists(g, s).await?;
    }
    info!(count = statements.len(), "Constraints and indexes ensured");

    Ok(())
}

/// Older servers reject `IF NOT EXISTS` duplicates with "already exists" or
/// "equivalent" errors; those are skipped.
async fn run_ignoring_exists(g: &neo4rs::Graph, cypher: &str) -> Result<(), neo4rs::Error> {
    match g.run(query(cypher)).await {
        Ok(_) => Ok(()),
        Err(e) => {
            let msg = e.to_string().to_lowercase();
            if msg.contains("already exists") || msg.contains("equivalent") {
                warn!(statement = %cypher.chars().take(80).collect::<String>(), "Already exists (skipped)");
                Ok(())
            } else {
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_nodes_are_unique_by_word() {
        let statements = schema_statements();
        assert!(statements.contains(
            &"CREATE CONSTRAINT wordnode_word_unique IF NOT EXISTS FOR (n:WordNode) REQUIRE n.word IS UNIQUE"
                .to_string()
        ));
        assert!(!statements.iter().any(|s| s.contains("wordnode_createdby")));
    }

    #[test]
    fn every_kind_gets_inclusion_index() {
        let statements = schema_statements();
        let indexes = statements
            .iter()
            .filter(|s| s.contains("inclusionnetvotes_idx"))
            .count();
        assert_eq!(indexes, 7);
        assert!(statements.iter().all(|s| s.contains("IF NOT EXISTS")));
    }
}
