pub mod categorized;
pub mod client;
pub mod cypher;
pub mod graph;
pub mod kinds;
pub mod migrate;
pub mod node_schema;
pub mod query_builder;
pub mod store;
pub mod tagged;
pub mod votes;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;
#[cfg(feature = "test-utils")]
pub mod testutil;

pub use categorized::CategorizedSchema;
pub use client::GraphClient;
pub use cypher::{Clause, ClauseKind, Fragment, Statement};
pub use kinds::{
    AnswerKind, CategoryKind, ContentNodeKind, EvidenceKind, OpenQuestionKind, ParentLink,
    QuantityKind, StatementKind, WordKind,
};
pub use node_schema::{NodeSchema, NodeWithRelations};
pub use store::{GraphStore, Record, StoreError};
pub use tagged::TaggedSchema;

// Re-export neo4rs query for ad-hoc statements against GraphClient::inner().
pub use neo4rs::query;
