//! Storage seam for the schema layer.
//!
//! `GraphStore` is the only I/O boundary the schemas use. `GraphClient`
//! implements it over neo4rs and `testing::RecordingStore` implements it in
//! memory.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::cypher::Statement;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error(transparent)]
    Neo4j(#[from] neo4rs::Error),

    #[error("Failed to decode field '{field}': {message}")]
    Decode { field: String, message: String },

    /// A guarded write returned no rows and was rolled back.
    #[error("{0}")]
    ExpectationFailed(String),
}

/// One result row: column name → JSON value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record(Map<String, Value>);

impl Record {
    pub fn new(columns: Map<String, Value>) -> Self {
        Self(columns)
    }

    /// Build from a JSON object; any other value yields an empty record.
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Object(map) => Self(map),
            _ => Self::default(),
        }
    }

    pub fn get<T: DeserializeOwned>(&self, field: &str) -> Result<T, StoreError> {
        let value = self.0.get(field).cloned().unwrap_or(Value::Null);
        serde_json::from_value(value).map_err(|e| StoreError::Decode {
            field: field.to_string(),
            message: e.to_string(),
        })
    }

    /// Missing, null and undecodable values all read as `None`.
    pub fn get_opt<T: DeserializeOwned>(&self, field: &str) -> Option<T> {
        match self.0.get(field) {
            None | Some(Value::Null) => None,
            Some(v) => serde_json::from_value(v.clone()).ok(),
        }
    }

    pub fn columns(&self) -> &Map<String, Value> {
        &self.0
    }
}

#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn read(&self, statement: Statement) -> Result<Vec<Record>, StoreError>;

    async fn write(&self, statement: Statement) -> Result<Vec<Record>, StoreError>;

    /// Run every statement in one transaction. Any failure, including an
    /// unmet `expect_rows` guard, rolls the whole unit back.
    async fn write_unit(&self, statements: Vec<Statement>) -> Result<Vec<Vec<Record>>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn get_decodes_typed_values() {
        let r = Record::from_json(json!({"count": 3, "words": ["a", "b"]}));
        assert_eq!(r.get::<i64>("count").unwrap(), 3);
        assert_eq!(r.get::<Vec<String>>("words").unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn get_reports_field_on_decode_error() {
        let r = Record::from_json(json!({"count": "three"}));
        let err = r.get::<i64>("count").unwrap_err();
        assert!(err.to_string().contains("count"));
    }

    #[test]
    fn get_opt_treats_null_as_missing() {
        let r = Record::from_json(json!({"discussionId": null}));
        assert_eq!(r.get_opt::<String>("discussionId"), None);
        assert_eq!(r.get_opt::<String>("absent"), None);
    }
}
