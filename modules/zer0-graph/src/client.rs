use async_trait::async_trait;
use neo4rs::{query, BoltMap, BoltNull, BoltString, BoltType, ConfigBuilder, Graph, Query, Txn};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::cypher::Statement;
use crate::store::{GraphStore, Record, StoreError};

/// Thin wrapper around neo4rs::Graph providing connection setup.
#[derive(Clone)]
pub struct GraphClient {
    pub(crate) graph: Graph,
}

impl GraphClient {
    /// Connect to Neo4j with the given credentials.
    pub async fn connect(uri: &str, user: &str, password: &str) -> Result<Self, neo4rs::Error> {
        let config = ConfigBuilder::default()
            .uri(uri)
            .user(user)
            .password(password)
            .fetch_size(500)
            .max_connections(10)
            .build()?;
        let graph = Graph::connect(config).await?;
        Ok(Self { graph })
    }

    /// Get a reference to the underlying neo4rs Graph.
    pub fn inner(&self) -> &Graph {
        &self.graph
    }
}

#[async_trait]
impl GraphStore for GraphClient {
    async fn read(&self, statement: Statement) -> Result<Vec<Record>, StoreError> {
        debug!(cypher = %statement.text(), "graph read");
        let mut stream = self.graph.execute(to_query(&statement)).await?;
        let mut records = Vec::new();
        while let Some(row) = stream.next().await? {
            records.push(row_to_record(&row)?);
        }
        Ok(records)
    }

    async fn write(&self, statement: Statement) -> Result<Vec<Record>, StoreError> {
        let mut results = self.write_unit(vec![statement]).await?;
        Ok(results.pop().unwrap_or_default())
    }

    async fn write_unit(&self, statements: Vec<Statement>) -> Result<Vec<Vec<Record>>, StoreError> {
        let mut txn = self.graph.start_txn().await?;
        let mut results = Vec::with_capacity(statements.len());

        for statement in &statements {
            debug!(cypher = %statement.text(), "graph write");
            match run_in_txn(&mut txn, statement).await {
                Ok(records) => results.push(records),
                Err(e) => {
                    if let Err(rollback_err) = txn.rollback().await {
                        warn!(error = %rollback_err, "Rollback failed after write error");
                    }
                    return Err(e);
                }
            }
        }

        txn.commit().await?;
        Ok(results)
    }
}

async fn run_in_txn(txn: &mut Txn, statement: &Statement) -> Result<Vec<Record>, StoreError> {
    let mut stream = txn.execute(to_query(statement)).await?;
    let mut records = Vec::new();
    while let Some(row) = stream.next(txn.handle()).await? {
        records.push(row_to_record(&row)?);
    }

    if records.is_empty() {
        if let Some(message) = &statement.expect_rows {
            return Err(StoreError::ExpectationFailed(message.clone()));
        }
    }
    Ok(records)
}

/// Serialize a statement into a neo4rs query with bound parameters.
pub fn to_query(statement: &Statement) -> Query {
    let mut q = query(&statement.text());
    for (key, value) in &statement.params {
        q = q.param(key, json_to_bolt(value));
    }
    q
}

fn json_to_bolt(value: &Value) -> BoltType {
    match value {
        Value::Null => BoltType::Null(BoltNull),
        Value::Bool(b) => BoltType::from(*b),
        // Integers stay integers: SKIP/LIMIT reject floats.
        Value::Number(n) => match n.as_i64() {
            Some(i) => BoltType::from(i),
            None => BoltType::from(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => BoltType::from(s.as_str()),
        Value::Array(items) => {
            BoltType::from(items.iter().map(json_to_bolt).collect::<Vec<BoltType>>())
        }
        Value::Object(map) => BoltType::Map(BoltMap::from_iter(
            map.iter()
                .map(|(k, v)| (BoltString::from(k.as_str()), json_to_bolt(v))),
        )),
    }
}

fn row_to_record(row: &neo4rs::Row) -> Result<Record, StoreError> {
    let columns: Map<String, Value> = row.to().map_err(|e| StoreError::Decode {
        field: "<row>".to_string(),
        message: e.to_string(),
    })?;
    Ok(Record::new(columns))
}
