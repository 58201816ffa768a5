//! In-memory `GraphStore` that records every statement and replays canned rows.
//!
//! Each statement consumes one queued response (empty rows when the queue is
//! dry). A statement carrying an `expect_rows` guard that receives no rows
//! fails the whole call, the way a rolled-back transaction would.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::cypher::Statement;
use crate::store::{GraphStore, Record, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Read,
    Write,
    Unit,
}

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub kind: CallKind,
    pub statements: Vec<Statement>,
}

enum Response {
    Rows(Vec<Record>),
    Fail(String),
}

#[derive(Default)]
pub struct RecordingStore {
    calls: Mutex<Vec<RecordedCall>>,
    responses: Mutex<VecDeque<Response>>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue rows for the next statement. Each value must be a JSON object.
    pub fn respond(&self, rows: Vec<Value>) -> &Self {
        let records = rows.into_iter().map(Record::from_json).collect();
        self.responses.lock().unwrap().push_back(Response::Rows(records));
        self
    }

    pub fn respond_empty(&self) -> &Self {
        self.respond(Vec::new())
    }

    /// Make the next statement fail with a storage error.
    pub fn fail_next(&self, message: &str) -> &Self {
        self.responses
            .lock()
            .unwrap()
            .push_back(Response::Fail(message.to_string()));
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Every recorded statement, flattened across calls.
    pub fn statements(&self) -> Vec<Statement> {
        self.calls()
            .into_iter()
            .flat_map(|c| c.statements)
            .collect()
    }

    fn record(&self, kind: CallKind, statements: &[Statement]) {
        self.calls.lock().unwrap().push(RecordedCall {
            kind,
            statements: statements.to_vec(),
        });
    }

    fn answer(&self, statement: &Statement) -> Result<Vec<Record>, StoreError> {
        let next = self.responses.lock().unwrap().pop_front();
        let rows = match next {
            Some(Response::Fail(message)) => {
                return Err(StoreError::Decode {
                    field: "<store>".to_string(),
                    message,
                })
            }
            Some(Response::Rows(rows)) => rows,
            None => Vec::new(),
        };
        if rows.is_empty() {
            if let Some(message) = &statement.expect_rows {
                return Err(StoreError::ExpectationFailed(message.clone()));
            }
        }
        Ok(rows)
    }
}

#[async_trait]
impl GraphStore for RecordingStore {
    async fn read(&self, statement: Statement) -> Result<Vec<Record>, StoreError> {
        self.record(CallKind::Read, std::slice::from_ref(&statement));
        self.answer(&statement)
    }

    async fn write(&self, statement: Statement) -> Result<Vec<Record>, StoreError> {
        self.record(CallKind::Write, std::slice::from_ref(&statement));
        self.answer(&statement)
    }

    async fn write_unit(&self, statements: Vec<Statement>) -> Result<Vec<Vec<Record>>, StoreError> {
        self.record(CallKind::Unit, &statements);
        statements.iter().map(|s| self.answer(s)).collect()
    }
}
