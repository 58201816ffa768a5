//! Minimal query AST: an ordered list of clauses plus parameters.
//!
//! Fragments compose as values (append, strip the trailing RETURN, re-append)
//! and are only serialized to query text when a statement is executed, so the
//! shape of a query can be asserted on without string matching.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClauseKind {
    Match,
    OptionalMatch,
    Where,
    With,
    Unwind,
    Create,
    Merge,
    OnCreateSet,
    OnMatchSet,
    Set,
    Delete,
    DetachDelete,
    Foreach,
    /// `CALL { ... }` subquery; the body is already-rendered inner text.
    Call,
    OrderBy,
    Skip,
    Limit,
    Return,
}

impl ClauseKind {
    pub fn keyword(&self) -> &'static str {
        match self {
            ClauseKind::Match => "MATCH",
            ClauseKind::OptionalMatch => "OPTIONAL MATCH",
            ClauseKind::Where => "WHERE",
            ClauseKind::With => "WITH",
            ClauseKind::Unwind => "UNWIND",
            ClauseKind::Create => "CREATE",
            ClauseKind::Merge => "MERGE",
            ClauseKind::OnCreateSet => "ON CREATE SET",
            ClauseKind::OnMatchSet => "ON MATCH SET",
            ClauseKind::Set => "SET",
            ClauseKind::Delete => "DELETE",
            ClauseKind::DetachDelete => "DETACH DELETE",
            ClauseKind::Foreach => "FOREACH",
            ClauseKind::Call => "CALL",
            ClauseKind::OrderBy => "ORDER BY",
            ClauseKind::Skip => "SKIP",
            ClauseKind::Limit => "LIMIT",
            ClauseKind::Return => "RETURN",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clause {
    pub kind: ClauseKind,
    pub body: String,
}

impl Clause {
    pub fn new(kind: ClauseKind, body: impl Into<String>) -> Self {
        Self {
            kind,
            body: body.into(),
        }
    }
}

impl fmt::Display for Clause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ClauseKind::Call => {
                let inner = self.body.replace('\n', "\n  ");
                write!(f, "CALL {{\n  {inner}\n}}")
            }
            _ => write!(f, "{} {}", self.kind.keyword(), self.body),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fragment {
    clauses: Vec<Clause>,
}

impl Fragment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(mut self, kind: ClauseKind, body: impl Into<String>) -> Self {
        self.clauses.push(Clause::new(kind, body));
        self
    }

    pub fn match_(self, body: impl Into<String>) -> Self {
        self.push(ClauseKind::Match, body)
    }

    pub fn optional_match(self, body: impl Into<String>) -> Self {
        self.push(ClauseKind::OptionalMatch, body)
    }

    pub fn where_(self, body: impl Into<String>) -> Self {
        self.push(ClauseKind::Where, body)
    }

    /// WHERE over the AND of `conditions`; no clause at all when empty.
    pub fn where_all(self, conditions: &[String]) -> Self {
        if conditions.is_empty() {
            return self;
        }
        self.where_(conditions.join("\n  AND "))
    }

    pub fn with(self, body: impl Into<String>) -> Self {
        self.push(ClauseKind::With, body)
    }

    pub fn unwind(self, body: impl Into<String>) -> Self {
        self.push(ClauseKind::Unwind, body)
    }

    pub fn create(self, body: impl Into<String>) -> Self {
        self.push(ClauseKind::Create, body)
    }

    pub fn merge(self, body: impl Into<String>) -> Self {
        self.push(ClauseKind::Merge, body)
    }

    pub fn on_create_set(self, body: impl Into<String>) -> Self {
        self.push(ClauseKind::OnCreateSet, body)
    }

    pub fn on_match_set(self, body: impl Into<String>) -> Self {
        self.push(ClauseKind::OnMatchSet, body)
    }

    pub fn set(self, body: impl Into<String>) -> Self {
        self.push(ClauseKind::Set, body)
    }

    pub fn delete(self, body: impl Into<String>) -> Self {
        self.push(ClauseKind::Delete, body)
    }

    pub fn detach_delete(self, body: impl Into<String>) -> Self {
        self.push(ClauseKind::DetachDelete, body)
    }

    pub fn foreach(self, body: impl Into<String>) -> Self {
        self.push(ClauseKind::Foreach, body)
    }

    /// Wrap `inner` in a `CALL { }` subquery.
    pub fn call(self, inner: Fragment) -> Self {
        self.push(ClauseKind::Call, inner.render())
    }

    pub fn order_by(self, body: impl Into<String>) -> Self {
        self.push(ClauseKind::OrderBy, body)
    }

    pub fn skip(self, body: impl Into<String>) -> Self {
        self.push(ClauseKind::Skip, body)
    }

    pub fn limit(self, body: impl Into<String>) -> Self {
        self.push(ClauseKind::Limit, body)
    }

    pub fn return_(self, body: impl Into<String>) -> Self {
        self.push(ClauseKind::Return, body)
    }

    pub fn append(mut self, other: Fragment) -> Self {
        self.clauses.extend(other.clauses);
        self
    }

    /// Remove and return a terminal RETURN clause, if the fragment ends with one.
    pub fn take_return(&mut self) -> Option<Clause> {
        match self.clauses.last() {
            Some(c) if c.kind == ClauseKind::Return => self.clauses.pop(),
            _ => None,
        }
    }

    pub fn push_clause(mut self, clause: Clause) -> Self {
        self.clauses.push(clause);
        self
    }

    pub fn kinds(&self) -> Vec<ClauseKind> {
        self.clauses.iter().map(|c| c.kind).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.clauses.iter().any(|c| c.body.contains(needle))
    }

    pub fn render(&self) -> String {
        self.clauses
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl fmt::Display for Fragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

pub type Params = BTreeMap<String, Value>;

/// A fragment plus its parameters, ready to hand to a `GraphStore`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Statement {
    pub fragment: Fragment,
    pub params: Params,
    /// When set, a write that returns no rows is rolled back and reported
    /// with this message. Guards composed writes whose WHERE filters drop
    /// the row when a precondition fails.
    pub expect_rows: Option<String>,
}

impl Statement {
    pub fn new(fragment: Fragment) -> Self {
        Self {
            fragment,
            params: Params::new(),
            expect_rows: None,
        }
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn params(mut self, params: impl IntoIterator<Item = (String, Value)>) -> Self {
        self.params.extend(params);
        self
    }

    pub fn expect_rows(mut self, message: impl Into<String>) -> Self {
        self.expect_rows = Some(message.into());
        self
    }

    pub fn text(&self) -> String {
        self.fragment.render()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_clauses_in_order() {
        let f = Fragment::new()
            .match_("(n:StatementNode {id: $id})")
            .where_("n.inclusionNetVotes > 0")
            .return_("n");
        assert_eq!(
            f.render(),
            "MATCH (n:StatementNode {id: $id})\nWHERE n.inclusionNetVotes > 0\nRETURN n"
        );
    }

    #[test]
    fn take_return_only_strips_terminal_return() {
        let mut f = Fragment::new().match_("(n)").return_("n");
        let ret = f.take_return().unwrap();
        assert_eq!(ret.body, "n");
        assert_eq!(f.kinds(), vec![ClauseKind::Match]);
        assert!(f.take_return().is_none());
    }

    #[test]
    fn call_subquery_is_braced_and_indented() {
        let inner = Fragment::new().with("n").match_("(n)-[:TAGGED]->(w)");
        let f = Fragment::new().call(inner);
        assert_eq!(f.render(), "CALL {\n  WITH n\n  MATCH (n)-[:TAGGED]->(w)\n}");
    }

    #[test]
    fn where_all_skips_empty_conditions() {
        let f = Fragment::new().match_("(n)").where_all(&[]);
        assert_eq!(f.kinds(), vec![ClauseKind::Match]);
        let f = Fragment::new().where_all(&["a = 1".to_string(), "b = 2".to_string()]);
        assert_eq!(f.render(), "WHERE a = 1\n  AND b = 2");
    }

    #[test]
    fn statement_collects_params() {
        let s = Statement::new(Fragment::new().return_("$x"))
            .param("x", 1)
            .param("y", "two");
        assert_eq!(s.params["x"], Value::from(1));
        assert_eq!(s.params["y"], Value::from("two"));
        assert!(s.expect_rows.is_none());
    }
}
