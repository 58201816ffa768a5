//! Vote statements. One `VOTED_ON {kind, status}` edge per (user, node, kind);
//! tallies on the node are recomputed from those edges after every change.

use zer0_common::{UserVoteStatus, VoteKind, VoteResult, VoteStatus, VoteTally};

use crate::cypher::{Fragment, Statement};
use crate::query_builder::{quote_identifier, string_literal, USER_LABEL, VOTED_ON};
use crate::store::{Record, StoreError};

const TALLY_COLUMNS: &str = "n.inclusionPositiveVotes AS inclusionPositiveVotes, \
n.inclusionNegativeVotes AS inclusionNegativeVotes, \
n.inclusionNetVotes AS inclusionNetVotes, \
n.contentPositiveVotes AS contentPositiveVotes, \
n.contentNegativeVotes AS contentNegativeVotes, \
n.contentNetVotes AS contentNetVotes";

fn match_node(label: &str, id_field: &str) -> Fragment {
    Fragment::new().match_(format!(
        "(n:{} {{{}: $id}})",
        quote_identifier(label),
        quote_identifier(id_field)
    ))
}

/// Recount agree/disagree edges of one kind and write them back onto `n`.
fn recompute_tally(kind: VoteKind) -> Fragment {
    let prefix = kind.as_str();
    let inner = Fragment::new()
        .with("n")
        .optional_match(format!(
            "(:{USER_LABEL})-[v:{VOTED_ON} {{kind: {}}}]->(n)",
            string_literal(prefix)
        ))
        .return_(
            "count(CASE WHEN v.status = 'agree' THEN 1 END) AS positive, \
             count(CASE WHEN v.status = 'disagree' THEN 1 END) AS negative",
        );

    Fragment::new().call(inner).set(format!(
        "n.{prefix}PositiveVotes = positive, n.{prefix}NegativeVotes = negative, \
         n.{prefix}NetVotes = positive - negative, n.updatedAt = datetime()"
    ))
}

/// Record (or flip) a user's vote and return the updated tallies.
/// `require_inclusion` drops the row unless the node has passed inclusion.
pub fn cast_vote(
    label: &str,
    id_field: &str,
    node_id: &str,
    user_id: &str,
    kind: VoteKind,
    status: VoteStatus,
    require_inclusion: bool,
) -> Statement {
    let mut f = match_node(label, id_field);
    if require_inclusion {
        f = f.where_("n.inclusionNetVotes > 0");
    }
    let f = f
        .merge(format!("(u:{USER_LABEL} {{sub: $userId}})"))
        .merge(format!("(u)-[v:{VOTED_ON} {{kind: $kind}}]->(n)"))
        .on_create_set("v.createdAt = datetime()")
        .set("v.status = $status, v.updatedAt = datetime()")
        .with("n")
        .append(recompute_tally(kind))
        .return_(TALLY_COLUMNS);

    Statement::new(f)
        .param("id", node_id)
        .param("userId", user_id)
        .param("kind", kind.as_str())
        .param("status", status.as_str())
}

/// Delete a user's vote of one kind, if any, and return the updated tallies.
pub fn remove_vote(label: &str, id_field: &str, node_id: &str, user_id: &str, kind: VoteKind) -> Statement {
    let f = match_node(label, id_field)
        .optional_match(format!(
            "(:{USER_LABEL} {{sub: $userId}})-[v:{VOTED_ON} {{kind: $kind}}]->(n)"
        ))
        .delete("v")
        .with("DISTINCT n")
        .append(recompute_tally(kind))
        .return_(TALLY_COLUMNS);

    Statement::new(f)
        .param("id", node_id)
        .param("userId", user_id)
        .param("kind", kind.as_str())
}

pub fn vote_status(label: &str, id_field: &str, node_id: &str, user_id: &str) -> Statement {
    let f = match_node(label, id_field)
        .optional_match(format!(
            "(:{USER_LABEL} {{sub: $userId}})-[iv:{VOTED_ON} {{kind: 'inclusion'}}]->(n)"
        ))
        .optional_match(format!(
            "(:{USER_LABEL} {{sub: $userId}})-[cv:{VOTED_ON} {{kind: 'content'}}]->(n)"
        ))
        .return_(format!(
            "iv.status AS inclusionStatus, cv.status AS contentStatus, {TALLY_COLUMNS}"
        ));

    Statement::new(f).param("id", node_id).param("userId", user_id)
}

pub fn get_votes(label: &str, id_field: &str, node_id: &str) -> Statement {
    Statement::new(match_node(label, id_field).return_(TALLY_COLUMNS)).param("id", node_id)
}

fn tally(record: &Record, prefix: &str) -> VoteTally {
    let read = |suffix: &str| {
        record
            .get_opt::<i64>(&format!("{prefix}{suffix}"))
            .unwrap_or(0)
    };
    VoteTally {
        positive: read("PositiveVotes"),
        negative: read("NegativeVotes"),
        net: read("NetVotes"),
    }
}

/// Read the tally columns; the content tally only when the kind votes on content.
pub fn vote_result_from_record(record: &Record, content_voting: bool) -> VoteResult {
    VoteResult {
        inclusion: tally(record, "inclusion"),
        content: content_voting.then(|| tally(record, "content")),
    }
}

pub fn vote_status_from_record(record: &Record, content_voting: bool) -> Result<UserVoteStatus, StoreError> {
    let parse = |field: &str| -> Result<Option<VoteStatus>, StoreError> {
        match record.get_opt::<String>(field) {
            None => Ok(None),
            Some(raw) => VoteStatus::parse(&raw).map(Some).ok_or_else(|| StoreError::Decode {
                field: field.to_string(),
                message: format!("unknown vote status '{raw}'"),
            }),
        }
    };

    Ok(UserVoteStatus {
        inclusion_status: parse("inclusionStatus")?,
        content_status: if content_voting { parse("contentStatus")? } else { None },
        votes: vote_result_from_record(record, content_voting),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn cast_vote_merges_single_edge_per_kind() {
        let s = cast_vote("StatementNode", "id", "s1", "u1", VoteKind::Content, VoteStatus::Agree, true);
        let text = s.text();
        assert!(text.contains("WHERE n.inclusionNetVotes > 0"));
        assert!(text.contains("MERGE (u)-[v:VOTED_ON {kind: $kind}]->(n)"));
        assert!(text.contains("n.contentNetVotes = positive - negative"));
        assert_eq!(s.params["kind"], json!("content"));
        assert_eq!(s.params["status"], json!("agree"));
    }

    #[test]
    fn inclusion_vote_has_no_gate() {
        let s = cast_vote("WordNode", "word", "water", "u1", VoteKind::Inclusion, VoteStatus::Disagree, false);
        assert!(!s.text().contains("WHERE n.inclusionNetVotes > 0"));
        assert!(s.text().starts_with("MATCH (n:WordNode {word: $id})"));
    }

    #[test]
    fn remove_vote_recounts_after_delete() {
        let text = remove_vote("AnswerNode", "id", "a1", "u1", VoteKind::Inclusion).text();
        let delete = text.find("DELETE v").unwrap();
        let recount = text.find("CALL {").unwrap();
        assert!(delete < recount);
    }

    #[test]
    fn reads_tallies_and_status() {
        let record = Record::from_json(json!({
            "inclusionStatus": "agree",
            "contentStatus": null,
            "inclusionPositiveVotes": 2,
            "inclusionNegativeVotes": 1,
            "inclusionNetVotes": 1,
            "contentPositiveVotes": 0,
            "contentNegativeVotes": 3,
            "contentNetVotes": -3
        }));
        let status = vote_status_from_record(&record, true).unwrap();
        assert_eq!(status.inclusion_status, Some(VoteStatus::Agree));
        assert_eq!(status.content_status, None);
        assert_eq!(status.votes.inclusion, VoteTally::new(2, 1));
        assert_eq!(status.votes.content, Some(VoteTally::new(0, 3)));

        assert_eq!(vote_result_from_record(&record, false).content, None);
    }
}
