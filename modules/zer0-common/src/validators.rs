//! Precondition checks for node operations.
//!
//! Every function returns `Ok(())` or a typed failure and performs no I/O,
//! so callers can run them before touching the graph.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use chrono::{DateTime, NaiveDate};
use regex::Regex;
use serde_json::Value;

use crate::error::Zer0Error;

pub type ValidationResult = Result<(), Zer0Error>;

/// Default upper bound for free-text fields.
pub const DEFAULT_TEXT_MAX_LENGTH: usize = 5000;

pub fn validate_text(text: &str, field: &str, max_length: Option<usize>) -> ValidationResult {
    if text.trim().is_empty() {
        return Err(Zer0Error::bad_request(format!("{field} cannot be empty")));
    }
    if let Some(max) = max_length {
        let len = text.chars().count();
        if len > max {
            return Err(Zer0Error::bad_request(format!(
                "{field} must not exceed {max} characters (got {len})"
            )));
        }
    }
    Ok(())
}

pub fn validate_id(id: &str, field: &str) -> ValidationResult {
    if id.trim().is_empty() {
        return Err(Zer0Error::bad_request(format!("{field} is required")));
    }
    Ok(())
}

pub fn validate_user_id(user_id: &str) -> ValidationResult {
    if user_id.trim().is_empty() {
        return Err(Zer0Error::bad_request("User ID is required"));
    }
    Ok(())
}

/// Fails unless the node has passed inclusion (net votes > 0).
/// This is a business-rule failure rather than bad input.
pub fn validate_inclusion_threshold(net_votes: i64, action: &str, node_type: &str) -> ValidationResult {
    if net_votes <= 0 {
        return Err(Zer0Error::BusinessRule(format!(
            "{node_type} must pass inclusion threshold before {action} (net votes: {net_votes})"
        )));
    }
    Ok(())
}

pub fn validate_category_count(categories: &[String], max: usize) -> ValidationResult {
    if categories.len() > max {
        return Err(Zer0Error::bad_request(format!(
            "Node can have maximum {max} categories (got {})",
            categories.len()
        )));
    }
    Ok(())
}

fn email_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email regex"))
}

pub fn validate_email(email: &str) -> ValidationResult {
    if !email_regex().is_match(email) {
        return Err(Zer0Error::bad_request(format!("Invalid email address: {email}")));
    }
    Ok(())
}

pub fn validate_url(raw: &str, field: &str) -> ValidationResult {
    match url::Url::parse(raw) {
        Ok(u) if matches!(u.scheme(), "http" | "https") => Ok(()),
        _ => Err(Zer0Error::bad_request(format!("{field} must be a valid http(s) URL"))),
    }
}

pub fn validate_number_range(value: f64, min: f64, max: f64, field: &str) -> ValidationResult {
    if !value.is_finite() || value < min || value > max {
        return Err(Zer0Error::bad_request(format!(
            "{field} must be between {min} and {max}"
        )));
    }
    Ok(())
}

pub fn validate_non_empty_array<T>(items: &[T], field: &str) -> ValidationResult {
    if items.is_empty() {
        return Err(Zer0Error::bad_request(format!("{field} must not be empty")));
    }
    Ok(())
}

pub fn validate_enum(value: &str, allowed: &[&str], field: &str) -> ValidationResult {
    if !allowed.contains(&value) {
        return Err(Zer0Error::bad_request(format!(
            "{field} must be one of: {}",
            allowed.join(", ")
        )));
    }
    Ok(())
}

/// Accepts RFC 3339 timestamps or plain `YYYY-MM-DD` dates.
pub fn validate_date(raw: &str, field: &str) -> ValidationResult {
    if DateTime::parse_from_rfc3339(raw).is_ok()
        || NaiveDate::parse_from_str(raw, "%Y-%m-%d").is_ok()
    {
        return Ok(());
    }
    Err(Zer0Error::bad_request(format!("{field} must be a valid date")))
}

pub fn validate_pattern(value: &str, pattern: &Regex, field: &str, message: Option<&str>) -> ValidationResult {
    if !pattern.is_match(value) {
        let msg = message
            .map(str::to_string)
            .unwrap_or_else(|| format!("{field} has an invalid format"));
        return Err(Zer0Error::BadRequest(msg));
    }
    Ok(())
}

pub fn validate_pagination(offset: Option<i64>, limit: Option<i64>, max_limit: i64) -> ValidationResult {
    if let Some(offset) = offset {
        if offset < 0 {
            return Err(Zer0Error::bad_request("Offset must be non-negative"));
        }
    }
    if let Some(limit) = limit {
        if limit < 1 || limit > max_limit {
            return Err(Zer0Error::bad_request(format!(
                "Limit must be between 1 and {max_limit}"
            )));
        }
    }
    Ok(())
}

/// Fields every creation path checks before building its statement.
#[derive(Debug, Clone, Copy)]
pub struct NodeCreationCheck<'a> {
    pub node_type: &'a str,
    pub id: &'a str,
    pub created_by: &'a str,
    pub properties: &'a BTreeMap<String, Value>,
    /// Keys a caller may set. Vote counters and timestamps are never among them.
    pub allowed_properties: &'a [&'a str],
    /// `(field name, value)` of the kind's main text, if it has one.
    pub text: Option<(&'a str, Option<&'a str>)>,
    pub max_text_length: usize,
    pub category_ids: &'a [String],
    pub max_categories: usize,
}

pub fn validate_node_creation(check: NodeCreationCheck<'_>) -> ValidationResult {
    validate_id(check.id, &format!("{} ID", check.node_type))?;
    validate_user_id(check.created_by)?;
    if let Some(bad) = check
        .properties
        .keys()
        .find(|k| !check.allowed_properties.contains(&k.as_str()))
    {
        return Err(Zer0Error::bad_request(format!(
            "Field '{bad}' cannot be set when creating {}",
            check.node_type
        )));
    }
    if let Some((field, value)) = check.text {
        validate_text(value.unwrap_or_default(), field, Some(check.max_text_length))?;
    }
    validate_category_count(check.category_ids, check.max_categories)
}

pub fn validate_update_data(
    data: &BTreeMap<String, Value>,
    allowed_fields: &[&str],
    node_type: &str,
) -> ValidationResult {
    if data.is_empty() {
        return Err(Zer0Error::bad_request(format!(
            "{node_type} update must change at least one field"
        )));
    }
    if let Some(bad) = data.keys().find(|k| !allowed_fields.contains(&k.as_str())) {
        return Err(Zer0Error::bad_request(format!(
            "Field '{bad}' cannot be updated on {node_type}"
        )));
    }
    for (key, value) in data {
        if let Value::String(s) = value {
            if s.trim().is_empty() {
                return Err(Zer0Error::bad_request(format!("{key} cannot be empty")));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("c{i}")).collect()
    }

    #[test]
    fn blank_text_rejected() {
        let err = validate_text("   ", "Statement text", None).unwrap_err();
        assert!(err.is_bad_request());
    }

    #[test]
    fn text_length_counted_in_chars() {
        assert!(validate_text("héllo", "t", Some(5)).is_ok());
        assert!(validate_text("héllo!", "t", Some(5)).is_err());
    }

    #[test]
    fn inclusion_threshold_is_business_rule() {
        let err = validate_inclusion_threshold(0, "content voting", "Statement").unwrap_err();
        assert!(err.is_business_rule());
        assert!(validate_inclusion_threshold(1, "content voting", "Statement").is_ok());
    }

    #[test]
    fn four_categories_over_max_of_three() {
        assert!(validate_category_count(&ids(3), 3).is_ok());
        let err = validate_category_count(&ids(4), 3).unwrap_err();
        assert!(err.to_string().contains("maximum 3"));
    }

    #[test]
    fn email_and_url_formats() {
        assert!(validate_email("a@b.io").is_ok());
        assert!(validate_email("not-an-email").is_err());
        assert!(validate_url("https://example.org/x", "source").is_ok());
        assert!(validate_url("ftp://example.org", "source").is_err());
        assert!(validate_url("nope", "source").is_err());
    }

    #[test]
    fn number_range_rejects_nan() {
        assert!(validate_number_range(0.5, 0.0, 1.0, "weight").is_ok());
        assert!(validate_number_range(f64::NAN, 0.0, 1.0, "weight").is_err());
        assert!(validate_number_range(1.5, 0.0, 1.0, "weight").is_err());
    }

    #[test]
    fn enum_date_pattern_and_array() {
        assert!(validate_enum("ai", &["ai", "user"], "source").is_ok());
        assert!(validate_enum("bot", &["ai", "user"], "source").is_err());
        assert!(validate_date("2024-02-29", "d").is_ok());
        assert!(validate_date("2024-02-30", "d").is_err());
        assert!(validate_date("2024-01-01T10:00:00Z", "d").is_ok());
        let re = Regex::new(r"^[a-z]+$").unwrap();
        let err = validate_pattern("ABC", &re, "word", Some("lowercase only")).unwrap_err();
        assert_eq!(err.to_string(), "Bad request: lowercase only");
        assert!(validate_non_empty_array::<String>(&[], "keywords").is_err());
    }

    #[test]
    fn pagination_bounds() {
        assert!(validate_pagination(Some(0), Some(20), 100).is_ok());
        assert!(validate_pagination(Some(-1), None, 100).is_err());
        assert!(validate_pagination(None, Some(0), 100).is_err());
        assert!(validate_pagination(None, Some(101), 100).is_err());
    }

    #[test]
    fn node_creation_checks_categories_last() {
        let cats = ids(4);
        let mut props = BTreeMap::new();
        props.insert("statement".to_string(), Value::from("Water is wet"));
        let check = NodeCreationCheck {
            node_type: "Statement",
            id: "s1",
            created_by: "user-1",
            properties: &props,
            allowed_properties: &["statement"],
            text: Some(("statement", Some("Water is wet"))),
            max_text_length: DEFAULT_TEXT_MAX_LENGTH,
            category_ids: &cats,
            max_categories: 3,
        };
        assert!(validate_node_creation(check).is_err());

        let missing_user = NodeCreationCheck {
            created_by: "",
            category_ids: &[],
            ..check
        };
        let err = validate_node_creation(missing_user).unwrap_err();
        assert!(err.to_string().contains("User ID"));
    }

    #[test]
    fn node_creation_rejects_unknown_property_keys() {
        let mut props = BTreeMap::new();
        props.insert("statement".to_string(), Value::from("x"));
        props.insert("inclusionNetVotes".to_string(), Value::from(100));
        let check = NodeCreationCheck {
            node_type: "Statement",
            id: "s1",
            created_by: "user-1",
            properties: &props,
            allowed_properties: &["statement"],
            text: Some(("statement", Some("x"))),
            max_text_length: DEFAULT_TEXT_MAX_LENGTH,
            category_ids: &[],
            max_categories: 3,
        };
        let err = validate_node_creation(check).unwrap_err();
        assert!(err.is_bad_request());
        assert!(err.to_string().contains("inclusionNetVotes"));
    }

    #[test]
    fn update_data_restricted_to_allowed_fields() {
        let mut data = BTreeMap::new();
        data.insert("statement".to_string(), Value::from("new text"));
        assert!(validate_update_data(&data, &["statement", "publicCredit"], "Statement").is_ok());

        data.insert("inclusionNetVotes".to_string(), Value::from(100));
        let err = validate_update_data(&data, &["statement"], "Statement").unwrap_err();
        assert!(err.to_string().contains("inclusionNetVotes"));

        assert!(validate_update_data(&BTreeMap::new(), &["statement"], "Statement").is_err());
    }
}
