use std::env;

use tracing::warn;

/// Maximum number of categories a node may carry.
pub const DEFAULT_MAX_CATEGORIES: usize = 3;

/// Listing floor: moderately downvoted content is still listed.
pub const DEFAULT_MIN_INCLUSION_VOTES: i64 = -5;

pub const DEFAULT_MAX_PAGE_SIZE: i64 = 1000;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Neo4j
    pub neo4j_uri: String,
    pub neo4j_user: String,
    pub neo4j_password: String,

    pub schema: SchemaConfig,
}

impl Config {
    /// Load configuration from environment variables.
    /// Panics with a clear message if required vars are missing.
    pub fn from_env() -> Self {
        Self {
            neo4j_uri: required_env("NEO4J_URI"),
            neo4j_user: required_env("NEO4J_USER"),
            neo4j_password: required_env("NEO4J_PASSWORD"),
            schema: SchemaConfig::from_env(),
        }
    }

    /// Log the loaded config without the password.
    pub fn log_redacted(&self) {
        tracing::info!(
            neo4j_uri = %self.neo4j_uri,
            neo4j_user = %self.neo4j_user,
            max_categories = self.schema.max_categories,
            validate_keyword_inclusion = self.schema.validate_keyword_inclusion,
            "Loaded config"
        );
    }
}

/// Per-schema settings, handed to each schema at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaConfig {
    pub max_categories: usize,
    /// When false, TAGGED edges may point at words that have not passed
    /// inclusion. Used by the word schema, whose nodes tag themselves.
    pub validate_keyword_inclusion: bool,
    pub default_min_inclusion_votes: i64,
    pub max_page_size: i64,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            max_categories: DEFAULT_MAX_CATEGORIES,
            validate_keyword_inclusion: true,
            default_min_inclusion_votes: DEFAULT_MIN_INCLUSION_VOTES,
            max_page_size: DEFAULT_MAX_PAGE_SIZE,
        }
    }
}

impl SchemaConfig {
    /// Defaults, overridden by `ZER0_*` variables when present and parseable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_categories: parsed_env("ZER0_MAX_CATEGORIES", defaults.max_categories),
            validate_keyword_inclusion: parsed_env(
                "ZER0_VALIDATE_KEYWORD_INCLUSION",
                defaults.validate_keyword_inclusion,
            ),
            default_min_inclusion_votes: parsed_env(
                "ZER0_MIN_INCLUSION_VOTES",
                defaults.default_min_inclusion_votes,
            ),
            max_page_size: parsed_env("ZER0_MAX_PAGE_SIZE", defaults.max_page_size),
        }
    }

    pub fn with_keyword_inclusion(mut self, validate: bool) -> Self {
        self.validate_keyword_inclusion = validate;
        self
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}

fn parsed_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => match raw.trim().parse() {
            Ok(v) => v,
            Err(_) => {
                warn!(key, value = %raw, "Unparseable config value, using default");
                default
            }
        },
        Err(_) => default,
    }
}
