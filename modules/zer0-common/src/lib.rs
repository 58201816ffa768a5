pub mod types;
pub mod config;
pub mod error;
pub mod validators;

pub use types::*;
pub use config::{Config, SchemaConfig};
pub use error::Zer0Error;
