use thiserror::Error;

#[derive(Error, Debug)]
pub enum Zer0Error {
    /// Caller input failed a precondition. Raised before any query runs.
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Input was well-formed but the graph state forbids the action
    /// (e.g. content voting before inclusion passed).
    #[error("Business rule violated: {0}")]
    BusinessRule(String),

    /// Storage-layer failure, wrapped with the operation that hit it.
    #[error("Failed to {operation}: {message}")]
    OperationFailed { operation: String, message: String },

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Zer0Error {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn operation_failed(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::OperationFailed {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn is_bad_request(&self) -> bool {
        matches!(self, Self::BadRequest(_))
    }

    pub fn is_business_rule(&self) -> bool {
        matches!(self, Self::BusinessRule(_))
    }
}
