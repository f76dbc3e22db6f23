//! Error taxonomy for the core (spec.md §7): Validation, Precondition,
//! Infrastructure, Terminal. Each leaf crate defines its own `thiserror`
//! enum and converts into this umbrella type at its boundary; contention
//! (optimistic races, duplicate webhooks) is deliberately absent here
//! because it is resolved locally by retry or idempotent no-op and never
//! surfaces past a component boundary.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("validation: {0}")]
    Validation(String),

    #[error("precondition: {0}")]
    Precondition(String),

    #[error("infrastructure: {0}")]
    Infrastructure(String),

    #[error("terminal: {0}")]
    Terminal(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Validation,
    Precondition,
    Infrastructure,
    Terminal,
}

impl CoreError {
    pub fn class(&self) -> ErrorClass {
        match self {
            CoreError::Validation(_) => ErrorClass::Validation,
            CoreError::Precondition(_) => ErrorClass::Precondition,
            CoreError::Infrastructure(_) => ErrorClass::Infrastructure,
            CoreError::Terminal(_) => ErrorClass::Terminal,
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::Validation(e.to_string())
    }
}
