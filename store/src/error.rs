use duelstake_core::CoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("row not found")]
    NotFound,

    #[error("account balance insufficient for transfer")]
    InsufficientFunds,

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

impl From<StoreError> for CoreError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => CoreError::Precondition("row not found".into()),
            StoreError::InsufficientFunds => {
                CoreError::Precondition("account balance insufficient for transfer".into())
            }
            other => CoreError::Infrastructure(other.to_string()),
        }
    }
}
