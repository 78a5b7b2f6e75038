pub mod analytics;
pub mod connection;
pub mod documents;
pub mod migrations;

use leavewatch_core::errors::StoreError;
use thiserror::Error;

pub use analytics::SqlAnalyticsSink;
pub use connection::{connect, connect_with_settings, ping, DbPool};
pub use documents::SqlDocumentStore;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<RepositoryError> for StoreError {
    fn from(error: RepositoryError) -> Self {
        StoreError::Backend(error.to_string())
    }
}
