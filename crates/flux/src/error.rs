use thiserror::Error;

#[derive(Error, Debug)]
pub enum FluxError {
    #[error("API client error: {0}")]
    ApiClient(#[from] api_client::error::ApiError),

    #[error("Database error: {0}")]
    Database(#[from] database::DbError),

    #[error("Position inbox is closed")]
    InboxClosed,
}
