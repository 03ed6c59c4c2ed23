use thiserror::Error;

#[derive(Error, Debug)]
pub enum EventsError {
    #[error("Failed to encode flux event as JSON: {0}")]
    Serialization(String),
}
