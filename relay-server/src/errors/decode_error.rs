use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("payload is not a valid notification: {0}")]
    Json(#[from] serde_json::Error),
    #[error("notification has an empty {0}")]
    EmptyField(&'static str),
}
