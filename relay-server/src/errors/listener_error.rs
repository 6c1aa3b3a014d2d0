use thiserror::Error;

#[derive(Error, Debug)]
pub enum ListenerError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("notification stream lost its connection")]
    ConnectionLost,
    #[error("notification source unavailable: {0}")]
    Unavailable(String),
}
