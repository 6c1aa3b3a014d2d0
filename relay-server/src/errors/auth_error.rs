use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    #[error("malformed token")]
    Malformed,
    #[error("invalid token signature")]
    InvalidSignature,
    #[error("token expired")]
    Expired,
}
