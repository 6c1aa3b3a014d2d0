use super::auth_error::AuthError;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum HandshakeError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("missing workspace")]
    MissingWorkspace,
    #[error("server at capacity")]
    AtCapacity,
}
