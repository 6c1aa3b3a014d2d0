use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{key} has an invalid value: {value}")]
    Invalid { key: &'static str, value: String },
    #[error("JWT_SECRET is not a usable signing key: {0}")]
    InvalidSigningKey(String),
}
