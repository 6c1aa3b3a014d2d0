pub mod auth_error;
pub mod config_error;
pub mod decode_error;
pub mod handshake_error;
pub mod listener_error;
