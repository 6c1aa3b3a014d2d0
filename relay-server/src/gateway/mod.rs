mod connection_handler;
pub mod gateway;
mod stats;
