pub mod connection;
pub mod connection_registry;
