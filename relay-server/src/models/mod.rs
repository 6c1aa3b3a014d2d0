pub mod change_event;
pub mod connection_state;
pub mod principal;
