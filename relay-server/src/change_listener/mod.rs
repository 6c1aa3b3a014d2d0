pub mod backoff;
pub mod change_listener;
pub mod notification;
pub mod postgres;
pub mod source;
