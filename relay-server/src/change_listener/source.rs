use crate::errors::listener_error::ListenerError;
use std::future::Future;

/// Something that can open a subscription to the database's notification topic.
pub trait NotificationSource: Send + 'static {
    type Stream: NotificationStream;

    /// Opens a fresh connection and issues the subscribe command.
    fn connect(&mut self) -> impl Future<Output = Result<Self::Stream, ListenerError>> + Send;
}

pub trait NotificationStream: Send + 'static {
    /// Waits for the next raw payload. An error means the subscription is gone.
    fn next_payload(&mut self) -> impl Future<Output = Result<String, ListenerError>> + Send;
}
