use super::source::{NotificationSource, NotificationStream};
use crate::errors::listener_error::ListenerError;
use sqlx::postgres::PgListener;

pub struct PgNotificationSource {
    database_url: String,
    channel: String,
}

impl PgNotificationSource {
    pub fn new(database_url: String, channel: String) -> Self {
        PgNotificationSource {
            database_url,
            channel,
        }
    }
}

impl NotificationSource for PgNotificationSource {
    type Stream = PgNotificationStream;

    async fn connect(&mut self) -> Result<PgNotificationStream, ListenerError> {
        let mut listener = PgListener::connect(&self.database_url).await?;
        listener.listen(&self.channel).await?;
        Ok(PgNotificationStream { listener })
    }
}

pub struct PgNotificationStream {
    listener: PgListener,
}

impl NotificationStream for PgNotificationStream {
    // try_recv reports a dropped connection as None instead of silently reconnecting,
    // which leaves reconnection and backoff to the change listener.
    async fn next_payload(&mut self) -> Result<String, ListenerError> {
        match self.listener.try_recv().await? {
            Some(notification) => Ok(notification.payload().to_string()),
            None => Err(ListenerError::ConnectionLost),
        }
    }
}
