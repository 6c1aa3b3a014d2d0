use super::{
    backoff::ExponentialBackoff,
    notification::decode_notification,
    source::{NotificationSource, NotificationStream},
};
use crate::{
    errors::listener_error::ListenerError, metrics::RelayMetrics,
    models::change_event::ChangeEvent,
};
use log::{error, info, warn};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ListenerState {
    Disconnected,
    Connecting,
    Listening,
}

enum ListenOutcome {
    Shutdown,
    DispatcherGone,
    Lost(ListenerError),
}

/// Owns the single subscription to the database notification topic.
///
/// Delivery is at-most-once: events published while the subscription is down are not
/// recovered after reconnecting.
pub struct ChangeListener<S: NotificationSource> {
    source: S,
    events_tx: mpsc::Sender<ChangeEvent>,
    backoff: ExponentialBackoff,
    state_tx: watch::Sender<ListenerState>,
    metrics: Arc<RelayMetrics>,
}

impl<S: NotificationSource> ChangeListener<S> {
    pub fn new(
        source: S,
        events_tx: mpsc::Sender<ChangeEvent>,
        backoff: ExponentialBackoff,
        metrics: Arc<RelayMetrics>,
    ) -> (Self, watch::Receiver<ListenerState>) {
        let (state_tx, state_rx) = watch::channel(ListenerState::Disconnected);

        let listener = ChangeListener {
            source,
            events_tx,
            backoff,
            state_tx,
            metrics,
        };

        (listener, state_rx)
    }

    pub async fn run(mut self, shutdown: CancellationToken) {
        let mut attempted = false;

        loop {
            if attempted {
                RelayMetrics::add(&self.metrics.listener_reconnects, 1);
            }
            attempted = true;

            self.state_tx.send_replace(ListenerState::Connecting);
            let connected = tokio::select! {
                _ = shutdown.cancelled() => break,
                connected = self.source.connect() => connected,
            };

            match connected {
                Ok(mut stream) => {
                    self.backoff.reset();
                    self.state_tx.send_replace(ListenerState::Listening);
                    info!("Change listener subscribed to notifications");

                    match self.listen(&mut stream, &shutdown).await {
                        ListenOutcome::Shutdown => break,
                        ListenOutcome::DispatcherGone => {
                            error!("Dispatcher stopped, change listener exiting");
                            break;
                        }
                        ListenOutcome::Lost(error) => {
                            warn!("Change listener lost its subscription: {error}")
                        }
                    }
                }

                Err(error) => warn!("Change listener could not subscribe: {error}"),
            }

            self.state_tx.send_replace(ListenerState::Disconnected);
            let delay = self.backoff.next_delay();
            info!("Change listener reconnecting in {delay:?}");

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.state_tx.send_replace(ListenerState::Disconnected);
        info!("Change listener stopped");
    }

    async fn listen(
        &mut self,
        stream: &mut S::Stream,
        shutdown: &CancellationToken,
    ) -> ListenOutcome {
        loop {
            let payload = tokio::select! {
                _ = shutdown.cancelled() => return ListenOutcome::Shutdown,
                payload = stream.next_payload() => payload,
            };

            let payload = match payload {
                Ok(payload) => payload,
                Err(error) => return ListenOutcome::Lost(error),
            };

            RelayMetrics::add(&self.metrics.notifications_received, 1);
            let event = match decode_notification(&payload) {
                Ok(event) => event,
                Err(error) => {
                    RelayMetrics::add(&self.metrics.notifications_malformed, 1);
                    warn!("Dropping notification: {error}");
                    continue;
                }
            };

            if self.events_tx.send(event).await.is_err() {
                return ListenOutcome::DispatcherGone;
            }
        }
    }
}
