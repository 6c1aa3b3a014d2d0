use change_listener::{
    backoff::ExponentialBackoff, change_listener::ChangeListener, source::NotificationSource,
};
use config::RelayConfig;
use dispatcher::Dispatcher;
use gateway::gateway::{self as ws_gateway, CLOSE_TIMEOUT, GatewayState};
use log::{info, warn};
use metrics::RelayMetrics;
use registry::connection_registry::ConnectionRegistry;
use std::{sync::Arc, time::Duration};
use token_verifier::TokenVerifier;
use tokio::{net::TcpListener, sync::mpsc, time::Instant};
use tokio_util::sync::CancellationToken;

pub mod change_listener;
pub mod config;
pub mod dispatcher;
pub mod errors;
pub mod gateway;
pub mod message;
pub mod metrics;
pub mod models;
pub mod registry;
pub mod token_verifier;

const EVENT_BUFFER: usize = 1024;

/// The relay process: one change listener, one dispatcher and the WebSocket gateway.
pub struct Relay {
    config: RelayConfig,
    registry: Arc<ConnectionRegistry>,
    verifier: Arc<TokenVerifier>,
    metrics: Arc<RelayMetrics>,
}

impl Relay {
    pub fn new(config: RelayConfig) -> Self {
        let verifier = TokenVerifier::new(config.signing_key.clone());

        Relay {
            config,
            registry: Arc::new(ConnectionRegistry::new()),
            verifier: Arc::new(verifier),
            metrics: Arc::new(RelayMetrics::default()),
        }
    }

    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        self.registry.clone()
    }

    pub fn metrics(&self) -> Arc<RelayMetrics> {
        self.metrics.clone()
    }

    /// Runs until `shutdown` is cancelled, then gives open connections
    /// a few seconds to say goodbye.
    pub async fn run<S: NotificationSource>(
        self,
        source: S,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) {
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let backoff = ExponentialBackoff::new(self.config.backoff_initial, self.config.backoff_max);
        let (change_listener, listener_state) =
            ChangeListener::new(source, events_tx, backoff, self.metrics.clone());

        let dispatcher = Dispatcher::new(
            self.registry.clone(),
            self.metrics.clone(),
            self.config.overflow_threshold,
        );

        let listener_task = tokio::spawn(change_listener.run(shutdown.clone()));
        tokio::spawn(dispatcher.run(events_rx));

        let state = Arc::new(GatewayState {
            registry: self.registry.clone(),
            verifier: self.verifier.clone(),
            metrics: self.metrics.clone(),
            listener_state,
            queue_capacity: self.config.queue_capacity,
            max_connections: self.config.max_connections,
            ping_interval: self.config.ping_interval,
            idle_timeout: self.config.idle_timeout,
            shutdown: shutdown.clone(),
        });

        ws_gateway::serve(listener, ws_gateway::router(state), shutdown).await;

        if let Err(error) = listener_task.await {
            warn!("Change listener task failed: {error}");
        }

        let deadline = Instant::now() + CLOSE_TIMEOUT;
        while self.registry.connection_count() > 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        info!(
            "Relay stopped with {} connections still open",
            self.registry.connection_count()
        );
    }
}
