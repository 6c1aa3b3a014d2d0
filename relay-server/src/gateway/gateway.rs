use super::{connection_handler, stats};
use crate::{
    change_listener::change_listener::ListenerState,
    errors::{auth_error::AuthError, handshake_error::HandshakeError},
    message::OutboundMessage,
    metrics::RelayMetrics,
    models::principal::Principal,
    registry::connection_registry::ConnectionRegistry,
    token_verifier::TokenVerifier,
};
use axum::{
    Router,
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{CloseFrame, Message, WebSocket, close_code},
    },
    response::Response,
    routing::get,
};
use hyper::{Request, body::Incoming};
use hyper_util::{
    rt::{TokioExecutor, TokioIo},
    server,
};
use log::{debug, error, info, warn};
use serde::Deserialize;
use std::{sync::Arc, time::Duration};
use tokio::{net::TcpListener, sync::watch};
use tokio_util::sync::CancellationToken;
use tower_service::Service;

const MAX_MESSAGE_SIZE: usize = 64 * 1024;
pub(crate) const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct GatewayState {
    pub registry: Arc<ConnectionRegistry>,
    pub verifier: Arc<TokenVerifier>,
    pub metrics: Arc<RelayMetrics>,
    pub listener_state: watch::Receiver<ListenerState>,
    pub queue_capacity: usize,
    pub max_connections: usize,
    pub ping_interval: Duration,
    pub idle_timeout: Duration,
    pub shutdown: CancellationToken,
}

#[derive(Deserialize)]
pub struct ConnectParams {
    token: Option<String>,
    workspace: Option<String>,
}

pub fn router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/", get(connect))
        .route("/_relay/stats", get(stats::stats))
        .with_state(state)
}

/// Accepts connections until `shutdown` is cancelled. Served with hyper directly so
/// WebSocket upgrades work on every accepted socket.
pub async fn serve(listener: TcpListener, app: Router, shutdown: CancellationToken) {
    loop {
        let (socket, remote_addr) = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(error) => {
                    error!("Could not get socket from accepted connection: {error}");
                    continue;
                }
            },
        };

        let tower_service = app.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let socket = TokioIo::new(socket);
            let hyper_service = hyper::service::service_fn(move |request: Request<Incoming>| {
                tower_service.clone().call(request)
            });

            let builder = server::conn::auto::Builder::new(TokioExecutor::new());
            let connection = builder.serve_connection_with_upgrades(socket, hyper_service);
            tokio::pin!(connection);

            // upgraded sockets have already left hyper, so this only ends plain HTTP keep-alives
            let served = tokio::select! {
                served = connection.as_mut() => served,
                _ = shutdown.cancelled() => {
                    connection.as_mut().graceful_shutdown();
                    connection.await
                }
            };

            if let Err(err) = served {
                debug!("Failed to serve connection from {remote_addr}: {err:#}");
            }
        });
    }

    info!("Gateway stopped accepting connections");
}

async fn connect(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<Arc<GatewayState>>,
) -> Response {
    let handshake = authenticate(&state, params);

    ws.max_message_size(MAX_MESSAGE_SIZE)
        .on_failed_upgrade(|error| warn!("WebSocket upgrade failed: {error}"))
        .on_upgrade(move |socket| async move {
            match handshake {
                Ok((principal, workspace_id)) => {
                    RelayMetrics::add(&state.metrics.connections_accepted, 1);
                    connection_handler::handle_connection(socket, principal, workspace_id, state)
                        .await;
                }

                Err(error) => {
                    RelayMetrics::add(&state.metrics.connections_rejected, 1);
                    info!("Rejected connection: {error}");
                    reject(socket, &error).await;
                }
            }
        })
}

fn authenticate(
    state: &GatewayState,
    params: ConnectParams,
) -> Result<(Principal, String), HandshakeError> {
    let token = params.token.ok_or(AuthError::Malformed)?;
    let principal = state.verifier.verify(&token)?;

    let workspace_id = params
        .workspace
        .filter(|workspace| !workspace.is_empty())
        .ok_or(HandshakeError::MissingWorkspace)?;

    if state.max_connections > 0 && state.registry.connection_count() >= state.max_connections {
        return Err(HandshakeError::AtCapacity);
    }

    Ok((principal, workspace_id))
}

async fn reject(mut socket: WebSocket, error: &HandshakeError) {
    let reason = error.to_string();
    let _ = tokio::time::timeout(CLOSE_TIMEOUT, async {
        if let Ok(text) = OutboundMessage::error(reason.as_str()).to_text()
            && socket.send(Message::Text(text.into())).await.is_err()
        {
            return;
        }

        let _ = socket
            .send(Message::Close(Some(CloseFrame {
                code: close_code::POLICY,
                reason: reason.as_str().into(),
            })))
            .await;
    })
    .await;
}
