use super::gateway::{CLOSE_TIMEOUT, GatewayState};
use crate::{
    dispatcher::SLOW_CONSUMER_REASON,
    message::{ClientMessage, OutboundMessage},
    models::principal::Principal,
    registry::{
        connection::{Connection, ConnectionHandle},
        connection_registry::ConnectionRegistry,
    },
};
use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use log::{debug, error, info, trace, warn};
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::mpsc,
    time::{Instant, MissedTickBehavior},
};

const IDLE_TIMEOUT_REASON: &str = "idle timeout";

pub(crate) async fn handle_connection(
    socket: WebSocket,
    principal: Principal,
    workspace_id: String,
    state: Arc<GatewayState>,
) {
    let (connection, outbound_rx) =
        Connection::new(principal, workspace_id, state.queue_capacity, &state.shutdown);
    let handle = state.registry.register(connection);

    info!(
        "Connection {} opened for {} in workspace {}",
        handle.id(),
        handle.principal().subject,
        handle.workspace_id()
    );

    if handle.try_enqueue(OutboundMessage::Connected).is_err() {
        error!("Could not queue greeting for connection {}", handle.id());
    }

    let (sink, stream) = socket.split();
    let writer = tokio::spawn(write_loop(sink, outbound_rx, handle.clone(), state.ping_interval));

    read_loop(stream, &handle, &state.registry, state.idle_timeout).await;

    handle.close(None);
    if let Err(error) = writer.await {
        error!("Writer for connection {} failed: {error}", handle.id());
    }

    if state.registry.unregister(&handle) {
        info!("Connection {} closed", handle.id());
    }
}

/// Returns once the peer goes away, the connection is closed, or nothing (not even a
/// pong) has arrived for `idle_timeout`.
async fn read_loop(
    mut stream: SplitStream<WebSocket>,
    handle: &ConnectionHandle,
    registry: &ConnectionRegistry,
    idle_timeout: Duration,
) {
    let mut last_seen = Instant::now();

    loop {
        let frame = tokio::select! {
            _ = handle.closed() => return,
            _ = tokio::time::sleep_until(last_seen + idle_timeout) => {
                info!("Connection {} idle for {idle_timeout:?}, closing", handle.id());
                handle.close(Some(IDLE_TIMEOUT_REASON));
                return;
            }
            frame = stream.next() => frame,
        };
        last_seen = Instant::now();

        match frame {
            Some(Ok(Message::Text(text))) => handle_client_frame(text.as_str(), handle, registry),
            Some(Ok(Message::Binary(_))) => {
                warn!("Ignoring binary frame from connection {}", handle.id())
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => (),
            Some(Ok(Message::Close(_))) | None => return,
            Some(Err(error)) => {
                debug!("Connection {} read failed: {error}", handle.id());
                return;
            }
        }
    }
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound_rx: mpsc::Receiver<OutboundMessage>,
    handle: ConnectionHandle,
    ping_interval: Duration,
) {
    let mut ping = tokio::time::interval_at(Instant::now() + ping_interval, ping_interval);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let frame = tokio::select! {
            biased;
            _ = handle.closed() => break,
            message = outbound_rx.recv() => match message {
                Some(message) => match message.to_text() {
                    Ok(text) => Message::Text(text.into()),
                    Err(error) => {
                        error!("Could not encode frame for connection {}: {error}", handle.id());
                        continue;
                    }
                },
                None => break,
            },
            _ = ping.tick() => Message::Ping(Default::default()),
        };

        let sent = tokio::select! {
            _ = handle.closed() => break,
            sent = sink.send(frame) => sent,
        };

        if let Err(error) = sent {
            debug!("Connection {} write failed: {error}", handle.id());
            handle.close(None);
            return;
        }
    }

    let reason = handle.close_reason();
    let code = match reason.as_deref() {
        Some(SLOW_CONSUMER_REASON) => close_code::POLICY,
        Some(_) => close_code::AWAY,
        None => close_code::NORMAL,
    };

    let _ = tokio::time::timeout(CLOSE_TIMEOUT, async {
        if let Some(reason) = &reason
            && let Ok(text) = OutboundMessage::error(reason.as_str()).to_text()
            && sink.send(Message::Text(text.into())).await.is_err()
        {
            return;
        }

        let _ = sink
            .send(Message::Close(Some(CloseFrame {
                code,
                reason: reason.as_deref().unwrap_or_default().into(),
            })))
            .await;
    })
    .await;
}

fn handle_client_frame(text: &str, handle: &ConnectionHandle, registry: &ConnectionRegistry) {
    let message = match serde_json::from_str::<ClientMessage>(text) {
        Ok(message) => message,
        Err(error) => {
            warn!("Ignoring unrecognised frame from connection {}: {error}", handle.id());
            return;
        }
    };

    match message {
        ClientMessage::Subscribe { channel } | ClientMessage::Unsubscribe { channel }
            if channel.is_empty() =>
        {
            warn!("Ignoring frame with empty channel from connection {}", handle.id())
        }

        ClientMessage::Subscribe { channel } => {
            if registry.subscribe(handle, &channel) {
                trace!("Connection {} now receives {channel}", handle.id());
            }
        }

        ClientMessage::Unsubscribe { channel } => {
            registry.unsubscribe(handle, &channel);
        }
    }
}
