use crate::{
    message::OutboundMessage,
    metrics::RelayMetrics,
    models::change_event::ChangeEvent,
    registry::connection_registry::ConnectionRegistry,
};
use log::{info, trace, warn};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};

pub const SLOW_CONSUMER_REASON: &str = "slow consumer";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    pub matched: usize,
    pub delivered: usize,
    pub dropped: usize,
    pub evicted: usize,
}

/// Fans change events out to the outbound queues of matching connections.
///
/// Enqueueing never waits: a full queue counts as an overflow, and a connection whose
/// overflows add up to `overflow_threshold` is drained and closed. The count is never
/// reset, so a consumer that only keeps up part of the time is still evicted.
pub struct Dispatcher {
    registry: Arc<ConnectionRegistry>,
    metrics: Arc<RelayMetrics>,
    overflow_threshold: u32,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        metrics: Arc<RelayMetrics>,
        overflow_threshold: u32,
    ) -> Self {
        Dispatcher {
            registry,
            metrics,
            overflow_threshold,
        }
    }

    pub fn dispatch(&self, event: &ChangeEvent) -> DispatchReport {
        let subscribers = self.registry.lookup(&event.workspace_id, &event.channel);
        let mut report = DispatchReport {
            matched: subscribers.len(),
            ..Default::default()
        };

        if subscribers.is_empty() {
            return report;
        }

        let channel: Arc<str> = Arc::from(event.channel.as_str());
        for subscriber in subscribers {
            let message = OutboundMessage::Event {
                channel: channel.clone(),
                payload: event.payload.clone(),
            };

            match subscriber.try_enqueue(message) {
                Ok(()) => report.delivered += 1,

                Err(TrySendError::Full(_)) => {
                    report.dropped += 1;
                    if subscriber.record_overflow() >= self.overflow_threshold
                        && self.registry.drain(&subscriber)
                    {
                        warn!(
                            "Evicting connection {} ({}): dropped {} events",
                            subscriber.id(),
                            subscriber.principal().subject,
                            subscriber.overflow_count()
                        );
                        subscriber.close(Some(SLOW_CONSUMER_REASON));
                        report.evicted += 1;
                    }
                }

                Err(TrySendError::Closed(_)) => {
                    trace!("Skipping closed connection {}", subscriber.id());
                }
            }
        }

        RelayMetrics::add(&self.metrics.events_delivered, report.delivered as u64);
        RelayMetrics::add(&self.metrics.events_dropped, report.dropped as u64);
        RelayMetrics::add(&self.metrics.evictions, report.evicted as u64);
        report
    }

    pub async fn run(self, mut events_rx: mpsc::Receiver<ChangeEvent>) {
        while let Some(event) = events_rx.recv().await {
            let report = self.dispatch(&event);
            trace!(
                "Dispatched {}/{}: {} matched, {} delivered, {} dropped, {} evicted",
                event.workspace_id,
                event.channel,
                report.matched,
                report.delivered,
                report.dropped,
                report.evicted
            );
        }

        info!("Dispatcher stopped: change listener is gone");
    }
}
