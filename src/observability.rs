//! `tracing` subscriber setup and a live log fan-out channel (C-ambient).
//!
//! Grounded on the teacher's `tracing.rs`: an env-filtered `fmt` subscriber
//! as the primary sink, plus a `Layer` that mirrors every event as JSON onto
//! a `broadcast` channel for live consumers. The teacher exposes that
//! channel over an SSE HTTP endpoint; this crate has no HTTP surface, so
//! [`LogChannel::subscribe`] hands back the raw `broadcast::Receiver` for
//! whatever CLI or embedding caller wants it (e.g. `sync --follow`).

use std::fmt;

use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tracing::field::{Field, Visit};
use tracing::Subscriber;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

const LOG_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct LogChannel(broadcast::Sender<String>);

impl LogChannel {
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.0.subscribe()
    }
}

struct JsonVisitor {
    fields: Map<String, Value>,
}

impl JsonVisitor {
    fn new() -> Self {
        Self { fields: Map::new() }
    }
}

impl Visit for JsonVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.fields.insert(field.name().to_string(), Value::String(format!("{value:?}")));
    }
}

struct BroadcastLayer {
    sender: broadcast::Sender<String>,
}

impl<S: Subscriber> Layer<S> for BroadcastLayer {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let metadata = event.metadata();
        let mut visitor = JsonVisitor::new();
        event.record(&mut visitor);
        let record = serde_json::json!({
            "timestamp": time::OffsetDateTime::now_utc().format(&time::format_description::well_known::Rfc3339).unwrap_or_default(),
            "level": metadata.level().to_string(),
            "target": metadata.target(),
            "fields": visitor.fields,
        });
        // No receivers is the common case outside interactive `--follow` runs; ignore.
        let _ = self.sender.send(record.to_string());
    }
}

/// Install the global subscriber: an env-filtered `fmt` layer (respects
/// `RUST_LOG`, falling back to `default_level`) plus the broadcast mirror.
/// Must be called once, before any other `tracing` use.
pub fn init_tracing(default_level: &str) -> LogChannel {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(true);
    let (sender, _) = broadcast::channel(LOG_CHANNEL_CAPACITY);
    let broadcast_layer = BroadcastLayer { sender: sender.clone() };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(broadcast_layer)
        .init();

    LogChannel(sender)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_channel_clones_share_the_same_sender() {
        let (sender, _rx) = broadcast::channel(4);
        let channel = LogChannel(sender);
        let channel2 = channel.clone();
        let mut rx = channel2.subscribe();
        channel.0.send("hello".to_string()).unwrap();
        assert_eq!(rx.try_recv().unwrap(), "hello");
    }
}
