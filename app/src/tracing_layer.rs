use chrono::Utc;
use events::{EngineEvent, LogMessage};
use tokio::sync::broadcast;
use tracing::{Event, Subscriber};
use tracing_subscriber::Layer;

/// Mirrors every log line onto the engine's event channel so external
/// observers see the same narrative as the terminal.
pub struct EventBroadcastLayer {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBroadcastLayer {
    pub fn new(tx: broadcast::Sender<EngineEvent>) -> Self {
        Self { tx }
    }
}

impl<S> Layer<S> for EventBroadcastLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let mut visitor = LogMessageVisitor::new();
        event.record(&mut visitor);
        let log_message = LogMessage {
            timestamp: Utc::now(),
            level: event.metadata().level().to_string(),
            message: visitor.message,
        };
        // No subscribers is fine; delivery is best effort.
        let _ = self.tx.send(EngineEvent::Log(log_message));
    }
}

/// Captures the `message` field of a log event.
struct LogMessageVisitor {
    message: String,
}

impl LogMessageVisitor {
    fn new() -> Self {
        Self {
            message: String::new(),
        }
    }
}

impl tracing::field::Visit for LogMessageVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        }
    }
}
