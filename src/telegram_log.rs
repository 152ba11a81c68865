use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

use crate::gateway::{chunk_escaped, Gateway, MESSAGE_LIMIT};

/// Flush period for batched INFO lines.
const FLUSH_INTERVAL: Duration = Duration::from_secs(5);
/// Buffered INFO lines that force an early flush.
const MAX_BUFFERED: usize = 50;

/// Log message with priority.
enum LogMessage {
    /// High priority (WARN/ERROR) - send immediately
    Urgent(String),
    /// Low priority (INFO) - batch and send periodically
    Info(String),
}

/// Mirrors this crate's INFO and above into a chat.
pub struct ChatLogLayer {
    tx: mpsc::UnboundedSender<LogMessage>,
}

impl ChatLogLayer {
    /// Spawns the sender task; call from inside the runtime.
    pub fn new(gateway: Arc<dyn Gateway>, chat_id: i64) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<LogMessage>();

        tokio::spawn(async move {
            let mut info_buffer: Vec<String> = Vec::new();
            let mut interval = tokio::time::interval(FLUSH_INTERVAL);

            loop {
                tokio::select! {
                    msg = rx.recv() => {
                        match msg {
                            Some(LogMessage::Urgent(text)) => {
                                send_log(gateway.as_ref(), chat_id, &text).await;
                            }
                            Some(LogMessage::Info(text)) => {
                                info_buffer.push(text);
                                if info_buffer.len() >= MAX_BUFFERED {
                                    flush_buffer(gateway.as_ref(), chat_id, &mut info_buffer).await;
                                }
                            }
                            None => break,
                        }
                    }
                    _ = interval.tick() => {
                        if !info_buffer.is_empty() {
                            flush_buffer(gateway.as_ref(), chat_id, &mut info_buffer).await;
                        }
                    }
                }
            }
        });

        Self { tx }
    }
}

/// Own events only, never the gateway's.
fn forwards(target: &str) -> bool {
    target.starts_with("gatekeeper") && !target.starts_with("gatekeeper::gateway")
}

async fn send_log(gateway: &dyn Gateway, chat_id: i64, text: &str) {
    for chunk in chunk_escaped(text, MESSAGE_LIMIT) {
        if let Err(e) = gateway.send_to_channel(chat_id, &chunk).await {
            eprintln!("Failed to send log to chat {chat_id}: {e}");
            return;
        }
    }
}

async fn flush_buffer(gateway: &dyn Gateway, chat_id: i64, buffer: &mut Vec<String>) {
    if buffer.is_empty() {
        return;
    }
    let combined = buffer.join("\n");
    buffer.clear();
    send_log(gateway, chat_id, &combined).await;
}

struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else if self.message.is_empty() {
            self.message = format!("{} = {:?}", field.name(), value);
        } else {
            self.message
                .push_str(&format!(", {} = {:?}", field.name(), value));
        }
    }
}

impl<S: Subscriber> Layer<S> for ChatLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let level = *metadata.level();

        if level > Level::INFO || !forwards(metadata.target()) {
            return;
        }

        let mut visitor = MessageVisitor {
            message: String::new(),
        };
        event.record(&mut visitor);

        let msg = match level {
            Level::ERROR => LogMessage::Urgent(format!("❌ {}", visitor.message)),
            Level::WARN => LogMessage::Urgent(format!("⚠️ {}", visitor.message)),
            _ => LogMessage::Info(visitor.message),
        };

        if self.tx.send(msg).is_err() {
            eprintln!("Log channel closed, message dropped");
        }
    }
}
