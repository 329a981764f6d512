use std::sync::Arc;

use tokio::sync::broadcast;

use strand_core::events::AgentEvent;

use crate::client::ClientRegistry;

/// Subscribes to the engine's AgentEvent broadcast and forwards events to
/// WebSocket clients watching the originating thread.
pub struct EventBridge {
    registry: Arc<ClientRegistry>,
}

impl EventBridge {
    pub fn new(registry: Arc<ClientRegistry>) -> Self {
        Self { registry }
    }

    /// Start the bridge task.
    pub fn start(&self, mut rx: broadcast::Receiver<AgentEvent>) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(&self.registry);

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let thread_id = event.thread_id().clone();
                        if let Some(json) = serialize_event(&event) {
                            registry.broadcast_to_thread(&thread_id, &json);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "event bridge lagged, dropped events");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::info!("event bridge channel closed");
                        break;
                    }
                }
            }
        })
    }
}

/// Create an event bridge wired to a broadcast channel.
pub fn create_bridge(
    registry: Arc<ClientRegistry>,
    rx: broadcast::Receiver<AgentEvent>,
) -> tokio::task::JoinHandle<()> {
    EventBridge::new(registry).start(rx)
}

/// Serialize an agent event to its wire form.
pub fn serialize_event(event: &AgentEvent) -> Option<String> {
    serde_json::to_string(event).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use strand_core::events::AgentState;
    use strand_core::ids::ThreadId;

    #[test]
    fn serialize_state_change() {
        let event = AgentEvent::StateChange {
            thread_id: ThreadId::new(),
            from: AgentState::Idle,
            to: AgentState::Thinking,
        };
        let json = serialize_event(&event).unwrap();
        assert!(json.contains("\"type\":\"state_change\""));
        assert!(json.contains("\"to\":\"thinking\""));
    }

    #[test]
    fn serialize_token_event() {
        let event = AgentEvent::Token {
            thread_id: ThreadId::new(),
            token: "hel".into(),
        };
        let json = serialize_event(&event).unwrap();
        assert!(json.contains("\"type\":\"token\""));
        assert!(json.contains("hel"));
    }

    #[tokio::test]
    async fn bridge_forwards_to_thread_clients() {
        let registry = Arc::new(ClientRegistry::new(32));
        let (tx, rx) = broadcast::channel(100);

        let (client_id, mut client_rx) = registry.register();
        let thread_id = ThreadId::new();
        registry.set_thread(&client_id, thread_id.clone()).await;

        let handle = create_bridge(Arc::clone(&registry), rx);

        tx.send(AgentEvent::ConversationComplete {
            thread_id: thread_id.clone(),
        })
        .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let msg = client_rx.try_recv().unwrap();
        assert!(msg.contains("conversation_complete"));

        handle.abort();
    }

    #[tokio::test]
    async fn bridge_ignores_unrelated_threads() {
        let registry = Arc::new(ClientRegistry::new(32));
        let (tx, rx) = broadcast::channel(100);

        let (client_id, mut client_rx) = registry.register();
        registry.set_thread(&client_id, ThreadId::new()).await;

        let _handle = create_bridge(Arc::clone(&registry), rx);

        tx.send(AgentEvent::ConversationComplete {
            thread_id: ThreadId::new(),
        })
        .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(client_rx.try_recv().is_err());
    }
}
