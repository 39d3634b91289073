use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Per-agent broadcast of committed events, behind `LISTEN agent_<id>`.
/// Delivery is best effort: slow listeners lag and lose old events.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    pub fn subscribe(&self, agent_id: Ulid) -> broadcast::Receiver<Event> {
        self.channels
            .entry(agent_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// No-op when nobody listens.
    pub fn send(&self, agent_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&agent_id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Drop the channel once its last listener is gone.
    pub fn prune(&self, agent_id: &Ulid) {
        self.channels.remove_if(agent_id, |_, sender| sender.receiver_count() == 0);
    }
}

/// Channel name used on the wire for an agent.
pub fn channel_name(agent_id: Ulid) -> String {
    format!("agent_{agent_id}")
}

/// Inverse of [`channel_name`]. Case-insensitive, since unquoted SQL
/// identifiers may arrive folded to lower case.
pub fn parse_channel(channel: &str) -> Option<Ulid> {
    let rest = channel.strip_prefix("agent_").or_else(|| channel.strip_prefix("AGENT_"))?;
    Ulid::from_string(&rest.to_ascii_uppercase()).ok()
}

/// JSON payload sent with a notification.
pub fn payload(event: &Event) -> String {
    serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string())
}
