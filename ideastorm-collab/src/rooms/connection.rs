use tokio::sync::mpsc;

use crate::{protocol::ServerMessage, util::Id};

pub type ConnectionId = Id<RoomConnection>;

/// A participant's live duplex connection, addressed by the outbound
/// half only. The transport read loop lives in the server crate.
#[derive(Debug, Clone)]
pub struct RoomConnection {
    pub id: ConnectionId,
    sender: mpsc::UnboundedSender<String>,
}

impl RoomConnection {
    pub fn new(sender: mpsc::UnboundedSender<String>) -> Self {
        Self {
            id: ConnectionId::new(),
            sender,
        }
    }

    /// Whether the transport is still accepting outbound frames.
    pub fn is_open(&self) -> bool {
        !self.sender.is_closed()
    }

    /// Unicast a message to this connection. Delivery is best-effort,
    /// a closed transport is not an error.
    pub fn send(&self, message: &ServerMessage) {
        let text = serde_json::to_string(message).expect("serializes properly");
        self.send_raw(text)
    }

    /// Sends an already-serialized frame, used by broadcasts so the
    /// payload is serialized once per room rather than per connection.
    pub fn send_raw(&self, text: String) {
        self.sender.send(text).ok();
    }
}
