use serde::{Deserialize, Serialize};

use crate::ideas::{ChatMessage, Idea, IdeaId};

/// An inbound envelope, decoded from a JSON text frame.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Join a room, creating it if it does not exist yet.
    JoinRoom { room_code: String },
    /// Submit a finished transcript for analysis.
    SendTranscription { transcription: String },
    /// Comment on an existing idea.
    AddComment {
        idea_id: IdeaId,
        comment: String,
        #[serde(default)]
        author: Option<String>,
    },
    /// Send a chat message to the room.
    ///
    /// The room code is carried for protocol parity, but the handler
    /// always relays to the room the connection is actually joined to.
    ChatMessage {
        #[serde(default)]
        room_code: Option<String>,
        message: String,
        #[serde(default)]
        sender: Option<String>,
    },
}

/// An outbound envelope, serialized once per broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Full snapshot of a room's ideas, sent once on join.
    IdeasUpdate { ideas: Vec<Idea> },
    /// One new or modified idea.
    IdeaUpdate { idea: Idea },
    /// The room's participant count changed.
    RoomUpdate { participants: usize },
    /// A relayed chat message.
    ChatMessage(ChatMessage),
    /// A requester-scoped error notice.
    Error { message: String },
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_inbound_envelopes_decode() {
        let join: ClientMessage =
            serde_json::from_str(r#"{"type":"join_room","room_code":"ABC123"}"#).unwrap();
        assert!(matches!(join, ClientMessage::JoinRoom { room_code } if room_code == "ABC123"));

        let comment: ClientMessage =
            serde_json::from_str(r#"{"type":"add_comment","idea_id":7,"comment":"nice"}"#).unwrap();
        assert!(
            matches!(comment, ClientMessage::AddComment { author, .. } if author.is_none()),
            "author should be optional"
        );

        let chat: ClientMessage =
            serde_json::from_str(r#"{"type":"chat_message","room_code":"XYZ999","message":"hi"}"#)
                .unwrap();
        assert!(matches!(chat, ClientMessage::ChatMessage { message, .. } if message == "hi"));
    }

    #[test]
    fn test_outbound_envelopes_are_tagged() {
        let json = serde_json::to_string(&ServerMessage::RoomUpdate { participants: 3 }).unwrap();
        assert_eq!(json, r#"{"type":"room_update","participants":3}"#);

        let error = serde_json::to_string(&ServerMessage::Error {
            message: "Not in a room".to_string(),
        })
        .unwrap();
        assert_eq!(error, r#"{"type":"error","message":"Not in a room"}"#);
    }

    #[test]
    fn test_chat_broadcast_is_flat() {
        let message = ChatMessage::new("hi".to_string(), Some("Ada".to_string()));
        let json =
            serde_json::to_value(ServerMessage::ChatMessage(message.clone())).unwrap();

        // Chat fields sit next to the tag, not nested under a key.
        assert_eq!(json["type"], "chat_message");
        assert_eq!(json["text"], "hi");
        assert_eq!(json["sender"], "Ada");
        assert_eq!(json["id"], message.id.value());
    }
}
