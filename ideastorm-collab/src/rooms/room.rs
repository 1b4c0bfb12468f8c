use log::info;
use parking_lot::Mutex;

use crate::{
    ideas::{ChatMessage, Comment, Idea, IdeaId},
    protocol::ServerMessage,
};

use super::{ConnectionId, RoomConnection, RoomError};

/// A named collaboration session with its own participant set and idea list.
///
/// Every mutation and the broadcast it causes happen under the same lock,
/// so all participants observe broadcasts in mutation order.
pub struct Room {
    code: String,
    state: Mutex<RoomState>,
}

#[derive(Default)]
struct RoomState {
    /// Set when the eviction timer claimed the room for destruction.
    /// A closed room never accepts another participant.
    closed: bool,
    participants: Vec<RoomConnection>,
    ideas: Vec<Idea>,
}

impl Room {
    pub fn new(code: &str) -> Self {
        Self {
            code: code.to_string(),
            state: Default::default(),
        }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    /// Adds a participant, sending them the full idea snapshot before
    /// anyone (including them) sees the membership broadcast.
    ///
    /// Returns false without side effects when the room has already been
    /// claimed for destruction, the caller must look the code up again.
    pub fn join(&self, connection: RoomConnection) -> bool {
        let mut state = self.state.lock();

        if state.closed {
            return false;
        }

        state.participants.retain(|p| p.id != connection.id);

        connection.send(&ServerMessage::IdeasUpdate {
            ideas: state.ideas.clone(),
        });

        state.participants.push(connection);

        info!(
            "Client joined room {} ({} participants)",
            self.code,
            state.participants.len()
        );

        broadcast(
            &state,
            &ServerMessage::RoomUpdate {
                participants: state.participants.len(),
            },
        );

        true
    }

    /// Removes a participant and notifies the remaining members.
    /// Returns true if the room is now empty.
    pub fn leave(&self, id: ConnectionId) -> bool {
        let mut state = self.state.lock();

        state.participants.retain(|p| p.id != id);

        info!(
            "Client left room {} ({} participants remaining)",
            self.code,
            state.participants.len()
        );

        broadcast(
            &state,
            &ServerMessage::RoomUpdate {
                participants: state.participants.len(),
            },
        );

        state.participants.is_empty()
    }

    /// Stores a finished idea and broadcasts it to the room.
    pub fn append_idea(&self, idea: Idea) -> Idea {
        let state = &mut *self.state.lock();

        state.ideas.push(idea.clone());

        broadcast(state, &ServerMessage::IdeaUpdate { idea: idea.clone() });

        idea
    }

    /// Appends a comment to an idea in this room, broadcasting the full
    /// updated idea on success. Idea ids are never searched across rooms.
    pub fn add_comment(
        &self,
        idea_id: IdeaId,
        text: String,
        author: Option<String>,
    ) -> Result<Idea, RoomError> {
        let state = &mut *self.state.lock();

        let idea = state
            .ideas
            .iter_mut()
            .find(|i| i.id == idea_id)
            .ok_or(RoomError::IdeaNotFound)?;

        idea.comments.push(Comment::new(text, author));
        let updated = idea.clone();

        broadcast(
            state,
            &ServerMessage::IdeaUpdate {
                idea: updated.clone(),
            },
        );

        Ok(updated)
    }

    /// Relays a chat message to every participant, the sender included.
    /// Clients never locally echo, so the sender displays it exactly once.
    pub fn relay_chat(&self, message: ChatMessage) {
        let state = self.state.lock();

        broadcast(&state, &ServerMessage::ChatMessage(message));
    }

    pub fn participant_count(&self) -> usize {
        self.state.lock().participants.len()
    }

    pub fn idea_count(&self) -> usize {
        self.state.lock().ideas.len()
    }

    /// Claims an empty room for destruction. Emptiness and the claim
    /// happen under the same lock, so a join racing the eviction timer
    /// either lands first and keeps the room, or observes the claim.
    pub fn close_if_empty(&self) -> bool {
        let mut state = self.state.lock();

        if state.participants.is_empty() {
            state.closed = true;
        }

        state.closed
    }
}

/// Fans a message out to every open connection in the room. Connections
/// that are not open are skipped, removal happens on the transport's own
/// close path. One dead connection never aborts delivery to the rest.
fn broadcast(state: &RoomState, message: &ServerMessage) {
    let text = serde_json::to_string(message).expect("serializes properly");

    for participant in state.participants.iter().filter(|p| p.is_open()) {
        participant.send_raw(text.clone());
    }
}
