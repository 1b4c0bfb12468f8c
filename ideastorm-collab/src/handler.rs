use std::sync::Arc;

use log::{info, warn};
use thiserror::Error;

use crate::{
    analysis::AnalysisError,
    ideas::{ChatMessage, Idea, IdeaId},
    protocol::{ClientMessage, ServerMessage},
    rooms::{RoomConnection, RoomError},
    Collab,
};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Not in a room")]
    NotInRoom,
    #[error("Empty transcription")]
    EmptyTranscription,
    #[error("Empty comment")]
    EmptyComment,
    #[error("Empty chat message")]
    EmptyChatMessage,
    #[error("Idea not found")]
    IdeaNotFound,
    #[error("Failed to process idea with AI")]
    Analysis(#[source] AnalysisError),
    #[error("Failed to process message")]
    MalformedEnvelope(#[from] serde_json::Error),
}

impl From<RoomError> for SessionError {
    fn from(value: RoomError) -> Self {
        match value {
            RoomError::IdeaNotFound => Self::IdeaNotFound,
        }
    }
}

/// The protocol state machine for one connection.
///
/// A session starts unjoined, becomes joined through `join_room`, and
/// ends when the transport closes, which must call [Session::close].
pub struct Session {
    collab: Arc<Collab>,
    connection: RoomConnection,
}

impl Session {
    pub fn new(collab: Arc<Collab>, connection: RoomConnection) -> Self {
        Self { collab, connection }
    }

    pub fn connection(&self) -> &RoomConnection {
        &self.connection
    }

    /// Decodes and dispatches one inbound frame. All per-operation errors
    /// end here as a unicast `error` envelope, never as a disconnect.
    pub async fn handle(&self, raw: &str) {
        let result = match serde_json::from_str::<ClientMessage>(raw) {
            Ok(message) => self.dispatch(message),
            Err(err) => Err(SessionError::from(err)),
        };

        if let Err(error) = result {
            warn!("Error processing message: {}", error);

            self.connection.send(&ServerMessage::Error {
                message: error.to_string(),
            });
        }
    }

    /// Tears the session down. Used by graceful close, transport error,
    /// and heartbeat timeout alike.
    pub fn close(&self) {
        self.collab.rooms.detach(self.connection.id);
    }

    fn dispatch(&self, message: ClientMessage) -> Result<(), SessionError> {
        match message {
            ClientMessage::JoinRoom { room_code } => self.join_room(&room_code),
            ClientMessage::SendTranscription { transcription } => {
                self.send_transcription(transcription)
            }
            ClientMessage::AddComment {
                idea_id,
                comment,
                author,
            } => self.add_comment(idea_id, comment, author),
            ClientMessage::ChatMessage {
                message, sender, ..
            } => self.chat_message(message, sender),
        }
    }

    fn join_room(&self, room_code: &str) -> Result<(), SessionError> {
        self.collab.rooms.attach(&self.connection, room_code);
        Ok(())
    }

    fn send_transcription(&self, transcription: String) -> Result<(), SessionError> {
        // Capture the room up front: a disconnect while the analysis is
        // pending must not roll the idea back, the remaining participants
        // still receive it.
        let room = self
            .collab
            .rooms
            .room_for(self.connection.id)
            .ok_or(SessionError::NotInRoom)?;

        if transcription.trim().is_empty() {
            return Err(SessionError::EmptyTranscription);
        }

        info!("Transcription received: {}", transcription);

        // The analysis runs on its own task, so the connection keeps
        // pumping chat, broadcasts, and heartbeats while it is pending.
        let analyzer = self.collab.analyzer.clone();
        let connection = self.connection.clone();

        tokio::spawn(async move {
            match analyzer.analyze(&transcription).await {
                Ok(analysis) => {
                    room.append_idea(Idea::new(transcription, analysis));
                }
                Err(err) => {
                    let error = SessionError::Analysis(err);
                    warn!("Error processing message: {}", error);

                    connection.send(&ServerMessage::Error {
                        message: error.to_string(),
                    });
                }
            }
        });

        Ok(())
    }

    fn add_comment(
        &self,
        idea_id: IdeaId,
        comment: String,
        author: Option<String>,
    ) -> Result<(), SessionError> {
        let room = self
            .collab
            .rooms
            .room_for(self.connection.id)
            .ok_or(SessionError::NotInRoom)?;

        if comment.trim().is_empty() {
            return Err(SessionError::EmptyComment);
        }

        room.add_comment(idea_id, comment, author)?;

        Ok(())
    }

    fn chat_message(&self, message: String, sender: Option<String>) -> Result<(), SessionError> {
        let room = self
            .collab
            .rooms
            .room_for(self.connection.id)
            .ok_or(SessionError::NotInRoom)?;

        if message.trim().is_empty() {
            return Err(SessionError::EmptyChatMessage);
        }

        room.relay_chat(ChatMessage::new(message, sender));

        Ok(())
    }
}
