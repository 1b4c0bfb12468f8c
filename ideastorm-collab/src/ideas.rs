use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::{analysis::Analysis, util::Id};

pub type IdeaId = Id<Idea>;
pub type CommentId = Id<Comment>;
pub type ChatMessageId = Id<ChatMessage>;

/// The display name used when a participant does not identify themselves.
pub const ANONYMOUS: &str = "Anonymous";

/// A stored unit of brainstorming input, plus the themes and prompts
/// the analyzer derived from it.
///
/// An idea belongs to exactly one room for its lifetime and is never
/// deleted. Everything except `comments` is immutable after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Idea {
    pub id: IdeaId,
    pub transcription: String,
    pub themes: Vec<String>,
    /// Markdown-bearing follow-up prompts.
    pub prompts: Vec<String>,
    pub comments: Vec<Comment>,
    /// Unix epoch milliseconds.
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: CommentId,
    pub text: String,
    pub author: String,
    pub timestamp: i64,
}

/// A transient chat payload. Never stored in a room, only relayed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: ChatMessageId,
    pub text: String,
    pub sender: String,
    pub timestamp: i64,
}

impl Idea {
    pub fn new(transcription: String, analysis: Analysis) -> Self {
        Self {
            id: IdeaId::new(),
            transcription,
            themes: analysis.themes,
            prompts: analysis.prompts,
            comments: vec![],
            timestamp: now_millis(),
        }
    }
}

impl Comment {
    pub fn new(text: String, author: Option<String>) -> Self {
        Self {
            id: CommentId::new(),
            text,
            author: author.unwrap_or_else(|| ANONYMOUS.to_string()),
            timestamp: now_millis(),
        }
    }
}

impl ChatMessage {
    pub fn new(text: String, sender: Option<String>) -> Self {
        Self {
            id: ChatMessageId::new(),
            text,
            sender: sender.unwrap_or_else(|| ANONYMOUS.to_string()),
            timestamp: now_millis(),
        }
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_comment_author_defaults_to_anonymous() {
        let comment = Comment::new("interesting".to_string(), None);
        assert_eq!(comment.author, ANONYMOUS);

        let named = Comment::new("interesting".to_string(), Some("Ada".to_string()));
        assert_eq!(named.author, "Ada");
    }

    #[test]
    fn test_idea_starts_without_comments() {
        let idea = Idea::new(
            "solar backpack".to_string(),
            Analysis {
                themes: vec!["Solar".to_string()],
                prompts: vec!["How?".to_string()],
            },
        );

        assert!(idea.comments.is_empty());
        assert_eq!(idea.transcription, "solar backpack");
    }
}
