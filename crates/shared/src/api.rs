use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{Link, Topic, TopicStatus, Vote};

/// Error code returned when a user has spent their whole vote budget
pub const VOTE_LIMIT_REACHED: &str = "vote_limit_reached";
pub const VOTE_LIMIT_MESSAGE: &str = "You have used all of your votes for this session.";

/// How a session is identified: by record id or by its short join code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionLookup {
    Id(String),
    Code(String),
}

impl SessionLookup {
    /// Lookup by join code, normalised the way codes are stored
    pub fn code(raw: &str) -> Self {
        SessionLookup::Code(normalise_code(raw))
    }
}

/// Join codes are case-insensitive: trimmed and stored upper case
pub fn normalise_code(raw: &str) -> String {
    raw.trim().to_uppercase()
}

// ============================================================================
// Request bodies
// ============================================================================

/// Writable board fields. Used both for inline creation and partial updates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vote_limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accent_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub announcement: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub board_id: Option<Link>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facilitator_id: Option<Link>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<String>,
}

/// POST /sessions
///
/// When `board_id` is absent and `board` is given, the board is created first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub board: Option<BoardInput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub board_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionInput>,
}

/// Topic fields for creation (POST /topics) and partial updates (PATCH /topics/:id)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Link>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub board_id: Option<Link>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TopicStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_id: Option<Link>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vote_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<i64>,
}

impl TopicInput {
    pub fn status(status: TopicStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn notes(notes: impl Into<String>) -> Self {
        Self {
            notes: Some(notes.into()),
            ..Default::default()
        }
    }

    /// Overlay the provided fields onto an existing topic
    pub fn apply_to(&self, topic: &mut Topic) {
        if let Some(session_id) = &self.session_id {
            topic.session_id = Some(session_id.clone());
        }
        if let Some(board_id) = &self.board_id {
            topic.board_id = Some(board_id.clone());
        }
        if let Some(title) = &self.title {
            topic.title = Some(title.clone());
        }
        if let Some(description) = &self.description {
            topic.description = Some(description.clone());
        }
        if let Some(status) = self.status {
            topic.status = Some(status);
        }
        if let Some(notes) = &self.notes {
            topic.notes = Some(notes.clone());
        }
        if let Some(author_id) = &self.author_id {
            topic.author_id = Some(author_id.clone());
        }
        if let Some(vote_count) = self.vote_count {
            topic.vote_count = Some(vote_count);
        }
        if let Some(order) = self.order {
            topic.order = Some(order);
        }
    }
}

/// POST /votes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<u32>,
}

/// POST /comments
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Link>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic_id: Option<Link>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Link>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

/// POST /users
///
/// `session_id` is a convenience that gets folded into `session_ids`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_ids: Option<Link>,
}

// ============================================================================
// Response bodies
// ============================================================================

/// Result of a successful cast. `remaining_votes` is `null` when unbounded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CastVoteResponse {
    pub vote: Vote,
    #[serde(default)]
    pub remaining_votes: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetractVoteResponse {
    pub id: String,
    pub vote: Vote,
    #[serde(default)]
    pub remaining_votes: Option<u32>,
}

/// Uniform error envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: None,
            details: None,
        }
    }

    pub fn vote_limit_reached() -> Self {
        Self {
            error: VOTE_LIMIT_REACHED.to_string(),
            message: Some(VOTE_LIMIT_MESSAGE.to_string()),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_topic_input_skips_absent_fields() {
        let input = TopicInput::status(TopicStatus::Done);
        assert_eq!(serde_json::to_value(&input).unwrap(), json!({ "status": "done" }));
    }

    #[test]
    fn test_topic_input_apply_to() {
        let mut topic = Topic {
            id: "recT".into(),
            title: Some("Old".into()),
            status: Some(TopicStatus::Todo),
            ..Default::default()
        };
        TopicInput {
            status: Some(TopicStatus::Doing),
            notes: Some("agreed".into()),
            ..Default::default()
        }
        .apply_to(&mut topic);
        assert_eq!(topic.title.as_deref(), Some("Old"));
        assert_eq!(topic.status, Some(TopicStatus::Doing));
        assert_eq!(topic.notes.as_deref(), Some("agreed"));
    }

    #[test]
    fn test_create_session_request_deserialization() {
        let json = r#"{"board":{"name":"Retro","voteLimit":3},"session":{"name":"Week 12"}}"#;
        let req: CreateSessionRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.board.unwrap().vote_limit, Some(3));
        assert!(req.board_id.is_none());
        assert_eq!(req.session.unwrap().name.as_deref(), Some("Week 12"));
    }

    #[test]
    fn test_cast_vote_response_unbounded_is_null() {
        let response = CastVoteResponse {
            vote: Vote { id: "recV".into(), ..Default::default() },
            remaining_votes: None,
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["remainingVotes"], Value::Null);
        assert_eq!(json["vote"]["id"], "recV");
    }

    #[test]
    fn test_session_lookup_serialization() {
        let lookup = SessionLookup::Code("ABC123".into());
        assert_eq!(serde_json::to_value(&lookup).unwrap(), json!({ "code": "ABC123" }));
    }

    #[test]
    fn test_session_codes_are_normalised() {
        assert_eq!(normalise_code("  ab12cd "), "AB12CD");
        assert_eq!(SessionLookup::code("team42"), SessionLookup::Code("TEAM42".into()));
    }

    #[test]
    fn test_vote_limit_error_body() {
        let json = serde_json::to_value(ErrorBody::vote_limit_reached()).unwrap();
        assert_eq!(json["error"], VOTE_LIMIT_REACHED);
        assert_eq!(json["message"], VOTE_LIMIT_MESSAGE);
        assert!(json.get("details").is_none());
    }
}
