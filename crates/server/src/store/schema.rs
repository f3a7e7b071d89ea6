//! Mapping between domain types and the store's flat field maps.
//!
//! Field names for each table live in one place; everything else goes
//! through `ToFields` and `FromRecord`.

use serde_json::{Number, Value};
use shared::{
    BoardInput, Board, Comment, CommentInput, Link, Session, SessionInput, Topic, TopicInput,
    TopicStatus, User, UserInput, Vote, VoteInput,
};

use super::{Fields, Record};

pub mod board {
    pub const NAME: &str = "Name";
    pub const DESCRIPTION: &str = "Description";
    pub const VOTE_LIMIT: &str = "VoteLimit";
    pub const STATE: &str = "State";
    pub const THEME_MODE: &str = "ThemeMode";
    pub const ACCENT_COLOR: &str = "AccentColor";
    pub const ANNOUNCEMENT: &str = "Announcement";
}

pub mod session {
    pub const CODE: &str = "Code";
    pub const NAME: &str = "Name";
    pub const BOARD: &str = "Board";
    pub const FACILITATOR: &str = "Facilitator";
    pub const STATUS: &str = "Status";
    pub const STARTED_AT: &str = "StartedAt";
    pub const ENDED_AT: &str = "EndedAt";
}

pub mod topic {
    pub const SESSION: &str = "Session";
    pub const BOARD: &str = "Board";
    pub const TITLE: &str = "Title";
    pub const DESCRIPTION: &str = "Description";
    pub const STATUS: &str = "Status";
    pub const NOTES: &str = "Notes";
    pub const AUTHOR: &str = "Author";
    pub const VOTES: &str = "Votes";
    pub const ORDER: &str = "Order";
}

pub mod vote {
    pub const SESSION: &str = "Session";
    pub const TOPIC: &str = "Topic";
    pub const USER: &str = "User";
    pub const WEIGHT: &str = "Weight";
}

pub mod comment {
    pub const SESSION: &str = "Session";
    pub const TOPIC: &str = "Topic";
    pub const USER: &str = "User";
    pub const BODY: &str = "Body";
}

pub mod user {
    pub const NAME: &str = "Name";
    pub const EMAIL: &str = "Email";
    pub const AVATAR: &str = "Avatar";
    pub const ROLE: &str = "Role";
    pub const EXTERNAL_ID: &str = "ExternalId";
    pub const SESSIONS: &str = "Sessions";
}

/// Domain input to store fields. Absent values are left out.
pub trait ToFields {
    fn to_fields(&self) -> Fields;
}

/// Store record to domain entity. Never fails: unexpected values read as absent.
pub trait FromRecord: Sized {
    fn from_record(record: Record) -> Self;
}

// ============================================================================
// Writing
// ============================================================================

#[derive(Default)]
struct FieldWriter(Fields);

impl FieldWriter {
    fn text(mut self, key: &str, value: &Option<String>) -> Self {
        if let Some(value) = value {
            self.0.insert(key.to_string(), Value::String(value.clone()));
        }
        self
    }

    /// Links are always written as lists
    fn link(mut self, key: &str, value: &Option<Link>) -> Self {
        if let Some(link) = value {
            let ids = link.to_ids().into_iter().map(Value::String).collect();
            self.0.insert(key.to_string(), Value::Array(ids));
        }
        self
    }

    fn id(self, key: &str, value: &Option<String>) -> Self {
        let link = value.clone().map(Link::One);
        self.link(key, &link)
    }

    fn number(mut self, key: &str, value: Option<impl Into<Number>>) -> Self {
        if let Some(value) = value {
            self.0.insert(key.to_string(), Value::Number(value.into()));
        }
        self
    }

    fn finish(self) -> Fields {
        self.0
    }
}

impl ToFields for BoardInput {
    fn to_fields(&self) -> Fields {
        FieldWriter::default()
            .text(board::NAME, &self.name)
            .text(board::DESCRIPTION, &self.description)
            .number(board::VOTE_LIMIT, self.vote_limit)
            .text(board::STATE, &self.state)
            .text(board::THEME_MODE, &self.theme_mode)
            .text(board::ACCENT_COLOR, &self.accent_color)
            .text(board::ANNOUNCEMENT, &self.announcement)
            .finish()
    }
}

impl ToFields for SessionInput {
    fn to_fields(&self) -> Fields {
        FieldWriter::default()
            .text(session::CODE, &self.code)
            .text(session::NAME, &self.name)
            .link(session::BOARD, &self.board_id)
            .link(session::FACILITATOR, &self.facilitator_id)
            .text(session::STATUS, &self.status)
            .text(session::STARTED_AT, &self.started_at)
            .text(session::ENDED_AT, &self.ended_at)
            .finish()
    }
}

impl ToFields for TopicInput {
    fn to_fields(&self) -> Fields {
        let status = self.status.map(|status| status.as_str().to_string());
        FieldWriter::default()
            .link(topic::SESSION, &self.session_id)
            .link(topic::BOARD, &self.board_id)
            .text(topic::TITLE, &self.title)
            .text(topic::DESCRIPTION, &self.description)
            .text(topic::STATUS, &status)
            .text(topic::NOTES, &self.notes)
            .link(topic::AUTHOR, &self.author_id)
            .number(topic::VOTES, self.vote_count)
            .number(topic::ORDER, self.order)
            .finish()
    }
}

impl ToFields for VoteInput {
    fn to_fields(&self) -> Fields {
        FieldWriter::default()
            .id(vote::SESSION, &self.session_id)
            .id(vote::TOPIC, &self.topic_id)
            .id(vote::USER, &self.user_id)
            .number(vote::WEIGHT, self.weight)
            .finish()
    }
}

impl ToFields for CommentInput {
    fn to_fields(&self) -> Fields {
        FieldWriter::default()
            .link(comment::SESSION, &self.session_id)
            .link(comment::TOPIC, &self.topic_id)
            .link(comment::USER, &self.user_id)
            .text(comment::BODY, &self.body)
            .finish()
    }
}

impl ToFields for UserInput {
    /// `session_id` is folded into the `Sessions` link list
    fn to_fields(&self) -> Fields {
        let mut sessions = self.session_ids.as_ref().map(Link::to_ids).unwrap_or_default();
        if let Some(session_id) = &self.session_id {
            if !sessions.contains(session_id) {
                sessions.push(session_id.clone());
            }
        }
        let sessions = (!sessions.is_empty()).then(|| Link::Many(sessions));

        FieldWriter::default()
            .text(user::NAME, &self.name)
            .text(user::EMAIL, &self.email)
            .text(user::AVATAR, &self.avatar)
            .text(user::ROLE, &self.role)
            .text(user::EXTERNAL_ID, &self.external_id)
            .link(user::SESSIONS, &sessions)
            .finish()
    }
}

// ============================================================================
// Reading
// ============================================================================

fn text(fields: &Fields, key: &str) -> Option<String> {
    match fields.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// One-element lists collapse to a scalar; empty lists read as absent
fn link(fields: &Fields, key: &str) -> Option<Link> {
    match fields.get(key)? {
        Value::String(id) => Some(Link::One(id.clone())),
        Value::Array(items) => {
            let ids: Vec<String> = items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect();
            (!ids.is_empty()).then(|| Link::from_ids(ids))
        }
        _ => None,
    }
}

fn float(fields: &Fields, key: &str) -> Option<f64> {
    let value = match fields.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    value.filter(|value| value.is_finite())
}

/// Non-negative whole number; negatives clamp to zero
fn count(fields: &Fields, key: &str) -> Option<u32> {
    float(fields, key).map(|value| value.max(0.0).min(u32::MAX as f64).floor() as u32)
}

fn vote_count(fields: &Fields) -> Option<u32> {
    match fields.get(topic::VOTES)? {
        Value::Array(items) => Some(items.len() as u32),
        _ => count(fields, topic::VOTES),
    }
}

fn order(fields: &Fields) -> Option<i64> {
    match fields.get(topic::ORDER)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|value| value.round() as i64)),
        _ => None,
    }
}

fn status(fields: &Fields) -> Option<TopicStatus> {
    text(fields, topic::STATUS).and_then(|value| value.parse().ok())
}

impl FromRecord for Board {
    fn from_record(record: Record) -> Self {
        let f = &record.fields;
        Board {
            name: text(f, board::NAME),
            description: text(f, board::DESCRIPTION),
            vote_limit: count(f, board::VOTE_LIMIT),
            state: text(f, board::STATE),
            theme_mode: text(f, board::THEME_MODE),
            accent_color: text(f, board::ACCENT_COLOR),
            announcement: text(f, board::ANNOUNCEMENT),
            id: record.id,
            raw: record.fields,
        }
    }
}

impl FromRecord for Session {
    fn from_record(record: Record) -> Self {
        let f = &record.fields;
        Session {
            code: text(f, session::CODE),
            name: text(f, session::NAME),
            board_id: link(f, session::BOARD),
            facilitator_id: link(f, session::FACILITATOR),
            status: text(f, session::STATUS),
            started_at: text(f, session::STARTED_AT),
            ended_at: text(f, session::ENDED_AT),
            id: record.id,
            raw: record.fields,
        }
    }
}

impl FromRecord for Topic {
    fn from_record(record: Record) -> Self {
        let f = &record.fields;
        Topic {
            session_id: link(f, topic::SESSION),
            board_id: link(f, topic::BOARD),
            title: text(f, topic::TITLE),
            description: text(f, topic::DESCRIPTION),
            status: status(f),
            notes: text(f, topic::NOTES),
            author_id: link(f, topic::AUTHOR),
            vote_count: vote_count(f),
            order: order(f),
            id: record.id,
            raw: record.fields,
        }
    }
}

impl FromRecord for Vote {
    fn from_record(record: Record) -> Self {
        let f = &record.fields;
        Vote {
            session_id: link(f, vote::SESSION),
            topic_id: link(f, vote::TOPIC),
            user_id: link(f, vote::USER),
            weight: count(f, vote::WEIGHT),
            id: record.id,
            raw: record.fields,
        }
    }
}

impl FromRecord for Comment {
    fn from_record(record: Record) -> Self {
        let f = &record.fields;
        Comment {
            session_id: link(f, comment::SESSION),
            topic_id: link(f, comment::TOPIC),
            user_id: link(f, comment::USER),
            body: text(f, comment::BODY),
            id: record.id,
            raw: record.fields,
        }
    }
}

impl FromRecord for User {
    fn from_record(record: Record) -> Self {
        let f = &record.fields;
        User {
            name: text(f, user::NAME),
            email: text(f, user::EMAIL),
            avatar: text(f, user::AVATAR),
            role: text(f, user::ROLE),
            external_id: text(f, user::EXTERNAL_ID),
            session_ids: link(f, user::SESSIONS),
            id: record.id,
            raw: record.fields,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(fields: Value) -> Record {
        Record {
            id: "rec1".to_string(),
            fields: fields.as_object().cloned().unwrap_or_default(),
            created_time: None,
        }
    }

    #[test]
    fn test_vote_input_writes_links_as_lists() {
        let input = VoteInput {
            session_id: Some("recS".into()),
            topic_id: Some("recT".into()),
            user_id: Some("recU".into()),
            weight: Some(1),
        };
        assert_eq!(
            Value::Object(input.to_fields()),
            json!({ "Session": ["recS"], "Topic": ["recT"], "User": ["recU"], "Weight": 1 })
        );
    }

    #[test]
    fn test_topic_input_skips_absent_and_writes_store_status() {
        let input = TopicInput {
            session_id: Some("recS".into()),
            title: Some("Coffee".into()),
            status: Some(TopicStatus::Doing),
            ..Default::default()
        };
        assert_eq!(
            Value::Object(input.to_fields()),
            json!({ "Session": ["recS"], "Title": "Coffee", "Status": "doing" })
        );
    }

    #[test]
    fn test_user_input_folds_session_id() {
        let input = UserInput {
            name: Some("Ada".into()),
            session_id: Some("recS2".into()),
            session_ids: Some(Link::Many(vec!["recS1".into(), "recS2".into()])),
            ..Default::default()
        };
        let fields = input.to_fields();
        assert_eq!(fields["Sessions"], json!(["recS1", "recS2"]));
    }

    #[test]
    fn test_board_vote_limit_parsing() {
        let board = Board::from_record(record(json!({ "Name": "Retro", "VoteLimit": 3 })));
        assert_eq!(board.vote_limit, Some(3));
        assert_eq!(board.raw["Name"], "Retro");

        let negative = Board::from_record(record(json!({ "VoteLimit": -2 })));
        assert_eq!(negative.vote_limit, Some(0));

        let garbage = Board::from_record(record(json!({ "VoteLimit": "lots" })));
        assert_eq!(garbage.vote_limit, None);

        let textual = Board::from_record(record(json!({ "VoteLimit": "4" })));
        assert_eq!(textual.vote_limit, Some(4));
    }

    #[test]
    fn test_topic_from_record() {
        let topic = Topic::from_record(record(json!({
            "Session": ["recS"],
            "Title": "Deploys",
            "Status": "done",
            "Votes": ["recV1", "recV2"],
            "Order": 2.0
        })));
        assert_eq!(topic.id, "rec1");
        assert_eq!(topic.session_id, Some(Link::One("recS".into())));
        assert_eq!(topic.status, Some(TopicStatus::Done));
        assert_eq!(topic.vote_count, Some(2));
        assert_eq!(topic.order, Some(2));
    }

    #[test]
    fn test_unknown_status_reads_as_absent() {
        let topic = Topic::from_record(record(json!({ "Status": "archived" })));
        assert_eq!(topic.status, None);
        assert_eq!(topic.lifecycle(), TopicStatus::Todo);
    }

    #[test]
    fn test_multi_link_stays_list() {
        let user = User::from_record(record(json!({ "Sessions": ["recA", "recB"], "ExternalId": "ext" })));
        assert_eq!(user.session_ids, Some(Link::Many(vec!["recA".into(), "recB".into()])));
        assert_eq!(user.external_id.as_deref(), Some("ext"));

        let empty = User::from_record(record(json!({ "Sessions": [] })));
        assert_eq!(empty.session_ids, None);
    }
}
