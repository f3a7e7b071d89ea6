use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Links
// ============================================================================

/// Reference to one or more linked records.
///
/// The record store always holds links as lists. A single link is surfaced as
/// a scalar id, anything else stays a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Link {
    One(String),
    Many(Vec<String>),
}

impl Link {
    /// Normalise a list of ids coming from the store
    pub fn from_ids(mut ids: Vec<String>) -> Self {
        if ids.len() == 1 {
            Link::One(ids.remove(0))
        } else {
            Link::Many(ids)
        }
    }

    /// The list representation the store expects
    pub fn to_ids(&self) -> Vec<String> {
        match self {
            Link::One(id) => vec![id.clone()],
            Link::Many(ids) => ids.clone(),
        }
    }

    pub fn first(&self) -> Option<&str> {
        match self {
            Link::One(id) => Some(id.as_str()),
            Link::Many(ids) => ids.first().map(String::as_str),
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        match self {
            Link::One(one) => one == id,
            Link::Many(ids) => ids.iter().any(|candidate| candidate == id),
        }
    }
}

impl From<String> for Link {
    fn from(id: String) -> Self {
        Link::One(id)
    }
}

impl From<&str> for Link {
    fn from(id: &str) -> Self {
        Link::One(id.to_string())
    }
}

/// First id of an optional link, the common case for board/session lookups
pub fn first_link(link: &Option<Link>) -> Option<&str> {
    link.as_ref().and_then(Link::first)
}

// ============================================================================
// Topic lifecycle
// ============================================================================

/// Three-state topic lifecycle.
///
/// The board UI calls the states todo/discussing/completed while the store
/// uses todo/doing/done. Both spellings parse into the same variant; the
/// store spelling is what gets serialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopicStatus {
    #[default]
    Todo,
    #[serde(alias = "discussing")]
    Doing,
    #[serde(alias = "completed")]
    Done,
}

impl TopicStatus {
    pub const ALL: [TopicStatus; 3] = [TopicStatus::Todo, TopicStatus::Doing, TopicStatus::Done];

    pub fn as_str(&self) -> &'static str {
        match self {
            TopicStatus::Todo => "todo",
            TopicStatus::Doing => "doing",
            TopicStatus::Done => "done",
        }
    }

    /// Column name shown on the board
    pub fn board_label(&self) -> &'static str {
        match self {
            TopicStatus::Todo => "todo",
            TopicStatus::Doing => "discussing",
            TopicStatus::Done => "completed",
        }
    }
}

impl fmt::Display for TopicStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown topic status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for TopicStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "todo" => Ok(TopicStatus::Todo),
            "doing" | "discussing" => Ok(TopicStatus::Doing),
            "done" | "completed" => Ok(TopicStatus::Done),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

// ============================================================================
// Entities
// ============================================================================

/// Owns the vote budget for every session linked to it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Board {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// `None` means votes are unbounded
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
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub raw: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
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
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub raw: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Topic {
    pub id: String,
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
    /// Cached count maintained by the store, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vote_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<i64>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub raw: Map<String, Value>,
}

impl Topic {
    /// Status with unset topics treated as not yet discussed
    pub fn lifecycle(&self) -> TopicStatus {
        self.status.unwrap_or_default()
    }
}

/// One unit of support. The record existing is the vote; deleting it retracts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vote {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Link>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic_id: Option<Link>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Link>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<u32>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub raw: Map<String, Value>,
}

impl Vote {
    pub fn is_by(&self, user_id: &str) -> bool {
        self.user_id.as_ref().is_some_and(|link| link.contains(user_id))
    }

    pub fn is_for(&self, topic_id: &str) -> bool {
        self.topic_id.as_ref().is_some_and(|link| link.contains(topic_id))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Link>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic_id: Option<Link>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Link>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub raw: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Opaque per-device identity, the correlation key across reloads
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_ids: Option<Link>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub raw: Map<String, Value>,
}

/// A session with everything linked to it, loaded as one unit
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionAggregate {
    pub session: Session,
    pub board: Option<Board>,
    #[serde(default)]
    pub topics: Vec<Topic>,
    #[serde(default)]
    pub votes: Vec<Vote>,
    #[serde(default)]
    pub comments: Vec<Comment>,
    #[serde(default)]
    pub users: Vec<User>,
}

impl SessionAggregate {
    pub fn vote_limit(&self) -> Option<u32> {
        self.board.as_ref().and_then(|board| board.vote_limit)
    }

    /// Remaining budget derived from the votes in this aggregate
    pub fn remaining_votes(&self, user_id: Option<&str>) -> Option<u32> {
        let limit = self.vote_limit()?;
        let Some(user_id) = user_id else {
            return Some(limit);
        };
        let used = self.votes.iter().filter(|vote| vote.is_by(user_id)).count();
        Some(limit.saturating_sub(used as u32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_link_untagged_serialization() {
        let one: Link = serde_json::from_value(json!("rec1")).unwrap();
        assert_eq!(one, Link::One("rec1".to_string()));
        assert_eq!(serde_json::to_value(&one).unwrap(), json!("rec1"));

        let many: Link = serde_json::from_value(json!(["rec1", "rec2"])).unwrap();
        assert_eq!(many.first(), Some("rec1"));
        assert!(many.contains("rec2"));
        assert_eq!(serde_json::to_value(&many).unwrap(), json!(["rec1", "rec2"]));
    }

    #[test]
    fn test_link_from_ids() {
        assert_eq!(Link::from_ids(vec!["a".into()]), Link::One("a".into()));
        assert_eq!(
            Link::from_ids(vec!["a".into(), "b".into()]),
            Link::Many(vec!["a".into(), "b".into()])
        );
        assert_eq!(Link::from_ids(vec![]), Link::Many(vec![]));
        assert_eq!(Link::One("a".into()).to_ids(), vec!["a".to_string()]);
    }

    #[test]
    fn test_topic_status_accepts_both_namings() {
        let doing: TopicStatus = serde_json::from_value(json!("discussing")).unwrap();
        assert_eq!(doing, TopicStatus::Doing);
        let done: TopicStatus = serde_json::from_value(json!("completed")).unwrap();
        assert_eq!(done, TopicStatus::Done);
        let done_server: TopicStatus = serde_json::from_value(json!("done")).unwrap();
        assert_eq!(done, done_server);

        // Always written with the store naming
        assert_eq!(serde_json::to_value(TopicStatus::Doing).unwrap(), json!("doing"));
        assert_eq!(TopicStatus::Doing.board_label(), "discussing");
    }

    #[test]
    fn test_topic_status_from_str() {
        assert_eq!("Completed".parse::<TopicStatus>().unwrap(), TopicStatus::Done);
        assert_eq!(" todo ".parse::<TopicStatus>().unwrap(), TopicStatus::Todo);
        assert!("archived".parse::<TopicStatus>().is_err());
    }

    #[test]
    fn test_topic_defaults_to_todo() {
        let topic: Topic = serde_json::from_value(json!({ "id": "recT" })).unwrap();
        assert_eq!(topic.lifecycle(), TopicStatus::Todo);
    }

    #[test]
    fn test_vote_ownership_helpers() {
        let vote: Vote = serde_json::from_value(json!({
            "id": "recV",
            "userId": "recU",
            "topicId": ["recT1", "recT2"]
        }))
        .unwrap();
        assert!(vote.is_by("recU"));
        assert!(!vote.is_by("recX"));
        assert!(vote.is_for("recT2"));
    }

    #[test]
    fn test_aggregate_remaining_votes() {
        let aggregate = SessionAggregate {
            board: Some(Board {
                id: "recB".into(),
                vote_limit: Some(2),
                ..Default::default()
            }),
            votes: vec![
                Vote { id: "v1".into(), user_id: Some("u1".into()), ..Default::default() },
                Vote { id: "v2".into(), user_id: Some("u1".into()), ..Default::default() },
                Vote { id: "v3".into(), user_id: Some("u1".into()), ..Default::default() },
                Vote { id: "v4".into(), user_id: Some("u2".into()), ..Default::default() },
            ],
            ..Default::default()
        };
        assert_eq!(aggregate.remaining_votes(Some("u1")), Some(0));
        assert_eq!(aggregate.remaining_votes(Some("u2")), Some(1));
        assert_eq!(aggregate.remaining_votes(None), Some(2));

        let unbounded = SessionAggregate::default();
        assert_eq!(unbounded.remaining_votes(Some("u1")), None);
    }
}
