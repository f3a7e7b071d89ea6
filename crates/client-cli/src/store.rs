//! Client Session Store.
//!
//! Holds the last loaded session aggregate together with the current user and
//! identity. Mutations are optimistic: the speculative value is committed and
//! published first, then replaced by the server's answer or by the value from
//! before the mutation. Mutations and refreshes on one store never overlap.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use shared::{
    Board, CastVoteResponse, Comment, CommentInput, Link, RetractVoteResponse, Session,
    SessionAggregate, SessionLookup, Topic, TopicInput, TopicStatus, User, UserInput, Vote,
    VoteInput, VOTE_LIMIT_REACHED,
};
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::task::AbortHandle;
use tokio::time::{Instant, MissedTickBehavior};
use uuid::Uuid;

use crate::api::{ApiError, BoardApi};
use crate::identity::{Identity, IdentityResolver};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(15);
const DEFAULT_USER_NAME: &str = "Guest";
/// Id prefix of records that exist only locally until the server confirms them
pub const PENDING_PREFIX: &str = "pending:";

#[derive(Error, Debug)]
pub enum ClientError {
    #[error(transparent)]
    Api(ApiError),

    /// The server refused a vote because the user's budget is spent
    #[error("{message}")]
    BudgetExhausted { message: String },

    #[error("{0}")]
    NotReady(&'static str),

    #[error("Topic {0} not found")]
    TopicNotFound(String),

    #[error("No session lookup information available for refresh")]
    MissingLookup,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl From<ApiError> for ClientError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Status {
                code: Some(code),
                message,
                ..
            } if code == VOTE_LIMIT_REACHED => ClientError::BudgetExhausted { message },
            err => ClientError::Api(err),
        }
    }
}

/// Details used when this device first registers as a participant
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

/// Owned copy of the store's state
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub board: Option<Board>,
    pub session: Option<Session>,
    pub topics: Vec<Topic>,
    pub votes: Vec<Vote>,
    pub comments: Vec<Comment>,
    pub users: Vec<User>,
    pub current_user: Option<User>,
    /// `None` when votes are unbounded
    pub remaining_votes: Option<u32>,
}

impl Snapshot {
    pub fn topic(&self, topic_id: &str) -> Option<&Topic> {
        self.topics.iter().find(|topic| topic.id == topic_id)
    }

    fn topic_mut(&mut self, topic_id: &str) -> Option<&mut Topic> {
        self.topics.iter_mut().find(|topic| topic.id == topic_id)
    }

    /// Votes on a topic, counting pending ones
    pub fn votes_for(&self, topic_id: &str) -> usize {
        self.votes.iter().filter(|vote| vote.is_for(topic_id)).count()
    }

    pub fn has_voted(&self, topic_id: &str) -> bool {
        self.user_vote(topic_id).is_some()
    }

    fn user_vote(&self, topic_id: &str) -> Option<&Vote> {
        let user_id = self.current_user.as_ref()?.id.as_str();
        self.votes
            .iter()
            .find(|vote| vote.is_for(topic_id) && vote.is_by(user_id))
    }
}

/// New topic as typed by a participant
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TopicDraft {
    pub title: String,
    pub description: Option<String>,
    pub status: Option<TopicStatus>,
    pub order: Option<i64>,
}

impl TopicDraft {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum VoteToggle {
    Cast(CastVoteResponse),
    Retracted(RetractVoteResponse),
}

impl VoteToggle {
    pub fn remaining_votes(&self) -> Option<u32> {
        match self {
            VoteToggle::Cast(response) => response.remaining_votes,
            VoteToggle::Retracted(response) => response.remaining_votes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportPayload {
    pub generated_at: DateTime<Utc>,
    pub board: Option<Board>,
    pub session: Option<Session>,
    pub topics: Vec<Topic>,
    pub votes: Vec<Vote>,
    pub comments: Vec<Comment>,
    pub users: Vec<User>,
}

impl From<Snapshot> for ExportPayload {
    fn from(snapshot: Snapshot) -> Self {
        Self {
            generated_at: Utc::now(),
            board: snapshot.board,
            session: snapshot.session,
            topics: snapshot.topics,
            votes: snapshot.votes,
            comments: snapshot.comments,
            users: snapshot.users,
        }
    }
}

pub type SubscriptionId = u64;
type Listener = Arc<dyn Fn(&Snapshot) + Send + Sync>;

/// Cancels a polling task
#[derive(Debug, Clone)]
pub struct PollHandle {
    handle: AbortHandle,
}

impl PollHandle {
    pub fn stop(&self) {
        self.handle.abort();
    }
}

#[derive(Default)]
struct State {
    data: Snapshot,
    identity: Option<Identity>,
    lookup: Option<SessionLookup>,
    profile: Profile,
}

pub struct SessionStore<A: BoardApi> {
    api: A,
    identities: IdentityResolver,
    state: Mutex<State>,
    listeners: DashMap<SubscriptionId, Listener>,
    next_listener: AtomicU64,
    /// Serialises mutations and refreshes
    ops: tokio::sync::Mutex<()>,
    poller: Mutex<Option<AbortHandle>>,
}

impl<A: BoardApi> SessionStore<A> {
    pub fn new(api: A, identities: IdentityResolver) -> Self {
        Self {
            api,
            identities,
            state: Mutex::new(State::default()),
            listeners: DashMap::new(),
            next_listener: AtomicU64::new(1),
            ops: tokio::sync::Mutex::new(()),
            poller: Mutex::new(None),
        }
    }

    // ------------------------------------------------------------------
    // Subscriptions
    // ------------------------------------------------------------------

    pub fn subscribe(&self, listener: impl Fn(&Snapshot) + Send + Sync + 'static) -> SubscriptionId {
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        self.listeners.insert(id, Arc::new(listener));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.listeners.remove(&id).is_some()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.lock().data.clone()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self) {
        let snapshot = self.snapshot();
        let mut listeners: Vec<(SubscriptionId, Listener)> = self
            .listeners
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        listeners.sort_by_key(|(id, _)| *id);

        for (id, listener) in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(&snapshot))).is_err() {
                tracing::error!("Session listener {} panicked", id);
            }
        }
    }

    /// Replace the whole value in one assignment and publish it
    fn commit(&self, data: Snapshot) {
        self.lock().data = data;
        self.notify();
    }

    fn modify(&self, change: impl FnOnce(&mut Snapshot)) {
        change(&mut self.lock().data);
        self.notify();
    }

    /// Optimistic transaction: publish the speculative value, run the request,
    /// then settle with the response or restore the previous value.
    async fn transact<T, E, F>(
        &self,
        speculate: impl FnOnce(&mut Snapshot),
        request: F,
        settle: impl FnOnce(&mut Snapshot, &T),
    ) -> Result<T, ClientError>
    where
        F: Future<Output = Result<T, E>>,
        E: Into<ClientError>,
    {
        let before = self.snapshot();
        let mut speculative = before.clone();
        speculate(&mut speculative);
        self.commit(speculative);

        match request.await {
            Ok(value) => {
                self.modify(|data| settle(data, &value));
                Ok(value)
            }
            Err(e) => {
                let err = e.into();
                tracing::debug!("Rolling back local change: {}", err);
                self.commit(before);
                Err(err)
            }
        }
    }

    // ------------------------------------------------------------------
    // Loading
    // ------------------------------------------------------------------

    /// Load a session, resolve this device's identity and participant record, and publish
    pub async fn bootstrap(&self, lookup: SessionLookup, profile: Profile) -> Result<Snapshot, ClientError> {
        let _guard = self.ops.lock().await;
        self.lock().profile = profile;
        self.load(lookup).await
    }

    /// Reload the current session and replace local state wholesale
    pub async fn refresh(&self) -> Result<Snapshot, ClientError> {
        let _guard = self.ops.lock().await;
        let lookup = self.lock().lookup.clone().ok_or(ClientError::MissingLookup)?;
        self.load(lookup).await
    }

    async fn load(&self, lookup: SessionLookup) -> Result<Snapshot, ClientError> {
        let mut aggregate = self.api.get_session(&lookup).await?;
        let session_id = aggregate.session.id.clone();
        if session_id.is_empty() {
            return Err(ClientError::InvalidResponse(
                "session id missing in response".to_string(),
            ));
        }

        let (held, profile) = {
            let state = self.lock();
            let same_session = state.data.session.as_ref().is_some_and(|s| s.id == session_id);
            let held = state.identity.clone().filter(|_| same_session);
            (held, state.profile.clone())
        };
        let mut identity = self.identities.ensure(&session_id, held.as_ref());
        let user = self.ensure_user(&mut aggregate, &identity, &profile).await?;
        identity.user_id = Some(user.id.clone());

        let remaining_votes = aggregate.remaining_votes(Some(user.id.as_str()));
        let SessionAggregate {
            session,
            board,
            topics,
            votes,
            comments,
            users,
        } = aggregate;
        let data = Snapshot {
            board,
            session: Some(session),
            topics,
            votes,
            comments,
            users,
            current_user: Some(user),
            remaining_votes,
        };

        {
            let mut state = self.lock();
            state.data = data;
            state.identity = Some(identity.clone());
            state.lookup = Some(SessionLookup::Id(session_id.clone()));
        }
        self.identities.write(&session_id, &identity);
        self.notify();
        Ok(self.snapshot())
    }

    /// Participant record for the identity, registering one when the session has none
    async fn ensure_user(
        &self,
        aggregate: &mut SessionAggregate,
        identity: &Identity,
        profile: &Profile,
    ) -> Result<User, ClientError> {
        if let Some(user) = find_user(&aggregate.users, identity) {
            return Ok(user.clone());
        }

        let input = UserInput {
            name: Some(profile.name.clone().unwrap_or_else(|| DEFAULT_USER_NAME.to_string())),
            email: profile.email.clone(),
            avatar: profile.avatar.clone(),
            external_id: Some(identity.external_id.clone()),
            session_id: Some(aggregate.session.id.clone()),
            ..Default::default()
        };
        let user = self.api.create_user(&input).await?;
        tracing::info!("Registered as {} in session {}", user.id, aggregate.session.id);
        aggregate.users.push(user.clone());
        Ok(user)
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    pub async fn submit_topic(&self, draft: TopicDraft) -> Result<Topic, ClientError> {
        let _guard = self.ops.lock().await;
        let (session_id, board_id, author_id) = {
            let state = self.lock();
            let session = state
                .data
                .session
                .as_ref()
                .ok_or(ClientError::NotReady("Cannot create topic without an active session"))?;
            (
                session.id.clone(),
                state.data.board.as_ref().map(|board| board.id.clone()),
                state.data.current_user.as_ref().map(|user| user.id.clone()),
            )
        };

        let input = TopicInput {
            session_id: Some(Link::One(session_id)),
            board_id: board_id.map(Link::One),
            title: Some(draft.title.trim().to_string()),
            description: Some(draft.description.as_deref().unwrap_or_default().trim().to_string()),
            status: draft.status,
            author_id: author_id.map(Link::One),
            order: draft.order,
            ..Default::default()
        };

        let pending_id = format!("{}{}", PENDING_PREFIX, Uuid::new_v4());
        let mut placeholder = Topic {
            id: pending_id.clone(),
            ..Default::default()
        };
        input.apply_to(&mut placeholder);

        self.transact(
            |data| data.topics.push(placeholder),
            self.api.create_topic(&input),
            |data, created: &Topic| {
                if let Some(topic) = data.topic_mut(&pending_id) {
                    *topic = created.clone();
                }
            },
        )
        .await
    }

    /// Retract the user's vote on the topic if there is one, otherwise cast one
    pub async fn toggle_vote(&self, topic_id: &str) -> Result<VoteToggle, ClientError> {
        let _guard = self.ops.lock().await;
        let (session_id, user_id, existing) = {
            let state = self.lock();
            match (&state.data.session, &state.data.current_user) {
                (Some(session), Some(user)) => (
                    session.id.clone(),
                    user.id.clone(),
                    state.data.user_vote(topic_id).cloned(),
                ),
                _ => return Err(ClientError::NotReady("Voting requires an active session and user")),
            }
        };

        match existing {
            Some(vote) => {
                let response = self
                    .transact(
                        |data| data.votes.retain(|candidate| candidate.id != vote.id),
                        self.api.retract_vote(&vote.id),
                        |data, response: &RetractVoteResponse| {
                            data.remaining_votes = response.remaining_votes;
                        },
                    )
                    .await?;
                tracing::info!("Retracted vote on {}", topic_id);
                Ok(VoteToggle::Retracted(response))
            }
            None => {
                let input = VoteInput {
                    session_id: Some(session_id.clone()),
                    topic_id: Some(topic_id.to_string()),
                    user_id: Some(user_id.clone()),
                    weight: Some(1),
                };
                let pending_id = format!("{}{}", PENDING_PREFIX, Uuid::new_v4());
                let placeholder = Vote {
                    id: pending_id.clone(),
                    session_id: Some(Link::One(session_id)),
                    topic_id: Some(Link::One(topic_id.to_string())),
                    user_id: Some(Link::One(user_id)),
                    weight: Some(1),
                    ..Default::default()
                };

                let response = self
                    .transact(
                        |data| data.votes.push(placeholder),
                        self.api.cast_vote(&input),
                        |data, response: &CastVoteResponse| {
                            if let Some(vote) = data.votes.iter_mut().find(|vote| vote.id == pending_id) {
                                *vote = response.vote.clone();
                            }
                            data.remaining_votes = response.remaining_votes;
                        },
                    )
                    .await?;
                tracing::info!("Voted for {}", topic_id);
                Ok(VoteToggle::Cast(response))
            }
        }
    }

    pub async fn move_topic(&self, topic_id: &str, status: TopicStatus) -> Result<Topic, ClientError> {
        self.patch_topic(topic_id, TopicInput::status(status)).await
    }

    /// Start discussing a topic
    pub async fn promote_topic(&self, topic_id: &str) -> Result<Topic, ClientError> {
        self.move_topic(topic_id, TopicStatus::Doing).await
    }

    pub async fn complete_topic(&self, topic_id: &str) -> Result<Topic, ClientError> {
        self.move_topic(topic_id, TopicStatus::Done).await
    }

    pub async fn save_notes(&self, topic_id: &str, notes: impl Into<String>) -> Result<Topic, ClientError> {
        self.patch_topic(topic_id, TopicInput::notes(notes)).await
    }

    async fn patch_topic(&self, topic_id: &str, changes: TopicInput) -> Result<Topic, ClientError> {
        let _guard = self.ops.lock().await;
        if self.lock().data.topic(topic_id).is_none() {
            return Err(ClientError::TopicNotFound(topic_id.to_string()));
        }

        self.transact(
            |data| {
                if let Some(topic) = data.topic_mut(topic_id) {
                    changes.apply_to(topic);
                }
            },
            self.api.update_topic(topic_id, &changes),
            |data, updated: &Topic| {
                if let Some(topic) = data.topic_mut(topic_id) {
                    *topic = updated.clone();
                }
            },
        )
        .await
    }

    /// Comments are append-only and shown once the server has stored them
    pub async fn post_comment(&self, topic_id: &str, body: impl Into<String>) -> Result<Comment, ClientError> {
        let _guard = self.ops.lock().await;
        let (session_id, user_id) = {
            let state = self.lock();
            match (&state.data.session, &state.data.current_user) {
                (Some(session), Some(user)) => (session.id.clone(), user.id.clone()),
                _ => return Err(ClientError::NotReady("Commenting requires an active session and user")),
            }
        };

        let input = CommentInput {
            session_id: Some(Link::One(session_id)),
            topic_id: Some(Link::One(topic_id.to_string())),
            user_id: Some(Link::One(user_id)),
            body: Some(body.into()),
        };
        let comment = self.api.create_comment(&input).await?;
        self.modify(|data| data.comments.push(comment.clone()));
        Ok(comment)
    }

    // ------------------------------------------------------------------
    // Export and getters
    // ------------------------------------------------------------------

    /// Everything loaded for the session, refreshed first when asked or when nothing is loaded
    pub async fn export_session(&self, fresh: bool) -> Result<ExportPayload, ClientError> {
        let loaded = self.lock().data.session.is_some();
        let snapshot = if fresh || !loaded {
            self.refresh().await?
        } else {
            self.snapshot()
        };
        Ok(ExportPayload::from(snapshot))
    }

    pub fn current_user(&self) -> Option<User> {
        self.lock().data.current_user.clone()
    }

    pub fn remaining_votes(&self) -> Option<u32> {
        self.lock().data.remaining_votes
    }

    pub fn identity(&self) -> Option<Identity> {
        self.lock().identity.clone()
    }

    pub fn stop_polling(&self) {
        if let Some(handle) = self.poller.lock().unwrap_or_else(PoisonError::into_inner).take() {
            handle.abort();
            tracing::debug!("Polling stopped");
        }
    }
}

impl<A: BoardApi + 'static> SessionStore<A> {
    /// Refresh in the background every `interval` (zero means the default)
    /// until stopped. A failed refresh is logged and polling carries on.
    pub fn start_polling(self: &Arc<Self>, interval: Duration) -> PollHandle {
        self.stop_polling();
        let period = if interval.is_zero() {
            DEFAULT_POLL_INTERVAL
        } else {
            interval
        };

        let store = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    break;
                };
                if let Err(e) = store.refresh().await {
                    tracing::warn!("Failed to refresh session: {}", e);
                }
            }
        });

        let handle = task.abort_handle();
        *self.poller.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle.clone());
        tracing::debug!("Polling every {:?}", period);
        PollHandle { handle }
    }
}

impl<A: BoardApi> Drop for SessionStore<A> {
    fn drop(&mut self) {
        self.stop_polling();
    }
}

fn find_user<'a>(users: &'a [User], identity: &Identity) -> Option<&'a User> {
    identity
        .user_id
        .as_deref()
        .and_then(|user_id| users.iter().find(|user| user.id == user_id))
        .or_else(|| {
            users
                .iter()
                .find(|user| user.external_id.as_deref() == Some(identity.external_id.as_str()))
        })
}
