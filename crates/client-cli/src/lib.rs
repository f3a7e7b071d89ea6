//! Lean Coffee client: HTTP API, per-device identity and the session store a UI binds against.

pub mod api;
pub mod config;
pub mod identity;
pub mod store;

pub use api::{ApiError, BoardApi, HttpApi};
pub use identity::{Identity, IdentityResolver};
pub use store::{ClientError, ExportPayload, PollHandle, Profile, SessionStore, Snapshot, TopicDraft, VoteToggle};
