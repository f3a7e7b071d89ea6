use shared::{CreateSessionRequest, SessionLookup};
use std::collections::HashMap;

use super::Reply;
use crate::error::AppError;
use crate::session;
use crate::store::RecordStore;

/// GET /sessions/:id, GET /sessions?code=, GET /?code=
pub async fn load(
    store: &dyn RecordStore,
    id: Option<&str>,
    query: &HashMap<String, String>,
) -> Result<Reply, AppError> {
    let lookup = match (id, query.get("code").map(|code| code.trim())) {
        (Some(id), _) => SessionLookup::Id(id.to_string()),
        (None, Some(code)) if !code.is_empty() => SessionLookup::Code(code.to_string()),
        _ => return Ok(Reply::not_found("Session not found")),
    };

    match session::load(store, &lookup).await? {
        Some(aggregate) => Ok(Reply::ok(aggregate)),
        None => Ok(Reply::not_found("Session not found")),
    }
}

/// POST /sessions
pub async fn create(store: &dyn RecordStore, request: CreateSessionRequest) -> Result<Reply, AppError> {
    let session = session::create_session(store, request).await?;
    Ok(Reply::created(session))
}
