use axum::http::StatusCode;
use shared::{ErrorBody, VoteInput};

use super::{required_id, Reply};
use crate::error::AppError;
use crate::ledger::{self, CastOutcome};
use crate::store::RecordStore;

/// POST /votes
pub async fn cast(store: &dyn RecordStore, input: VoteInput) -> Result<Reply, AppError> {
    match ledger::cast_vote(store, input).await? {
        CastOutcome::Cast(response) => Ok(Reply::created(response)),
        CastOutcome::BudgetExhausted { message } => {
            let mut body = ErrorBody::vote_limit_reached();
            body.message = Some(message);
            Ok(Reply::new(StatusCode::BAD_REQUEST, body))
        }
    }
}

/// DELETE /votes/:id
pub async fn retract(store: &dyn RecordStore, id: Option<&str>) -> Result<Reply, AppError> {
    let id = required_id(id, "Vote ID is required to retract a vote")?;
    let response = ledger::retract_vote(store, id).await?;
    Ok(Reply::ok(response))
}
