//! Vote Ledger: casting and retracting votes against a per-user budget.
//!
//! The budget lives on the board linked to the session. Remaining votes are
//! always recomputed from the store, never from a cached counter.

use shared::{first_link, Board, CastVoteResponse, RetractVoteResponse, Session, Vote, VoteInput, VOTE_LIMIT_MESSAGE};

use crate::error::AppError;
use crate::store::{self, schema, Filter, ListQuery, RecordStore, Table};

/// Result of a cast. Running out of budget is an expected outcome, not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum CastOutcome {
    Cast(CastVoteResponse),
    BudgetExhausted { message: String },
}

/// Vote budget for a session. `None` means unbounded.
///
/// A session without a board, or whose board no longer exists, is unbounded.
pub async fn vote_limit(store: &dyn RecordStore, session_id: &str) -> Result<Option<u32>, AppError> {
    let session: Session = store::fetch_optional(store, Table::Sessions, session_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Session not found".to_string()))?;

    let Some(board_id) = first_link(&session.board_id) else {
        return Ok(None);
    };

    let board: Option<Board> = store::fetch_optional(store, Table::Boards, board_id).await?;
    if board.is_none() {
        tracing::debug!("Board {} for session {} is gone, votes are unbounded", board_id, session_id);
    }
    Ok(board.and_then(|board| board.vote_limit))
}

/// Live count of the user's votes in the session
pub async fn count_user_votes(
    store: &dyn RecordStore,
    session_id: &str,
    user_id: &str,
) -> Result<u32, AppError> {
    let filter = Filter::links_to(schema::vote::SESSION, session_id)
        .and(Filter::links_to(schema::vote::USER, user_id));
    let votes = store.list(Table::Votes, ListQuery::filtered(filter)).await?;
    Ok(votes.len() as u32)
}

fn required<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str, AppError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| AppError::Validation(format!("{} is required to cast a vote", name)))
}

pub async fn cast_vote(store: &dyn RecordStore, input: VoteInput) -> Result<CastOutcome, AppError> {
    let session_id = required(&input.session_id, "sessionId")?;
    let user_id = required(&input.user_id, "userId")?;
    required(&input.topic_id, "topicId")?;

    let limit = vote_limit(store, session_id).await?;

    let used = match limit {
        Some(limit) => {
            let used = count_user_votes(store, session_id, user_id).await?;
            if used >= limit {
                tracing::info!(
                    "User {} has used {} of {} votes in session {}",
                    user_id,
                    used,
                    limit,
                    session_id
                );
                return Ok(CastOutcome::BudgetExhausted {
                    message: VOTE_LIMIT_MESSAGE.to_string(),
                });
            }
            used
        }
        None => 0,
    };

    let input = VoteInput {
        weight: Some(input.weight.unwrap_or(1)),
        ..input.clone()
    };
    let vote: Vote = store::insert(store, Table::Votes, &input).await?;
    tracing::info!("Vote {} cast by {} in session {}", vote.id, user_id, session_id);

    Ok(CastOutcome::Cast(CastVoteResponse {
        remaining_votes: limit.map(|limit| limit.saturating_sub(used + 1)),
        vote,
    }))
}

pub async fn retract_vote(store: &dyn RecordStore, vote_id: &str) -> Result<RetractVoteResponse, AppError> {
    let vote: Vote = store::fetch_optional(store, Table::Votes, vote_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Vote not found".to_string()))?;

    store.delete(Table::Votes, vote_id).await?;
    tracing::info!("Vote {} retracted", vote_id);

    let remaining_votes = match (first_link(&vote.session_id), first_link(&vote.user_id)) {
        (Some(session_id), Some(user_id)) => match vote_limit(store, session_id).await {
            Ok(Some(limit)) => {
                let used = count_user_votes(store, session_id, user_id).await?;
                Some(limit.saturating_sub(used))
            }
            Ok(None) | Err(AppError::NotFound(_)) => None,
            Err(e) => return Err(e),
        },
        _ => None,
    };

    Ok(RetractVoteResponse {
        id: vote_id.to_string(),
        vote,
        remaining_votes,
    })
}
