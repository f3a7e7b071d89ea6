use shared::{Board, BoardInput};

use super::{required_id, Reply};
use crate::error::AppError;
use crate::store::{self, RecordStore, Table};

/// PATCH /boards/:id
pub async fn update(
    store: &dyn RecordStore,
    id: Option<&str>,
    input: BoardInput,
) -> Result<Reply, AppError> {
    let id = required_id(id, "Board ID is required for update")?;
    let board: Board = store::patch(store, Table::Boards, id, &input).await?;
    tracing::info!("Board {} updated", board.id);
    Ok(Reply::ok(board))
}
