use shared::{User, UserInput};

use super::Reply;
use crate::error::AppError;
use crate::store::{self, RecordStore, Table};

const DEFAULT_NAME: &str = "Guest";

/// POST /users
pub async fn register(store: &dyn RecordStore, mut input: UserInput) -> Result<Reply, AppError> {
    if input.name.as_deref().map_or(true, |name| name.trim().is_empty()) {
        input.name = Some(DEFAULT_NAME.to_string());
    }

    let user: User = store::insert(store, Table::Users, &input).await?;
    tracing::info!("Registered user {} ({})", user.id, user.name.as_deref().unwrap_or(DEFAULT_NAME));
    Ok(Reply::created(user))
}
