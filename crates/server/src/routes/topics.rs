use shared::{first_link, Topic, TopicInput};

use super::{required_id, Reply};
use crate::error::AppError;
use crate::store::{self, RecordStore, Table};

/// POST /topics
pub async fn create(store: &dyn RecordStore, input: TopicInput) -> Result<Reply, AppError> {
    if first_link(&input.session_id).map_or(true, |id| id.trim().is_empty()) {
        return Err(AppError::Validation(
            "sessionId is required to create a topic".to_string(),
        ));
    }

    let topic: Topic = store::insert(store, Table::Topics, &input).await?;
    tracing::info!("Topic {} created", topic.id);
    Ok(Reply::created(topic))
}

/// PATCH /topics/:id
pub async fn update(
    store: &dyn RecordStore,
    id: Option<&str>,
    input: TopicInput,
) -> Result<Reply, AppError> {
    let id = required_id(id, "Topic ID is required for update")?;
    let topic: Topic = store::patch(store, Table::Topics, id, &input).await?;
    tracing::debug!("Topic {} updated", topic.id);
    Ok(Reply::ok(topic))
}
