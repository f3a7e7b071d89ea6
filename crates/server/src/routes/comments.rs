use shared::{first_link, Comment, CommentInput};

use super::Reply;
use crate::error::AppError;
use crate::store::{self, RecordStore, Table};

/// POST /comments
pub async fn create(store: &dyn RecordStore, input: CommentInput) -> Result<Reply, AppError> {
    if first_link(&input.topic_id).is_none() || first_link(&input.user_id).is_none() {
        return Err(AppError::Validation(
            "topicId and userId are required to create a comment".to_string(),
        ));
    }

    let comment: Comment = store::insert(store, Table::Comments, &input).await?;
    Ok(Reply::created(comment))
}
