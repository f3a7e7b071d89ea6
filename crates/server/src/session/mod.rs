//! Session Aggregate Loader and session creation

use rand::Rng;
use shared::{
    first_link, normalise_code, Board, Comment, CreateSessionRequest, Link, Session,
    SessionAggregate, SessionLookup, Topic, User, Vote,
};

use crate::error::AppError;
use crate::store::{self, schema, Filter, ListQuery, RecordStore, Table};

const CODE_LENGTH: usize = 6;
const CODE_ATTEMPTS: usize = 5;

/// Load a session with its board, topics, votes, comments and participants.
///
/// Returns `Ok(None)` when no session matches. Any failing sub-fetch fails the load.
pub async fn load(
    store: &dyn RecordStore,
    lookup: &SessionLookup,
) -> Result<Option<SessionAggregate>, AppError> {
    let Some(session) = find_session(store, lookup).await? else {
        tracing::debug!("No session for {:?}", lookup);
        return Ok(None);
    };

    let board = async {
        match first_link(&session.board_id) {
            Some(board_id) => store::fetch_optional::<Board>(store, Table::Boards, board_id).await,
            None => Ok(None),
        }
    };
    let linked = |field: &'static str| ListQuery::filtered(Filter::links_to(field, session.id.clone()));

    let (board, topics, votes, comments, users) = tokio::try_join!(
        board,
        store::list_all::<Topic>(store, Table::Topics, linked(schema::topic::SESSION)),
        store::list_all::<Vote>(store, Table::Votes, linked(schema::vote::SESSION)),
        store::list_all::<Comment>(store, Table::Comments, linked(schema::comment::SESSION)),
        store::list_all::<User>(store, Table::Users, linked(schema::user::SESSIONS)),
    )?;

    Ok(Some(SessionAggregate {
        session,
        board,
        topics,
        votes,
        comments,
        users,
    }))
}

async fn find_session(
    store: &dyn RecordStore,
    lookup: &SessionLookup,
) -> Result<Option<Session>, AppError> {
    match lookup {
        SessionLookup::Id(id) => Ok(store::fetch_optional(store, Table::Sessions, id).await?),
        SessionLookup::Code(code) => {
            let code = normalise_code(code);
            let mut matches = find_by_code(store, &code).await?;
            if matches.len() > 1 {
                tracing::warn!("Session code {} matches several sessions, using the first", code);
            }
            Ok((!matches.is_empty()).then(|| matches.remove(0)))
        }
    }
}

async fn find_by_code(store: &dyn RecordStore, code: &str) -> Result<Vec<Session>, AppError> {
    let query = ListQuery::filtered(Filter::equals(schema::session::CODE, code)).limit(2);
    Ok(store::list_all(store, Table::Sessions, query).await?)
}

/// Random join code of uppercase letters and digits
pub fn generate_code() -> String {
    rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(CODE_LENGTH)
        .map(char::from)
        .collect::<String>()
        .to_uppercase()
}

async fn unused_code(store: &dyn RecordStore) -> Result<String, AppError> {
    for _ in 0..CODE_ATTEMPTS {
        let code = generate_code();
        if find_by_code(store, &code).await?.is_empty() {
            return Ok(code);
        }
        tracing::debug!("Generated session code {} is taken, trying again", code);
    }
    Err(AppError::Internal("Could not generate a unique session code".to_string()))
}

/// Create a session, creating its board first when one is given inline
pub async fn create_session(
    store: &dyn RecordStore,
    request: CreateSessionRequest,
) -> Result<Session, AppError> {
    let mut input = request.session.unwrap_or_default();

    let board_id = match (request.board_id.filter(|id| !id.is_empty()), request.board) {
        (Some(board_id), _) => Some(board_id),
        (None, Some(board)) => {
            let created: Board = store::insert(store, Table::Boards, &board).await?;
            tracing::info!("Created board {} for new session", created.id);
            Some(created.id)
        }
        (None, None) => None,
    };
    if let Some(board_id) = board_id {
        input.board_id = Some(Link::One(board_id));
    }

    let code = match input.code.take().map(|code| normalise_code(&code)) {
        Some(code) if !code.is_empty() => {
            if !find_by_code(store, &code).await?.is_empty() {
                return Err(AppError::Conflict(format!("Session code {} is already in use", code)));
            }
            code
        }
        _ => unused_code(store).await?,
    };
    input.code = Some(code);

    let session: Session = store::insert(store, Table::Sessions, &input).await?;
    tracing::info!(
        "Created session {} with code {}",
        session.id,
        session.code.as_deref().unwrap_or_default()
    );
    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use serde_json::json;
    use shared::{BoardInput, SessionInput};

    fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        store.seed(Table::Boards, "recB", json!({ "Name": "Retro", "VoteLimit": 3 }));
        store.seed(Table::Sessions, "recS", json!({ "Code": "ABC123", "Board": ["recB"] }));
        store.seed(Table::Topics, "recT", json!({ "Session": ["recS"], "Title": "CI" }));
        store.seed(Table::Topics, "recOther", json!({ "Session": ["recZ"], "Title": "Elsewhere" }));
        store.seed(Table::Votes, "recV", json!({ "Session": ["recS"], "Topic": ["recT"], "User": ["recU"] }));
        store.seed(Table::Comments, "recC", json!({ "Session": ["recS"], "Topic": ["recT"], "Body": "+1" }));
        store.seed(Table::Users, "recU", json!({ "Name": "Ada", "Sessions": ["recS"] }));
        store
    }

    #[tokio::test]
    async fn test_load_by_id() {
        let store = seeded();
        let aggregate = load(&store, &SessionLookup::Id("recS".into())).await.unwrap().unwrap();
        assert_eq!(aggregate.session.code.as_deref(), Some("ABC123"));
        assert_eq!(aggregate.board.as_ref().map(|b| b.id.as_str()), Some("recB"));
        assert_eq!(aggregate.vote_limit(), Some(3));
        assert_eq!(aggregate.topics.len(), 1);
        assert_eq!(aggregate.votes.len(), 1);
        assert_eq!(aggregate.comments.len(), 1);
        assert_eq!(aggregate.users.len(), 1);
    }

    #[tokio::test]
    async fn test_load_missing_session() {
        let store = seeded();
        assert!(load(&store, &SessionLookup::Id("recNope".into())).await.unwrap().is_none());
        assert!(load(&store, &SessionLookup::Code("ZZZZZZ".into())).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_board_loads_as_none() {
        let store = seeded();
        store.seed(Table::Sessions, "recOrphan", json!({ "Code": "ORPHAN", "Board": ["recGone"] }));
        let aggregate = load(&store, &SessionLookup::Code("ORPHAN".into())).await.unwrap().unwrap();
        assert!(aggregate.board.is_none());
        assert_eq!(aggregate.vote_limit(), None);
    }

    #[tokio::test]
    async fn test_failing_sub_fetch_fails_load() {
        let store = seeded();
        store.fail(Table::Comments);
        let err = load(&store, &SessionLookup::Id("recS".into())).await.unwrap_err();
        assert_eq!(err.status_code().as_u16(), 503);
    }

    #[tokio::test]
    async fn test_create_then_load_by_code() {
        let store = MemoryStore::new();
        let session = create_session(
            &store,
            CreateSessionRequest {
                board: Some(BoardInput {
                    name: Some("Team board".into()),
                    vote_limit: Some(4),
                    ..Default::default()
                }),
                board_id: None,
                session: Some(SessionInput {
                    name: Some("Week 12".into()),
                    ..Default::default()
                }),
            },
        )
        .await
        .unwrap();

        let code = session.code.clone().unwrap();
        assert_eq!(code.len(), 6);
        assert!(code.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
        assert_eq!(store.count(Table::Boards), 1);

        let aggregate = load(&store, &SessionLookup::Code(code)).await.unwrap().unwrap();
        assert_eq!(aggregate.session.id, session.id);
        assert_eq!(aggregate.session.name.as_deref(), Some("Week 12"));
        assert_eq!(aggregate.vote_limit(), Some(4));
    }

    #[tokio::test]
    async fn test_existing_board_id_wins_over_inline_board() {
        let store = seeded();
        let session = create_session(
            &store,
            CreateSessionRequest {
                board: Some(BoardInput::default()),
                board_id: Some("recB".into()),
                session: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(session.board_id, Some(Link::One("recB".into())));
        assert_eq!(store.count(Table::Boards), 1);
    }

    #[tokio::test]
    async fn test_duplicate_code_is_conflict() {
        let store = seeded();
        let err = create_session(
            &store,
            CreateSessionRequest {
                session: Some(SessionInput {
                    code: Some("ABC123".into()),
                    ..Default::default()
                }),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(store.count(Table::Sessions), 1);
    }

    #[tokio::test]
    async fn test_custom_code_is_case_insensitive() {
        let store = seeded();
        let session = create_session(
            &store,
            CreateSessionRequest {
                session: Some(SessionInput {
                    code: Some(" team42 ".into()),
                    ..Default::default()
                }),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(session.code.as_deref(), Some("TEAM42"));

        let aggregate = load(&store, &SessionLookup::Code("team42".into())).await.unwrap().unwrap();
        assert_eq!(aggregate.session.id, session.id);

        let err = create_session(
            &store,
            CreateSessionRequest {
                session: Some(SessionInput {
                    code: Some("abc123".into()),
                    ..Default::default()
                }),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[test]
    fn test_generate_code_shape() {
        for _ in 0..20 {
            let code = generate_code();
            assert_eq!(code.len(), CODE_LENGTH);
            assert!(code.chars().all(|c| c.is_ascii_alphanumeric() && !c.is_ascii_lowercase()));
        }
    }
}
