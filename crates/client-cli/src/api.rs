//! HTTP client for the board server

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use shared::{
    CastVoteResponse, Comment, CommentInput, RetractVoteResponse, SessionAggregate, SessionLookup,
    Topic, TopicInput, User, UserInput, VoteInput, VOTE_LIMIT_REACHED,
};
use thiserror::Error;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8888/.netlify/functions/airtable";

#[derive(Error, Debug)]
pub enum ApiError {
    /// The server answered with a non-success status
    #[error("{message}")]
    Status {
        status: u16,
        /// Machine readable error code, when the server sent one
        code: Option<String>,
        message: String,
        payload: Value,
    },

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid server url: {0}")]
    InvalidUrl(String),
}

impl ApiError {
    fn from_payload(status: u16, reason: &str, payload: Value) -> Self {
        let code = payload.get("error").and_then(Value::as_str).map(str::to_string);
        let detail = payload.get("message").and_then(Value::as_str);
        // A spent budget carries a readable message next to its code
        let message = if code.as_deref() == Some(VOTE_LIMIT_REACHED) {
            detail.or(code.as_deref())
        } else {
            code.as_deref().or(detail)
        }
        .unwrap_or(reason)
        .to_string();

        ApiError::Status {
            status,
            code,
            message,
            payload,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// The server refused a vote because the budget is spent
    pub fn is_vote_limit(&self) -> bool {
        matches!(self, ApiError::Status { code: Some(code), .. } if code == VOTE_LIMIT_REACHED)
    }
}

/// Operations the session store needs from the server
#[async_trait]
pub trait BoardApi: Send + Sync {
    async fn get_session(&self, lookup: &SessionLookup) -> Result<SessionAggregate, ApiError>;
    async fn create_topic(&self, input: &TopicInput) -> Result<Topic, ApiError>;
    async fn update_topic(&self, topic_id: &str, input: &TopicInput) -> Result<Topic, ApiError>;
    async fn cast_vote(&self, input: &VoteInput) -> Result<CastVoteResponse, ApiError>;
    async fn retract_vote(&self, vote_id: &str) -> Result<RetractVoteResponse, ApiError>;
    async fn create_user(&self, input: &UserInput) -> Result<User, ApiError>;
    async fn create_comment(&self, input: &CommentInput) -> Result<Comment, ApiError>;
}

/// Normalise a configured server address. Relative paths are taken to be on
/// the local development server.
pub fn resolve_base_url(base: Option<&str>) -> Result<Url, ApiError> {
    let base = base.map(str::trim).filter(|base| !base.is_empty());
    let raw = match base {
        Some(base) if base.starts_with("http://") || base.starts_with("https://") => base.to_string(),
        Some(path) => format!("http://localhost:8888/{}", path.trim_start_matches('/')),
        None => DEFAULT_BASE_URL.to_string(),
    };
    let url = Url::parse(raw.trim_end_matches('/'))
        .map_err(|e| ApiError::InvalidUrl(format!("{}: {}", raw, e)))?;
    if url.cannot_be_a_base() {
        return Err(ApiError::InvalidUrl(raw));
    }
    Ok(url)
}

#[derive(Clone)]
pub struct HttpApi {
    client: Client,
    base: Url,
}

impl HttpApi {
    pub fn new(base: Option<&str>) -> Result<Self, ApiError> {
        Ok(Self {
            client: Client::new(),
            base: resolve_base_url(base)?,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn url(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidUrl(self.base.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, segments: &[&str]) -> Result<RequestBuilder, ApiError> {
        let url = self.url(segments)?;
        tracing::debug!("{} {}", method, url);
        Ok(self
            .client
            .request(method, url)
            .header(reqwest::header::ACCEPT, "application/json"))
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ApiError> {
        let response = request.send().await?;
        let status = response.status();
        let payload = read_payload(response).await?;

        if !status.is_success() {
            let reason = status.canonical_reason().unwrap_or("request failed");
            return Err(ApiError::from_payload(status.as_u16(), reason, payload));
        }

        serde_json::from_value(payload).map_err(|e| ApiError::Status {
            status: status.as_u16(),
            code: None,
            message: format!("unexpected response: {}", e),
            payload: Value::Null,
        })
    }
}

async fn read_payload(response: Response) -> Result<Value, ApiError> {
    let text = response.text().await?;
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(&text).unwrap_or_else(|_| json!({ "message": text })))
}

#[async_trait]
impl BoardApi for HttpApi {
    async fn get_session(&self, lookup: &SessionLookup) -> Result<SessionAggregate, ApiError> {
        let request = match lookup {
            SessionLookup::Id(id) => self.request(Method::GET, &["sessions", id])?,
            SessionLookup::Code(code) => self
                .request(Method::GET, &["sessions"])?
                .query(&[("code", code.as_str())]),
        };
        self.send(request).await
    }

    async fn create_topic(&self, input: &TopicInput) -> Result<Topic, ApiError> {
        self.send(self.request(Method::POST, &["topics"])?.json(input)).await
    }

    async fn update_topic(&self, topic_id: &str, input: &TopicInput) -> Result<Topic, ApiError> {
        self.send(self.request(Method::PATCH, &["topics", topic_id])?.json(input))
            .await
    }

    async fn cast_vote(&self, input: &VoteInput) -> Result<CastVoteResponse, ApiError> {
        self.send(self.request(Method::POST, &["votes"])?.json(input)).await
    }

    async fn retract_vote(&self, vote_id: &str) -> Result<RetractVoteResponse, ApiError> {
        self.send(self.request(Method::DELETE, &["votes", vote_id])?).await
    }

    async fn create_user(&self, input: &UserInput) -> Result<User, ApiError> {
        self.send(self.request(Method::POST, &["users"])?.json(input)).await
    }

    async fn create_comment(&self, input: &CommentInput) -> Result<Comment, ApiError> {
        self.send(self.request(Method::POST, &["comments"])?.json(input)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_base_url() {
        assert_eq!(resolve_base_url(None).unwrap().as_str(), DEFAULT_BASE_URL);
        assert_eq!(
            resolve_base_url(Some("https://board.example.com/api/")).unwrap().as_str(),
            "https://board.example.com/api"
        );
        assert_eq!(
            resolve_base_url(Some("/.netlify/functions/airtable")).unwrap().as_str(),
            DEFAULT_BASE_URL
        );
        assert!(resolve_base_url(Some("http://")).is_err());
    }

    #[test]
    fn test_request_urls() {
        let api = HttpApi::new(Some("https://board.example.com/.netlify/functions/airtable")).unwrap();
        assert_eq!(
            api.url(&["votes", "recV1"]).unwrap().as_str(),
            "https://board.example.com/.netlify/functions/airtable/votes/recV1"
        );
        assert_eq!(
            api.url(&["topics", "rec/odd"]).unwrap().as_str(),
            "https://board.example.com/.netlify/functions/airtable/topics/rec%2Fodd"
        );
    }

    #[test]
    fn test_vote_limit_error_is_recognised() {
        let err = ApiError::from_payload(
            400,
            "Bad Request",
            json!({ "error": "vote_limit_reached", "message": "You have used all of your votes for this session." }),
        );
        assert!(err.is_vote_limit());
        assert_eq!(err.to_string(), "You have used all of your votes for this session.");
    }

    #[test]
    fn test_error_message_fallbacks() {
        let err = ApiError::from_payload(404, "Not Found", json!({ "error": "Session not found" }));
        assert_eq!(err.to_string(), "Session not found");
        assert!(!err.is_vote_limit());

        let err = ApiError::from_payload(502, "Bad Gateway", json!({ "message": "upstream down" }));
        assert_eq!(err.to_string(), "upstream down");

        let err = ApiError::from_payload(500, "Internal Server Error", Value::Null);
        assert_eq!(err.to_string(), "Internal Server Error");
        assert_eq!(err.status(), Some(500));
    }
}
