// HTTP collaborator for the chat backend
// Contact directory, transcripts and message submission

use async_trait::async_trait;
use log::{debug, info};
use reqwest::{Method, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;

use crate::models::{Contact, Message, MessagePayload};

/// Errors that can occur while talking to the backend
#[derive(Debug, Error)]
pub enum ApiError {
    /// Request rejected before reaching the server, or the network is unreachable
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),

    /// Server answered with a non-success status
    #[error("Server returned {status}: {}", .message.as_deref().unwrap_or("no details"))]
    Status { status: u16, message: Option<String> },

    /// Base URL cannot carry request paths
    #[error("Invalid base URL: {0}")]
    InvalidUrl(String),
}

impl ApiError {
    /// Message supplied by the backend, if any, suitable for showing to the user
    pub fn user_message(&self) -> Option<&str> {
        match self {
            ApiError::Status { message: Some(message), .. } if !message.is_empty() => Some(message),
            _ => None,
        }
    }
}

/// The three backend endpoints the conversation store depends on
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// `GET /messages/users`
    async fn fetch_contacts(&self) -> Result<Vec<Contact>, ApiError>;

    /// `GET /messages/{contact_id}`
    async fn fetch_transcript(&self, contact_id: &str) -> Result<Vec<Message>, ApiError>;

    /// `POST /messages/send/{contact_id}`
    async fn send_message(&self, contact_id: &str, payload: &MessagePayload) -> Result<Message, ApiError>;
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

/// Extract the `{ "message": ... }` field from an error response body
fn error_message(body: &str) -> Option<String> {
    serde_json::from_str::<ErrorBody>(body).ok().and_then(|b| b.message)
}

/// reqwest-backed [`ChatApi`]. Authenticates with the backend's `jwt` session cookie.
pub struct HttpChatApi {
    client: reqwest::Client,
    base_url: Url,
    token: Option<String>,
}

impl HttpChatApi {
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self, ApiError> {
        let base_url = Url::parse(base_url).map_err(|e| ApiError::InvalidUrl(format!("{}: {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(ApiError::InvalidUrl(base_url.to_string()));
        }
        info!("HTTP API endpoint: {}", base_url);

        Ok(HttpChatApi {
            client: reqwest::Client::new(),
            base_url,
            token,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, segments: &[&str]) -> Result<RequestBuilder, ApiError> {
        let url = self.endpoint(segments)?;
        debug!("{} {}", method, url);

        let mut builder = self.client.request(method, url);
        if let Some(token) = &self.token {
            builder = builder.header(reqwest::header::COOKIE, format!("jwt={}", token));
        }
        Ok(builder)
    }

    async fn read<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl ChatApi for HttpChatApi {
    async fn fetch_contacts(&self) -> Result<Vec<Contact>, ApiError> {
        let response = self.request(Method::GET, &["messages", "users"])?.send().await?;
        Self::read(response).await
    }

    async fn fetch_transcript(&self, contact_id: &str) -> Result<Vec<Message>, ApiError> {
        let response = self.request(Method::GET, &["messages", contact_id])?.send().await?;
        Self::read(response).await
    }

    async fn send_message(&self, contact_id: &str, payload: &MessagePayload) -> Result<Message, ApiError> {
        let response = self
            .request(Method::POST, &["messages", "send", contact_id])?
            .json(payload)
            .send()
            .await?;
        Self::read(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_joins_segments() {
        let api = HttpChatApi::new("http://localhost:5001/api/", None).unwrap();
        let url = api.endpoint(&["messages", "send", "abc123"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:5001/api/messages/send/abc123");

        let api = HttpChatApi::new("http://localhost:5001/api", None).unwrap();
        let url = api.endpoint(&["messages", "users"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:5001/api/messages/users");
    }

    #[test]
    fn test_endpoint_escapes_ids() {
        let api = HttpChatApi::new("http://localhost:5001/api", None).unwrap();
        let url = api.endpoint(&["messages", "a/b"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:5001/api/messages/a%2Fb");
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(matches!(HttpChatApi::new("not a url", None), Err(ApiError::InvalidUrl(_))));
        assert!(matches!(HttpChatApi::new("mailto:me@example.com", None), Err(ApiError::InvalidUrl(_))));
    }

    #[test]
    fn test_error_message_from_body() {
        assert_eq!(error_message(r#"{"message":"Unauthorized - No Token Provided"}"#).as_deref(),
                   Some("Unauthorized - No Token Provided"));
        assert_eq!(error_message(r#"{"error":"nope"}"#), None);
        assert_eq!(error_message("<html>Bad Gateway</html>"), None);
    }

    #[test]
    fn test_user_message() {
        let err = ApiError::Status { status: 401, message: Some("Unauthorized".to_string()) };
        assert_eq!(err.user_message(), Some("Unauthorized"));
        assert_eq!(err.to_string(), "Server returned 401: Unauthorized");

        let err = ApiError::Status { status: 500, message: None };
        assert_eq!(err.user_message(), None);
        assert_eq!(err.to_string(), "Server returned 500: no details");

        let err = ApiError::Status { status: 500, message: Some(String::new()) };
        assert_eq!(err.user_message(), None);
    }
}
