//! Shared HTTP plumbing for the backend.
//!
//! Every request goes through [`ApiClient::send`], which turns a non-success
//! status into an [`ApiError`]. A 403 whose body is a feature-access refusal
//! is kept structured; everything else becomes a transport failure.

use std::time::Duration;

use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::engine_config::BackendSection;
use crate::errors::{ApiError, FeatureAccessError};

#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(backend: &BackendSection) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(backend.connect_timeout_secs))
            .user_agent(concat!("tutorstream/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base_url: backend.base_url.trim_end_matches('/').to_string(),
            token: backend.api_token.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    /// Start a request with auth applied.
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = self.url(path);
        debug!(%method, %url, "backend request");
        let builder = self.http.request(method, url);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Send a request and check its status. The body of a successful
    /// response is left unread.
    pub async fn send(&self, builder: RequestBuilder) -> Result<Response, ApiError> {
        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let err = classify(status, &body);
        warn!(status = status.as_u16(), "backend request failed: {}", err);
        Err(err)
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self.send(self.request(Method::GET, path)).await?;
        decode(response).await
    }

    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self
            .send(self.request(Method::POST, path).json(body))
            .await?;
        decode(response).await
    }

    /// POST where the response body is not needed.
    pub async fn post_unit<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<(), ApiError> {
        self.send(self.request(Method::POST, path).json(body))
            .await
            .map(|_| ())
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    let status = response.status().as_u16();
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| ApiError::Transport {
        status: Some(status),
        message: format!("Invalid response body: {}", e),
    })
}

/// Map a failed response to an [`ApiError`].
pub fn classify(status: StatusCode, body: &str) -> ApiError {
    if status == StatusCode::FORBIDDEN
        && let Ok(refusal) = serde_json::from_str::<FeatureAccessError>(body)
    {
        return ApiError::FeatureAccess(refusal);
    }

    ApiError::Transport {
        status: Some(status.as_u16()),
        message: error_text(status, body),
    }
}

/// Best human-readable message from an error body: an `error` or `detail`
/// string field if the body is JSON, else the trimmed text.
fn error_text(status: StatusCode, body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for field in ["error", "detail"] {
            if let Some(text) = value.get(field).and_then(|v| v.as_str()) {
                return text.to_string();
            }
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("unknown error")
            .to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_403_with_feature_body_is_structured() {
        let body = r#"{"error":"Diagrams need Pro","feature":"diagram_generation","current_plan":"free","upgrade_message":"Upgrade now","upgrade_url":"/pricing"}"#;
        match classify(StatusCode::FORBIDDEN, body) {
            ApiError::FeatureAccess(e) => {
                assert_eq!(e.feature, "diagram_generation");
                assert_eq!(e.upgrade_url, "/pricing");
            }
            other => panic!("expected FeatureAccess, got {:?}", other),
        }
    }

    #[test]
    fn test_403_without_feature_body_is_transport() {
        let err = classify(StatusCode::FORBIDDEN, r#"{"detail":"Not authenticated"}"#);
        match err {
            ApiError::Transport { status, message } => {
                assert_eq!(status, Some(403));
                assert_eq!(message, "Not authenticated");
            }
            other => panic!("expected Transport, got {:?}", other),
        }
    }

    #[test]
    fn test_feature_body_on_other_status_is_transport() {
        let body = r#"{"error":"x","feature":"f","current_plan":"free"}"#;
        assert!(matches!(
            classify(StatusCode::INTERNAL_SERVER_ERROR, body),
            ApiError::Transport { status: Some(500), .. }
        ));
    }

    #[test]
    fn test_error_text_fallbacks() {
        assert_eq!(
            error_text(StatusCode::BAD_GATEWAY, "  upstream died \n"),
            "upstream died"
        );
        assert_eq!(error_text(StatusCode::BAD_GATEWAY, ""), "Bad Gateway");
    }

    #[test]
    fn test_url_joining() {
        let backend = BackendSection {
            base_url: "http://localhost:8000/".to_string(),
            ..BackendSection::default()
        };
        let client = ApiClient::new(&backend).unwrap();
        assert_eq!(client.base_url(), "http://localhost:8000");
        assert_eq!(client.url("/api/history"), "http://localhost:8000/api/history");
        assert_eq!(client.url("api/history"), "http://localhost:8000/api/history");
    }
}
