//! The HTTP seam: traits the cache and session depend on, and the
//! `reqwest` implementation that talks to the CodeGrade API.

use std::sync::RwLock;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use codegrade_auth::{Credentials, PermissionMap, PermissionScope, Session};
use codegrade_core::UserId;

use crate::config::ClientConfig;

/// Error payload the server sends with non-2xx responses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub description: String,
    /// Server API code (e.g. 7 = login failure, 1 = not logged in).
    #[serde(default)]
    pub code: Option<i64>,
}

impl core::fmt::Display for ApiErrorBody {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} (code {})", self.message, code),
            None => f.write_str(&self.message),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("failed to build HTTP client: {0}")]
    Client(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("API error ({status}): {body}")]
    Api { status: u16, body: ApiErrorBody },
    #[error("parse error: {0}")]
    Parse(String),
}

impl ApiError {
    /// The server-reported payload, if the server answered at all.
    pub fn body(&self) -> Option<&ApiErrorBody> {
        match self {
            ApiError::Api { body, .. } => Some(body),
            _ => None,
        }
    }
}

/// User payload returned by `POST /login` and `GET /login`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPayload {
    pub id: UserId,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}

impl UserPayload {
    /// Convert into a session, using `fallback_email` when the server omitted it.
    pub fn into_session(self, fallback_email: Option<&str>) -> Session {
        Session {
            id: self.id,
            name: self.name,
            email: self
                .email
                .or_else(|| fallback_email.map(str::to_string))
                .unwrap_or_default(),
            token: self.access_token,
        }
    }
}

/// Source of full permission maps, one scope at a time.
#[async_trait]
pub trait PermissionSource: Send + Sync {
    async fn fetch_permissions(&self, scope: PermissionScope) -> Result<PermissionMap, ApiError>;
}

/// Authentication endpoints.
#[async_trait]
pub trait AuthApi: Send + Sync {
    async fn login(&self, credentials: &Credentials) -> Result<UserPayload, ApiError>;
    /// The user of the current cookie/token, if it is still valid.
    async fn current_user(&self) -> Result<UserPayload, ApiError>;
    async fn logout(&self) -> Result<(), ApiError>;
    /// Bearer token attached to subsequent requests.
    fn set_access_token(&self, token: Option<String>);
}

/// `reqwest`-based client for the CodeGrade API.
///
/// Keeps a cookie jar, so cookie-based sessions work without a token.
pub struct HttpApi {
    api_url: String,
    client: reqwest::Client,
    token: RwLock<Option<String>>,
}

impl HttpApi {
    pub fn new(api_url: impl Into<String>) -> Result<Self, ApiError> {
        Self::from_config(&ClientConfig::new(api_url))
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ApiError::Client(e.to_string()))?;

        Ok(Self {
            api_url: config.api_url.trim_end_matches('/').to_string(),
            client,
            token: RwLock::new(None),
        })
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.api_url, path);
        let mut req = self.client.request(method, url);

        if let Ok(token) = self.token.read() {
            if let Some(token) = token.as_deref() {
                req = req.bearer_auth(token);
            }
        }
        req
    }

    async fn send(&self, req: RequestBuilder) -> Result<reqwest::Response, ApiError> {
        let resp = req.send().await.map_err(|e| ApiError::Network(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(ApiError::Api {
                status: status.as_u16(),
                body: error_body(status, &text),
            });
        }

        Ok(resp)
    }

    async fn send_json<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, ApiError> {
        let resp = self.send(req).await?;
        resp.json().await.map_err(|e| ApiError::Parse(e.to_string()))
    }
}

impl core::fmt::Debug for HttpApi {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let has_token = self.token.read().map(|t| t.is_some()).unwrap_or(false);
        f.debug_struct("HttpApi")
            .field("api_url", &self.api_url)
            .field("has_token", &has_token)
            .finish()
    }
}

/// Decode an error response, keeping the raw text when it is not a
/// well-formed error payload.
fn error_body(status: StatusCode, text: &str) -> ApiErrorBody {
    match serde_json::from_str::<ApiErrorBody>(text) {
        Ok(body) if !body.message.is_empty() => body,
        _ => ApiErrorBody {
            message: if text.is_empty() {
                status.canonical_reason().unwrap_or("request failed").to_string()
            } else {
                text.to_string()
            },
            ..ApiErrorBody::default()
        },
    }
}

#[async_trait]
impl PermissionSource for HttpApi {
    async fn fetch_permissions(&self, scope: PermissionScope) -> Result<PermissionMap, ApiError> {
        let req = match scope {
            PermissionScope::Global => self
                .request(Method::GET, "/api/v1/permissions/")
                .query(&[("type", "global")]),
            PermissionScope::Course(id) => {
                self.request(Method::GET, &format!("/api/v1/courses/{id}/permissions/"))
            }
        };
        self.send_json(req).await
    }
}

#[async_trait]
impl AuthApi for HttpApi {
    async fn login(&self, credentials: &Credentials) -> Result<UserPayload, ApiError> {
        let req = self.request(Method::POST, "/api/v1/login").json(credentials);
        self.send_json(req).await
    }

    async fn current_user(&self) -> Result<UserPayload, ApiError> {
        let req = self
            .request(Method::GET, "/api/v1/login")
            .query(&[("type", "extended")]);
        self.send_json(req).await
    }

    async fn logout(&self) -> Result<(), ApiError> {
        let req = self.request(Method::POST, "/api/v1/logout");
        self.send(req).await.map(|_| ())
    }

    fn set_access_token(&self, token: Option<String>) {
        match self.token.write() {
            Ok(mut guard) => *guard = token,
            Err(_) => tracing::error!("access token lock poisoned; token not updated"),
        }
    }
}
