//! REST client for the diagram backend.
//!
//! Thin wrapper over `reqwest`: bearer auth on every call, JSON bodies in
//! and out, binary bodies for generated code archives. Non-2xx responses
//! become [`ApiError::Status`] with the response body. No retries.

use std::collections::BTreeMap;

use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::ClientConfig;
use crate::protocol::DiagramId;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("no bearer token configured")]
    MissingToken,
    #[error("backend returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("could not decode response: {0}")]
    Decode(String),
}

/// A diagram as listed by the backend. Fields we don't model are kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagramRecord {
    pub id: DiagramId,
    #[serde(default)]
    pub name: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Code artifact the backend can build from a diagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactTarget {
    SpringBoot,
    Flutter,
}

impl ArtifactTarget {
    fn path(&self) -> &'static str {
        match self {
            ArtifactTarget::SpringBoot => "generate-code",
            ArtifactTarget::Flutter => "generate-flutter",
        }
    }

    pub fn default_project_name(&self, id: DiagramId) -> String {
        match self {
            ArtifactTarget::SpringBoot => format!("diagram-{id}-springboot"),
            ArtifactTarget::Flutter => format!("diagram_{id}_flutter"),
        }
    }

    pub fn default_base_package(&self) -> &'static str {
        match self {
            ArtifactTarget::SpringBoot => "com.example.demo",
            ArtifactTarget::Flutter => "com.example.app",
        }
    }

    /// Flutter projects must be snake_case: lowercase, `[a-z0-9_]` only,
    /// no leading or trailing underscores.
    pub fn normalize_project_name(&self, name: &str) -> String {
        match self {
            ArtifactTarget::SpringBoot => name.to_string(),
            ArtifactTarget::Flutter => name
                .to_lowercase()
                .chars()
                .map(|c| if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' { c } else { '_' })
                .collect::<String>()
                .trim_matches('_')
                .to_string(),
        }
    }
}

#[derive(Serialize)]
struct NameBody<'a> {
    name: &'a str,
}

pub struct BackendClient {
    http: Client,
    base_url: String,
    token: String,
}

impl BackendClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    /// Build from config; fails when no token is set.
    pub fn from_config(config: &ClientConfig) -> Result<Self, ApiError> {
        let token = config.token.clone().ok_or(ApiError::MissingToken)?;
        Ok(Self::new(config.backend_url.clone(), token))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn execute(&self, request: RequestBuilder) -> Result<Response, ApiError> {
        let response = request.bearer_auth(&self.token).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            log::warn!("Backend request failed with {status}");
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn json<T: serde::de::DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ApiError> {
        let bytes = self.execute(request).await?.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| ApiError::Decode(e.to_string()))
    }

    // ─── Diagrams ────────────────────────────────────────────────

    pub async fn list_diagrams(&self) -> Result<Vec<DiagramRecord>, ApiError> {
        self.json(self.http.get(self.url("/diagrams"))).await
    }

    /// Diagrams other users shared with us.
    pub async fn list_shared(&self) -> Result<Vec<DiagramRecord>, ApiError> {
        self.json(self.http.get(self.url("/diagrams/shared"))).await
    }

    pub async fn get_diagram(&self, id: DiagramId) -> Result<DiagramRecord, ApiError> {
        self.json(self.http.get(self.url(&format!("/diagrams/{id}")))).await
    }

    pub async fn create_diagram(&self, name: &str) -> Result<DiagramRecord, ApiError> {
        let request = self
            .http
            .post(self.url("/diagrams"))
            .json(&NameBody { name: name.trim() });
        self.json(request).await
    }

    pub async fn rename_diagram(&self, id: DiagramId, name: &str) -> Result<DiagramRecord, ApiError> {
        let request = self
            .http
            .patch(self.url(&format!("/diagrams/{id}")))
            .json(&NameBody { name: name.trim() });
        self.json(request).await
    }

    pub async fn delete_diagram(&self, id: DiagramId) -> Result<(), ApiError> {
        self.execute(self.http.delete(self.url(&format!("/diagrams/{id}"))))
            .await?;
        Ok(())
    }

    // ─── Sharing ─────────────────────────────────────────────────

    pub async fn find_user_by_email(&self, email: &str) -> Result<UserRecord, ApiError> {
        let mut url = reqwest::Url::parse(&self.url("/users/email/"))
            .map_err(|e| ApiError::Decode(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| ApiError::Decode("backend URL cannot carry a path".into()))?
            .pop_if_empty()
            .push(email.trim());
        self.json(self.http.get(url)).await
    }

    pub async fn share_diagram(&self, id: DiagramId, user_id: i64) -> Result<(), ApiError> {
        self.execute(self.http.post(self.url(&format!("/diagrams/{id}/share/{user_id}"))))
            .await?;
        log::info!("Shared diagram {id} with user {user_id}");
        Ok(())
    }

    /// Look the user up by email, then share with their id.
    pub async fn share_with_email(&self, id: DiagramId, email: &str) -> Result<UserRecord, ApiError> {
        let user = self.find_user_by_email(email).await?;
        self.share_diagram(id, user.id).await?;
        Ok(user)
    }

    // ─── Code export ─────────────────────────────────────────────

    /// Ask the backend to build a project archive. Returns the raw bytes
    /// (a zip) and the project name used.
    pub async fn export_code(
        &self,
        id: DiagramId,
        target: ArtifactTarget,
        project_name: Option<&str>,
        base_package: Option<&str>,
    ) -> Result<(String, Vec<u8>), ApiError> {
        let project = project_name
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| target.default_project_name(id));
        let project = target.normalize_project_name(&project);
        let package = base_package
            .map(str::trim)
            .filter(|package| !package.is_empty())
            .unwrap_or(target.default_base_package());

        let request = self
            .http
            .post(self.url(&format!("/diagrams/{id}/{}", target.path())))
            .query(&[("projectName", project.as_str()), ("basePackage", package)]);
        let bytes = self.execute(request).await?.bytes().await?;
        log::info!("Exported {project} ({} bytes)", bytes.len());
        Ok((project, bytes.to_vec()))
    }
}
