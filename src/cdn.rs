//! Blob-store seam for uploaded text bodies.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use std::sync::RwLock;
use thiserror::Error;
use uuid::Uuid;

/// Failure from a blob-store upload.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct CdnError(pub String);

/// Upload interface the coordinator persists text bodies through.
#[async_trait]
pub trait Cdn: Send + Sync {
    /// Uploads `content` under the user's namespace and returns the
    /// public URL where it can be fetched.
    async fn upload_text(
        &self,
        user_id: Uuid,
        filename: &str,
        content: &str,
    ) -> Result<String, CdnError>;
}

/// Blob store backed by a GitHub repository's contents API, served
/// publicly through jsDelivr.
pub struct GitHubCdn {
    owner: String,
    repo: String,
    token: String,
    client: reqwest::Client,
}

impl GitHubCdn {
    /// Builds a CDN client for `owner/repo` authenticating with `token`.
    pub fn new(owner: &str, repo: &str, token: &str) -> Result<Self, CdnError> {
        if owner.is_empty() || token.is_empty() {
            return Err(CdnError("cdn owner or token not configured".into()));
        }
        let client = reqwest::Client::builder()
            .user_agent("mindmesh")
            .build()
            .map_err(|e| CdnError(format!("http client: {e}")))?;
        Ok(Self {
            owner: owner.to_string(),
            repo: repo.to_string(),
            token: token.to_string(),
            client,
        })
    }

    fn content_url(&self, user_id: Uuid, filename: &str) -> String {
        format!(
            "https://api.github.com/repos/{}/{}/contents/texts/{}/{}",
            self.owner, self.repo, user_id, filename
        )
    }
}

#[async_trait]
impl Cdn for GitHubCdn {
    async fn upload_text(
        &self,
        user_id: Uuid,
        filename: &str,
        content: &str,
    ) -> Result<String, CdnError> {
        let url = self.content_url(user_id, filename);
        let auth = format!("Bearer {}", self.token);

        // An existing file needs its blob SHA for the update call.
        let existing = self
            .client
            .get(&url)
            .header("Authorization", &auth)
            .header("Accept", "application/vnd.github.v3+json")
            .send()
            .await
            .map_err(|e| CdnError(format!("lookup failed: {e}")))?;

        let mut payload = serde_json::json!({
            "message": format!("Add text: {filename}"),
            "content": BASE64.encode(content),
            "branch": "main",
        });
        if existing.status().is_success() {
            if let Ok(body) = existing.json::<serde_json::Value>().await {
                if let Some(sha) = body.get("sha").and_then(|s| s.as_str()) {
                    payload["sha"] = serde_json::Value::String(sha.to_string());
                    payload["message"] =
                        serde_json::Value::String(format!("Update text: {filename}"));
                }
            }
        }

        let response = self
            .client
            .put(&url)
            .header("Authorization", &auth)
            .header("Accept", "application/vnd.github.v3+json")
            .json(&payload)
            .send()
            .await
            .map_err(|e| CdnError(format!("upload failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CdnError(format!("upload returned {status}: {body}")));
        }

        Ok(format!(
            "https://cdn.jsdelivr.net/gh/{}/{}@main/texts/{}/{}",
            self.owner, self.repo, user_id, filename
        ))
    }
}

/// In-process blob store for tests and deployments without credentials.
#[derive(Default)]
pub struct InMemoryCdn {
    uploads: RwLock<Vec<(Uuid, String, String)>>,
}

impl InMemoryCdn {
    /// Builds an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of uploads recorded, for assertions in tests.
    pub fn upload_count(&self) -> usize {
        self.uploads.read().unwrap().len()
    }
}

#[async_trait]
impl Cdn for InMemoryCdn {
    async fn upload_text(
        &self,
        user_id: Uuid,
        filename: &str,
        content: &str,
    ) -> Result<String, CdnError> {
        self.uploads
            .write()
            .unwrap()
            .push((user_id, filename.to_string(), content.to_string()));
        Ok(format!("memory://{user_id}/{filename}"))
    }
}
