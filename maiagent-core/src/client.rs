use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

pub const DEFAULT_BASE_URL: &str = "https://api.maiagent.ai/api/v1/";
const KNOWLEDGE_FILE_MODEL: &str = "chatbot-file";
const KNOWLEDGE_FILE_FIELD: &str = "file";

#[derive(Debug, Error)]
pub enum MaiAgentError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("failed to decode api response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("api response missing required field `{0}`")]
    MissingField(&'static str),
}

#[derive(Clone)]
pub struct MaiAgentClient {
    http: Client,
    base_url: Url,
    api_key: String,
}

impl MaiAgentClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self, MaiAgentError> {
        Self::with_base_url(DEFAULT_BASE_URL, api_key)
    }

    pub fn with_base_url(base_url: &str, api_key: impl Into<String>) -> Result<Self, MaiAgentError> {
        Self::with_http(Client::new(), base_url, api_key)
    }

    /// Builds a client whose every request is bounded by `timeout`.
    pub fn with_timeout(
        base_url: &str,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, MaiAgentError> {
        let http = Client::builder().timeout(timeout).build()?;
        Self::with_http(http, base_url, api_key)
    }

    pub fn with_http(
        http: Client,
        base_url: &str,
        api_key: impl Into<String>,
    ) -> Result<Self, MaiAgentError> {
        // Relative endpoints are joined onto the base, which needs a trailing slash.
        let base_url = if base_url.ends_with('/') {
            Url::parse(base_url)?
        } else {
            Url::parse(&format!("{base_url}/"))?
        };
        Ok(Self {
            http,
            base_url,
            api_key: api_key.into(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub async fn request_upload_slot(
        &self,
        filename: &str,
        file_size: u64,
    ) -> Result<UploadSlot, MaiAgentError> {
        let url = self.endpoint("upload-presigned-url/")?;
        let payload = UploadSlotRequest {
            filename,
            model_name: KNOWLEDGE_FILE_MODEL,
            field_name: KNOWLEDGE_FILE_FIELD,
            file_size,
        };
        let response = self
            .http
            .post(url)
            .header("Authorization", self.auth_header_value())
            .json(&payload)
            .send()
            .await?;
        let slot: UploadSlot = Self::handle_response(response).await?;
        if slot.object_key().is_none() {
            return Err(MaiAgentError::MissingField("fields.key"));
        }
        Ok(slot)
    }

    pub async fn register_files(
        &self,
        knowledge_base_id: &str,
        files: &[FileRegistration],
    ) -> Result<Vec<RegisteredFile>, MaiAgentError> {
        let url = self.endpoint(&format!("knowledge-bases/{knowledge_base_id}/files/"))?;
        let response = self
            .http
            .post(url)
            .header("Authorization", self.auth_header_value())
            .json(&RegisterFilesRequest { files })
            .send()
            .await?;
        Self::handle_response(response).await
    }

    /// Registers one uploaded object and returns the id the knowledge base assigned to it.
    pub async fn register_file(
        &self,
        knowledge_base_id: &str,
        object_key: &str,
        filename: &str,
    ) -> Result<RegisteredFile, MaiAgentError> {
        let registration = FileRegistration {
            file: object_key.to_string(),
            filename: filename.to_string(),
        };
        self.register_files(knowledge_base_id, std::slice::from_ref(&registration))
            .await?
            .into_iter()
            .next()
            .ok_or(MaiAgentError::MissingField("id"))
    }

    pub async fn list_files(
        &self,
        knowledge_base_id: &str,
        page: u32,
        page_size: u32,
    ) -> Result<FilePage, MaiAgentError> {
        let mut url = self.endpoint(&format!("knowledge-bases/{knowledge_base_id}/files/"))?;
        url.query_pairs_mut()
            .append_pair("page", &page.max(1).to_string())
            .append_pair("page_size", &page_size.max(1).to_string());
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        Self::handle_response(response).await
    }

    pub async fn delete_file(
        &self,
        knowledge_base_id: &str,
        file_id: &str,
    ) -> Result<(), MaiAgentError> {
        let url = self.endpoint(&format!(
            "knowledge-bases/{knowledge_base_id}/files/{file_id}/"
        ))?;
        let response = self
            .http
            .delete(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        if response.status().is_success() {
            return Ok(());
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(MaiAgentError::Api { status, body })
    }

    fn auth_header_value(&self) -> String {
        format!("Api-Key {}", self.api_key)
    }

    fn endpoint(&self, path: &str) -> Result<Url, MaiAgentError> {
        Ok(self.base_url.join(path)?)
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, MaiAgentError> {
        let status = response.status();
        let body = response.text().await?;
        if status.is_success() {
            Ok(serde_json::from_str(&body)?)
        } else {
            Err(MaiAgentError::Api { status, body })
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadSlotRequest<'a> {
    filename: &'a str,
    model_name: &'a str,
    field_name: &'a str,
    file_size: u64,
}

/// Presigned object-storage target: the form must carry every field before the file part.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct UploadSlot {
    pub url: Url,
    pub fields: BTreeMap<String, String>,
}

impl UploadSlot {
    pub fn object_key(&self) -> Option<&str> {
        self.fields.get("key").map(String::as_str)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FileRegistration {
    pub file: String,
    pub filename: String,
}

#[derive(Debug, Serialize)]
struct RegisterFilesRequest<'a> {
    files: &'a [FileRegistration],
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegisteredFile {
    pub id: String,
    #[serde(default)]
    pub filename: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FilePage {
    #[serde(default)]
    pub count: u64,
    #[serde(default)]
    pub results: Vec<KnowledgeFile>,
    #[serde(default)]
    pub next: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct KnowledgeFile {
    pub id: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default, rename = "createdAt", alias = "created_at")]
    pub created_at: Option<CreatedAt>,
    #[serde(default)]
    pub status: FileStatus,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Initial,
    Processing,
    Done,
    Failed,
    #[default]
    #[serde(other)]
    Other,
}

impl FileStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FileStatus::Initial => "initial",
            FileStatus::Processing => "processing",
            FileStatus::Done => "done",
            FileStatus::Failed => "failed",
            FileStatus::Other => "other",
        }
    }
}

/// Creation time as the API reports it: epoch milliseconds or a formatted string.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum CreatedAt {
    Millis(i64),
    Text(String),
}

impl fmt::Display for CreatedAt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CreatedAt::Millis(ms) => write!(f, "{ms}"),
            CreatedAt::Text(text) => f.write_str(text),
        }
    }
}
