use std::{io, path::Path, time::Duration};

use maiagent_core::UploadSlot;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tokio_util::io::ReaderStream;

const FILE_FIELD: &str = "file";
const OCTET_STREAM: &str = "application/octet-stream";

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("object storage upload failed: {status} - {body}")]
    Rejected { status: StatusCode, body: String },
    #[error("upload slot carries no object key")]
    MissingObjectKey,
}

/// Pushes file bytes straight to object storage using a presigned form.
#[derive(Clone)]
pub struct StorageClient {
    http: Client,
}

impl StorageClient {
    pub fn new() -> Self {
        Self::with_http(Client::new())
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, TransferError> {
        Ok(Self::with_http(Client::builder().timeout(timeout).build()?))
    }

    pub fn with_http(http: Client) -> Self {
        Self { http }
    }

    /// Streams `source` as the `file` part after every presigned field.
    ///
    /// Storage answers 204 on success; anything else is returned with its status and body.
    pub async fn upload_form(
        &self,
        slot: &UploadSlot,
        source: &Path,
        filename: &str,
    ) -> Result<String, TransferError> {
        let key = slot
            .object_key()
            .ok_or(TransferError::MissingObjectKey)?
            .to_string();
        let file = tokio::fs::File::open(source).await?;
        let length = file.metadata().await?.len();
        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
        let part = Part::stream_with_length(body, length)
            .file_name(filename.to_string())
            .mime_str(OCTET_STREAM)?;

        let mut form = Form::new();
        for (name, value) in &slot.fields {
            form = form.text(name.clone(), value.clone());
        }
        form = form.part(FILE_FIELD, part);

        let response = self
            .http
            .post(slot.url.clone())
            .multipart(form)
            .send()
            .await?;
        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            return Ok(key);
        }
        let body = response.text().await.unwrap_or_default();
        Err(TransferError::Rejected { status, body })
    }
}

impl Default for StorageClient {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::tempdir;
    use url::Url;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn slot_for(server: &MockServer) -> UploadSlot {
        let mut fields = BTreeMap::new();
        fields.insert("key".to_string(), "media/in.bin".to_string());
        fields.insert("policy".to_string(), "p0l1cy".to_string());
        UploadSlot {
            url: Url::parse(&format!("{}/bucket", server.uri())).unwrap(),
            fields,
        }
    }

    #[tokio::test]
    async fn uploads_fields_and_file_contents() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bucket"))
            .and(body_string_contains("p0l1cy"))
            .and(body_string_contains("payload-bytes"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let source = dir.path().join("in.bin");
        std::fs::write(&source, b"payload-bytes").unwrap();

        let client = StorageClient::new();
        let key = client
            .upload_form(&slot_for(&server), &source, "in.bin")
            .await
            .unwrap();

        assert_eq!(key, "media/in.bin");
    }

    #[tokio::test]
    async fn non_204_is_rejected_with_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bucket"))
            .respond_with(ResponseTemplate::new(403).set_body_string("SignatureDoesNotMatch"))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let source = dir.path().join("in.bin");
        std::fs::write(&source, b"x").unwrap();

        let err = StorageClient::new()
            .upload_form(&slot_for(&server), &source, "in.bin")
            .await
            .expect_err("expected storage rejection");

        match err {
            TransferError::Rejected { status, body } => {
                assert_eq!(status, StatusCode::FORBIDDEN);
                assert_eq!(body, "SignatureDoesNotMatch");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_source_is_io_error() {
        let server = MockServer::start().await;
        let dir = tempdir().unwrap();

        let err = StorageClient::new()
            .upload_form(&slot_for(&server), &dir.path().join("gone.bin"), "gone.bin")
            .await
            .expect_err("expected io error");

        assert!(matches!(err, TransferError::Io(_)));
    }
}
