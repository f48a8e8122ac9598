use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use maiagent_core::{KnowledgeFile, MaiAgentClient, MaiAgentError, UploadSlot};
use thiserror::Error;

use super::transfer::{StorageClient, TransferError};

pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Remote files as the knowledge base reports them.
pub type RemoteFileRecord = KnowledgeFile;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("network error: {0}")]
    Network(String),
    #[error("remote call timed out")]
    Timeout,
    #[error("upload slot denied: {status} - {body}")]
    SlotDenied { status: u16, body: String },
    #[error("S3 upload failed: {status} - {body}")]
    StorageRejected { status: u16, body: String },
    #[error("registration failed: {status} - {body}")]
    RegistrationFailed { status: u16, body: String },
    #[error("listing failed: {status} - {body}")]
    ListingFailed { status: u16, body: String },
    #[error("deletion failed: {status} - {body}")]
    DeletionFailed { status: u16, body: String },
    #[error("local file {} is unavailable: {source}", path.display())]
    FileSystem {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl GatewayError {
    /// Local file problems and malformed responses will not improve on another attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            GatewayError::FileSystem { .. } | GatewayError::InvalidResponse(_)
        )
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            GatewayError::SlotDenied { status, .. }
            | GatewayError::StorageRejected { status, .. }
            | GatewayError::RegistrationFailed { status, .. }
            | GatewayError::ListingFailed { status, .. }
            | GatewayError::DeletionFailed { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// One page of remote files plus the cursor of the page after it.
#[derive(Debug, Clone, Default)]
pub struct FileListing {
    pub records: Vec<RemoteFileRecord>,
    pub total: u64,
    pub next: Option<u32>,
}

#[async_trait]
pub trait RemoteGateway: Send + Sync {
    async fn request_upload_slot(
        &self,
        filename: &str,
        file_size: u64,
    ) -> Result<UploadSlot, GatewayError>;

    /// Returns the object key the bytes were stored under.
    async fn push_bytes(
        &self,
        slot: &UploadSlot,
        source: &Path,
        filename: &str,
    ) -> Result<String, GatewayError>;

    /// Returns the knowledge-base file id.
    async fn register_file(&self, object_key: &str, filename: &str)
    -> Result<String, GatewayError>;

    /// `page` is 1-based.
    async fn list_files(&self, page: u32) -> Result<FileListing, GatewayError>;

    async fn delete_file(&self, file_id: &str) -> Result<(), GatewayError>;
}

/// Walks every page; stops when the cursor runs out, a page comes back empty,
/// or `max_pages` pages have been read.
pub async fn list_all_files<G>(
    gateway: &G,
    max_pages: Option<u32>,
) -> Result<Vec<RemoteFileRecord>, GatewayError>
where
    G: RemoteGateway + ?Sized,
{
    let mut records = Vec::new();
    let mut page = 1u32;
    let mut pages_read = 0u32;
    loop {
        let listing = gateway.list_files(page).await?;
        pages_read += 1;
        let empty = listing.records.is_empty();
        records.extend(listing.records);
        if empty || max_pages.is_some_and(|max| pages_read >= max) {
            break;
        }
        match listing.next {
            Some(next) if next > page => page = next,
            _ => break,
        }
    }
    Ok(records)
}

/// Production gateway backed by the MaiAgent API and presigned object storage.
#[derive(Clone)]
pub struct KnowledgeBaseGateway {
    client: MaiAgentClient,
    storage: StorageClient,
    knowledge_base_id: String,
    page_size: u32,
}

impl KnowledgeBaseGateway {
    pub fn new(
        client: MaiAgentClient,
        storage: StorageClient,
        knowledge_base_id: impl Into<String>,
    ) -> Self {
        Self {
            client,
            storage,
            knowledge_base_id: knowledge_base_id.into(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn knowledge_base_id(&self) -> &str {
        &self.knowledge_base_id
    }
}

#[async_trait]
impl RemoteGateway for KnowledgeBaseGateway {
    async fn request_upload_slot(
        &self,
        filename: &str,
        file_size: u64,
    ) -> Result<UploadSlot, GatewayError> {
        self.client
            .request_upload_slot(filename, file_size)
            .await
            .map_err(|err| api_error(err, |status, body| GatewayError::SlotDenied { status, body }))
    }

    async fn push_bytes(
        &self,
        slot: &UploadSlot,
        source: &Path,
        filename: &str,
    ) -> Result<String, GatewayError> {
        self.storage
            .upload_form(slot, source, filename)
            .await
            .map_err(|err| transfer_error(err, source))
    }

    async fn register_file(
        &self,
        object_key: &str,
        filename: &str,
    ) -> Result<String, GatewayError> {
        self.client
            .register_file(&self.knowledge_base_id, object_key, filename)
            .await
            .map(|registered| registered.id)
            .map_err(|err| {
                api_error(err, |status, body| GatewayError::RegistrationFailed {
                    status,
                    body,
                })
            })
    }

    async fn list_files(&self, page: u32) -> Result<FileListing, GatewayError> {
        let page = page.max(1);
        let response = self
            .client
            .list_files(&self.knowledge_base_id, page, self.page_size)
            .await
            .map_err(|err| api_error(err, |status, body| GatewayError::ListingFailed { status, body }))?;
        Ok(FileListing {
            next: response.next.as_ref().map(|_| page + 1),
            total: response.count,
            records: response.results,
        })
    }

    async fn delete_file(&self, file_id: &str) -> Result<(), GatewayError> {
        self.client
            .delete_file(&self.knowledge_base_id, file_id)
            .await
            .map_err(|err| api_error(err, |status, body| GatewayError::DeletionFailed { status, body }))
    }
}

fn api_error(err: MaiAgentError, rejected: fn(u16, String) -> GatewayError) -> GatewayError {
    match err {
        MaiAgentError::Api { status, body } => rejected(status.as_u16(), body),
        MaiAgentError::Request(err) if err.is_timeout() => GatewayError::Timeout,
        MaiAgentError::Request(err) => GatewayError::Network(err.to_string()),
        other => GatewayError::InvalidResponse(other.to_string()),
    }
}

fn transfer_error(err: TransferError, source: &Path) -> GatewayError {
    match err {
        TransferError::Io(io) => GatewayError::FileSystem {
            path: source.to_path_buf(),
            source: io,
        },
        TransferError::Rejected { status, body } => GatewayError::StorageRejected {
            status: status.as_u16(),
            body,
        },
        TransferError::Request(err) if err.is_timeout() => GatewayError::Timeout,
        TransferError::Request(err) => GatewayError::Network(err.to_string()),
        err @ TransferError::MissingObjectKey => GatewayError::InvalidResponse(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;
    use tempfile::tempdir;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn gateway_for(server: &MockServer) -> KnowledgeBaseGateway {
        let client = MaiAgentClient::with_base_url(&server.uri(), "test-key").unwrap();
        KnowledgeBaseGateway::new(client, StorageClient::new(), "kb-1").with_page_size(2)
    }

    #[tokio::test]
    async fn slot_denial_keeps_numeric_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/upload-presigned-url/"))
            .respond_with(ResponseTemplate::new(413).set_body_string("too large"))
            .mount(&server)
            .await;

        let err = gateway_for(&server)
            .request_upload_slot("big.bin", 1 << 40)
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::SlotDenied { status: 413, .. }));
        assert_eq!(err.status(), Some(413));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn missing_local_file_is_not_retryable() {
        let server = MockServer::start().await;
        let dir = tempdir().unwrap();
        let slot = UploadSlot {
            url: url::Url::parse(&format!("{}/bucket", server.uri())).unwrap(),
            fields: [("key".to_string(), "k".to_string())].into_iter().collect(),
        };

        let err = gateway_for(&server)
            .push_bytes(&slot, &dir.path().join("vanished.txt"), "vanished.txt")
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::FileSystem { .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn listing_maps_next_link_to_following_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/knowledge-bases/kb-1/files/"))
            .and(query_param("page", "3"))
            .and(query_param("page_size", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "count": 7,
                "next": "https://api.example/?page=4",
                "results": [{ "id": "f5", "filename": "e.txt", "status": "done" }]
            })))
            .mount(&server)
            .await;

        let listing = gateway_for(&server).list_files(3).await.unwrap();

        assert_eq!(listing.next, Some(4));
        assert_eq!(listing.total, 7);
        assert_eq!(listing.records[0].id, "f5");
    }

    struct PagedGateway {
        pages: Vec<FileListing>,
        calls: Mutex<Vec<u32>>,
    }

    #[async_trait]
    impl RemoteGateway for PagedGateway {
        async fn request_upload_slot(&self, _: &str, _: u64) -> Result<UploadSlot, GatewayError> {
            unreachable!()
        }
        async fn push_bytes(&self, _: &UploadSlot, _: &Path, _: &str) -> Result<String, GatewayError> {
            unreachable!()
        }
        async fn register_file(&self, _: &str, _: &str) -> Result<String, GatewayError> {
            unreachable!()
        }
        async fn list_files(&self, page: u32) -> Result<FileListing, GatewayError> {
            self.calls.lock().unwrap().push(page);
            Ok(self
                .pages
                .get(page as usize - 1)
                .cloned()
                .unwrap_or_default())
        }
        async fn delete_file(&self, _: &str) -> Result<(), GatewayError> {
            unreachable!()
        }
    }

    fn record(id: &str) -> RemoteFileRecord {
        RemoteFileRecord {
            id: id.to_string(),
            filename: format!("{id}.txt"),
            created_at: None,
            status: Default::default(),
        }
    }

    #[tokio::test]
    async fn list_all_files_stops_on_empty_page_with_dangling_cursor() {
        let gateway = PagedGateway {
            pages: vec![
                FileListing {
                    records: vec![record("a")],
                    total: 1,
                    next: Some(2),
                },
                FileListing {
                    records: vec![],
                    total: 1,
                    next: Some(3),
                },
            ],
            calls: Mutex::new(Vec::new()),
        };

        let all = list_all_files(&gateway, None).await.unwrap();

        assert_eq!(all.len(), 1);
        assert_eq!(*gateway.calls.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn list_all_files_honours_page_limit() {
        let gateway = PagedGateway {
            pages: vec![
                FileListing {
                    records: vec![record("a")],
                    total: 2,
                    next: Some(2),
                },
                FileListing {
                    records: vec![record("b")],
                    total: 2,
                    next: None,
                },
            ],
            calls: Mutex::new(Vec::new()),
        };

        let first_page = list_all_files(&gateway, Some(1)).await.unwrap();

        assert_eq!(first_page.len(), 1);
        assert_eq!(*gateway.calls.lock().unwrap(), vec![1]);
    }
}
