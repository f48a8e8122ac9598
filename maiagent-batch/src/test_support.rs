//! In-memory knowledge base used by unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use maiagent_core::{FileStatus, UploadSlot};

use crate::upload::gateway::{FileListing, GatewayError, RemoteFileRecord, RemoteGateway};

#[derive(Default)]
struct State {
    remote: Vec<RemoteFileRecord>,
    next_id: u64,
    registrations: Vec<String>,
    register_failures: HashMap<String, VecDeque<GatewayError>>,
    register_then_fail: HashMap<String, u16>,
    delete_failures: HashMap<String, GatewayError>,
    deleted: Vec<String>,
    open_uploads: HashSet<String>,
    peak_open_uploads: usize,
}

pub(crate) struct MemoryGateway {
    state: Mutex<State>,
    call_delay: Duration,
    page_size: usize,
}

impl MemoryGateway {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            call_delay: Duration::ZERO,
            page_size: 2,
        }
    }

    pub(crate) fn with_call_delay(mut self, delay: Duration) -> Self {
        self.call_delay = delay;
        self
    }

    pub(crate) fn with_remote(self, records: Vec<RemoteFileRecord>) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.remote = records;
        }
        self
    }

    /// Registration of `filename` fails with each queued error in turn, then succeeds.
    pub(crate) fn fail_registration(&self, filename: &str, errors: Vec<GatewayError>) {
        self.state
            .lock()
            .unwrap()
            .register_failures
            .insert(filename.to_string(), errors.into());
    }

    /// Registration of `filename` succeeds server-side but answers with `status`.
    pub(crate) fn register_then_fail(&self, filename: &str, status: u16) {
        self.state
            .lock()
            .unwrap()
            .register_then_fail
            .insert(filename.to_string(), status);
    }

    pub(crate) fn fail_deletion(&self, file_id: &str, error: GatewayError) {
        self.state
            .lock()
            .unwrap()
            .delete_failures
            .insert(file_id.to_string(), error);
    }

    pub(crate) fn registrations(&self) -> Vec<String> {
        self.state.lock().unwrap().registrations.clone()
    }

    pub(crate) fn remote_filenames(&self) -> HashSet<String> {
        self.state
            .lock()
            .unwrap()
            .remote
            .iter()
            .map(|record| record.filename.clone())
            .collect()
    }

    pub(crate) fn deleted(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted.clone()
    }

    /// Largest number of files seen between their slot request and their registration.
    pub(crate) fn peak_open_uploads(&self) -> usize {
        self.state.lock().unwrap().peak_open_uploads
    }

    fn open_upload(&self, filename: &str) {
        let mut state = self.state.lock().unwrap();
        state.open_uploads.insert(filename.to_string());
        state.peak_open_uploads = state.peak_open_uploads.max(state.open_uploads.len());
    }

    fn close_upload(&self, filename: &str) {
        self.state.lock().unwrap().open_uploads.remove(filename);
    }

    async fn delay(&self) {
        if !self.call_delay.is_zero() {
            tokio::time::sleep(self.call_delay).await;
        }
    }
}

pub(crate) fn record(id: &str, filename: &str, status: FileStatus) -> RemoteFileRecord {
    RemoteFileRecord {
        id: id.to_string(),
        filename: filename.to_string(),
        created_at: None,
        status,
    }
}

#[async_trait]
impl RemoteGateway for MemoryGateway {
    async fn request_upload_slot(
        &self,
        filename: &str,
        _file_size: u64,
    ) -> Result<UploadSlot, GatewayError> {
        self.open_upload(filename);
        self.delay().await;
        Ok(UploadSlot {
            url: url::Url::parse("https://storage.test/bucket")
                .map_err(|err| GatewayError::InvalidResponse(err.to_string()))?,
            fields: [("key".to_string(), format!("uploads/{filename}"))]
                .into_iter()
                .collect(),
        })
    }

    async fn push_bytes(
        &self,
        slot: &UploadSlot,
        source: &Path,
        filename: &str,
    ) -> Result<String, GatewayError> {
        self.delay().await;
        if let Err(err) = tokio::fs::metadata(source).await {
            self.close_upload(filename);
            return Err(GatewayError::FileSystem {
                path: source.to_path_buf(),
                source: err,
            });
        }
        slot.object_key()
            .map(str::to_string)
            .ok_or_else(|| GatewayError::InvalidResponse("missing key".into()))
    }

    async fn register_file(
        &self,
        _object_key: &str,
        filename: &str,
    ) -> Result<String, GatewayError> {
        self.delay().await;
        self.close_upload(filename);
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state
            .register_failures
            .get_mut(filename)
            .and_then(VecDeque::pop_front)
        {
            return Err(err);
        }
        state.next_id += 1;
        let id = format!("file-{}", state.next_id);
        state.registrations.push(filename.to_string());
        state
            .remote
            .push(record(&id, filename, FileStatus::Processing));
        if let Some(status) = state.register_then_fail.get(filename).copied() {
            return Err(GatewayError::RegistrationFailed {
                status,
                body: "Internal Server Error".into(),
            });
        }
        Ok(id)
    }

    async fn list_files(&self, page: u32) -> Result<FileListing, GatewayError> {
        let state = self.state.lock().unwrap();
        let start = (page.max(1) as usize - 1) * self.page_size;
        let records: Vec<RemoteFileRecord> = state
            .remote
            .iter()
            .skip(start)
            .take(self.page_size)
            .cloned()
            .collect();
        let next = (start + records.len() < state.remote.len()).then_some(page + 1);
        Ok(FileListing {
            records,
            total: state.remote.len() as u64,
            next,
        })
    }

    async fn delete_file(&self, file_id: &str) -> Result<(), GatewayError> {
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.delete_failures.remove(file_id) {
            return Err(err);
        }
        state.remote.retain(|record| record.id != file_id);
        state.deleted.push(file_id.to_string());
        Ok(())
    }
}
