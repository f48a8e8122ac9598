pub mod backoff;
pub mod checkpoint;
pub mod gateway;
pub mod progress;
pub mod queue;
pub mod scan;
pub mod scheduler;
pub mod task;
pub mod transfer;

pub use checkpoint::{CheckpointDelta, CheckpointError, CheckpointRecord, CheckpointStore};
pub use gateway::{GatewayError, KnowledgeBaseGateway, RemoteFileRecord, RemoteGateway};
pub use scheduler::{RunSummary, SchedulerError, UploadScheduler};
pub use task::{UploadStatus, UploadTask};
