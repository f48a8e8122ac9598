mod client;

pub use client::{
    CreatedAt, DEFAULT_BASE_URL, FilePage, FileRegistration, FileStatus, KnowledgeFile,
    MaiAgentClient, MaiAgentError, RegisteredFile, UploadSlot,
};
pub use reqwest::StatusCode;
