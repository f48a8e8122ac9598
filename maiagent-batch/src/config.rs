use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

const DEFAULT_MAX_CONCURRENT_UPLOADS: u64 = 10;
const DEFAULT_MAX_RETRIES: u64 = 3;
const DEFAULT_RETRY_DELAY_MS: u64 = 2_000;
const DEFAULT_TIMEOUT_SECS: u64 = 300;
const DEFAULT_PAGE_SIZE: u64 = 100;
const DEFAULT_AMBIGUOUS_STATUSES: &[u16] = &[500];
const OUTPUT_DIR_NAME: &str = "upload_outputs";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),
    #[error("{name} has an invalid value: {value}")]
    Invalid { name: &'static str, value: String },
}

/// Knobs of one scheduler run; fixed once the scheduler is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadConfig {
    pub max_concurrent_uploads: usize,
    pub max_retries: u32,
    pub retry_delay_base: Duration,
    pub timeout: Duration,
    /// Registration statuses that may have succeeded server-side despite the error.
    pub ambiguous_registration_statuses: Vec<u16>,
    pub retry_jitter: bool,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_concurrent_uploads: DEFAULT_MAX_CONCURRENT_UPLOADS as usize,
            max_retries: DEFAULT_MAX_RETRIES as u32,
            retry_delay_base: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            ambiguous_registration_statuses: DEFAULT_AMBIGUOUS_STATUSES.to_vec(),
            retry_jitter: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub api_key: String,
    pub knowledge_base_id: String,
    pub base_url: Option<String>,
    pub files_dir: Option<PathBuf>,
    pub output_root: PathBuf,
    pub page_size: u32,
    pub skip_existing_remote: bool,
    pub upload: UploadConfig,
}

impl BatchConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Resolves configuration through `lookup` so callers can substitute the environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        let api_key = required(&lookup, "MAIAGENT_API_KEY")?;
        let knowledge_base_id = required(&lookup, "MAIAGENT_KNOWLEDGE_BASE_ID")?;
        let base_url = non_empty(&lookup, "MAIAGENT_BASE_URL");
        let files_dir =
            non_empty(&lookup, "MAIAGENT_FILES_DIR").map(|value| expand_with_home(&value, &home));
        let output_root = non_empty(&lookup, "MAIAGENT_OUTPUT_DIR")
            .map(|value| expand_with_home(&value, &home))
            .unwrap_or_else(default_output_root);

        let upload = UploadConfig {
            max_concurrent_uploads: read_u64(
                &lookup,
                "MAIAGENT_MAX_CONCURRENT_UPLOADS",
                DEFAULT_MAX_CONCURRENT_UPLOADS,
            )? as usize,
            max_retries: read_u64_allow_zero(&lookup, "MAIAGENT_MAX_RETRIES", DEFAULT_MAX_RETRIES)?
                .min(u64::from(u32::MAX)) as u32,
            retry_delay_base: Duration::from_millis(read_u64_allow_zero(
                &lookup,
                "MAIAGENT_RETRY_DELAY_MS",
                DEFAULT_RETRY_DELAY_MS,
            )?),
            timeout: Duration::from_secs(read_u64(
                &lookup,
                "MAIAGENT_TIMEOUT_SECS",
                DEFAULT_TIMEOUT_SECS,
            )?),
            ambiguous_registration_statuses: match non_empty(&lookup, "MAIAGENT_AMBIGUOUS_STATUSES")
            {
                Some(value) => parse_status_list("MAIAGENT_AMBIGUOUS_STATUSES", &value)?,
                None => DEFAULT_AMBIGUOUS_STATUSES.to_vec(),
            },
            retry_jitter: read_bool(&lookup, "MAIAGENT_RETRY_JITTER", false)?,
        };

        Ok(Self {
            api_key,
            knowledge_base_id,
            base_url,
            files_dir,
            output_root,
            page_size: read_u64(&lookup, "MAIAGENT_PAGE_SIZE", DEFAULT_PAGE_SIZE)?
                .min(u64::from(u32::MAX)) as u32,
            skip_existing_remote: read_bool(&lookup, "MAIAGENT_SKIP_EXISTING", true)?,
            upload,
        })
    }

    pub fn require_files_dir(&self) -> Result<&Path, ConfigError> {
        self.files_dir
            .as_deref()
            .ok_or(ConfigError::Missing("MAIAGENT_FILES_DIR"))
    }

    /// Output folder for this source/knowledge-base pair: `<dir name>_<first 8 of kb id>`.
    pub fn run_dir(&self) -> PathBuf {
        let folder = self
            .files_dir
            .as_deref()
            .and_then(|dir| dir.components().next_back())
            .map(|name| name.as_os_str().to_string_lossy().into_owned())
            .filter(|name| !name.is_empty() && name != "/")
            .unwrap_or_else(|| "default".to_string());
        let kb_prefix: String = self.knowledge_base_id.chars().take(8).collect();
        self.output_root.join(format!("{folder}_{kb_prefix}"))
    }

    pub fn checkpoint_dir(&self) -> PathBuf {
        self.run_dir().join("checkpoints")
    }

    pub fn report_dir(&self) -> PathBuf {
        self.run_dir().join("reports")
    }
}

fn required<F>(lookup: &F, name: &'static str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    non_empty(lookup, name).ok_or(ConfigError::Missing(name))
}

fn non_empty<F>(lookup: &F, name: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_status_list(name: &'static str, value: &str) -> Result<Vec<u16>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<u16>()
                .ok()
                .filter(|code| (100..=599).contains(code))
                .ok_or_else(|| ConfigError::Invalid {
                    name,
                    value: value.to_string(),
                })
        })
        .collect()
}

fn expand_with_home(value: &str, home: &Path) -> PathBuf {
    if value == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = value.strip_prefix("~/") {
        return home.join(rest);
    }
    PathBuf::from(value)
}

fn default_output_root() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("maiagent-batch"))
        .unwrap_or_else(|| PathBuf::from("."))
        .join(OUTPUT_DIR_NAME)
}

fn read_u64<F>(lookup: &F, name: &'static str, default: u64) -> Result<u64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match read_u64_allow_zero(lookup, name, default)? {
        0 => Err(ConfigError::Invalid {
            name,
            value: "0".to_string(),
        }),
        value => Ok(value),
    }
}

fn read_u64_allow_zero<F>(lookup: &F, name: &'static str, default: u64) -> Result<u64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(value) = non_empty(lookup, name) else {
        return Ok(default);
    };
    value
        .parse::<u64>()
        .map_err(|_| ConfigError::Invalid { name, value })
}

fn read_bool<F>(lookup: &F, name: &'static str, default: bool) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(value) = non_empty(lookup, name) else {
        return Ok(default);
    };
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid { name, value }),
    }
}
