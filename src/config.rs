use crate::cloud::CloudProviderKind;
use anyhow::{bail, Context};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub sessions: SessionConfig,
    pub cloud: CloudConfig,
    pub finalize_mode: FinalizeMode,
    pub metrics_addr: Option<SocketAddr>,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Root for `chunks/` and `videos/`
    pub data_dir: PathBuf,
    pub max_chunk_bytes: usize,
    pub max_simple_upload_bytes: usize,
}

impl StorageConfig {
    pub fn chunks_dir(&self) -> PathBuf {
        self.data_dir.join("chunks")
    }

    pub fn videos_dir(&self) -> PathBuf {
        self.data_dir.join("videos")
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub ttl: Duration,
    pub sweep_interval: Duration,
    /// A `merging`/`uploading` claim untouched for this long is treated as
    /// left behind by a dead process
    pub claim_stale_after: Duration,
}

#[derive(Debug, Clone)]
pub struct CloudConfig {
    pub provider: CloudProviderKind,
    pub cloudflare: Option<CloudflareConfig>,
    pub s3: Option<S3Config>,
    pub retry: RetryConfig,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct CloudflareConfig {
    pub account_id: String,
    pub api_token: String,
    pub api_base: String,
}

#[derive(Debug, Clone)]
pub struct S3Config {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: String,
    pub bucket: String,
    pub endpoint: Option<String>,
    pub force_path_style: bool,
    pub public_base_url: Option<String>,
    pub url_expiry: Duration,
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub max_elapsed: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(5),
            max_elapsed: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeMode {
    /// Cloud upload runs inside the `complete` request
    Sync,
    /// Cloud upload is handed to a spawned task; clients poll the content record
    Background,
}

impl FromStr for FinalizeMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sync" => Ok(FinalizeMode::Sync),
            "background" => Ok(FinalizeMode::Background),
            other => bail!("unknown FINALIZE_MODE '{other}' (expected sync | background)"),
        }
    }
}

/// S3 presigned URLs cannot outlive a week.
const MAX_PRESIGN_EXPIRY_SECS: u64 = 7 * 24 * 3600;

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let provider: CloudProviderKind = env_or("CLOUD_PROVIDER", "local").parse()?;

        let cloudflare = match provider {
            CloudProviderKind::Cloudflare => Some(CloudflareConfig {
                account_id: required("CLOUDFLARE_ACCOUNT_ID")?,
                api_token: required("CLOUDFLARE_API_TOKEN")?,
                api_base: env_or("CLOUDFLARE_API_BASE", "https://api.cloudflare.com/client/v4"),
            }),
            _ => None,
        };

        let s3 = match provider {
            CloudProviderKind::S3 => {
                let expiry_secs: u64 = env_or("S3_URL_EXPIRY_SECS", "604800").parse()?;
                Some(S3Config {
                    access_key_id: required("S3_ACCESS_KEY_ID")?,
                    secret_access_key: required("S3_SECRET_ACCESS_KEY")?,
                    region: env_or("S3_REGION", "us-east-1"),
                    bucket: required("S3_BUCKET")?,
                    endpoint: optional("S3_ENDPOINT"),
                    force_path_style: env_or("S3_FORCE_PATH_STYLE", "false").parse()?,
                    public_base_url: optional("S3_PUBLIC_BASE_URL"),
                    url_expiry: Duration::from_secs(expiry_secs.min(MAX_PRESIGN_EXPIRY_SECS)),
                })
            }
            _ => None,
        };

        let retry = RetryConfig {
            max_attempts: env_or("CLOUD_RETRY_MAX_ATTEMPTS", "3").parse()?,
            initial_interval: Duration::from_millis(env_or("CLOUD_RETRY_INITIAL_MS", "500").parse()?),
            max_interval: Duration::from_millis(
                env_or("CLOUD_RETRY_MAX_INTERVAL_MS", "5000").parse()?,
            ),
            max_elapsed: Duration::from_secs(env_or("CLOUD_RETRY_MAX_ELAPSED_SECS", "60").parse()?),
        };

        let metrics_addr = optional("METRICS_ADDR")
            .map(|addr| addr.parse::<SocketAddr>())
            .transpose()
            .context("METRICS_ADDR must be host:port")?;

        Ok(Self {
            server: ServerConfig {
                host: env_or("SERVER_HOST", "0.0.0.0"),
                port: env_or("SERVER_PORT", "3000").parse()?,
            },
            database: DatabaseConfig {
                url: env_or("DATABASE_URL", "sqlite://coursestream.db"),
            },
            storage: StorageConfig {
                data_dir: PathBuf::from(env_or("DATA_DIR", "./data")),
                max_chunk_bytes: env_or("MAX_CHUNK_BYTES", "52428800").parse()?,
                max_simple_upload_bytes: env_or("MAX_SIMPLE_UPLOAD_BYTES", "104857600").parse()?,
            },
            sessions: SessionConfig {
                ttl: Duration::from_secs(env_or("SESSION_TTL_SECS", "86400").parse()?),
                sweep_interval: Duration::from_secs(
                    env_or("SESSION_SWEEP_INTERVAL_SECS", "600").parse()?,
                ),
                claim_stale_after: Duration::from_secs(
                    env_or("SESSION_CLAIM_STALE_SECS", "3600").parse()?,
                ),
            },
            cloud: CloudConfig {
                provider,
                cloudflare,
                s3,
                retry,
                request_timeout: Duration::from_secs(env_or("CLOUD_TIMEOUT_SECS", "600").parse()?),
            },
            finalize_mode: env_or("FINALIZE_MODE", "sync").parse()?,
            metrics_addr,
        })
    }

    /// Local-only configuration rooted at `data_dir`, backed by in-memory SQLite
    pub fn local(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
            },
            database: DatabaseConfig {
                url: "sqlite::memory:".to_string(),
            },
            storage: StorageConfig {
                data_dir: data_dir.into(),
                max_chunk_bytes: 50 * 1024 * 1024,
                max_simple_upload_bytes: 100 * 1024 * 1024,
            },
            sessions: SessionConfig {
                ttl: Duration::from_secs(86400),
                sweep_interval: Duration::from_secs(600),
                claim_stale_after: Duration::from_secs(3600),
            },
            cloud: CloudConfig {
                provider: CloudProviderKind::Local,
                cloudflare: None,
                s3: None,
                retry: RetryConfig::default(),
                request_timeout: Duration::from_secs(600),
            },
            finalize_mode: FinalizeMode::Sync,
            metrics_addr: None,
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn optional(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn required(key: &str) -> anyhow::Result<String> {
    optional(key).with_context(|| format!("{key} must be set for the selected CLOUD_PROVIDER"))
}
