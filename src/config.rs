use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Parser)]
#[command(name = "genoexport")]
#[command(about = "Genotype matrix export server")]
pub struct Config {
    /// Host address to bind to
    #[arg(long, env = "GENOEXPORT_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, env = "GENOEXPORT_PORT", default_value = "8080")]
    pub port: u16,

    /// Base URL for artifact download links (e.g., https://example.com)
    #[arg(long, env = "GENOEXPORT_BASE_URL")]
    pub base_url: Option<String>,

    /// Directory containing one JSON document per dataset
    #[arg(long, env = "GENOEXPORT_DATA_DIR", default_value = "./data")]
    pub data_dir: PathBuf,

    /// Directory export artifacts are written to
    #[arg(long, env = "GENOEXPORT_EXPORT_DIR", default_value = "./exports")]
    pub export_dir: PathBuf,

    /// Enable CORS for all origins
    #[arg(long, env = "GENOEXPORT_CORS", default_value = "true")]
    pub cors: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,

    /// Memory budget for one genotype chunk, in bytes
    #[arg(long, env = "GENOEXPORT_CHUNK_BUDGET", default_value = "5242880")]
    pub chunk_budget_bytes: u64,

    /// Exports allowed to run at the same time
    #[arg(long, env = "GENOEXPORT_MAX_RUNNING", default_value = "4")]
    pub max_running_exports: usize,

    /// Exports allowed to be queued or running before new ones are rejected
    #[arg(long, env = "GENOEXPORT_MAX_PENDING", default_value = "16")]
    pub max_pending_exports: usize,

    /// Age after which export artifacts are deleted, in seconds
    #[arg(long, env = "GENOEXPORT_ARTIFACT_RETENTION", default_value = "86400")]
    pub artifact_retention_secs: u64,

    /// Time finished job records stay pollable, in seconds
    #[arg(long, env = "GENOEXPORT_JOB_RETENTION", default_value = "86400")]
    pub job_retention_secs: u64,

    /// Lifetime of a cached page boundary, in seconds
    #[arg(long, env = "GENOEXPORT_CURSOR_TTL", default_value = "60")]
    pub cursor_ttl_secs: u64,

    /// Interval between expired page boundary sweeps, in seconds
    #[arg(long, env = "GENOEXPORT_CURSOR_SWEEP", default_value = "30")]
    pub cursor_sweep_secs: u64,

    /// Largest marker listing page
    #[arg(long, env = "GENOEXPORT_MAX_PAGE_SIZE", default_value = "10000")]
    pub max_page_size: u64,

    /// Largest synchronous allele matrix page, in cells
    #[arg(long, env = "GENOEXPORT_MAX_MATRIX_PAGE", default_value = "30000")]
    pub max_matrix_page_size: u64,

    /// Secret used to bind job ids to caller credentials (random when unset)
    #[arg(long, env = "GENOEXPORT_JOB_SECRET", hide_env_values = true)]
    pub job_secret: Option<String>,
}

impl Config {
    pub fn effective_base_url(&self) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| format!("http://{}:{}", self.host, self.port))
    }

    pub fn artifact_retention(&self) -> Duration {
        Duration::from_secs(self.artifact_retention_secs)
    }

    pub fn job_retention(&self) -> Duration {
        Duration::from_secs(self.job_retention_secs)
    }

    pub fn cursor_ttl(&self) -> Duration {
        Duration::from_secs(self.cursor_ttl_secs)
    }

    pub fn cursor_sweep_period(&self) -> Duration {
        Duration::from_secs(self.cursor_sweep_secs.max(1))
    }
}
