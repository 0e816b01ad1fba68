use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;

/// Port, storage and collector set the process runs with.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub enum Mode {
    #[default]
    Production,
    Debug,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Production => write!(f, "production"),
            Mode::Debug => write!(f, "debug"),
        }
    }
}

/// Optional overrides read from a TOML file. Every key is optional; what is
/// left out keeps the mode default.
///
/// ```toml
/// http_addr = "127.0.0.1:8080"
/// collector_url = "https://collector.example/collect"
/// export_interval_secs = 60
/// ```
#[derive(Debug, PartialEq, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileOverrides {
    pub http_addr: Option<String>,
    pub ssh_addr: Option<String>,
    pub database_path: Option<PathBuf>,
    pub collector_url: Option<String>,
    pub export_interval_secs: Option<u64>,
    pub export_timeout_secs: Option<u64>,
    pub export_on_startup: Option<bool>,
    pub http_body_cap: Option<usize>,
    pub http_read_timeout_secs: Option<u64>,
    pub http_write_timeout_secs: Option<u64>,
    pub ssh_idle_timeout_secs: Option<u64>,
    pub ssh_max_connection_secs: Option<u64>,
    pub ssh_version: Option<String>,
    pub ssh_host_key: Option<PathBuf>,
    pub append_timeout_millis: Option<u64>,
    pub banners: Option<Vec<String>>,
}
