//! Runtime configuration.
//!
//! A [`Config`] starts from the defaults of its [`Mode`], then takes any key
//! present in the optional TOML file given with `--config`.

use super::types::*;
use crate::decoy::selector::SERVER_BANNERS;
use crate::error_handling::types::ConfigError;
use clap::Parser;
use hyper::header::HeaderValue;
use reqwest::Url;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Command-line arguments.
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "leurre")]
#[command(version)]
#[command(about = "A low-interaction HTTP and SSH honeypot")]
pub struct Args {
    /// Use the local port, database and collector set
    ///
    /// Switches every default at once: the decoys listen on 8080 and 2222
    /// instead of 80 and 22, events go to `data.db` in the working directory
    /// and exports go to a collector on the loopback interface. An export also
    /// runs right after startup.
    ///
    /// # Command Line
    /// Use `--debug` to enable it. This is a boolean flag that doesn't take a
    /// value
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub debug: bool,

    /// TOML file overriding individual settings
    ///
    /// Only the keys present in the file replace the defaults picked by
    /// `--debug`. Unknown keys are an error, so a typo never falls back to a
    /// default silently.
    ///
    /// # Command Line
    /// Use `--config <PATH>` or the `LEURRE_CONFIG` environment variable
    #[arg(long, env = "LEURRE_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Resolved runtime settings.
///
/// Every field below can be overridden from the `--config` file; the TOML key
/// is given in each field's documentation.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Which default set the remaining fields started from
    pub mode: Mode,

    /// Address the HTTP decoy accepts connections on
    ///
    /// # File
    /// `http_addr = "0.0.0.0:80"`
    pub http_addr: SocketAddr,

    /// Address the SSH decoy accepts connections on
    ///
    /// # File
    /// `ssh_addr = "0.0.0.0:22"`
    pub ssh_addr: SocketAddr,

    /// SQLite file holding captured events until they are exported
    ///
    /// The file and its schema are created on first start. Its parent
    /// directory must already exist.
    ///
    /// # File
    /// `database_path = "/srv/observer/sqlite/data.db"`
    pub database_path: PathBuf,

    /// Endpoint every export is POSTed to
    ///
    /// Must be an absolute `http` or `https` URL with a host. Rows are only
    /// deleted once this endpoint answers with a 2xx status.
    ///
    /// # File
    /// `collector_url = "https://collector.example/collect"`
    pub collector_url: String,

    /// Time between two scheduled exports
    ///
    /// # File
    /// `export_interval_secs = 300`
    pub export_interval: Duration,

    /// Bound on a whole collector round trip, body upload included
    ///
    /// A cycle that hits it keeps every row for the next one.
    ///
    /// # File
    /// `export_timeout_secs = 120`
    pub export_timeout: Duration,

    /// Run one export as soon as the process is up
    ///
    /// # File
    /// `export_on_startup = true`
    pub export_on_startup: bool,

    /// Number of request body bytes stored per HTTP request
    ///
    /// Anything past it is discarded and the request is stored with a
    /// truncation error.
    ///
    /// # File
    /// `http_body_cap = 1024`
    pub http_body_cap: usize,

    /// Time allowed to receive the request head
    ///
    /// # File
    /// `http_read_timeout_secs = 5`
    pub http_read_timeout: Duration,

    /// Bound on a whole HTTP connection, response included
    ///
    /// # File
    /// `http_write_timeout_secs = 10`
    pub http_write_timeout: Duration,

    /// SSH connections silent for this long are closed
    ///
    /// # File
    /// `ssh_idle_timeout_secs = 5`
    pub ssh_idle_timeout: Duration,

    /// Hard bound on an SSH connection, handshake included
    ///
    /// # File
    /// `ssh_max_connection_secs = 10`
    pub ssh_max_connection: Duration,

    /// Identification line the SSH decoy announces
    ///
    /// Must start with `SSH-2.0-`.
    ///
    /// # File
    /// `ssh_version = "SSH-2.0-OpenSSH_8.4p1 Debian-5+deb11u1"`
    pub ssh_version: String,

    /// OpenSSH private key; an ephemeral Ed25519 key is generated when unset
    ///
    /// A fixed key keeps the host fingerprint stable across restarts, which a
    /// returning scanner would otherwise notice.
    ///
    /// # File
    /// `ssh_host_key = "/etc/leurre/ssh_host_ed25519_key"`
    pub ssh_host_key: Option<PathBuf>,

    /// Time a capture may wait on the store before it is dropped
    ///
    /// # File
    /// `append_timeout_millis = 2000`
    pub append_timeout: Duration,

    /// `Server` header values handed out to HTTP clients
    ///
    /// Each must be a valid header value, so no control characters.
    ///
    /// # File
    /// `banners = ["nginx/1.21.0", "Apache/2.4.54 (Debian)"]`
    pub banners: Vec<String>,
}

pub const DEFAULT_SSH_VERSION: &str = "SSH-2.0-OpenSSH_8.4p1 Debian-5+deb11u1";

fn parse_addr(key: &str, value: &str) -> Result<SocketAddr, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::BadAddress(format!("{} = {:?}", key, value)))
}

fn secs(value: u64) -> Duration {
    Duration::from_secs(value)
}

impl Config {
    /// Defaults for `mode`.
    pub fn for_mode(mode: Mode) -> Self {
        let (http_port, ssh_port, database_path, collector_url) = match mode {
            Mode::Production => (
                80,
                22,
                "/srv/observer/sqlite/data.db",
                "https://data.botcheckup.io:3001/collect",
            ),
            Mode::Debug => (
                8080,
                2222,
                "data.db",
                "http://127.0.0.1:3002/collect",
            ),
        };

        Self {
            mode,
            http_addr: SocketAddr::from(([0, 0, 0, 0], http_port)),
            ssh_addr: SocketAddr::from(([0, 0, 0, 0], ssh_port)),
            database_path: PathBuf::from(database_path),
            collector_url: collector_url.to_string(),
            export_interval: secs(300),
            export_timeout: secs(120),
            export_on_startup: mode == Mode::Debug,
            http_body_cap: 1024,
            http_read_timeout: secs(5),
            http_write_timeout: secs(10),
            ssh_idle_timeout: secs(5),
            ssh_max_connection: secs(10),
            ssh_version: DEFAULT_SSH_VERSION.to_string(),
            ssh_host_key: None,
            append_timeout: Duration::from_millis(2000),
            banners: SERVER_BANNERS.iter().map(|b| b.to_string()).collect(),
        }
    }

    /// Builds the configuration from parsed command-line arguments.
    pub fn from_args(args: &Args) -> Result<Self, ConfigError> {
        let mode = if args.debug { Mode::Debug } else { Mode::Production };
        let config = match &args.config {
            Some(path) => Self::for_mode(mode).with_file(path)?,
            None => Self::for_mode(mode),
        };
        config.validate()?;
        Ok(config)
    }

    /// Applies the overrides of the TOML file at `path`.
    pub fn with_file(self, path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        self.with_toml(&raw)
    }

    pub fn with_toml(mut self, raw: &str) -> Result<Self, ConfigError> {
        let file: FileOverrides =
            toml::from_str(raw).map_err(|e| ConfigError::TomlError(e.to_string()))?;

        if let Some(addr) = file.http_addr {
            self.http_addr = parse_addr("http_addr", &addr)?;
        }
        if let Some(addr) = file.ssh_addr {
            self.ssh_addr = parse_addr("ssh_addr", &addr)?;
        }
        if let Some(path) = file.database_path {
            self.database_path = path;
        }
        if let Some(url) = file.collector_url {
            self.collector_url = url;
        }
        if let Some(v) = file.export_interval_secs {
            self.export_interval = secs(v);
        }
        if let Some(v) = file.export_timeout_secs {
            self.export_timeout = secs(v);
        }
        if let Some(v) = file.export_on_startup {
            self.export_on_startup = v;
        }
        if let Some(v) = file.http_body_cap {
            self.http_body_cap = v;
        }
        if let Some(v) = file.http_read_timeout_secs {
            self.http_read_timeout = secs(v);
        }
        if let Some(v) = file.http_write_timeout_secs {
            self.http_write_timeout = secs(v);
        }
        if let Some(v) = file.ssh_idle_timeout_secs {
            self.ssh_idle_timeout = secs(v);
        }
        if let Some(v) = file.ssh_max_connection_secs {
            self.ssh_max_connection = secs(v);
        }
        if let Some(v) = file.ssh_version {
            self.ssh_version = v;
        }
        if let Some(path) = file.ssh_host_key {
            self.ssh_host_key = Some(path);
        }
        if let Some(v) = file.append_timeout_millis {
            self.append_timeout = Duration::from_millis(v);
        }
        if let Some(v) = file.banners {
            self.banners = v;
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_zero = [
            ("export_interval_secs", self.export_interval),
            ("export_timeout_secs", self.export_timeout),
            ("http_read_timeout_secs", self.http_read_timeout),
            ("http_write_timeout_secs", self.http_write_timeout),
            ("ssh_idle_timeout_secs", self.ssh_idle_timeout),
            ("ssh_max_connection_secs", self.ssh_max_connection),
            ("append_timeout_millis", self.append_timeout),
        ];
        for (key, value) in non_zero {
            if value.is_zero() {
                return Err(ConfigError::NotInRange(format!("{} must be positive", key)));
            }
        }
        if self.http_body_cap == 0 {
            return Err(ConfigError::NotInRange(
                "http_body_cap must be positive".to_string(),
            ));
        }
        if self.banners.is_empty() {
            return Err(ConfigError::NotInRange(
                "banners must not be empty".to_string(),
            ));
        }
        if let Some(banner) = self
            .banners
            .iter()
            .find(|b| HeaderValue::from_str(b).is_err())
        {
            return Err(ConfigError::NotInRange(format!(
                "banner {:?} is not a valid header value",
                banner
            )));
        }
        if !self.ssh_version.starts_with("SSH-2.0-") {
            return Err(ConfigError::NotInRange(format!(
                "ssh_version {:?} must start with SSH-2.0-",
                self.ssh_version
            )));
        }

        let url = Url::parse(&self.collector_url)
            .map_err(|e| ConfigError::BadUrl(format!("{:?}: {}", self.collector_url, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::BadUrl(format!(
                "{:?} is not http(s)",
                self.collector_url
            )));
        }
        if url.host_str().map_or(true, str::is_empty) {
            return Err(ConfigError::BadUrl(format!(
                "{:?} has no host",
                self.collector_url
            )));
        }
        Ok(())
    }
}
