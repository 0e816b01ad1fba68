//! # SSH decoy
//!
//! Speaks SSH up to user authentication and no further: only the `password`
//! method is offered, every attempt is recorded and rejected, and no channel
//! is ever opened.
//!
//! The client identification line (`SSH-2.0-...`) is read by peeking the
//! socket before the handshake takes it over, so it can be stored with each
//! attempt made on the connection.
//!
//! Our own identification line is only written once the peek returns. Most
//! clients send theirs on connect, so the peek is immediate for them. Clients
//! that wait for the server first see it after `IDENT_WAIT`, which a
//! scanner timing the banner can notice; the wait is kept short for that
//! reason and their attempts are stored with an empty `client_ver`.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, trace, warn};
use russh::server::{self, Auth};
use russh::{MethodSet, SshId};
use russh_keys::key::KeyPair;
use tokio::net::{TcpListener, TcpStream};

use super::types::{client_address, unix_now};
use crate::data_capture::recorder::EventRecorder;
use crate::data_capture::types::{CapturedEvent, SshAuthCapture};
use crate::error_handling::types::NetworkError;

/// RFC 4253 caps the identification line at 255 bytes, CR LF included.
const MAX_IDENT_LEN: usize = 255;
const PEEK_RETRY: Duration = Duration::from_millis(10);
/// Clients that wait for the server line first get it after this delay.
const IDENT_WAIT: Duration = Duration::from_millis(300);
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshSettings {
    /// Identification string sent to clients
    pub version: String,
    pub idle_timeout: Duration,
    /// Hard bound on a connection, handshake included
    pub max_connection: Duration,
}

pub struct SshListener {
    listener: TcpListener,
    config: Arc<server::Config>,
    recorder: Arc<EventRecorder>,
    settings: SshSettings,
}

/// Loads the OpenSSH private key at `path`, or generates an Ed25519 key for
/// this run when no path is given.
pub fn host_key(path: Option<&Path>) -> Result<KeyPair, NetworkError> {
    match path {
        Some(path) => russh_keys::load_secret_key(path, None)
            .map_err(|e| NetworkError::HostKey(format!("{}: {}", path.display(), e))),
        None => {
            let key: Option<KeyPair> = KeyPair::generate_ed25519().into();
            let key = key.ok_or_else(|| NetworkError::HostKey("key generation failed".into()))?;
            warn!("No SSH host key configured, using an ephemeral Ed25519 key");
            Ok(key)
        }
    }
}

/// First complete `SSH-` line in `buf`, without its line ending.
pub fn parse_client_version(buf: &[u8]) -> Option<String> {
    let mut rest = buf;
    while let Some(end) = rest.iter().position(|b| *b == b'\n') {
        let line = &rest[..end];
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.starts_with(b"SSH-") {
            return Some(String::from_utf8_lossy(line).into_owned());
        }
        rest = &rest[end + 1..];
    }
    None
}

/// Peeks at the client's identification line without consuming it. Gives up
/// with an empty string after `wait`, or once the line cannot be complete.
async fn peek_client_version(stream: &TcpStream, wait: Duration) -> String {
    let peek = async {
        let mut buf = [0u8; MAX_IDENT_LEN];
        let mut seen = 0;
        loop {
            let n = match stream.peek(&mut buf).await {
                Ok(0) | Err(_) => return String::new(),
                Ok(n) => n,
            };
            if let Some(version) = parse_client_version(&buf[..n]) {
                return version;
            }
            if n == buf.len() {
                return String::new();
            }
            // Same bytes as last time, wait for more to arrive.
            if n == seen {
                tokio::time::sleep(PEEK_RETRY).await;
            }
            seen = n;
        }
    };
    tokio::time::timeout(wait, peek).await.unwrap_or_default()
}

/// Per-connection authentication handler.
struct AttemptRecorder {
    address: String,
    client_ver: String,
    recorder: Arc<EventRecorder>,
}

#[async_trait]
impl server::Handler for AttemptRecorder {
    type Error = russh::Error;

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth, Self::Error> {
        let attempt = SshAuthCapture {
            address: self.address.clone(),
            time: unix_now(),
            user: user.to_string(),
            pass: password.to_string(),
            client_ver: self.client_ver.clone(),
        };
        trace!("[{}] SSH password attempt for {:?}", self.address, user);
        self.recorder.capture(CapturedEvent::Ssh(attempt)).await;

        // Keep offering `password` so the client goes on to its next guess.
        Ok(Auth::Reject {
            proceed_with_methods: Some(MethodSet::PASSWORD),
        })
    }
}

impl SshListener {
    pub async fn bind(
        addr: SocketAddr,
        key: KeyPair,
        recorder: Arc<EventRecorder>,
        settings: SshSettings,
    ) -> Result<Self, NetworkError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(NetworkError::BindError)?;

        let config = server::Config {
            server_id: SshId::Standard(settings.version.clone()),
            methods: MethodSet::PASSWORD,
            inactivity_timeout: Some(settings.idle_timeout),
            keys: vec![key],
            ..Default::default()
        };

        Ok(Self {
            listener,
            config: Arc::new(config),
            recorder,
            settings,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, NetworkError> {
        self.listener.local_addr().map_err(NetworkError::SockError)
    }

    pub async fn run(self) {
        if let Ok(addr) = self.local_addr() {
            info!("SSH decoy listening on {} as {}", addr, self.settings.version);
        }

        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    warn!("SSH accept failed: {}", e);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            };
            debug!("[{}] SSH connection accepted", peer);

            let config = Arc::clone(&self.config);
            let recorder = Arc::clone(&self.recorder);
            let settings = self.settings.clone();
            tokio::spawn(async move {
                let session = async {
                    let wait = settings.idle_timeout.min(IDENT_WAIT);
                    let client_ver = peek_client_version(&stream, wait).await;
                    let handler = AttemptRecorder {
                        address: client_address(peer),
                        client_ver,
                        recorder,
                    };
                    server::run_stream(config, stream, handler).await?.await
                };

                match tokio::time::timeout(settings.max_connection, session).await {
                    Ok(Ok(())) => trace!("[{}] SSH connection closed", peer),
                    Ok(Err(e)) => debug!("[{}] SSH session ended: {}", peer, e),
                    Err(_) => debug!(
                        "[{}] SSH connection cut after {:?}",
                        peer, settings.max_connection
                    ),
                }
            });
        }
    }
}
