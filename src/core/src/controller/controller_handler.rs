//! Process wiring.
//!
//! ```text
//!                 ┌───────────────┐
//!  HTTP :80 ─────▶│ HttpListener  │──┐
//!                 └───────────────┘  │   ┌───────────────┐   ┌─────────┐
//!                                    ├──▶│ EventRecorder │──▶│ Storage │
//!                 ┌───────────────┐  │   └───────────────┘   └────┬────┘
//!  SSH :22 ──────▶│ SshListener   │──┘                            │
//!                 └───────────────┘                               ▼
//!                                       ┌────────────────┐   ┌─────────────┐
//!  timer / SIGUSR1 ────────────────────▶│ ExportScheduler│──▶│ ExportCycle │──▶ collector
//!                                       └────────────────┘   └─────────────┘
//! ```
//!
//! Everything fallible happens in [`Controller::new`]: a process that gets
//! past it has its store open, its decoys loaded and both ports bound.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use log::{error, info, warn};
use tokio::task::JoinHandle;

use crate::configuration::config::Config;
use crate::data_capture::recorder::EventRecorder;
use crate::decoy::catalog::PageCatalog;
use crate::decoy::selector::DecoySelector;
use crate::error_handling::types::*;
use crate::export::collector::{Collector, HttpCollector};
use crate::export::export_cycle::{ExportCycle, ExportScheduler, ExportTrigger};
use crate::network::http_listener::{HttpDecoy, HttpLimits, HttpListener};
use crate::network::ssh_listener::{host_key, SshListener, SshSettings};
use crate::storage::database_storage::DatabaseStorage;
use crate::storage::storage_trait::Storage;

pub struct Controller {
    http: HttpListener,
    ssh: SshListener,
    scheduler: ExportScheduler,
}

impl Controller {
    /// Opens the SQLite store named in `config`, then builds everything else.
    pub async fn new(config: Config) -> Result<Self, ControllerError> {
        let storage = DatabaseStorage::new_file(&config.database_path).await?;
        let collector = HttpCollector::new(config.collector_url.clone(), config.export_timeout)
            .map_err(|e| ControllerError::InitializationFailed(e.to_string()))?;
        Self::with_parts(config, Arc::new(storage), Arc::new(collector)).await
    }

    /// Builds a controller around an already opened store and collector.
    pub async fn with_parts(
        config: Config,
        storage: Arc<dyn Storage>,
        collector: Arc<dyn Collector>,
    ) -> Result<Self, ControllerError> {
        info!("Starting in {} mode", config.mode);
        warn!("Captured SSH credentials are stored and exported in cleartext");

        let catalog = PageCatalog::embedded()?;
        let selector = Arc::new(DecoySelector::new(config.banners.clone(), catalog)?);
        info!(
            "Loaded {} decoy pages and {} banners",
            selector.page_count(),
            selector.banner_count()
        );

        let recorder = Arc::new(EventRecorder::new(
            Arc::clone(&storage),
            config.append_timeout,
        ));

        let limits = HttpLimits {
            body_cap: config.http_body_cap,
            read_timeout: config.http_read_timeout,
            write_timeout: config.http_write_timeout,
        };
        let http = HttpListener::bind(
            config.http_addr,
            HttpDecoy::new(selector, Arc::clone(&recorder), limits),
        )
        .await?;

        let key = host_key(config.ssh_host_key.as_deref())?;
        let settings = SshSettings {
            version: config.ssh_version.clone(),
            idle_timeout: config.ssh_idle_timeout,
            max_connection: config.ssh_max_connection,
        };
        let ssh = SshListener::bind(config.ssh_addr, key, recorder, settings).await?;

        let cycle = Arc::new(ExportCycle::new(storage, collector));
        let scheduler =
            ExportScheduler::new(cycle, config.export_interval, config.export_on_startup);

        Ok(Self {
            http,
            ssh,
            scheduler,
        })
    }

    pub fn http_addr(&self) -> Result<SocketAddr, ControllerError> {
        Ok(self.http.local_addr()?)
    }

    pub fn ssh_addr(&self) -> Result<SocketAddr, ControllerError> {
        Ok(self.ssh.local_addr()?)
    }

    pub fn export_trigger(&self) -> ExportTrigger {
        self.scheduler.trigger()
    }

    /// Runs until Ctrl-C.
    pub async fn run(self) -> Result<(), ControllerError> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Unable to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Ctrl-C received, shutting down");
        })
        .await
    }

    /// Runs both decoys and the export loop until `shutdown` resolves or one
    /// of them stops.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), ControllerError>
    where
        F: Future<Output = ()>,
    {
        let signals = spawn_signal_trigger(self.scheduler.trigger());
        let mut http = tokio::spawn(self.http.run());
        let mut ssh = tokio::spawn(self.ssh.run());
        let mut export = tokio::spawn(self.scheduler.run());

        let result = tokio::select! {
            _ = shutdown => Ok(()),
            res = &mut http => Err(stopped("HTTP listener", res)),
            res = &mut ssh => Err(stopped("SSH listener", res)),
            res = &mut export => Err(stopped("export scheduler", res)),
        };

        for task in [http, ssh, export] {
            task.abort();
        }
        if let Some(signals) = signals {
            signals.abort();
        }
        result
    }
}

fn stopped(task: &str, res: Result<(), tokio::task::JoinError>) -> ControllerError {
    let reason = match res {
        Ok(()) => format!("{} stopped", task),
        Err(e) => format!("{} failed: {}", task, e),
    };
    error!("{}", reason);
    ControllerError::InitializationFailed(reason)
}

/// Fires `trigger` on every SIGUSR1.
#[cfg(unix)]
fn spawn_signal_trigger(trigger: ExportTrigger) -> Option<JoinHandle<()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut usr1 = match signal(SignalKind::user_defined1()) {
        Ok(s) => s,
        Err(e) => {
            warn!("SIGUSR1 export trigger unavailable: {}", e);
            return None;
        }
    };
    Some(tokio::spawn(async move {
        while usr1.recv().await.is_some() {
            info!("SIGUSR1 received");
            trigger.fire();
        }
    }))
}

#[cfg(not(unix))]
fn spawn_signal_trigger(_trigger: ExportTrigger) -> Option<JoinHandle<()>> {
    None
}
