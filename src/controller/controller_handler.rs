use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{error, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::configuration::catalog::ExamCatalog;
use crate::configuration::config::Config;
use crate::error_handling::types::*;
use crate::grading::database_grading::DatabaseGrading;
use crate::monitoring::aggregator::Aggregator;
use crate::session_management::session_controller::{ControllerContext, ControllerSettings};
use crate::session_management::session_registry::SessionRegistry;
use crate::storage::file_storage::FileStorage;
use crate::violations::channel::ViolationChannel;
use crate::violations::types::Violation;
use crate::web_interface::web_server::WebServer;

/// How often finished sessions are checked against the retention window.
const RETENTION_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Queue depth of the in-process violation feed.
const INGRESS_CAPACITY: usize = 256;

/// Shared services, wired once at startup.
pub struct Services {
    pub registry: Arc<SessionRegistry>,
    pub aggregator: Arc<Aggregator>,
    pub channel: Arc<ViolationChannel>,
    /// Feed for in-process detectors; events are routed like HTTP reports.
    pub ingress: mpsc::Sender<Violation>,
}

pub struct Controller {
    pub config: Config,
    tasks: Vec<JoinHandle<()>>,
    registry: Option<Arc<SessionRegistry>>,
}

impl Controller {
    pub fn new(config: Config) -> Result<Self, ControllerError> {
        config.validate()?;
        info!(
            "Controller created for {} exam(s), storage at {}",
            config.exams.len(),
            config.storage.path.display()
        );
        Ok(Self {
            config,
            tasks: Vec::new(),
            registry: None,
        })
    }

    /// Opens storage and grading, restores unsubmitted sessions and starts the background
    /// tasks (violation ingress, monitoring refresh, retention sweep).
    pub async fn start_services(&mut self) -> Result<Services, ControllerError> {
        let catalog = Arc::new(ExamCatalog::new(self.config.exams.clone()));
        let storage = Arc::new(FileStorage::new(&self.config.storage.path)?);
        let grading = Arc::new(
            DatabaseGrading::new_file(self.config.storage.database_path(), Arc::clone(&catalog))
                .await?,
        );
        let channel = Arc::new(ViolationChannel::default());

        let context = ControllerContext {
            storage,
            grading,
            channel: Arc::clone(&channel),
            settings: ControllerSettings::from(&self.config.sessions),
        };
        let registry = Arc::new(SessionRegistry::new(
            catalog,
            context,
            self.config.sessions.max_sessions,
        ));
        registry.recover()?;
        self.registry = Some(Arc::clone(&registry));

        let aggregator = Arc::new(Aggregator::new(
            Arc::clone(&registry),
            Duration::from_secs(self.config.monitoring.refresh_interval_secs),
        ));
        self.tasks.push(Arc::clone(&aggregator).spawn_refresh());

        let (ingress, inbound) = mpsc::channel(INGRESS_CAPACITY);
        self.tasks.push(Arc::clone(&channel).spawn_ingress(inbound));
        self.tasks.push(spawn_retention_sweep(
            Arc::clone(&registry),
            self.config.sessions.retention_secs,
        ));

        Ok(Services {
            registry,
            aggregator,
            channel,
            ingress,
        })
    }

    /// Runs until Ctrl-C, or until the web server fails.
    pub async fn run(&mut self) -> Result<(), ControllerError> {
        let services = self.start_services().await?;

        let result = if self.config.server.web_ui_enabled {
            let server = WebServer::new(
                Arc::clone(&services.registry),
                Arc::clone(&services.aggregator),
                Arc::clone(&services.channel),
            );
            tokio::select! {
                served = server.start(
                    &self.config.server.bind_address,
                    self.config.server.web_ui_port,
                ) => served.map_err(ControllerError::from),
                signal = tokio::signal::ctrl_c() => signal
                    .map_err(|e| ControllerError::InitializationFailed(e.to_string())),
            }
        } else {
            warn!("Web interface disabled; sessions can only be driven in-process");
            tokio::signal::ctrl_c()
                .await
                .map_err(|e| ControllerError::InitializationFailed(e.to_string()))
        };

        if let Err(ref e) = result {
            error!("Controller stopping after error: {}", e);
        }
        self.shutdown();
        result
    }

    /// Aborts background tasks and releases the registry's session handles, which stops
    /// every session controller no caller still holds a handle to. Session state is
    /// already durable; unsubmitted sessions are restored on the next start.
    pub fn shutdown(&mut self) {
        info!("Shutting down {} background task(s)", self.tasks.len());
        for task in self.tasks.drain(..) {
            task.abort();
        }
        if let Some(registry) = self.registry.take() {
            registry.close();
        }
    }
}

/// Submission time before which finished sessions are dropped, `None` when the window
/// reaches past the representable range.
fn retention_cutoff(now: DateTime<Utc>, retention_secs: u64) -> Option<DateTime<Utc>> {
    let window = i64::try_from(retention_secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)?;
    now.checked_sub_signed(window)
}

fn spawn_retention_sweep(registry: Arc<SessionRegistry>, retention_secs: u64) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(RETENTION_SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            let Some(older_than) = retention_cutoff(Utc::now(), retention_secs) else {
                warn!("Retention window of {}s is out of range, nothing swept", retention_secs);
                continue;
            };
            if let Err(e) = registry.cleanup_finished_sessions(older_than) {
                error!("Retention sweep failed: {}", e);
            }
        }
    })
}
