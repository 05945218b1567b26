use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::types::{MonitoringFilter, MonitoringList, MonitoringStats, MonitoringView};
use crate::error_handling::types::SessionError;
use crate::session_management::session_registry::SessionRegistry;

struct Projection {
    views: Vec<MonitoringView>,
    last_updated: DateTime<Utc>,
}

/// Read model over the [`SessionRegistry`] for supervisors.
pub struct Aggregator {
    registry: Arc<SessionRegistry>,
    projection: RwLock<Projection>,
    max_staleness: Duration,
}

impl Aggregator {
    pub fn new(registry: Arc<SessionRegistry>, max_staleness: Duration) -> Self {
        let aggregator = Self {
            registry,
            projection: RwLock::new(Projection {
                views: Vec::new(),
                last_updated: DateTime::<Utc>::MIN_UTC,
            }),
            max_staleness,
        };
        aggregator.refresh();
        aggregator
    }

    /// Rebuilds the projection from the controllers' latest snapshots.
    pub fn refresh(&self) -> DateTime<Utc> {
        let now = Utc::now();
        let mut views: Vec<MonitoringView> = self
            .registry
            .snapshots()
            .iter()
            .map(|s| MonitoringView::from_snapshot(s, now))
            .collect();
        views.sort_by(|a, b| {
            a.exam_title
                .cmp(&b.exam_title)
                .then_with(|| a.taker_name.cmp(&b.taker_name))
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        if let Ok(mut projection) = self.projection.write() {
            debug!("Monitoring projection rebuilt with {} session(s)", views.len());
            projection.views = views;
            projection.last_updated = now;
        }
        now
    }

    fn refresh_if_stale(&self) {
        let last_updated = self
            .projection
            .read()
            .map(|p| p.last_updated)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let age = (Utc::now() - last_updated).to_std().unwrap_or_default();
        if age >= self.max_staleness {
            self.refresh();
        }
    }

    /// Sessions matching `filter`, with the time the projection was built.
    pub fn list(&self, filter: &MonitoringFilter) -> MonitoringList {
        self.refresh_if_stale();
        match self.projection.read() {
            Ok(projection) => MonitoringList {
                sessions: projection
                    .views
                    .iter()
                    .filter(|v| filter.matches(v))
                    .cloned()
                    .collect(),
                last_updated: projection.last_updated,
            },
            Err(_) => MonitoringList {
                sessions: Vec::new(),
                last_updated: Utc::now(),
            },
        }
    }

    /// Counts by status and by violation severity.
    pub fn stats(&self) -> MonitoringStats {
        self.refresh_if_stale();
        match self.projection.read() {
            Ok(projection) => MonitoringStats::from_views(&projection.views, projection.last_updated),
            Err(_) => MonitoringStats::from_views(&[], Utc::now()),
        }
    }

    /// Sends a warning about `violation_id` to the taker.
    pub async fn warn(
        &self,
        session_id: Uuid,
        violation_id: &str,
        message: &str,
    ) -> Result<(), SessionError> {
        self.registry
            .get(session_id)?
            .warn(violation_id, message)
            .await?;
        self.refresh();
        Ok(())
    }

    /// Resolves a violation. No state transition; the breach decision is unaffected.
    pub async fn dismiss(&self, session_id: Uuid, violation_id: &str) -> Result<bool, SessionError> {
        let changed = self.registry.get(session_id)?.dismiss(violation_id).await?;
        self.refresh();
        Ok(changed)
    }

    /// Forces the session into `Terminated`; its buffered answers are submitted.
    pub async fn terminate(&self, session_id: Uuid, reason: Option<String>) -> Result<(), SessionError> {
        self.registry.get(session_id)?.terminate(reason).await?;
        self.refresh();
        Ok(())
    }

    /// Rebuilds the projection every `max_staleness` until the task is aborted.
    pub fn spawn_refresh(self: Arc<Self>) -> JoinHandle<()> {
        info!(
            "Monitoring refresh every {}s",
            self.max_staleness.as_secs()
        );
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.max_staleness);
            loop {
                ticker.tick().await;
                self.refresh();
            }
        })
    }
}
