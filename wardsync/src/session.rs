//! Session-scoped orchestration
//!
//! One [`CareSession`] is constructed per authenticated caregiver and passed
//! by reference to consumers; there are no ambient globals. It owns the
//! queue, engine, alert board and background loops, and exposes the
//! imperative actions the rest of the application calls. Consumers observe
//! state through a broadcast event bus rather than reading shared mutable
//! state.

use crate::alerts::{AlertBoard, NurseAlert, ReminderPoller};
use crate::config::SessionConfig;
use crate::engine::{SyncEngine, SyncReport};
use crate::error::SyncResult;
use crate::network::NetworkMonitor;
use crate::queue::{OfflineQueue, QueueItem, RecordKind};
use crate::remote::{ClinicalRecordService, HttpClinicalService};
use crypto::PayloadCipher;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// The authenticated caregiver the session is scoped to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaregiverProfile {
    pub id: String,
    pub organization_id: String,
    pub display_name: String,
}

/// State-change notifications for UI consumers (badges, toasts, dashboards)
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The pending-sync badge should show this count
    PendingCountChanged { pending: i64 },
    /// A capture was persisted locally and will sync when online
    ItemSavedLocally { item_id: Uuid, pending: i64 },
    /// A sync pass finished; surface one aggregate summary
    SyncFinished { report: SyncReport },
    /// Newly synced data exists; dashboard summaries should refresh
    DashboardRefreshRequested,
    /// A new alert was surfaced on the board
    AlertRaised { alert_id: String },
}

/// Session-scoped controller owning the offline-first machinery
pub struct CareSession {
    profile: CaregiverProfile,
    queue: Arc<OfflineQueue>,
    engine: Arc<SyncEngine>,
    board: Arc<AlertBoard>,
    network: NetworkMonitor,
    service: Arc<dyn ClinicalRecordService>,
    events: broadcast::Sender<SessionEvent>,
    poll_interval: Duration,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl CareSession {
    /// Build a session for one caregiver. The remote service, payload cipher
    /// and network monitor are injected so hosts and tests can substitute
    /// their own.
    pub async fn new(
        profile: CaregiverProfile,
        config: SessionConfig,
        service: Arc<dyn ClinicalRecordService>,
        cipher: Arc<dyn PayloadCipher>,
        network: NetworkMonitor,
    ) -> SyncResult<Self> {
        let queue = Arc::new(OfflineQueue::new(config.queue.clone(), cipher).await?);
        let engine = Arc::new(SyncEngine::new(
            queue.clone(),
            network.clone(),
            service.clone(),
        ));
        let (events, _) = broadcast::channel(64);

        tracing::info!(
            caregiver = %profile.id,
            organization = %profile.organization_id,
            "Care session created"
        );

        Ok(Self {
            profile,
            queue,
            engine,
            board: Arc::new(AlertBoard::new()),
            network,
            service,
            events,
            poll_interval: Duration::from_secs(config.reminder_poll_interval_secs),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Build a session talking HTTP to the clinical-record service named in
    /// the config
    pub async fn connect(
        profile: CaregiverProfile,
        config: SessionConfig,
        cipher: Arc<dyn PayloadCipher>,
        network: NetworkMonitor,
    ) -> SyncResult<Self> {
        let service = Arc::new(HttpClinicalService::new(config.remote.clone())?);
        Self::new(profile, config, service, cipher, network).await
    }

    /// Start the background loops: the medication-reminder poller and the
    /// network watcher that syncs on the offline-to-online edge. Also runs
    /// one eager sync pass for anything left over from a previous session.
    pub async fn start(&self) {
        let poller = ReminderPoller::new(
            self.service.clone(),
            self.board.clone(),
            self.profile.organization_id.clone(),
            self.poll_interval,
        );
        let poll_events = self.events.clone();
        let poller_task = tokio::spawn(async move {
            poller
                .run(move |alert_id| {
                    let _ = poll_events.send(SessionEvent::AlertRaised {
                        alert_id: alert_id.to_string(),
                    });
                })
                .await;
        });

        let mut rx = self.network.subscribe();
        let engine = self.engine.clone();
        let owner_id = self.profile.id.clone();
        let watch_events = self.events.clone();
        let network_task = tokio::spawn(async move {
            let mut was_online = *rx.borrow();
            while rx.changed().await.is_ok() {
                let online = *rx.borrow();
                if online && !was_online {
                    tracing::info!(owner_id = %owner_id, "Back online; triggering sync");
                    if let Err(e) = run_pass(&engine, &owner_id, &watch_events).await {
                        tracing::warn!(owner_id = %owner_id, error = %e, "Reconnect sync failed");
                    }
                }
                was_online = online;
            }
        });

        self.tasks.lock().await.push(poller_task);
        self.tasks.lock().await.push(network_task);

        // Eager pass on session start; a no-op when offline or empty
        if let Err(e) = run_pass(&self.engine, &self.profile.id, &self.events).await {
            tracing::warn!(error = %e, "Initial sync pass failed");
        }
    }

    /// Persist a clinical write locally for later replay.
    ///
    /// Storage errors propagate: the caller must show them forcefully, since
    /// a dropped capture is unrecoverable data loss.
    pub async fn add_to_sync_queue(
        &self,
        kind: RecordKind,
        payload: serde_json::Value,
    ) -> SyncResult<QueueItem> {
        let item = self.queue.add_to_queue(&self.profile.id, kind, payload).await?;
        let pending = self.queue.pending_count(&self.profile.id).await?;

        let _ = self.events.send(SessionEvent::ItemSavedLocally {
            item_id: item.id,
            pending,
        });
        let _ = self
            .events
            .send(SessionEvent::PendingCountChanged { pending });

        Ok(item)
    }

    /// Manual "sync now" affordance; also used internally after reconnect
    pub async fn trigger_sync(&self) -> SyncResult<Option<SyncReport>> {
        run_pass(&self.engine, &self.profile.id, &self.events).await
    }

    /// Producer path for realtime push alerts; shares the poller's
    /// deduplicating sink
    pub async fn push_alert(&self, alert: NurseAlert) -> bool {
        let alert_id = alert.id.clone();
        let added = self.board.raise(alert).await;
        if added {
            let _ = self.events.send(SessionEvent::AlertRaised { alert_id });
        }
        added
    }

    pub async fn dismiss_alert(&self, alert_id: &str) -> bool {
        self.board.dismiss(alert_id).await
    }

    pub async fn alerts(&self) -> Vec<NurseAlert> {
        self.board.active().await
    }

    pub async fn pending_count(&self) -> SyncResult<i64> {
        self.queue.pending_count(&self.profile.id).await
    }

    /// Subscribe to session events (badge counts, toasts, refresh hints)
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn profile(&self) -> &CaregiverProfile {
        &self.profile
    }

    pub fn network(&self) -> &NetworkMonitor {
        &self.network
    }

    /// Tear down background loops. Called on logout.
    pub async fn shutdown(&self) {
        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }
        tracing::info!(caregiver = %self.profile.id, "Care session shut down");
    }
}

/// Run one sync pass and publish its outcome on the event bus
async fn run_pass(
    engine: &SyncEngine,
    owner_id: &str,
    events: &broadcast::Sender<SessionEvent>,
) -> SyncResult<Option<SyncReport>> {
    let outcome = engine.trigger_sync(owner_id).await?;

    if let Some(report) = &outcome {
        let _ = events.send(SessionEvent::PendingCountChanged {
            pending: report.pending_after,
        });
        let _ = events.send(SessionEvent::SyncFinished {
            report: report.clone(),
        });
        if report.synced > 0 {
            let _ = events.send(SessionEvent::DashboardRefreshRequested);
        }
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::AlertSeverity;
    use crate::config::QueueConfig;
    use crate::remote::testkit::MockClinicalService;
    use crate::remote::PendingMedication;
    use crypto::NoopCipher;
    use serde_json::json;
    use tempfile::NamedTempFile;

    fn profile() -> CaregiverProfile {
        CaregiverProfile {
            id: "nurse-1".to_string(),
            organization_id: "org-1".to_string(),
            display_name: "Test Nurse".to_string(),
        }
    }

    async fn session(
        online: bool,
        poll_interval_secs: u64,
    ) -> (CareSession, Arc<MockClinicalService>, NamedTempFile) {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let temp_file = NamedTempFile::new().unwrap();
        let config = SessionConfig {
            queue: QueueConfig {
                db_path: temp_file.path().to_str().unwrap().to_string(),
                ..QueueConfig::default()
            },
            reminder_poll_interval_secs: poll_interval_secs,
            ..SessionConfig::default()
        };
        let service = Arc::new(MockClinicalService::new());
        let session = CareSession::new(
            profile(),
            config,
            service.clone(),
            Arc::new(NoopCipher),
            NetworkMonitor::new(online),
        )
        .await
        .unwrap();
        (session, service, temp_file)
    }

    #[tokio::test]
    async fn test_offline_capture_then_reconnect_scenario() {
        let (session, service, _guard) = session(false, 3600).await;
        let mut events = session.subscribe();

        // Capture while offline
        session
            .add_to_sync_queue(
                RecordKind::VitalSigns,
                json!({"queue_id": "q-1", "heart_rate": 90}),
            )
            .await
            .unwrap();
        session
            .add_to_sync_queue(RecordKind::Note, json!({"text": "resting"}))
            .await
            .unwrap();
        session
            .add_to_sync_queue(
                RecordKind::MedicationRecord,
                json!({"medication_name": "paracetamol"}),
            )
            .await
            .unwrap();

        assert_eq!(session.pending_count().await.unwrap(), 3);
        // Offline: trigger is a no-op
        assert!(session.trigger_sync().await.unwrap().is_none());
        assert!(service.calls().await.is_empty());

        // Back online: one pass drains everything, in enqueue order
        session.network().set_online(true);
        let report = session.trigger_sync().await.unwrap().unwrap();
        assert_eq!(report.synced, 3);
        assert_eq!(report.failed, 0);
        assert_eq!(session.pending_count().await.unwrap(), 0);

        let calls = service.calls().await;
        assert_eq!(calls.len(), 4); // 3 appliers + chained transition
        assert!(calls[0].starts_with("create_vital_signs:"));
        assert_eq!(calls[1], "update_queue_status:q-1:ready_for_review");
        assert!(calls[2].starts_with("create_evolution_note:"));
        assert!(calls[3].starts_with("create_medication_record:"));

        // Event stream: three saved-locally + three count changes while
        // offline, then count change + one aggregate summary + refresh
        let mut saved = 0;
        let mut summaries = 0;
        let mut refreshes = 0;
        while let Ok(event) = events.try_recv() {
            match event {
                SessionEvent::ItemSavedLocally { .. } => saved += 1,
                SessionEvent::SyncFinished { report } => {
                    summaries += 1;
                    assert_eq!(report.summary(), "Synchronized 3 records");
                }
                SessionEvent::DashboardRefreshRequested => refreshes += 1,
                _ => {}
            }
        }
        assert_eq!(saved, 3);
        assert_eq!(summaries, 1);
        assert_eq!(refreshes, 1);
    }

    #[tokio::test]
    async fn test_reconnect_edge_triggers_sync_automatically() {
        let (session, service, _guard) = session(false, 3600).await;
        session
            .add_to_sync_queue(RecordKind::Note, json!({"text": "x"}))
            .await
            .unwrap();

        session.start().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        // Offline: the poller may have run, but no applier call yet
        let applier_calls = |calls: Vec<String>| {
            calls
                .into_iter()
                .filter(|c| c.starts_with("create_evolution_note:"))
                .count()
        };
        assert_eq!(applier_calls(service.calls().await), 0);
        assert_eq!(session.pending_count().await.unwrap(), 1);

        session.network().set_online(true);
        // Give the watcher task a moment to observe the edge
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(session.pending_count().await.unwrap(), 0);
        assert_eq!(applier_calls(service.calls().await), 1);

        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_poller_surfaces_and_dedups_alerts() {
        let (session, service, _guard) = session(true, 3600).await;
        service
            .set_pending_medications(vec![PendingMedication {
                mar_id: "42".to_string(),
                queue_id: "q-9".to_string(),
                medication_name: "insulin".to_string(),
                dose: "10u".to_string(),
                route: "subcutaneous".to_string(),
            }])
            .await;

        session.start().await;
        // Eager poll runs immediately on start
        tokio::time::sleep(Duration::from_millis(100)).await;

        let alerts = session.alerts().await;
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].id, "mar-42");
        assert_eq!(alerts[0].severity, AlertSeverity::Warning);

        assert!(session.dismiss_alert("mar-42").await);
        assert!(session.alerts().await.is_empty());

        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_push_alert_shares_dedup_sink_and_emits_event() {
        let (session, _service, _guard) = session(true, 3600).await;
        let mut events = session.subscribe();

        let added = session
            .push_alert(NurseAlert::pushed(
                AlertSeverity::Critical,
                "Emergency",
                "Patient in bed 4 unresponsive",
                Some("q-4".to_string()),
                None,
            ))
            .await;
        assert!(added);

        let duplicate = session
            .push_alert(NurseAlert::pushed(
                AlertSeverity::Critical,
                "Emergency",
                "Patient in bed 4 unresponsive",
                Some("q-4".to_string()),
                None,
            ))
            .await;
        assert!(!duplicate);
        assert_eq!(session.alerts().await.len(), 1);

        let mut raised = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, SessionEvent::AlertRaised { .. }) {
                raised += 1;
            }
        }
        assert_eq!(raised, 1);
    }

    #[tokio::test]
    async fn test_capture_storage_error_surfaces_to_caller() {
        let (session, _service, _guard) = session(true, 3600).await;
        session.queue.close().await;

        // The UI must hear about a capture that failed to persist; a
        // silently dropped clinical write is data loss.
        let err = session
            .add_to_sync_queue(RecordKind::Note, json!({"text": "x"}))
            .await
            .unwrap_err();
        assert!(matches!(err, crate::error::SyncError::Storage(_)));
    }

    #[tokio::test]
    async fn test_capture_returns_item_and_updates_count() {
        let (session, _service, _guard) = session(true, 3600).await;

        let item = session
            .add_to_sync_queue(RecordKind::Note, json!({"text": "x"}))
            .await
            .unwrap();
        assert!(!item.id.is_nil());
        assert_eq!(item.owner_id, "nurse-1");
        assert_eq!(session.pending_count().await.unwrap(), 1);
    }
}
