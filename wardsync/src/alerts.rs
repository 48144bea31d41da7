//! Nurse alerts: deduplicating board and the medication-reminder poller
//!
//! Two producers (the interval poller and realtime push events) write into
//! the one deduplicating sink. Alerts are session-scoped, in-memory and
//! never physically deleted; dismissal is an explicit user action and the
//! UI filters on it.

use crate::error::SyncResult;
use crate::remote::{ClinicalRecordService, PendingMedication};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Critical,
    Warning,
}

/// A label + link the caller can follow from the alert
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertAction {
    pub label: String,
    pub href: String,
}

/// An in-memory reminder derived from remote state or a push event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NurseAlert {
    /// Deterministic (`mar-<id>`) for polled reminders so repeated polls
    /// collapse; fresh for push-delivered alerts
    pub id: String,
    pub severity: AlertSeverity,
    pub title: String,
    pub message: String,
    pub queue_id: Option<String>,
    pub action: Option<AlertAction>,
    pub created_at: DateTime<Utc>,
    pub dismissed: bool,
}

impl NurseAlert {
    /// Reminder for a dose still awaiting administration
    pub fn medication_reminder(med: &PendingMedication) -> Self {
        Self {
            id: format!("mar-{}", med.mar_id),
            severity: AlertSeverity::Warning,
            title: "Medication due".to_string(),
            message: format!(
                "{} {} via {} pending administration",
                med.medication_name, med.dose, med.route
            ),
            queue_id: Some(med.queue_id.clone()),
            action: Some(AlertAction {
                label: "Open MAR".to_string(),
                href: format!("/care-queue/{}/medications", med.queue_id),
            }),
            created_at: Utc::now(),
            dismissed: false,
        }
    }

    /// Alert delivered by a realtime push event; gets a fresh id
    pub fn pushed(
        severity: AlertSeverity,
        title: impl Into<String>,
        message: impl Into<String>,
        queue_id: Option<String>,
        action: Option<AlertAction>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            severity,
            title: title.into(),
            message: message.into(),
            queue_id,
            action,
            created_at: Utc::now(),
            dismissed: false,
        }
    }
}

/// The single deduplicating sink for all alert producers
pub struct AlertBoard {
    alerts: Mutex<Vec<NurseAlert>>,
}

impl AlertBoard {
    pub fn new() -> Self {
        Self {
            alerts: Mutex::new(Vec::new()),
        }
    }

    /// Insert an alert unless an equivalent non-dismissed one is already
    /// surfaced. Returns whether the alert was actually added.
    pub async fn raise(&self, alert: NurseAlert) -> bool {
        let mut alerts = self.alerts.lock().await;

        let duplicate = alerts
            .iter()
            .any(|a| !a.dismissed && (a.id == alert.id || a.message == alert.message));
        if duplicate {
            tracing::debug!(alert_id = %alert.id, "Alert suppressed as duplicate");
            return false;
        }

        tracing::debug!(alert_id = %alert.id, severity = ?alert.severity, "Alert raised");
        alerts.push(alert);
        true
    }

    /// Mark an alert dismissed. Alerts are never removed within a session.
    pub async fn dismiss(&self, alert_id: &str) -> bool {
        let mut alerts = self.alerts.lock().await;
        match alerts.iter_mut().find(|a| a.id == alert_id && !a.dismissed) {
            Some(alert) => {
                alert.dismissed = true;
                true
            }
            None => false,
        }
    }

    /// Non-dismissed alerts, newest last
    pub async fn active(&self) -> Vec<NurseAlert> {
        self.alerts
            .lock()
            .await
            .iter()
            .filter(|a| !a.dismissed)
            .cloned()
            .collect()
    }

    pub async fn all(&self) -> Vec<NurseAlert> {
        self.alerts.lock().await.clone()
    }
}

impl Default for AlertBoard {
    fn default() -> Self {
        Self::new()
    }
}

/// Polls the remote service for medications still awaiting administration
/// and surfaces them through the shared board.
pub struct ReminderPoller {
    service: Arc<dyn ClinicalRecordService>,
    board: Arc<AlertBoard>,
    organization_id: String,
    interval: Duration,
}

impl ReminderPoller {
    pub fn new(
        service: Arc<dyn ClinicalRecordService>,
        board: Arc<AlertBoard>,
        organization_id: impl Into<String>,
        interval: Duration,
    ) -> Self {
        Self {
            service,
            board,
            organization_id: organization_id.into(),
            interval,
        }
    }

    /// One poll cycle. Returns the ids of newly surfaced alerts. A dose whose
    /// reminder is still on the board produces no duplicate; a dismissed
    /// reminder for a still-pending dose resurfaces on the next poll. A dose
    /// administered since the last poll simply stops appearing.
    pub async fn poll_once(&self) -> SyncResult<Vec<String>> {
        let pending = self
            .service
            .get_pending_medications(&self.organization_id)
            .await?;

        let mut raised = Vec::new();
        for med in &pending {
            let alert = NurseAlert::medication_reminder(med);
            let id = alert.id.clone();
            if self.board.raise(alert).await {
                raised.push(id);
            }
        }

        tracing::debug!(
            organization_id = %self.organization_id,
            pending = pending.len(),
            new_alerts = raised.len(),
            "Medication reminder poll finished"
        );

        Ok(raised)
    }

    /// Poll eagerly once, then on the configured interval, until the owning
    /// task is aborted. Poll errors are logged and the loop continues.
    pub async fn run(self, on_new_alert: impl Fn(&str) + Send) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            ticker.tick().await;
            match self.poll_once().await {
                Ok(new_ids) => {
                    for id in &new_ids {
                        on_new_alert(id);
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Medication reminder poll failed");
                }
            }
        }
    }
}
