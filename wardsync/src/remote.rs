//! Remote appliers for the clinical-record service
//!
//! One dispatch path per record kind. Every mutating call carries the queue
//! item's id as an idempotency key, so a replay that races a lost response
//! can never create a duplicate remote record. Status updates are naturally
//! repeatable and need no key.

use crate::config::RemoteConfig;
use crate::error::{SyncError, SyncResult};
use crate::queue::{QueueItem, RecordKind};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Care-queue status set after a successful vital-signs write
pub const CARE_QUEUE_READY_FOR_REVIEW: &str = "ready_for_review";

/// A medication dose still awaiting administration, as reported by the
/// remote service's reminder query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingMedication {
    pub mar_id: String,
    pub queue_id: String,
    pub medication_name: String,
    pub dose: String,
    pub route: String,
}

/// The remote clinical-record service surface the sync engine consumes.
///
/// Concrete transport and auth live behind this trait; the engine only sees
/// uniform `SyncResult` outcomes.
#[async_trait]
pub trait ClinicalRecordService: Send + Sync {
    async fn create_vital_signs(
        &self,
        idempotency_key: Uuid,
        payload: &serde_json::Value,
    ) -> SyncResult<()>;

    async fn create_medication_record(
        &self,
        idempotency_key: Uuid,
        payload: &serde_json::Value,
    ) -> SyncResult<()>;

    async fn update_medication_record_status(
        &self,
        mar_id: &str,
        status: &str,
        notes: Option<&str>,
        omission_reason: Option<&str>,
    ) -> SyncResult<()>;

    async fn create_procedure(
        &self,
        idempotency_key: Uuid,
        payload: &serde_json::Value,
    ) -> SyncResult<()>;

    async fn update_procedure_status(
        &self,
        procedure_id: &str,
        status: &str,
        outcome: Option<&str>,
    ) -> SyncResult<()>;

    async fn create_evolution_note(
        &self,
        idempotency_key: Uuid,
        payload: &serde_json::Value,
    ) -> SyncResult<()>;

    async fn update_queue_status(&self, queue_id: &str, status: &str) -> SyncResult<()>;

    async fn get_pending_medications(
        &self,
        organization_id: &str,
    ) -> SyncResult<Vec<PendingMedication>>;
}

/// Dispatch one queue item to its remote applier.
///
/// Update-vs-create for medication and procedure items is decided by the
/// presence of a remote identifier in the payload. All failures come back as
/// `Err`; nothing escapes this boundary, which is what lets the engine keep
/// its continue-to-next-item contract.
pub async fn apply_item(service: &dyn ClinicalRecordService, item: &QueueItem) -> SyncResult<()> {
    match item.kind {
        RecordKind::VitalSigns => service.create_vital_signs(item.id, &item.payload).await,
        RecordKind::MedicationRecord => {
            match item.payload.get("mar_id").and_then(|v| v.as_str()) {
                Some(mar_id) => {
                    let status = require_str(&item.payload, "status")?;
                    let notes = item.payload.get("notes").and_then(|v| v.as_str());
                    let omission_reason =
                        item.payload.get("omission_reason").and_then(|v| v.as_str());
                    service
                        .update_medication_record_status(mar_id, status, notes, omission_reason)
                        .await
                }
                None => service.create_medication_record(item.id, &item.payload).await,
            }
        }
        RecordKind::Procedure => {
            match item.payload.get("procedure_id").and_then(|v| v.as_str()) {
                Some(procedure_id) => {
                    let status = require_str(&item.payload, "status")?;
                    let outcome = item.payload.get("outcome").and_then(|v| v.as_str());
                    service
                        .update_procedure_status(procedure_id, status, outcome)
                        .await
                }
                None => service.create_procedure(item.id, &item.payload).await,
            }
        }
        RecordKind::Note => service.create_evolution_note(item.id, &item.payload).await,
    }
}

fn require_str<'a>(payload: &'a serde_json::Value, field: &str) -> SyncResult<&'a str> {
    payload
        .get(field)
        .and_then(|v| v.as_str())
        .ok_or_else(|| SyncError::InvalidPayload(format!("missing field: {}", field)))
}

/// HTTP implementation of the clinical-record service
pub struct HttpClinicalService {
    client: reqwest::Client,
    config: RemoteConfig,
}

impl HttpClinicalService {
    pub fn new(config: RemoteConfig) -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| SyncError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.server_url, path)
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.auth_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn send_checked(&self, req: reqwest::RequestBuilder) -> SyncResult<reqwest::Response> {
        let response = req.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::Remote(format!(
                "service returned status {}",
                status
            )));
        }
        Ok(response)
    }

    async fn post_with_key(
        &self,
        path: &str,
        idempotency_key: Uuid,
        payload: &serde_json::Value,
    ) -> SyncResult<()> {
        let req = self
            .authorize(self.client.post(self.url(path)))
            .header("Idempotency-Key", idempotency_key.to_string())
            .json(payload);
        self.send_checked(req).await?;
        Ok(())
    }

    async fn patch(&self, path: &str, body: serde_json::Value) -> SyncResult<()> {
        let req = self.authorize(self.client.patch(self.url(path))).json(&body);
        self.send_checked(req).await?;
        Ok(())
    }
}

#[async_trait]
impl ClinicalRecordService for HttpClinicalService {
    async fn create_vital_signs(
        &self,
        idempotency_key: Uuid,
        payload: &serde_json::Value,
    ) -> SyncResult<()> {
        self.post_with_key("/vital-signs", idempotency_key, payload).await
    }

    async fn create_medication_record(
        &self,
        idempotency_key: Uuid,
        payload: &serde_json::Value,
    ) -> SyncResult<()> {
        self.post_with_key("/medication-records", idempotency_key, payload)
            .await
    }

    async fn update_medication_record_status(
        &self,
        mar_id: &str,
        status: &str,
        notes: Option<&str>,
        omission_reason: Option<&str>,
    ) -> SyncResult<()> {
        self.patch(
            &format!("/medication-records/{}/status", mar_id),
            serde_json::json!({
                "status": status,
                "notes": notes,
                "omission_reason": omission_reason,
            }),
        )
        .await
    }

    async fn create_procedure(
        &self,
        idempotency_key: Uuid,
        payload: &serde_json::Value,
    ) -> SyncResult<()> {
        self.post_with_key("/procedures", idempotency_key, payload).await
    }

    async fn update_procedure_status(
        &self,
        procedure_id: &str,
        status: &str,
        outcome: Option<&str>,
    ) -> SyncResult<()> {
        self.patch(
            &format!("/procedures/{}/status", procedure_id),
            serde_json::json!({
                "status": status,
                "outcome": outcome,
            }),
        )
        .await
    }

    async fn create_evolution_note(
        &self,
        idempotency_key: Uuid,
        payload: &serde_json::Value,
    ) -> SyncResult<()> {
        self.post_with_key("/evolution-notes", idempotency_key, payload).await
    }

    async fn update_queue_status(&self, queue_id: &str, status: &str) -> SyncResult<()> {
        self.patch(
            &format!("/care-queue/{}/status", queue_id),
            serde_json::json!({ "status": status }),
        )
        .await
    }

    async fn get_pending_medications(
        &self,
        organization_id: &str,
    ) -> SyncResult<Vec<PendingMedication>> {
        let req = self.authorize(
            self.client
                .get(self.url("/medication-records/pending"))
                .query(&[("organization_id", organization_id)]),
        );
        let response = self.send_checked(req).await?;
        let medications = response
            .json::<Vec<PendingMedication>>()
            .await
            .map_err(|e| SyncError::Serialization(e.to_string()))?;
        Ok(medications)
    }
}


#[cfg(test)]
mod tests {
    use super::testkit::MockClinicalService;
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn item(kind: RecordKind, payload: serde_json::Value) -> QueueItem {
        QueueItem {
            id: Uuid::new_v4(),
            owner_id: "nurse-1".to_string(),
            kind,
            payload,
            enqueued_at: Utc::now(),
            attempts: 0,
            last_error: None,
        }
    }

    #[tokio::test]
    async fn test_vital_signs_dispatches_to_create() {
        let service = MockClinicalService::new();
        let it = item(RecordKind::VitalSigns, json!({"queue_id": "q-1"}));

        apply_item(&service, &it).await.unwrap();

        let calls = service.calls().await;
        assert_eq!(calls, vec![format!("create_vital_signs:{}", it.id)]);
    }

    #[tokio::test]
    async fn test_medication_without_remote_id_creates() {
        let service = MockClinicalService::new();
        let it = item(
            RecordKind::MedicationRecord,
            json!({"medication_name": "amoxicillin", "dose": "500mg"}),
        );

        apply_item(&service, &it).await.unwrap();

        assert_eq!(
            service.calls().await,
            vec![format!("create_medication_record:{}", it.id)]
        );
    }

    #[tokio::test]
    async fn test_medication_with_remote_id_updates_status() {
        let service = MockClinicalService::new();
        let it = item(
            RecordKind::MedicationRecord,
            json!({"mar_id": "mar-9", "status": "administered", "notes": "given with food"}),
        );

        apply_item(&service, &it).await.unwrap();

        assert_eq!(
            service.calls().await,
            vec!["update_medication_record_status:mar-9:administered".to_string()]
        );
    }

    #[tokio::test]
    async fn test_medication_update_requires_status() {
        let service = MockClinicalService::new();
        let it = item(RecordKind::MedicationRecord, json!({"mar_id": "mar-9"}));

        let err = apply_item(&service, &it).await.unwrap_err();
        assert!(matches!(err, SyncError::InvalidPayload(_)));
        // Malformed payloads never reach the service
        assert!(service.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_procedure_update_vs_create() {
        let service = MockClinicalService::new();

        let create = item(RecordKind::Procedure, json!({"description": "wound dressing"}));
        apply_item(&service, &create).await.unwrap();

        let update = item(
            RecordKind::Procedure,
            json!({"procedure_id": "proc-3", "status": "completed", "outcome": "no complications"}),
        );
        apply_item(&service, &update).await.unwrap();

        assert_eq!(
            service.calls().await,
            vec![
                format!("create_procedure:{}", create.id),
                "update_procedure_status:proc-3:completed".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_note_always_creates() {
        let service = MockClinicalService::new();
        let it = item(RecordKind::Note, json!({"text": "patient ambulating"}));

        apply_item(&service, &it).await.unwrap();

        assert_eq!(
            service.calls().await,
            vec![format!("create_evolution_note:{}", it.id)]
        );
    }

    #[tokio::test]
    async fn test_failure_surfaces_as_err_not_panic() {
        let service = MockClinicalService::new();
        service.fail_op("create_evolution_note").await;
        let it = item(RecordKind::Note, json!({"text": "x"}));

        let err = apply_item(&service, &it).await.unwrap_err();
        assert!(matches!(err, SyncError::Network(_)));
    }
}
