//! Offline-first synchronization engine for point-of-care clinical capture
//!
//! Clinical staff keep recording vital signs, medication administrations,
//! procedures and progress notes through bedside dead zones and transport
//! between wards. This crate provides:
//! - An encrypted local durable queue of pending clinical writes
//! - A network-state-driven replay engine (in-order, single-flight,
//!   at-least-once with idempotency keys)
//! - Remote appliers for the clinical-record service
//! - A medication-reminder poller with a deduplicating alert board
//! - A session-scoped orchestrator wiring it all together

pub mod alerts;
pub mod config;
pub mod engine;
pub mod error;
pub mod network;
pub mod queue;
pub mod remote;
pub mod session;

pub use alerts::{AlertAction, AlertBoard, AlertSeverity, NurseAlert, ReminderPoller};
pub use config::{QueueConfig, RemoteConfig, SessionConfig};
pub use engine::{SyncEngine, SyncReport};
pub use error::{SyncError, SyncResult};
pub use network::NetworkMonitor;
pub use queue::{OfflineQueue, QueueItem, RecordKind};
pub use remote::{
    ClinicalRecordService, HttpClinicalService, PendingMedication, CARE_QUEUE_READY_FOR_REVIEW,
};
pub use session::{CaregiverProfile, CareSession, SessionEvent};
