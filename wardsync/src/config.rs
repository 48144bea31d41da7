//! Configuration for the offline queue, remote client and session loops

use serde::{Deserialize, Serialize};

/// Configuration for the local durable queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Path to the database file
    pub db_path: String,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Whether to enable WAL mode
    pub enable_wal: bool,
    /// Whether to enable secure deletion (overwrites freed pages).
    /// Queued payloads are PHI, so this defaults to on.
    pub enable_secure_delete: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            db_path: "wardsync_local.db".to_string(),
            max_connections: 5,
            enable_wal: true,
            enable_secure_delete: true,
        }
    }
}

/// Configuration for the clinical-record service client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Service base URL
    pub server_url: String,
    /// Authentication token
    pub auth_token: Option<String>,
    /// Per-request timeout in seconds; a timeout is a transient failure
    pub request_timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:8080/api/v1".to_string(),
            auth_token: None,
            request_timeout_secs: 30,
        }
    }
}

/// Configuration for a caregiver session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub queue: QueueConfig,
    pub remote: RemoteConfig,
    /// Seconds between medication-reminder polls
    pub reminder_poll_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            queue: QueueConfig::default(),
            remote: RemoteConfig::default(),
            reminder_poll_interval_secs: 60,
        }
    }
}
