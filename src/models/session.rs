//! Permission request session state.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::permission::{PermissionId, PermissionStatus};

/// One acquisition cycle, created per boot when a check is needed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PermissionRequestSession {
    /// Unique session identifier.
    pub id: String,
    /// Required permissions in request order.
    pub order: Vec<PermissionId>,
    /// Status captured once when the session started.
    pub initial: HashMap<PermissionId, PermissionStatus>,
    /// Latest observed status.
    pub current: HashMap<PermissionId, PermissionStatus>,
    /// Whether a restart-requiring permission was granted during the cycle.
    pub needs_restart: bool,
}

impl PermissionRequestSession {
    /// Construct a session with a generated identifier and empty snapshots.
    #[must_use]
    pub fn new(order: Vec<PermissionId>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            order,
            initial: HashMap::new(),
            current: HashMap::new(),
            needs_restart: false,
        }
    }

    /// Record the boot-time status of a permission (first write wins).
    pub fn record_initial(&mut self, id: &PermissionId, status: PermissionStatus) {
        self.initial.entry(id.clone()).or_insert(status);
        self.current.insert(id.clone(), status);
    }

    /// Record the latest status of a permission.
    pub fn record_current(&mut self, id: &PermissionId, status: PermissionStatus) {
        self.current.insert(id.clone(), status);
    }

    /// Latest status, defaulting to `not_determined` when never observed.
    #[must_use]
    pub fn status_of(&self, id: &PermissionId) -> PermissionStatus {
        self.current
            .get(id)
            .copied()
            .unwrap_or(PermissionStatus::NotDetermined)
    }

    /// Whether every required permission is currently granted.
    #[must_use]
    pub fn all_granted(&self) -> bool {
        self.order
            .iter()
            .all(|id| self.status_of(id) == PermissionStatus::Granted)
    }

    /// Permissions that went from not granted at boot to granted now.
    #[must_use]
    pub fn newly_granted(&self) -> Vec<PermissionId> {
        self.order
            .iter()
            .filter(|id| {
                self.initial.get(*id).copied() != Some(PermissionStatus::Granted)
                    && self.status_of(id) == PermissionStatus::Granted
            })
            .cloned()
            .collect()
    }

    /// Ordered `(id, status)` pairs for notification payloads.
    #[must_use]
    pub fn statuses(&self) -> Vec<(PermissionId, PermissionStatus)> {
        self.order
            .iter()
            .map(|id| (id.clone(), self.status_of(id)))
            .collect()
    }
}
