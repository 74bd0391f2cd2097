//! Permission capabilities and the acquisition coordinator.
//!
//! Each required permission is described once in a [`CapabilityTable`]:
//! identifier, restart requirement, and the capability that probes,
//! activates, and deep-links into settings for it. The coordinator only
//! ever talks to the table.

pub mod command;
pub mod coordinator;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::config::GlobalConfig;
use crate::models::permission::{PermissionId, PermissionStatus};
use crate::{AppError, Result};

pub use command::CommandCapability;
pub use coordinator::{
    BootSignals, CompletionPath, CoordinatorSettings, PermissionCoordinator, SessionOutcome,
};

/// Boxed future returned by capability methods.
pub type CapabilityFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// OS-facing operations for one permission.
///
/// All three calls may show OS UI; the coordinator treats them as
/// opaque side-effecting operations.
pub trait PermissionCapability: Send + Sync {
    /// Probe the current status.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Permission` if the probe itself fails.
    fn check_status(&self) -> CapabilityFuture<'_, PermissionStatus>;

    /// Trigger the OS consent flow.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Permission` if the flow could not be started.
    fn activate(&self) -> CapabilityFuture<'_, ()>;

    /// Best-effort deep link into the OS settings pane.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Permission` if the settings pane could not be opened.
    fn open_settings(&self) -> CapabilityFuture<'_, ()>;
}

/// Table entry for one required permission.
#[derive(Clone)]
pub struct CapabilityDescriptor {
    /// Permission identifier.
    pub id: PermissionId,
    /// Whether a grant only takes effect after a restart.
    pub requires_restart: bool,
    /// Backing capability.
    pub capability: Arc<dyn PermissionCapability>,
}

impl std::fmt::Debug for CapabilityDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityDescriptor")
            .field("id", &self.id)
            .field("requires_restart", &self.requires_restart)
            .finish_non_exhaustive()
    }
}

/// Ordered mapping from permission identifier to capability.
///
/// Insertion order is the request order.
#[derive(Debug, Clone, Default)]
pub struct CapabilityTable {
    entries: Vec<CapabilityDescriptor>,
}

impl CapabilityTable {
    /// Empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a permission.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `id` is already registered.
    pub fn register(
        mut self,
        id: PermissionId,
        requires_restart: bool,
        capability: Arc<dyn PermissionCapability>,
    ) -> Result<Self> {
        if self.get(&id).is_some() {
            return Err(AppError::Config(format!("duplicate permission id '{id}'")));
        }
        self.entries.push(CapabilityDescriptor {
            id,
            requires_restart,
            capability,
        });
        Ok(self)
    }

    /// Build the table from `[[permissions]]`, backed by external commands.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` on duplicate identifiers.
    pub fn from_config(config: &GlobalConfig) -> Result<Self> {
        config.permissions.iter().try_fold(Self::new(), |table, entry| {
            table.register(
                entry.id.clone(),
                entry.requires_restart,
                Arc::new(CommandCapability::from_config(entry)),
            )
        })
    }

    /// Look up a permission.
    #[must_use]
    pub fn get(&self, id: &PermissionId) -> Option<&CapabilityDescriptor> {
        self.entries.iter().find(|entry| &entry.id == id)
    }

    /// Entries in request order.
    pub fn iter(&self) -> impl Iterator<Item = &CapabilityDescriptor> {
        self.entries.iter()
    }

    /// Identifiers in request order.
    #[must_use]
    pub fn ids(&self) -> Vec<PermissionId> {
        self.entries.iter().map(|entry| entry.id.clone()).collect()
    }

    /// Whether `id` is registered as restart-requiring.
    #[must_use]
    pub fn requires_restart(&self, id: &PermissionId) -> bool {
        self.get(id).is_some_and(|entry| entry.requires_restart)
    }

    /// Number of permissions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
