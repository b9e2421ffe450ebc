//! Connection Registry

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use super::handle::{ConnectionHandle, Group};

/// The set of currently-open connections for one group.
///
/// Mutated only by the owning listener's lifecycle events and read by the
/// relay engine during fan-out. Entirely in-memory, rebuilt from zero at
/// process start. Fan-out iterates a defensive snapshot so a connection
/// closing mid-iteration is skipped rather than observed as a mutation.
pub struct ConnectionRegistry {
    group: Group,
    members: RwLock<HashMap<Uuid, Arc<ConnectionHandle>>>,
}

impl ConnectionRegistry {
    /// Create an empty registry for the given group
    pub fn new(group: Group) -> Self {
        Self {
            group,
            members: RwLock::new(HashMap::new()),
        }
    }

    pub fn group(&self) -> Group {
        self.group
    }

    /// Insert a connection. Idempotent: re-adding an existing member is a no-op.
    pub async fn add(&self, handle: Arc<ConnectionHandle>) {
        let mut members = self.members.write().await;
        let id = handle.id();
        if members.insert(id, handle).is_none() {
            debug!(
                "Added connection {} to {} registry ({} members)",
                id,
                self.group,
                members.len()
            );
        }
    }

    /// Remove a connection by id. Idempotent: removing an absent member is a
    /// no-op. Returns whether a member was actually removed.
    pub async fn remove(&self, id: &Uuid) -> bool {
        let mut members = self.members.write().await;
        let removed = members.remove(id).is_some();
        if removed {
            debug!(
                "Removed connection {} from {} registry ({} members)",
                id,
                self.group,
                members.len()
            );
        }
        removed
    }

    /// Point-in-time copy of the current membership for iteration
    pub async fn snapshot(&self) -> Vec<Arc<ConnectionHandle>> {
        let members = self.members.read().await;
        members.values().cloned().collect()
    }

    /// Current member count
    pub async fn len(&self) -> usize {
        self.members.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.members.read().await.is_empty()
    }
}
