//! Relay Engine

use std::fmt;
use std::sync::Arc;

use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

use crate::connection::{ConnectionHandle, ConnectionRegistry};
use crate::metrics::Metrics;

/// How the source and target roles map onto listeners and registries.
///
/// Resolved exactly once at startup from the configured ports; it never
/// changes at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayMode {
    /// Distinct input and output ports, each with its own registry
    SeparateGroups,
    /// One port serves both roles; fan-out excludes the sender
    SharedGroup,
}

impl RelayMode {
    /// Decide the mode from the configured ports
    pub fn resolve(port_in: u16, port_out: u16) -> Self {
        if port_in == port_out {
            RelayMode::SharedGroup
        } else {
            RelayMode::SeparateGroups
        }
    }

    pub fn is_shared(&self) -> bool {
        matches!(self, RelayMode::SharedGroup)
    }
}

impl fmt::Display for RelayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayMode::SeparateGroups => write!(f, "separate groups"),
            RelayMode::SharedGroup => write!(f, "shared group"),
        }
    }
}

/// Fans inbound messages out to every open connection in the target group.
pub struct RelayEngine {
    mode: RelayMode,
    targets: Arc<ConnectionRegistry>,
    metrics: Arc<Metrics>,
}

impl RelayEngine {
    /// Create a new relay engine over the target registry
    pub fn new(mode: RelayMode, targets: Arc<ConnectionRegistry>, metrics: Arc<Metrics>) -> Self {
        Self {
            mode,
            targets,
            metrics,
        }
    }

    pub fn mode(&self) -> RelayMode {
        self.mode
    }

    /// Forward one inbound message to all open target-group connections.
    ///
    /// In shared-group mode the originating connection is skipped so a sender
    /// never receives its own message back. Members that are not open, or
    /// whose outbound queue has already gone away, are skipped silently; one
    /// failed forward never aborts the remaining fan-out. Returns the number
    /// of successful forwards (diagnostic, non-authoritative).
    pub async fn relay(&self, origin: &ConnectionHandle, message: Message) -> usize {
        self.metrics.message_received();

        let members = self.targets.snapshot().await;
        let mut forwarded = 0usize;

        for member in members {
            if self.mode.is_shared() && member.id() == origin.id() {
                continue;
            }
            if !member.is_open() {
                continue;
            }
            match member.send(message.clone()) {
                Ok(()) => forwarded += 1,
                Err(e) => {
                    // The member's close/error lifecycle event will remove it
                    // from the registry; nothing to do here beyond skipping.
                    debug!("Skipping forward to connection {}: {}", member.id(), e);
                    self.metrics.send_failure();
                }
            }
        }

        self.metrics.record_forwards(forwarded as u64);
        debug!(
            "Forwarded message from {} to {} client(s)",
            origin.peer_addr(),
            forwarded
        );

        forwarded
    }
}
