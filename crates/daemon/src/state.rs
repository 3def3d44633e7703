//! Volume registry shared with the request dispatcher.
//!
//! The dispatcher only needs two things from the mount subsystem: an opaque
//! Mount call and a consistent view of the volume table. [`VolumeTable`] is
//! the in-process implementation seeded from configuration.

use btrfsd_protocol::VolumeEntry;
use parking_lot::RwLock;

/// Error reply text for Mount when no driver is attached.
const NO_MOUNT_HANDLER: &str = "Error\nNo mount handler is attached.";

/// Boundary to the mount subsystem.
pub trait VolumeRegistry: Send + Sync {
    /// Handle a Mount request and return the complete reply text.
    ///
    /// `request` holds every request line, command name included.
    fn mount(&self, request: &[String]) -> String;

    /// Copy of the volume table, in table order.
    fn snapshot(&self) -> Vec<VolumeEntry>;
}

/// Ordered table of mounted volumes
pub struct VolumeTable {
    entries: RwLock<Vec<VolumeEntry>>,
}

impl VolumeTable {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }

    pub fn with_entries(entries: impl IntoIterator<Item = VolumeEntry>) -> Self {
        let table = Self::new();
        for entry in entries {
            table.insert(entry);
        }
        table
    }

    /// Add an entry, replacing one with the same fsUUID in place.
    pub fn insert(&self, entry: VolumeEntry) {
        let mut entries = self.entries.write();
        if let Some(existing) = entries.iter_mut().find(|e| e.fs_uuid == entry.fs_uuid) {
            tracing::debug!(fs_uuid = %entry.fs_uuid, "Volume entry replaced");
            *existing = entry;
        } else {
            tracing::info!(
                fs_uuid = %entry.fs_uuid,
                mount_point = %entry.mount_data.mount_point,
                "Volume entry added"
            );
            entries.push(entry);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }
}

impl Default for VolumeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl VolumeRegistry for VolumeTable {
    fn mount(&self, request: &[String]) -> String {
        tracing::warn!(
            args = request.len().saturating_sub(1),
            "Mount requested but no mount handler is attached"
        );
        NO_MOUNT_HANDLER.to_owned()
    }

    fn snapshot(&self) -> Vec<VolumeEntry> {
        self.entries.read().clone()
    }
}
