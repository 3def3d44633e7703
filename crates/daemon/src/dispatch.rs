//! Maps decoded requests onto the volume registry.

use crate::state::VolumeRegistry;
use btrfsd_protocol::{LIST_COMMAND, MOUNT_COMMAND, Reply, Request, list_reply};
use std::sync::Arc;

/// Routes each request by its command name.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<dyn VolumeRegistry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<dyn VolumeRegistry>) -> Self {
        Self { registry }
    }

    /// Produce the reply for a request. Never fails.
    pub fn dispatch(&self, request: &Request) -> Reply {
        match request.command() {
            MOUNT_COMMAND => {
                tracing::info!("Received a Mount message");
                // The mount handler owns its reply format
                Reply::from_text(self.registry.mount(request.lines()))
            }
            LIST_COMMAND => {
                tracing::info!("Received a List message");
                list_reply(&self.registry.snapshot())
            }
            other => {
                tracing::warn!(command = %other, "Received an unknown message");
                Reply::bad_message_type()
            }
        }
    }
}
