use std::sync::Arc;
use tokio::sync::broadcast;

use crate::api::feed::{DeliveredBatch, SharedStore};
use crate::capture::controller::CaptureController;
use crate::models::interface::{default_interface, list_interfaces};

/// Shared application state handed to every handler
pub struct AppState {
    pub controller: Arc<CaptureController>,
    pub store: SharedStore,
    pub batches: broadcast::Sender<Arc<DeliveredBatch>>,
    /// Interface from the command line, if any
    pub interface: Option<String>,
}

impl AppState {
    /// Interface to capture on when a request does not name one
    pub fn resolve_interface(&self, requested: Option<String>) -> Option<String> {
        requested
            .filter(|name| !name.trim().is_empty())
            .or_else(|| self.interface.clone())
            .or_else(|| default_interface(&list_interfaces()).map(|info| info.device_name.clone()))
    }
}
