//! Shared state handed to every request handler.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::hub::HubHandle;
use crate::rules::RuleStore;

#[derive(Clone)]
pub struct AppState {
    /// Read directly by `GET /`; all writes go through the hub.
    pub rules: Arc<RuleStore>,
    pub hub: HubHandle,
    /// Capacity of each WebSocket session's outbound queue.
    pub outbound_buffer: usize,
    /// Fired on server shutdown; open sessions close when it does.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        rules: Arc<RuleStore>,
        hub: HubHandle,
        outbound_buffer: usize,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            rules,
            hub,
            outbound_buffer: outbound_buffer.max(1),
            shutdown,
        }
    }
}
