// src/publish/notify.rs
use std::sync::Arc;

use metrics::counter;

use super::MessageTransport;

/// Direct messages to the configured admins over the bot's own transport.
pub struct AdminNotifier {
    transport: Arc<dyn MessageTransport>,
    admin_ids: Vec<i64>,
}

impl AdminNotifier {
    pub fn new(transport: Arc<dyn MessageTransport>, admin_ids: Vec<i64>) -> Self {
        Self {
            transport,
            admin_ids,
        }
    }

    /// Best effort: a failed delivery is logged and the rest still go out.
    /// Returns how many admins were reached.
    pub async fn notify(&self, text: &str) -> usize {
        if self.admin_ids.is_empty() {
            tracing::warn!(notice = %text, "no admins configured, notice only logged");
            return 0;
        }
        let mut reached = 0;
        for id in &self.admin_ids {
            match self.transport.send(&id.to_string(), text).await {
                Ok(_) => {
                    reached += 1;
                    counter!("admin_notices_total", "outcome" => "sent").increment(1);
                }
                Err(e) => {
                    counter!("admin_notices_total", "outcome" => "failed").increment(1);
                    tracing::warn!(admin_id = id, error = %e, "admin notice not delivered");
                }
            }
        }
        reached
    }
}
