// Dry-run email transport: logs instead of sending

use async_trait::async_trait;
use outreach_core::domain::TemplateSet;
use outreach_core::port::{DeliveryError, EmailTransport, IdProvider, SendReceipt};
use std::sync::Arc;
use tracing::info;

pub struct DryRunTransport {
    id_provider: Arc<dyn IdProvider>,
}

impl DryRunTransport {
    pub fn new(id_provider: Arc<dyn IdProvider>) -> Self {
        Self { id_provider }
    }
}

#[async_trait]
impl EmailTransport for DryRunTransport {
    async fn send(
        &self,
        to: &str,
        template_set: &TemplateSet,
        step: u32,
    ) -> Result<SendReceipt, DeliveryError> {
        let provider_message_id = format!("dry-run-{}", self.id_provider.generate_id());
        info!(
            to = %to,
            template_set = %template_set,
            step = step,
            message_id = %provider_message_id,
            "Dry run: email not sent"
        );
        Ok(SendReceipt { provider_message_id })
    }
}
