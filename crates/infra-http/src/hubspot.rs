// HubSpot CRM property store

use crate::{build_client, delivery_error_for_request, delivery_error_for_status};
use async_trait::async_trait;
use outreach_core::application::{CacheConfig, TtlCache};
use outreach_core::domain::{ContactId, SequenceProperties, TemplateSet};
use outreach_core::error::{AppError, Result};
use outreach_core::port::{CrmPropertyStore, DeliveryError, TimeProvider};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const SERVICE: &str = "HubSpot";
const SEARCH_PAGE_SIZE: u32 = 100;

pub const PROP_STEP: &str = "outreach_sequence_step";
pub const PROP_NEXT_SEND_AT: &str = "outreach_next_send_at";
pub const PROP_EMAILS_SENT: &str = "outreach_emails_sent";
pub const PROP_STATUS: &str = "outreach_sequence_status";
pub const PROP_TEMPLATE_SET: &str = "outreach_template_set";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
    paging: Option<Paging>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Paging {
    next: Option<NextPage>,
}

#[derive(Debug, Deserialize)]
struct NextPage {
    after: String,
}

/// CRM v3 contacts API with a private-app bearer token
pub struct HubSpotCrmStore {
    client: reqwest::Client,
    base_url: String,
    token: String,
    time_provider: Arc<dyn TimeProvider>,
    search_cache: Option<TtlCache<String, Vec<ContactId>>>,
}

impl HubSpotCrmStore {
    pub fn new(
        base_url: impl Into<String>,
        token: impl Into<String>,
        timeout: Duration,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            time_provider,
            search_cache: None,
        })
    }

    /// Memoise search results for a short while
    ///
    /// Callers re-validate due ids against their own store, so a slightly
    /// stale page is harmless.
    pub fn with_search_cache(mut self, config: CacheConfig) -> Self {
        self.search_cache = Some(TtlCache::new(config, self.time_provider.clone()));
        self
    }

    async fn request(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let response = builder
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| AppError::Delivery(delivery_error_for_request(SERVICE, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Delivery(delivery_error_for_status(
                SERVICE, status, &body,
            )));
        }
        Ok(response)
    }

    fn search_body(&self, template_set: Option<&TemplateSet>, after: Option<&str>) -> Value {
        let now = self.time_provider.now_millis();
        let mut filters = vec![
            json!({ "propertyName": PROP_STATUS, "operator": "EQ", "value": "active" }),
            json!({ "propertyName": PROP_NEXT_SEND_AT, "operator": "LTE", "value": now.to_string() }),
        ];
        if let Some(set) = template_set {
            filters.push(json!({
                "propertyName": PROP_TEMPLATE_SET,
                "operator": "EQ",
                "value": set.as_str()
            }));
        }

        let mut body = json!({
            "filterGroups": [{ "filters": filters }],
            "properties": [PROP_STEP, PROP_TEMPLATE_SET],
            "limit": SEARCH_PAGE_SIZE,
        });
        if let Some(after) = after {
            body["after"] = json!(after);
        }
        body
    }
}

#[async_trait]
impl CrmPropertyStore for HubSpotCrmStore {
    async fn contacts_due_for_step(
        &self,
        template_set: Option<&TemplateSet>,
    ) -> Result<Vec<ContactId>> {
        let cache_key = template_set
            .map(|s| s.as_str().to_string())
            .unwrap_or_else(|| "*".to_string());
        if let Some(ids) = self.search_cache.as_ref().and_then(|c| c.get(&cache_key)) {
            debug!(count = ids.len(), "HubSpot contacts due (cached)");
            return Ok(ids);
        }

        let url = format!("{}/crm/v3/objects/contacts/search", self.base_url);
        let mut ids = Vec::new();
        let mut after: Option<String> = None;

        loop {
            let body = self.search_body(template_set, after.as_deref());
            let page: SearchResponse = self
                .request(self.client.post(&url).json(&body))
                .await?
                .json()
                .await
                .map_err(|e| {
                    AppError::Delivery(DeliveryError::Retryable(format!(
                        "{} search returned an unreadable response: {}",
                        SERVICE, e
                    )))
                })?;

            ids.extend(page.results.into_iter().map(|r| r.id));
            match page.paging.and_then(|p| p.next) {
                Some(next) => after = Some(next.after),
                None => break,
            }
        }

        debug!(count = ids.len(), "HubSpot contacts due");
        if let Some(cache) = &self.search_cache {
            cache.set(cache_key, ids.clone(), None);
        }
        Ok(ids)
    }

    async fn update_sequence_properties(
        &self,
        contact_id: &str,
        properties: SequenceProperties,
    ) -> Result<()> {
        let url = format!("{}/crm/v3/objects/contacts/{}", self.base_url, contact_id);
        let body = json!({
            "properties": {
                PROP_STEP: properties.step.to_string(),
                PROP_NEXT_SEND_AT: properties.next_send_at.to_string(),
                PROP_EMAILS_SENT: properties.emails_sent.to_string(),
                PROP_STATUS: properties.status.to_string().to_lowercase(),
                PROP_TEMPLATE_SET: properties.template_set.as_str(),
            }
        });

        self.request(self.client.patch(&url).json(&body)).await?;
        debug!(contact_id = %contact_id, step = properties.step, "HubSpot properties updated");
        Ok(())
    }
}
