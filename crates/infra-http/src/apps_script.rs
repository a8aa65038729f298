// Google Apps Script email transport

use crate::{build_client, delivery_error_for_request, delivery_error_for_status};
use async_trait::async_trait;
use outreach_core::domain::TemplateSet;
use outreach_core::error::Result;
use outreach_core::port::{DeliveryError, EmailTransport, SendReceipt};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const SERVICE: &str = "Apps Script";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SendRequest<'a> {
    to: &'a str,
    template_set: &'a str,
    step: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendResponse {
    success: bool,
    message_id: Option<String>,
    error: Option<String>,
}

/// Posts send requests to a deployed Apps Script web app
///
/// The web app renders the template and sends through Gmail; it answers
/// `{ success, messageId }` or `{ success: false, error }`.
#[derive(Clone)]
pub struct AppsScriptTransport {
    client: reqwest::Client,
    url: String,
}

impl AppsScriptTransport {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            url: url.into(),
        })
    }
}

#[async_trait]
impl EmailTransport for AppsScriptTransport {
    async fn send(
        &self,
        to: &str,
        template_set: &TemplateSet,
        step: u32,
    ) -> std::result::Result<SendReceipt, DeliveryError> {
        debug!(to = %to, template_set = %template_set, step = step, "Posting to Apps Script");

        let response = self
            .client
            .post(&self.url)
            .json(&SendRequest {
                to,
                template_set: template_set.as_str(),
                step,
            })
            .send()
            .await
            .map_err(|e| delivery_error_for_request(SERVICE, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(delivery_error_for_status(SERVICE, status, &body));
        }

        let body: SendResponse = response.json().await.map_err(|e| {
            DeliveryError::Retryable(format!("{} returned an unreadable response: {}", SERVICE, e))
        })?;

        if !body.success {
            let error = body
                .error
                .unwrap_or_else(|| "send rejected without a reason".to_string());
            return Err(DeliveryError::classify(error));
        }

        Ok(SendReceipt {
            provider_message_id: body.message_id.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn transport(server: &MockServer) -> AppsScriptTransport {
        AppsScriptTransport::new(format!("{}/exec", server.uri()), Duration::from_secs(5)).unwrap()
    }

    fn b2b() -> TemplateSet {
        TemplateSet::new(TemplateSet::B2B)
    }

    #[tokio::test]
    async fn test_send_success_returns_message_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/exec"))
            .and(body_json(serde_json::json!({
                "to": "ceo@acme.com",
                "templateSet": "set_three_b2b",
                "step": 2
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "messageId": "msg-123"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let receipt = transport(&server)
            .await
            .send("ceo@acme.com", &b2b(), 2)
            .await
            .unwrap();
        assert_eq!(receipt.provider_message_id, "msg-123");
    }

    #[tokio::test]
    async fn test_reported_failure_is_classified() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": false,
                "error": "Invalid recipient: nobody@acme.com"
            })))
            .mount(&server)
            .await;

        let err = transport(&server)
            .await
            .send("nobody@acme.com", &b2b(), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::Permanent(_)));
    }

    #[tokio::test]
    async fn test_http_status_mapping() {
        for (status, retryable) in [(429, true), (500, true), (400, false)] {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .respond_with(ResponseTemplate::new(status).set_body_string("nope"))
                .mount(&server)
                .await;

            let err = transport(&server)
                .await
                .send("ceo@acme.com", &b2b(), 1)
                .await
                .unwrap_err();
            assert_eq!(err.is_retryable(), retryable, "status {}", status);
        }
    }

    #[tokio::test]
    async fn test_unreadable_body_is_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>login</html>"))
            .mount(&server)
            .await;

        let err = transport(&server)
            .await
            .send("ceo@acme.com", &b2b(), 1)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
