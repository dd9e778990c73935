use std::time::Duration;

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use tracing::{debug, warn};

use crate::engine::RuleEngine;
use crate::error::{Result, RuleError};
use crate::types::ExternalRule;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Rule engine reached over a small REST contract:
///
/// | Call                                | Effect                  |
/// |-------------------------------------|-------------------------|
/// | `GET {endpoint}/rules?prefix=`      | list rules by prefix    |
/// | `PUT {endpoint}/rules/{name}`       | create or replace       |
/// | `POST {endpoint}/rules/{name}/disable` | stop firing          |
/// | `DELETE {endpoint}/rules/{name}`    | remove                  |
pub struct HttpRuleEngine {
    client: reqwest::Client,
    endpoint: String,
    api_token: Option<String>,
}

impl HttpRuleEngine {
    pub fn new(endpoint: impl Into<String>, api_token: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_token,
        })
    }

    fn rule_url(&self, name: &str) -> String {
        format!("{}/rules/{}", self.endpoint, name)
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        let builder = match self.api_token {
            Some(ref token) => builder.bearer_auth(token),
            None => builder,
        };
        let resp = builder.send().await?;
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status().as_u16();
        let message = resp.text().await.unwrap_or_default();
        warn!(status, body = %message, "rule engine API error");
        Err(RuleError::Api { status, message })
    }
}

#[async_trait]
impl RuleEngine for HttpRuleEngine {
    fn name(&self) -> &str {
        "http"
    }

    async fn list_rules(&self, prefix: &str) -> Result<Vec<ExternalRule>> {
        let url = format!("{}/rules", self.endpoint);
        let resp = self
            .send(self.client.get(&url).query(&[("prefix", prefix)]))
            .await?;
        resp.json::<Vec<ExternalRule>>()
            .await
            .map_err(|e| RuleError::Parse(e.to_string()))
    }

    async fn put_rule(&self, rule: &ExternalRule) -> Result<()> {
        debug!(rule = %rule.name, state = %rule.state, "putting rule");
        self.send(self.client.put(self.rule_url(&rule.name)).json(rule))
            .await?;
        Ok(())
    }

    async fn disable_rule(&self, name: &str) -> Result<()> {
        debug!(rule = %name, "disabling rule");
        let url = format!("{}/disable", self.rule_url(name));
        match self.send(self.client.post(url)).await {
            Err(RuleError::Api { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => {
                Err(RuleError::NotFound {
                    name: name.to_string(),
                })
            }
            other => other.map(|_| ()),
        }
    }

    async fn delete_rule(&self, name: &str) -> Result<()> {
        debug!(rule = %name, "deleting rule");
        match self.send(self.client.delete(self.rule_url(name))).await {
            Err(RuleError::Api { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => Ok(()),
            other => other.map(|_| ()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RuleInput, RuleState};
    use cadence_core::SyncType;

    #[test]
    fn urls_are_built_from_a_trimmed_endpoint() {
        let engine = HttpRuleEngine::new("https://rules.local/v1/", None).unwrap();
        assert_eq!(
            engine.rule_url("cadence-acme-ticket-1a2b3c4d"),
            "https://rules.local/v1/rules/cadence-acme-ticket-1a2b3c4d"
        );
    }

    #[test]
    fn rule_wire_format() {
        let rule = ExternalRule {
            name: "cadence-acme-ticket-1a2b3c4d".into(),
            interval_secs: 7200,
            target: "cadence-worker".into(),
            state: RuleState::Enabled,
            input: RuleInput {
                tenant_id: "acme".into(),
                sync_type: SyncType::Ticket,
            },
        };
        let json = serde_json::to_value(&rule).unwrap();
        assert_eq!(json["state"], "enabled");
        assert_eq!(json["input"]["tenant_id"], "acme");
        assert_eq!(json["input"]["sync_type"], "ticket");
        let back: ExternalRule = serde_json::from_value(json).unwrap();
        assert_eq!(back, rule);
    }
}
