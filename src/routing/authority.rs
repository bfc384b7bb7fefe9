//! Route authority client: fetches the routing rules for a baseline workload.

use std::collections::HashSet;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use tracing::debug;

use super::RoutingKey;
use crate::config::{ROUTING_RULES_PATH, RouteAuthorityConfig};
use crate::error::FetchError;

/// Longest response body kept in a `FetchError::Status`.
const MAX_ERROR_BODY: usize = 512;

/// Source of the routing keys currently destined for sandboxes.
#[async_trait]
pub trait RouteAuthority: Send + Sync {
    /// Fetch the complete current key set. Every error is one failed attempt.
    async fn fetch_routing_keys(&self) -> Result<HashSet<RoutingKey>, FetchError>;
}

/// HTTP route authority backed by the route server's REST API.
pub struct HttpRouteAuthority {
    client: reqwest::Client,
    url: Url,
}

impl HttpRouteAuthority {
    /// Build a client for this worker. Sandbox workers pass their sandbox name
    /// so the server can scope the rules to them.
    pub fn new(config: &RouteAuthorityConfig, sandbox_name: Option<&str>) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            client,
            url: routing_rules_url(config, sandbox_name),
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl RouteAuthority for HttpRouteAuthority {
    async fn fetch_routing_keys(&self) -> Result<HashSet<RoutingKey>, FetchError> {
        debug!(url = %self.url, "Fetching routing rules");

        let response = self.client.get(self.url.clone()).send().await?;
        let status = response.status();

        if status != StatusCode::OK {
            let mut body = response.text().await.unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let cut = (0..=MAX_ERROR_BODY)
                    .rev()
                    .find(|i| body.is_char_boundary(*i))
                    .unwrap_or(0);
                body.truncate(cut);
            }
            return Err(FetchError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes().await?;
        let payload: serde_json::Value =
            serde_json::from_slice(&bytes).map_err(|e| FetchError::Malformed(e.to_string()))?;

        parse_routing_rules(&payload)
    }
}

/// Build `GET {base}/api/v1/workloads/routing-rules?baselineKind=..` for this worker.
pub fn routing_rules_url(config: &RouteAuthorityConfig, sandbox_name: Option<&str>) -> Url {
    let mut url = config.base_url.clone();
    url.set_path(ROUTING_RULES_PATH);
    url.set_fragment(None);
    {
        let mut query = url.query_pairs_mut();
        query.clear();
        query
            .append_pair("baselineKind", &config.baseline.kind)
            .append_pair("baselineNamespace", &config.baseline.namespace)
            .append_pair("baselineName", &config.baseline.name);
        if let Some(name) = sandbox_name {
            query.append_pair("destinationSandboxName", name);
        }
    }
    url
}

/// Extract routing keys from a routing-rules response.
///
/// Absent or null `routingRules` means no rules. Individual rules without a
/// usable `routingKey` are skipped.
pub fn parse_routing_rules(payload: &serde_json::Value) -> Result<HashSet<RoutingKey>, FetchError> {
    let object = payload
        .as_object()
        .ok_or_else(|| FetchError::Malformed("expected a JSON object".into()))?;

    let rules = match object.get("routingRules") {
        None | Some(serde_json::Value::Null) => return Ok(HashSet::new()),
        Some(serde_json::Value::Array(rules)) => rules,
        Some(other) => {
            return Err(FetchError::Malformed(format!(
                "routingRules is not a list: {other}"
            )));
        }
    };

    Ok(rules
        .iter()
        .filter_map(|rule| rule.get("routingKey"))
        .filter_map(serde_json::Value::as_str)
        .filter_map(RoutingKey::new)
        .collect())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::config::BaselineWorkload;

    fn config(base: &str) -> RouteAuthorityConfig {
        RouteAuthorityConfig {
            base_url: Url::parse(base).unwrap(),
            baseline: BaselineWorkload {
                kind: "Deployment".into(),
                namespace: "banking".into(),
                name: "temporal worker".into(),
            },
            refresh_interval: Duration::from_secs(5),
            request_timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn baseline_url_has_no_sandbox_param() {
        let url = routing_rules_url(&config("http://routeserver:7778"), None);
        assert_eq!(
            url.as_str(),
            "http://routeserver:7778/api/v1/workloads/routing-rules?baselineKind=Deployment&baselineNamespace=banking&baselineName=temporal+worker"
        );
    }

    #[test]
    fn sandbox_url_scopes_to_sandbox() {
        let url = routing_rules_url(&config("https://routes.example.com/ignored?x=1"), Some("feat-1"));
        assert_eq!(url.path(), ROUTING_RULES_PATH);
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs.len(), 4);
        assert_eq!(pairs[3], ("destinationSandboxName".into(), "feat-1".into()));
    }

    #[test]
    fn parses_routing_keys_and_skips_bad_entries() {
        let payload = json!({
            "routingRules": [
                {"routingKey": "r1", "name": "rule-1"},
                {"routingKey": "r2"},
                {"routingKey": ""},
                {"routingKey": 42},
                {"name": "no-key"},
                "garbage",
                {"routingKey": "r1"}
            ]
        });
        let keys = parse_routing_rules(&payload).unwrap();
        let mut keys: Vec<&str> = keys.iter().map(RoutingKey::as_str).collect();
        keys.sort_unstable();
        assert_eq!(keys, vec!["r1", "r2"]);
    }

    #[test]
    fn missing_rules_is_empty_table() {
        assert!(parse_routing_rules(&json!({})).unwrap().is_empty());
        assert!(parse_routing_rules(&json!({"routingRules": null})).unwrap().is_empty());
    }

    #[test]
    fn non_object_payload_is_malformed() {
        assert!(matches!(
            parse_routing_rules(&json!(["r1"])),
            Err(FetchError::Malformed(_))
        ));
        assert!(matches!(
            parse_routing_rules(&json!({"routingRules": "r1"})),
            Err(FetchError::Malformed(_))
        ));
    }
}
