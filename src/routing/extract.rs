//! Routing-key extraction from task context.
//!
//! Workflow tasks carry the key as a baggage entry. Activity tasks carry it
//! serialized inside a propagation header, which must be parsed. Extraction
//! never fails: anything unreadable degrades to "no key" and is logged.

use std::collections::HashMap;

use tracing::{debug, warn};

use super::{ROUTING_KEY_BAGGAGE, RoutingKey};
use crate::engine::task::{Payload, Task, TaskKind};

/// Header holding the serialized trace context of an activity invocation.
pub const TRACER_DATA_HEADER: &str = "_tracer-data";

/// Header holding a raw W3C baggage string.
pub const BAGGAGE_HEADER: &str = "baggage";

/// Extract the routing key for a task, based on its kind.
pub fn routing_key(task: &Task) -> Option<RoutingKey> {
    match task.kind {
        TaskKind::Workflow => from_baggage(&task.baggage),
        TaskKind::Activity => from_headers(&task.headers),
    }
}

/// Read the key from workflow baggage.
pub fn from_baggage(baggage: &HashMap<String, String>) -> Option<RoutingKey> {
    baggage
        .get(ROUTING_KEY_BAGGAGE)
        .and_then(|v| RoutingKey::new(v.as_str()))
}

/// Recover the key from activity propagation headers.
///
/// A raw `baggage` header wins; otherwise the `_tracer-data` header is decoded
/// as a JSON object whose `baggage` field holds the baggage string.
pub fn from_headers(headers: &HashMap<String, Payload>) -> Option<RoutingKey> {
    if let Some(payload) = headers.get(BAGGAGE_HEADER)
        && let Some(key) = baggage_member(&payload.data, ROUTING_KEY_BAGGAGE)
    {
        return RoutingKey::new(key);
    }

    let Some(payload) = headers.get(TRACER_DATA_HEADER) else {
        debug!("No {TRACER_DATA_HEADER} header on activity, no routing key");
        return None;
    };

    match tracer_baggage(&payload.data) {
        Ok(Some(baggage)) => baggage_member(&baggage, ROUTING_KEY_BAGGAGE).and_then(RoutingKey::new),
        Ok(None) => {
            debug!("{TRACER_DATA_HEADER} header carries no baggage");
            None
        }
        Err(e) => {
            warn!(error = %e, "Failed to parse {TRACER_DATA_HEADER} header, treating task as untagged");
            None
        }
    }
}

fn tracer_baggage(data: &str) -> Result<Option<String>, serde_json::Error> {
    let value: serde_json::Value = serde_json::from_str(data)?;
    Ok(value
        .get("baggage")
        .and_then(serde_json::Value::as_str)
        .map(str::to_string))
}

/// Look up `name` in a comma-separated `key=value` baggage list.
///
/// Member properties (`;prop`) are ignored, members without `=` are skipped.
pub fn baggage_member<'a>(baggage: &'a str, name: &str) -> Option<&'a str> {
    baggage.split(',').find_map(|member| {
        let entry = member.split(';').next().unwrap_or_default();
        let (key, value) = entry.split_once('=')?;
        (key.trim() == name).then(|| value.trim())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracer_header(data: &str) -> HashMap<String, Payload> {
        HashMap::from([(TRACER_DATA_HEADER.to_string(), Payload::new(data))])
    }

    #[test]
    fn workflow_key_from_baggage() {
        let task = Task::workflow("t1", "MoneyTransferWorkflow").with_baggage(ROUTING_KEY_BAGGAGE, "abc");
        assert_eq!(routing_key(&task).unwrap().as_str(), "abc");
    }

    #[test]
    fn workflow_empty_baggage_value_is_absent() {
        let task = Task::workflow("t1", "wf").with_baggage(ROUTING_KEY_BAGGAGE, "");
        assert!(routing_key(&task).is_none());
    }

    #[test]
    fn activity_key_from_tracer_data() {
        let headers = tracer_header(
            r#"{"traceparent": "00-abc-def-01", "baggage": "tenant=acme, sd-routing-key=r42 ,other=1"}"#,
        );
        assert_eq!(from_headers(&headers).unwrap().as_str(), "r42");
    }

    #[test]
    fn activity_ignores_workflow_baggage() {
        let task = Task::activity("t1", "withdraw").with_baggage(ROUTING_KEY_BAGGAGE, "abc");
        assert!(routing_key(&task).is_none());
    }

    #[test]
    fn raw_baggage_header_wins() {
        let task = Task::activity("t1", "deposit")
            .with_header(BAGGAGE_HEADER, Payload::new("sd-routing-key=direct"))
            .with_header(TRACER_DATA_HEADER, Payload::new(r#"{"baggage": "sd-routing-key=nested"}"#));
        assert_eq!(routing_key(&task).unwrap().as_str(), "direct");
    }

    #[test]
    fn malformed_header_yields_none() {
        assert!(from_headers(&tracer_header("{not json")).is_none());
        assert!(from_headers(&tracer_header("[1, 2, 3]")).is_none());
        assert!(from_headers(&tracer_header(r#"{"baggage": 7}"#)).is_none());
        assert!(from_headers(&tracer_header(r#"{"baggage": "novalue,=x"}"#)).is_none());
    }

    #[test]
    fn missing_header_yields_none() {
        assert!(from_headers(&HashMap::new()).is_none());
    }

    #[test]
    fn baggage_properties_are_stripped() {
        assert_eq!(
            baggage_member("sd-routing-key=k1;ttl=30,a=b", ROUTING_KEY_BAGGAGE),
            Some("k1")
        );
        assert_eq!(baggage_member("x=1,y=2", ROUTING_KEY_BAGGAGE), None);
    }

    #[test]
    fn value_may_contain_equals() {
        assert_eq!(baggage_member("sd-routing-key=a=b", ROUTING_KEY_BAGGAGE), Some("a=b"));
    }
}
