//! Structural validation of model replies
//!
//! The object is located with a greedy match from the first `{` to the last `}`.
//! Known limitation: a reply that echoes the example object next to its answer
//! yields one span covering both, which fails to parse and counts as invalid.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::model::ModelReply;
use crate::model::reply::REQUIRED_KEYS;

static JSON_SPAN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)\{.*\}").unwrap());

/// Extract and parse the first-to-last brace span of a reply
pub fn extract_json_object(raw: &str) -> Option<Map<String, Value>> {
    let Some(span) = JSON_SPAN.find(raw) else {
        tracing::debug!(reply_length = raw.len(), "No JSON object found in reply");
        return None;
    };

    match serde_json::from_str::<Value>(span.as_str()) {
        Ok(Value::Object(object)) => Some(object),
        Ok(_) => None,
        Err(e) => {
            tracing::warn!(error = %e, "Reply JSON failed to parse");
            None
        }
    }
}

/// Parse a raw reply into its extracted object
pub fn parse_reply(raw: &str) -> ModelReply {
    ModelReply {
        raw: raw.to_string(),
        object: extract_json_object(raw),
    }
}

/// Whether a reply carries a JSON object with every required key
pub fn is_valid(raw: &str) -> bool {
    let reply = parse_reply(raw);
    let valid = reply.is_valid();

    if !valid && let Some(object) = &reply.object {
        let missing: Vec<&str> = REQUIRED_KEYS
            .iter()
            .copied()
            .filter(|key| !object.contains_key(*key))
            .collect();
        tracing::warn!(missing = ?missing, "Reply is missing required keys");
    }

    valid
}
