//! Model reply contract
//!
//! The model answers with a single JSON object keyed in Russian, matching the
//! language of the prompt.

use serde_json::{Map, Value};

pub const KEY_CVE: &str = "CVE";
pub const KEY_DECISION: &str = "Решение";
pub const KEY_JUSTIFICATION: &str = "Обоснование";
pub const KEY_PATCH: &str = "Патч";
pub const KEY_PRIORITY: &str = "Приоритет";
pub const KEY_CHECKS: &str = "Проверки";
pub const KEY_MITIGATION: &str = "Меры";
pub const KEY_DISCREPANCIES: &str = "Расхождения";

/// Keys every accepted reply must carry
pub const REQUIRED_KEYS: [&str; 3] = [KEY_CVE, KEY_DECISION, KEY_JUSTIFICATION];

/// Raw model output plus the JSON object extracted from it, if any
#[derive(Debug, Clone)]
pub struct ModelReply {
    pub raw: String,
    pub object: Option<Map<String, Value>>,
}

impl ModelReply {
    pub fn is_valid(&self) -> bool {
        self.object
            .as_ref()
            .is_some_and(|obj| REQUIRED_KEYS.iter().all(|key| obj.contains_key(*key)))
    }

    pub fn cve(&self) -> Option<String> {
        self.field(KEY_CVE)
    }

    pub fn decision(&self) -> Option<String> {
        self.field(KEY_DECISION)
    }

    pub fn justification(&self) -> Option<String> {
        self.field(KEY_JUSTIFICATION)
    }

    /// Patch link; `null` in the reply means no patch was found
    pub fn patch(&self) -> Option<String> {
        self.field(KEY_PATCH)
    }

    pub fn priority(&self) -> Option<String> {
        self.field(KEY_PRIORITY)
    }

    pub fn required_checks(&self) -> Option<String> {
        self.field(KEY_CHECKS)
    }

    pub fn mitigation(&self) -> Option<String> {
        self.field(KEY_MITIGATION)
    }

    pub fn discrepancies(&self) -> Option<String> {
        self.field(KEY_DISCREPANCIES)
    }

    /// Render a field as text. Strings are returned as-is, arrays are joined
    /// with "; ", other values use their JSON form. `null` counts as absent.
    fn field(&self, key: &str) -> Option<String> {
        let value = self.object.as_ref()?.get(key)?;
        render_value(value)
    }
}

fn render_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(render_value).collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join("; "))
            }
        }
        other => Some(other.to_string()),
    }
}
