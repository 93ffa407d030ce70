use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// User-configurable settings merged into every outgoing request context.
///
/// Known knobs are typed; anything the deployment adds beyond them travels in
/// the flattened `extra` map untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChatOptions {
    pub fn is_empty(&self) -> bool {
        self.model.is_none() && self.temperature.is_none() && self.extra.is_empty()
    }

    /// Overlays `self` on top of `base`: explicit values win, everything else
    /// falls through.
    pub fn merged_over(&self, base: &ChatOptions) -> ChatOptions {
        let mut extra = base.extra.clone();
        for (key, value) in &self.extra {
            extra.insert(key.clone(), value.clone());
        }

        ChatOptions {
            model: self.model.clone().or_else(|| base.model.clone()),
            temperature: self.temperature.or(base.temperature),
            extra,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_prefers_explicit_values_and_unions_extras() {
        let mut base = ChatOptions::default();
        base.model = Some("base-model".to_string());
        base.temperature = Some(0.2);
        base.extra.insert("locale".to_string(), json!("en"));

        let mut overlay = ChatOptions::default();
        overlay.model = Some("override-model".to_string());
        overlay.extra.insert("persona".to_string(), json!("terse"));

        let merged = overlay.merged_over(&base);
        assert_eq!(merged.model.as_deref(), Some("override-model"));
        assert_eq!(merged.temperature, Some(0.2));
        assert_eq!(merged.extra.get("locale"), Some(&json!("en")));
        assert_eq!(merged.extra.get("persona"), Some(&json!("terse")));
    }

    #[test]
    fn unknown_fields_round_trip_through_extra() {
        let parsed: ChatOptions =
            serde_json::from_value(json!({"model": "m1", "verbosity": "high"})).unwrap();
        assert_eq!(parsed.model.as_deref(), Some("m1"));
        assert_eq!(parsed.extra.get("verbosity"), Some(&json!("high")));

        let round_tripped = serde_json::to_value(&parsed).unwrap();
        assert_eq!(round_tripped, json!({"model": "m1", "verbosity": "high"}));
    }
}
