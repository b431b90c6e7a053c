use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};

/// Flags keyed by flag key.
pub type Flags = HashMap<String, Flag>;

/// Evaluation reason served when the client is offline.
pub const DEFAULT_VALUE_SERVED: &str = "DEFAULT_VALUE_SERVED";

/// A flag already evaluated by the server for the current user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Flag {
    /// Unique key of the flag.
    pub flag_key: String,
    /// Variation served to the user. `None` means the server did not pick one.
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    /// Flag status as reported by the server (e.g., `"ACTIVE"`).
    #[serde(default)]
    pub status: Option<String>,
    /// Why the server served this variation.
    #[serde(default)]
    pub evaluation_reason: Option<String>,
    /// Arbitrary configuration attached to the served variation.
    #[serde(default, deserialize_with = "null_as_default")]
    pub variant_config: serde_json::Map<String, serde_json::Value>,
    /// Soft-deleted flags are kept in the snapshot but never served.
    #[serde(default, deserialize_with = "null_as_default")]
    pub deleted: bool,
}

impl Flag {
    /// The served variation as a string. Non-string JSON values are rendered as JSON.
    pub fn variation(&self) -> Option<String> {
        match self.result.as_ref()? {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}

/// Response body of the flag evaluation endpoint.
///
/// The server wraps the flag list in a `data` object, while cached or proxied payloads may carry
/// the bare list. Both shapes are accepted.
///
/// The bare shape must not carry anything but `flags`, so a malformed wrapped body is rejected
/// instead of being read as an empty bare list.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum FlagsEnvelope {
    Wrapped { data: FlagList },
    Bare(BareFlagList),
}

#[derive(Debug, Deserialize)]
pub(crate) struct FlagList {
    #[serde(default)]
    flags: Vec<Flag>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct BareFlagList {
    flags: Vec<Flag>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl FlagsEnvelope {
    pub(crate) fn into_flags(self) -> Vec<Flag> {
        match self {
            FlagsEnvelope::Wrapped { data } => data.flags,
            FlagsEnvelope::Bare(list) => list.flags,
        }
    }
}

/// Convert a flag list into a map keyed by flag key. Later duplicates win.
pub(crate) fn index_flags(flags: Vec<Flag>) -> Flags {
    flags
        .into_iter()
        .map(|flag| (flag.flag_key.clone(), flag))
        .collect()
}

/// Result of a flag lookup with the details needed for debugging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VariationDetail {
    /// The served variation, or the configured default.
    pub value: String,
    /// Flag status, if the flag was found.
    pub status: Option<String>,
    /// Why this value was served.
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn parses_wrapped_envelope() {
        let envelope: FlagsEnvelope = serde_json::from_value(json!({
            "data": {
                "flags": [
                    {"flagKey": "a", "result": "on", "status": "ACTIVE", "evaluationReason": "Default rule"},
                    {"flagKey": "b", "result": null, "deleted": true}
                ]
            }
        }))
        .unwrap();

        let flags = index_flags(envelope.into_flags());

        assert_eq!(flags.len(), 2);
        assert_eq!(flags["a"].variation(), Some("on".to_owned()));
        assert_eq!(flags["a"].evaluation_reason.as_deref(), Some("Default rule"));
        assert_eq!(flags["b"].variation(), None);
        assert!(flags["b"].deleted);
    }

    #[test]
    fn parses_bare_envelope() {
        let envelope: FlagsEnvelope = serde_json::from_value(json!({
            "flags": [{"flagKey": "a", "result": "off", "variantConfig": {"color": "red"}}]
        }))
        .unwrap();

        let flags = index_flags(envelope.into_flags());

        assert_eq!(flags["a"].variation(), Some("off".to_owned()));
        assert_eq!(flags["a"].variant_config["color"], "red");
    }

    #[test]
    fn null_fields_fall_back_to_defaults() {
        let envelope: FlagsEnvelope = serde_json::from_value(json!({
            "data": {
                "flags": [
                    {"flagKey": "a", "result": "on", "variantConfig": null, "status": null, "deleted": null},
                    {"flagKey": "b", "result": "off"}
                ]
            }
        }))
        .unwrap();

        let flags = index_flags(envelope.into_flags());

        assert_eq!(flags.len(), 2);
        assert!(flags["a"].variant_config.is_empty());
        assert_eq!(flags["a"].status, None);
        assert!(!flags["a"].deleted);
    }

    #[test]
    fn malformed_wrapped_envelope_is_rejected() {
        let missing_key = serde_json::from_value::<FlagsEnvelope>(json!({
            "data": {"flags": [{"result": "on"}]}
        }));
        let bad_list = serde_json::from_value::<FlagsEnvelope>(json!({
            "data": {"flags": "nope"}
        }));

        assert!(missing_key.is_err());
        assert!(bad_list.is_err());
    }

    #[test]
    fn non_string_results_render_as_json() {
        let flag: Flag = serde_json::from_value(json!({"flagKey": "n", "result": 3})).unwrap();

        assert_eq!(flag.variation(), Some("3".to_owned()));
    }
}
