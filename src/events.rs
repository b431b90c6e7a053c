//! Telemetry events sent to the events endpoint.
use serde::Serialize;

const SDK_NAME: &str = "Rust";
const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");
const NOT_AVAILABLE: &str = "N/A";

/// An analytics event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum Event {
    /// A single flag evaluation.
    #[serde(rename = "IMPRESSION")]
    Impression(Impression),
    /// How many times a variation of a flag was served since the last flush.
    #[serde(rename = "VARIATIONS_COUNT_EVENT")]
    VariationCount(VariationCount),
}

/// Record of a flag evaluation shown to a user.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Impression {
    /// Creation time in milliseconds since the Unix epoch.
    pub created_time: i64,
    /// Key of the evaluated flag.
    pub flag_key: String,
    /// Identity of the user the flag was evaluated for.
    pub user_id: String,
    /// Served variation.
    pub variation_key: String,
    /// Flag status at the time of evaluation.
    pub flag_status: Option<String>,
    /// Why the variation was served.
    pub evaluation_reason: String,
    #[serde(flatten)]
    metadata: SdkMetadata,
}

/// Aggregated number of evaluations of one `(flag_key, variation_key)` pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VariationCount {
    /// Creation time in milliseconds since the Unix epoch.
    pub created_time: i64,
    /// Key of the evaluated flag.
    pub flag_key: String,
    /// Served variation.
    pub variation_key: String,
    /// Number of evaluations.
    pub count: u64,
    #[serde(flatten)]
    sdk: SdkInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
struct SdkInfo {
    sdk: &'static str,
    sdk_version: &'static str,
}

impl Default for SdkInfo {
    fn default() -> Self {
        SdkInfo {
            sdk: SDK_NAME,
            sdk_version: SDK_VERSION,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
struct SdkMetadata {
    #[serde(flatten)]
    sdk: SdkInfo,
    machine_ip: &'static str,
    machine_name: &'static str,
}

impl Default for SdkMetadata {
    fn default() -> Self {
        SdkMetadata {
            sdk: SdkInfo::default(),
            machine_ip: NOT_AVAILABLE,
            machine_name: NOT_AVAILABLE,
        }
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl Event {
    /// Create an impression event stamped with the current time.
    pub fn impression(
        flag_key: impl Into<String>,
        user_id: impl Into<String>,
        variation_key: impl Into<String>,
        flag_status: Option<String>,
        evaluation_reason: impl Into<String>,
    ) -> Event {
        Event::Impression(Impression {
            created_time: now_millis(),
            flag_key: flag_key.into(),
            user_id: user_id.into(),
            variation_key: variation_key.into(),
            flag_status,
            evaluation_reason: evaluation_reason.into(),
            metadata: SdkMetadata::default(),
        })
    }

    /// Create a variation count event stamped with the current time.
    pub fn variation_count(
        flag_key: impl Into<String>,
        variation_key: impl Into<String>,
        count: u64,
    ) -> Event {
        Event::VariationCount(VariationCount {
            created_time: now_millis(),
            flag_key: flag_key.into(),
            variation_key: variation_key.into(),
            count,
            sdk: SdkInfo::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn impression_wire_format() {
        let Event::Impression(mut impression) =
            Event::impression("new-checkout", "bob", "on", Some("ACTIVE".to_owned()), "Default rule")
        else {
            unreachable!();
        };
        impression.created_time = 1_700_000_000_000;

        assert_eq!(
            serde_json::to_value(Event::Impression(impression)).unwrap(),
            json!({
                "type": "IMPRESSION",
                "createdTime": 1_700_000_000_000_i64,
                "flagKey": "new-checkout",
                "userId": "bob",
                "variationKey": "on",
                "flagStatus": "ACTIVE",
                "evaluationReason": "Default rule",
                "sdk": "Rust",
                "sdkVersion": SDK_VERSION,
                "machineIp": "N/A",
                "machineName": "N/A",
            })
        );
    }

    #[test]
    fn variation_count_wire_format() {
        let event = Event::variation_count("new-checkout", "off", 3);
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["type"], "VARIATIONS_COUNT_EVENT");
        assert_eq!(value["flagKey"], "new-checkout");
        assert_eq!(value["variationKey"], "off");
        assert_eq!(value["count"], 3);
        assert_eq!(value["sdk"], "Rust");
        assert!(value["createdTime"].as_i64().unwrap() > 0);
        assert!(value.get("machineIp").is_none());
    }
}
