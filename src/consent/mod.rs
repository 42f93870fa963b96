//! Consent state as read from the consent banner's storage and events.
//!
//! The banner owns the writes. Everything here only reads a decision and
//! answers "may this loader run?".

pub mod channel;
pub mod store;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use channel::{ConsentChannel, Listen, ListenerId};
pub use store::{ConsentStore, KeyValueStorage, MemoryStorage, StoredConsent, CONSENT_STORAGE_KEY};

/// Consent Mode v2 categories that gate ads and analytics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentCategory {
    AdStorage,
    AnalyticsStorage,
    AdUserData,
    AdPersonalization,
}

impl ConsentCategory {
    pub const ALL: [ConsentCategory; 4] = [
        ConsentCategory::AdStorage,
        ConsentCategory::AnalyticsStorage,
        ConsentCategory::AdUserData,
        ConsentCategory::AdPersonalization,
    ];

    /// Categories that matter to ad platforms (the pixel).
    pub const ADS: [ConsentCategory; 3] = [
        ConsentCategory::AdStorage,
        ConsentCategory::AdUserData,
        ConsentCategory::AdPersonalization,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConsentCategory::AdStorage => "ad_storage",
            ConsentCategory::AnalyticsStorage => "analytics_storage",
            ConsentCategory::AdUserData => "ad_user_data",
            ConsentCategory::AdPersonalization => "ad_personalization",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == key)
    }
}

impl fmt::Display for ConsentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConsentValue {
    Granted,
    Denied,
    #[default]
    Unset,
}

impl ConsentValue {
    /// Only the exact strings `"granted"` and `"denied"` count.
    pub fn from_json(value: &Value) -> Self {
        match value.as_str() {
            Some("granted") => ConsentValue::Granted,
            Some("denied") => ConsentValue::Denied,
            _ => ConsentValue::Unset,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConsentValue::Granted => "granted",
            ConsentValue::Denied => "denied",
            ConsentValue::Unset => "unset",
        }
    }
}

/// Per-category consent. A missing category reads as `Unset`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsentDecision {
    choices: BTreeMap<ConsentCategory, ConsentValue>,
}

impl ConsentDecision {
    pub fn unset() -> Self {
        Self::default()
    }

    pub fn all(value: ConsentValue) -> Self {
        ConsentCategory::ALL
            .into_iter()
            .fold(Self::default(), |d, c| d.with(c, value))
    }

    pub fn with(mut self, category: ConsentCategory, value: ConsentValue) -> Self {
        self.set(category, value);
        self
    }

    pub fn set(&mut self, category: ConsentCategory, value: ConsentValue) {
        if value == ConsentValue::Unset {
            self.choices.remove(&category);
        } else {
            self.choices.insert(category, value);
        }
    }

    pub fn get(&self, category: ConsentCategory) -> ConsentValue {
        self.choices.get(&category).copied().unwrap_or_default()
    }

    pub fn any_granted(&self, categories: &[ConsentCategory]) -> bool {
        categories.iter().any(|c| self.get(*c) == ConsentValue::Granted)
    }

    /// Read a `choices` object. Unknown keys are ignored; a non-object reads
    /// as fully unset.
    pub fn from_choices(choices: &Value) -> Self {
        let mut decision = Self::default();
        if let Some(map) = choices.as_object() {
            for (key, value) in map {
                if let Some(category) = ConsentCategory::from_key(key) {
                    decision.set(category, ConsentValue::from_json(value));
                }
            }
        }
        decision
    }

    /// Read the detail payload of a `consent_update` event.
    pub fn from_event_detail(detail: &Value) -> Self {
        detail
            .get("choices")
            .map(Self::from_choices)
            .unwrap_or_default()
    }

    /// Only the categories that have a value; used for `consent update`.
    pub fn to_choices(&self) -> Value {
        let map: Map<String, Value> = self
            .choices
            .iter()
            .map(|(c, v)| (c.as_str().to_string(), Value::from(v.as_str())))
            .collect();
        Value::Object(map)
    }
}

/// True iff any of the four categories is granted. Everything else, including
/// garbage input, is a no.
///
/// A grant of an unrelated category (say `ad_user_data` alone) is enough to
/// load the full runtime. That is how the site has always behaved.
pub fn is_authorized(decision: &ConsentDecision) -> bool {
    decision.any_granted(&ConsentCategory::ALL)
}

/// Gate for ad-platform loaders; analytics consent alone is not enough.
pub fn ads_authorized(decision: &ConsentDecision) -> bool {
    decision.any_granted(&ConsentCategory::ADS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn absent_categories_are_unset() {
        let d = ConsentDecision::from_choices(&json!({"ad_storage": "denied"}));
        assert_eq!(d.get(ConsentCategory::AdStorage), ConsentValue::Denied);
        assert_eq!(d.get(ConsentCategory::AnalyticsStorage), ConsentValue::Unset);
        assert!(!is_authorized(&d));
    }

    #[test]
    fn any_single_grant_authorizes() {
        for category in ConsentCategory::ALL {
            let d = ConsentDecision::all(ConsentValue::Denied)
                .with(category, ConsentValue::Granted);
            assert!(is_authorized(&d), "{} alone should authorize", category);
        }
    }

    #[test]
    fn ad_user_data_alone_authorizes_even_with_analytics_denied() {
        let d = ConsentDecision::from_choices(&json!({
            "analytics_storage": "denied",
            "ad_user_data": "granted"
        }));
        assert!(is_authorized(&d));
    }

    #[test]
    fn malformed_values_fail_closed() {
        let d = ConsentDecision::from_choices(&json!({
            "ad_storage": true,
            "analytics_storage": "GRANTED",
            "ad_user_data": 1,
            "functionality_storage": "granted"
        }));
        assert_eq!(d, ConsentDecision::unset());
        assert!(!is_authorized(&ConsentDecision::from_choices(&json!("granted"))));
        assert!(!is_authorized(&ConsentDecision::from_event_detail(&json!(null))));
    }

    #[test]
    fn analytics_only_does_not_authorize_ads() {
        let d = ConsentDecision::unset()
            .with(ConsentCategory::AnalyticsStorage, ConsentValue::Granted);
        assert!(is_authorized(&d));
        assert!(!ads_authorized(&d));
    }

    #[test]
    fn event_detail_reads_choices() {
        let d = ConsentDecision::from_event_detail(&json!({
            "status": "granted",
            "choices": {"ad_storage": "granted"}
        }));
        assert_eq!(d.get(ConsentCategory::AdStorage), ConsentValue::Granted);
        assert_eq!(d.to_choices(), json!({"ad_storage": "granted"}));
    }
}
