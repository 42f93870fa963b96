use std::collections::HashMap;

use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ConsentDecision;

/// Versioned storage key written by the consent banner.
pub const CONSENT_STORAGE_KEY: &str = "gb_consent_v1";

/// The page's `localStorage`, or anything shaped like it.
pub trait KeyValueStorage {
    fn get_item(&self, key: &str) -> Option<String>;
    fn set_item(&mut self, key: &str, value: &str);
    fn remove_item(&mut self, key: &str);
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    items: HashMap<String, String>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStorage for MemoryStorage {
    fn get_item(&self, key: &str) -> Option<String> {
        self.items.get(key).cloned()
    }

    fn set_item(&mut self, key: &str, value: &str) {
        self.items.insert(key.to_string(), value.to_string());
    }

    fn remove_item(&mut self, key: &str) {
        self.items.remove(key);
    }
}

/// On-disk shape of the banner's record. Only `choices` drives the
/// decision; the other fields are carried as whatever JSON the banner wrote.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredConsent {
    #[serde(default)]
    pub status: Option<Value>,
    #[serde(default)]
    pub choices: Value,
    #[serde(default)]
    pub updated_at: Option<Value>,
    #[serde(default)]
    pub version: Option<Value>,
}

impl StoredConsent {
    /// Decode a raw blob. `None` for anything that isn't a JSON object.
    pub fn parse(raw: &str) -> Option<Self> {
        match serde_json::from_str::<StoredConsent>(raw) {
            Ok(stored) => Some(stored),
            Err(e) => {
                debug!("Ignoring unreadable consent record: {}", e);
                None
            }
        }
    }

    pub fn decision(&self) -> ConsentDecision {
        ConsentDecision::from_choices(&self.choices)
    }
}

/// Synchronous read of the current consent decision.
pub trait ConsentStore {
    fn decision(&self) -> ConsentDecision;
}

impl<S: KeyValueStorage + ?Sized> ConsentStore for S {
    fn decision(&self) -> ConsentDecision {
        self.get_item(CONSENT_STORAGE_KEY)
            .and_then(|raw| StoredConsent::parse(&raw))
            .map(|stored| stored.decision())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consent::{is_authorized, ConsentCategory, ConsentValue};

    #[test]
    fn missing_record_is_all_unset() {
        let storage = MemoryStorage::new();
        assert_eq!(storage.decision(), ConsentDecision::unset());
    }

    #[test]
    fn corrupt_record_is_all_unset() {
        let mut storage = MemoryStorage::new();
        storage.set_item(CONSENT_STORAGE_KEY, "{not json");
        assert_eq!(storage.decision(), ConsentDecision::unset());
        storage.set_item(CONSENT_STORAGE_KEY, "null");
        assert_eq!(storage.decision(), ConsentDecision::unset());
        storage.set_item(CONSENT_STORAGE_KEY, "[1,2,3]");
        assert!(!is_authorized(&storage.decision()));
    }

    #[test]
    fn banner_record_is_read() {
        let mut storage = MemoryStorage::new();
        storage.set_item(
            CONSENT_STORAGE_KEY,
            r#"{"status":"granted","updated_at":"2025-10-24T10:00:00Z","version":1,
                "choices":{"ad_storage":"granted","analytics_storage":"denied",
                           "functionality_storage":"granted"}}"#,
        );
        let d = storage.decision();
        assert_eq!(d.get(ConsentCategory::AdStorage), ConsentValue::Granted);
        assert_eq!(d.get(ConsentCategory::AnalyticsStorage), ConsentValue::Denied);
        assert_eq!(d.get(ConsentCategory::AdUserData), ConsentValue::Unset);
    }

    #[test]
    fn record_without_choices_is_unset() {
        let mut storage = MemoryStorage::new();
        storage.set_item(CONSENT_STORAGE_KEY, r#"{"status":"granted"}"#);
        assert!(!is_authorized(&storage.decision()));
    }

    #[test]
    fn odd_metadata_types_keep_the_choices() {
        let mut storage = MemoryStorage::new();
        storage.set_item(
            CONSENT_STORAGE_KEY,
            r#"{"choices":{"ad_storage":"granted"},"updated_at":1729760000000}"#,
        );
        assert!(is_authorized(&storage.decision()));

        storage.set_item(
            CONSENT_STORAGE_KEY,
            r#"{"status":true,"choices":{"analytics_storage":"granted"},"version":"1"}"#,
        );
        let d = storage.decision();
        assert_eq!(d.get(ConsentCategory::AnalyticsStorage), ConsentValue::Granted);
    }
}
