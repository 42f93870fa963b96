use std::fmt;

use chrono::{DateTime, Duration, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::consent::KeyValueStorage;

pub const ATTRIBUTION_STORAGE_KEY: &str = "gb_attrib_v1";

/// Query parameters captured from landing URLs, in form-field order.
pub const ATTRIBUTION_KEYS: [&str; 7] = [
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_content",
    "utm_term",
    "gclid",
    "fbclid",
];

/// Where this visitor came from.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Attribution {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub utm_source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub utm_medium: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub utm_campaign: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub utm_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub utm_term: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gclid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fbclid: Option<String>,
    /// Epoch milliseconds of the last capture.
    #[serde(rename = "_ts")]
    pub captured_at: i64,
}

impl Attribution {
    fn slot(&mut self, key: &str) -> Option<&mut Option<String>> {
        match key {
            "utm_source" => Some(&mut self.utm_source),
            "utm_medium" => Some(&mut self.utm_medium),
            "utm_campaign" => Some(&mut self.utm_campaign),
            "utm_content" => Some(&mut self.utm_content),
            "utm_term" => Some(&mut self.utm_term),
            "gclid" => Some(&mut self.gclid),
            "fbclid" => Some(&mut self.fbclid),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        let value = match key {
            "utm_source" => &self.utm_source,
            "utm_medium" => &self.utm_medium,
            "utm_campaign" => &self.utm_campaign,
            "utm_content" => &self.utm_content,
            "utm_term" => &self.utm_term,
            "gclid" => &self.gclid,
            "fbclid" => &self.fbclid,
            _ => return None,
        };
        value.as_deref()
    }

    pub fn channel(&self) -> Channel {
        derive_channel(self)
    }

    /// Hidden inputs for lead forms: every captured key plus `channel_grouping`.
    pub fn hidden_fields(&self) -> Vec<(&'static str, String)> {
        let mut fields: Vec<(&'static str, String)> = ATTRIBUTION_KEYS
            .iter()
            .filter_map(|k| self.get(k).map(|v| (*k, v.to_string())))
            .collect();
        fields.push(("channel_grouping", self.channel().to_string()));
        fields
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Paid,
    OrganicSearch,
    OrganicSocial,
    Direct,
    Other,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Channel::Paid => "Paid",
            Channel::OrganicSearch => "Organic Search",
            Channel::OrganicSocial => "Organic Social",
            Channel::Direct => "Direct",
            Channel::Other => "Other",
        };
        f.write_str(name)
    }
}

pub fn derive_channel(a: &Attribution) -> Channel {
    let src = a.utm_source.as_deref().unwrap_or("").to_lowercase();
    let med = a.utm_medium.as_deref().unwrap_or("").to_lowercase();
    if matches!(med.as_str(), "cpc" | "ppc" | "paid_social") {
        return Channel::Paid;
    }
    if src.contains("google") && med == "organic" {
        return Channel::OrganicSearch;
    }
    if ["facebook", "instagram", "ig"].iter().any(|s| src.contains(s)) {
        return Channel::OrganicSocial;
    }
    if src == "direct" {
        return Channel::Direct;
    }
    Channel::Other
}

fn load(
    storage: &mut dyn KeyValueStorage,
    now: DateTime<Utc>,
    ttl: Duration,
) -> Option<Attribution> {
    let raw = storage.get_item(ATTRIBUTION_STORAGE_KEY)?;
    let stored: Attribution = match serde_json::from_str(&raw) {
        Ok(a) => a,
        Err(e) => {
            debug!("Ignoring unreadable attribution record: {}", e);
            return None;
        }
    };
    if now.timestamp_millis() - stored.captured_at > ttl.num_milliseconds() {
        storage.remove_item(ATTRIBUTION_STORAGE_KEY);
        return None;
    }
    Some(stored)
}

/// Merge this landing's parameters over the stored record and persist the
/// result when anything new arrived. Visitors with no source at all are
/// classified `direct` / `none`; that fallback is never persisted.
pub fn capture(
    location: &Url,
    storage: &mut dyn KeyValueStorage,
    now: DateTime<Utc>,
    ttl: Duration,
) -> Attribution {
    let mut current = load(storage, now, ttl).unwrap_or_else(|| Attribution {
        captured_at: now.timestamp_millis(),
        ..Default::default()
    });

    let mut touched = false;
    for key in ATTRIBUTION_KEYS {
        // First occurrence wins, like URLSearchParams::get.
        let value = location
            .query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
            .filter(|v| !v.is_empty());
        if let (Some(value), Some(slot)) = (value, current.slot(key)) {
            *slot = Some(value);
            touched = true;
        }
    }

    if touched {
        current.captured_at = now.timestamp_millis();
        match serde_json::to_string(&current) {
            Ok(raw) => storage.set_item(ATTRIBUTION_STORAGE_KEY, &raw),
            Err(e) => debug!("Could not persist attribution: {}", e),
        }
    }

    if current.utm_source.is_none() {
        current.utm_source = Some("direct".to_string());
        current.utm_medium = Some("none".to_string());
    }
    current
}
