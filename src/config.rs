use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use log::{info, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::conversion::MAX_CALLBACK_TIMEOUT_MS;

/// Production Google Ads account.
pub const DEFAULT_ADS_ACCOUNT_ID: &str = "AW-17627402053";
pub const DEFAULT_CONVERSION_LABEL: &str = "mdOMCOTV3acbEMWes9VB";
pub const DEFAULT_GA4_MEASUREMENT_ID: &str = "G-CMMHJP9LEY";
pub const DEFAULT_TAG_ENDPOINT: &str = "https://www.googletagmanager.com/gtag/js";
pub const DEFAULT_TAG_SCRIPT_ID: &str = "gtag-lib";

pub const DEFAULT_PIXEL_ID: &str = "1102565141856929";
pub const DEFAULT_PIXEL_SRC: &str = "https://connect.facebook.net/en_US/fbevents.js";
pub const DEFAULT_PIXEL_SCRIPT_ID: &str = "fbevents-lib";
/// Value left in templates that were never filled in.
pub const PIXEL_ID_PLACEHOLDER: &str = "FACEBOOK_PIXEL_ID";

fn ga4_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^G-[A-Z0-9]+$").unwrap())
}

fn ads_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^AW-[0-9]+$").unwrap())
}

fn currency_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Z]{3}$").unwrap())
}

pub fn is_valid_ga4_id(id: &str) -> bool {
    ga4_pattern().is_match(id.trim())
}

/// Return the first candidate that is a well-formed GA4 id, upper-cased.
pub fn resolve_measurement_id<'a>(candidates: impl IntoIterator<Item = &'a str>) -> Option<String> {
    candidates
        .into_iter()
        .map(str::trim)
        .find(|c| is_valid_ga4_id(c))
        .map(|c| c.to_uppercase())
}

/// ISO 4217 currency code. Only ever constructed from configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    pub fn parse(code: &str) -> Result<Self, String> {
        if currency_pattern().is_match(code) {
            Ok(Currency(code.to_string()))
        } else {
            Err(format!("invalid currency code '{}'", code))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn gbp() -> Self {
        Currency("GBP".to_string())
    }

    pub fn eur() -> Self {
        Currency("EUR".to_string())
    }
}

impl TryFrom<String> for Currency {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Currency::parse(&value)
    }
}

impl From<Currency> for String {
    fn from(c: Currency) -> Self {
        c.0
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a conversion is attributed: `<account>/<label>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendTarget {
    pub account: String,
    pub label: String,
}

impl fmt::Display for SendTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.account, self.label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GoogleConfig {
    pub ads_account_id: String,
    pub conversion_label: String,
    pub ga4_measurement_id: Option<String>,
    pub tag_endpoint: String,
    pub script_id: String,
}

impl Default for GoogleConfig {
    fn default() -> Self {
        GoogleConfig {
            ads_account_id: DEFAULT_ADS_ACCOUNT_ID.to_string(),
            conversion_label: DEFAULT_CONVERSION_LABEL.to_string(),
            ga4_measurement_id: Some(DEFAULT_GA4_MEASUREMENT_ID.to_string()),
            tag_endpoint: DEFAULT_TAG_ENDPOINT.to_string(),
            script_id: DEFAULT_TAG_SCRIPT_ID.to_string(),
        }
    }
}

impl GoogleConfig {
    /// GA4 id first (when valid), then the Ads account; duplicates dropped.
    pub fn tracked_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        if let Some(ga4) = self
            .ga4_measurement_id
            .as_deref()
            .and_then(|id| resolve_measurement_id([id]))
        {
            ids.push(ga4);
        }
        if !self.ads_account_id.is_empty() && !ids.contains(&self.ads_account_id) {
            ids.push(self.ads_account_id.clone());
        }
        ids
    }

    /// Id named in the loader script URL.
    pub fn primary_id(&self) -> String {
        self.tracked_ids()
            .into_iter()
            .next()
            .unwrap_or_else(|| DEFAULT_ADS_ACCOUNT_ID.to_string())
    }

    pub fn send_target(&self) -> SendTarget {
        SendTarget {
            account: self.ads_account_id.clone(),
            label: self.conversion_label.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PixelConfig {
    pub pixel_id: Option<String>,
    pub script_src: String,
    pub script_id: String,
}

impl Default for PixelConfig {
    fn default() -> Self {
        PixelConfig {
            pixel_id: Some(DEFAULT_PIXEL_ID.to_string()),
            script_src: DEFAULT_PIXEL_SRC.to_string(),
            script_id: DEFAULT_PIXEL_SCRIPT_ID.to_string(),
        }
    }
}

impl PixelConfig {
    /// Configured id, unless empty or still the template placeholder.
    pub fn usable_id(&self) -> Option<&str> {
        self.pixel_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty() && *id != PIXEL_ID_PLACEHOLDER)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionConfig {
    /// Currency used by the conversion helper (`report_conversion`).
    pub helper_currency: Currency,
    /// Currency used by CTA tracking when it fires directly.
    pub cta_currency: Currency,
    pub value: f64,
    /// How long a deferred navigation waits for the runtime callback.
    pub callback_timeout_ms: u64,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        ConversionConfig {
            helper_currency: Currency::gbp(),
            cta_currency: Currency::eur(),
            value: 1.0,
            callback_timeout_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttributionConfig {
    pub ttl_days: i64,
}

impl Default for AttributionConfig {
    fn default() -> Self {
        AttributionConfig { ttl_days: 7 }
    }
}

/// Which tracking scripts a page includes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Features {
    pub attribution: bool,
    pub engagement: bool,
    pub cta_binder: bool,
    pub conversion_helper: bool,
    pub cta_helper: bool,
    pub pixel: bool,
}

impl Default for Features {
    fn default() -> Self {
        Features {
            attribution: true,
            engagement: true,
            cta_binder: true,
            conversion_helper: true,
            cta_helper: true,
            pixel: true,
        }
    }
}

/// Everything a page needs to wire up tracking.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    pub google: GoogleConfig,
    pub pixel: PixelConfig,
    pub conversion: ConversionConfig,
    pub attribution: AttributionConfig,
    pub features: Features,
    /// Verbose loader logging (the old `DEBUG_ADS` switch).
    pub debug: bool,
}

impl TrackingConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, String> {
        let config: TrackingConfig = toml::from_str(raw).map_err(|e| e.to_string())?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, String> {
        let raw = fs::read_to_string(path)
            .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
        let config = Self::from_toml_str(&raw)?;
        info!("Loaded tracking config from {}", path.display());
        Ok(config)
    }

    /// Apply environment overrides. `lookup` is usually `std::env::var(..).ok()`.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let env_ga4: Vec<String> = ["GA4_MEASUREMENT_ID", "GA_MEASUREMENT_ID"]
            .iter()
            .filter_map(|key| lookup(key))
            .filter(|v| !v.trim().is_empty())
            .collect();
        for raw in env_ga4.iter().filter(|v| !is_valid_ga4_id(v.as_str())) {
            warn!("Ignoring malformed GA4 measurement id '{}'", raw.trim());
        }
        if let Some(id) = resolve_measurement_id(env_ga4.iter().map(String::as_str)) {
            self.google.ga4_measurement_id = Some(id);
        }
        if let Some(label) = lookup("AW_CONVERSION_LABEL").filter(|v| !v.trim().is_empty()) {
            self.google.conversion_label = label.trim().to_string();
        }
        if let Some(pid) = lookup("FB_PIXEL_ID").filter(|v| !v.trim().is_empty()) {
            self.pixel.pixel_id = Some(pid.trim().to_string());
        }
        if let Some(flag) = lookup("DEBUG_ADS") {
            self.debug = flag == "1" || flag == "true";
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if !ads_pattern().is_match(&self.google.ads_account_id) {
            return Err(format!(
                "invalid ads account id '{}'",
                self.google.ads_account_id
            ));
        }
        if self.google.conversion_label.contains('/') {
            return Err("conversion label must not contain '/'".to_string());
        }
        if let Some(id) = &self.google.ga4_measurement_id {
            if !is_valid_ga4_id(id) {
                return Err(format!("invalid GA4 measurement id '{}'", id));
            }
        }
        if self.google.script_id.is_empty() || self.pixel.script_id.is_empty() {
            return Err("script ids must not be empty".to_string());
        }
        if !(self.conversion.value.is_finite() && self.conversion.value >= 0.0) {
            return Err("conversion value must be a non-negative number".to_string());
        }
        if self.conversion.callback_timeout_ms == 0
            || self.conversion.callback_timeout_ms > MAX_CALLBACK_TIMEOUT_MS
        {
            return Err(format!(
                "callback_timeout_ms must be between 1 and {}",
                MAX_CALLBACK_TIMEOUT_MS
            ));
        }
        if self.attribution.ttl_days <= 0 {
            return Err("attribution ttl_days must be positive".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_track_ga4_then_ads() {
        let config = TrackingConfig::default();
        assert_eq!(
            config.google.tracked_ids(),
            vec!["G-CMMHJP9LEY".to_string(), "AW-17627402053".to_string()]
        );
        assert_eq!(config.google.primary_id(), "G-CMMHJP9LEY");
        assert_eq!(
            config.google.send_target().to_string(),
            "AW-17627402053/mdOMCOTV3acbEMWes9VB"
        );
    }

    #[test]
    fn without_ga4_primary_is_ads_account() {
        let mut google = GoogleConfig::default();
        google.ga4_measurement_id = None;
        assert_eq!(google.tracked_ids(), vec!["AW-17627402053".to_string()]);
        assert_eq!(google.primary_id(), "AW-17627402053");
    }

    #[test]
    fn resolve_picks_first_valid_and_uppercases() {
        let id = resolve_measurement_id(["", "UA-1234", "  g-abc123  ", "G-ZZZ"]);
        assert_eq!(id.as_deref(), Some("G-ABC123"));
        assert!(resolve_measurement_id(["nope", "G-"]).is_none());
    }

    #[test]
    fn currency_rejects_lowercase_and_long_codes() {
        assert!(Currency::parse("GBP").is_ok());
        assert!(Currency::parse("gbp").is_err());
        assert!(Currency::parse("EURO").is_err());
    }

    #[test]
    fn toml_partial_sections_fill_defaults() {
        let raw = r#"
debug = true

[google]
ga4_measurement_id = "G-TEST42"

[conversion]
cta_currency = "USD"
"#;
        let config = TrackingConfig::from_toml_str(raw).unwrap();
        assert!(config.debug);
        assert_eq!(config.google.ads_account_id, DEFAULT_ADS_ACCOUNT_ID);
        assert_eq!(config.google.ga4_measurement_id.as_deref(), Some("G-TEST42"));
        assert_eq!(config.conversion.cta_currency.as_str(), "USD");
        assert_eq!(config.conversion.helper_currency.as_str(), "GBP");
        assert_eq!(config.conversion.callback_timeout_ms, 2000);
        assert!(config.features.pixel);
    }

    #[test]
    fn features_can_be_switched_off() {
        let raw = "[features]\npixel = false\ncta_helper = false\n";
        let config = TrackingConfig::from_toml_str(raw).unwrap();
        assert!(!config.features.pixel);
        assert!(!config.features.cta_helper);
        assert!(config.features.cta_binder);
    }

    #[test]
    fn callback_timeout_is_bounded() {
        let raw = "[conversion]\ncallback_timeout_ms = 0\n";
        assert!(TrackingConfig::from_toml_str(raw).is_err());
        let raw = "[conversion]\ncallback_timeout_ms = 600000\n";
        assert!(TrackingConfig::from_toml_str(raw).is_err());
    }

    #[test]
    fn toml_bad_currency_is_an_error() {
        let raw = "[conversion]\nhelper_currency = \"pounds\"\n";
        assert!(TrackingConfig::from_toml_str(raw).is_err());
    }

    #[test]
    fn toml_bad_ads_account_is_an_error() {
        let raw = "[google]\nads_account_id = \"17627402053\"\n";
        let err = TrackingConfig::from_toml_str(raw).unwrap_err();
        assert!(err.contains("ads account"));
    }

    #[test]
    fn env_overrides_apply_and_first_valid_ga4_wins() {
        let mut config = TrackingConfig::default();
        config.apply_env(|key| match key {
            "GA4_MEASUREMENT_ID" => Some("not-an-id".to_string()),
            "GA_MEASUREMENT_ID" => Some("g-fromenv".to_string()),
            "AW_CONVERSION_LABEL" => Some(" newLabel ".to_string()),
            "DEBUG_ADS" => Some("1".to_string()),
            _ => None,
        });
        assert_eq!(config.google.ga4_measurement_id.as_deref(), Some("G-FROMENV"));
        assert_eq!(config.google.conversion_label, "newLabel");
        assert!(config.debug);
    }

    #[test]
    fn env_without_valid_ga4_keeps_configured_id() {
        let mut config = TrackingConfig::default();
        config.apply_env(|key| match key {
            "GA4_MEASUREMENT_ID" => Some("not-an-id".to_string()),
            "GA_MEASUREMENT_ID" => Some("  ".to_string()),
            _ => None,
        });
        assert_eq!(config.google.ga4_measurement_id.as_deref(), Some(DEFAULT_GA4_MEASUREMENT_ID));
    }

    #[test]
    fn pixel_placeholder_is_not_usable() {
        let mut pixel = PixelConfig::default();
        assert_eq!(pixel.usable_id(), Some(DEFAULT_PIXEL_ID));
        pixel.pixel_id = Some(PIXEL_ID_PLACEHOLDER.to_string());
        assert!(pixel.usable_id().is_none());
        pixel.pixel_id = Some("   ".to_string());
        assert!(pixel.usable_id().is_none());
    }
}
