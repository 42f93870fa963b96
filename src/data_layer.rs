//! The page's `dataLayer`: gtag commands and plain event records share one
//! ordered buffer, exactly as they do in the browser.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::attribution::Attribution;
use crate::queue::DrainQueue;

/// Handle for a runtime `event_callback`.
pub type CallbackId = u64;

/// One `gtag(...)` call.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Js {
        timestamp: DateTime<Utc>,
    },
    Config {
        target: String,
        params: Map<String, Value>,
    },
    Event {
        name: String,
        params: Map<String, Value>,
        callback: Option<CallbackId>,
    },
    Consent {
        mode: String,
        choices: Value,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Js { .. } => "js",
            Command::Config { .. } => "config",
            Command::Event { .. } => "event",
            Command::Consent { .. } => "consent",
        }
    }

    /// The argument list the runtime sees. A callback is rendered as
    /// `{"event_callback": <id>}` inside the params object.
    pub fn to_args(&self) -> Vec<Value> {
        match self {
            Command::Js { timestamp } => vec![
                Value::from("js"),
                Value::from(timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)),
            ],
            Command::Config { target, params } => {
                let mut args = vec![Value::from("config"), Value::from(target.as_str())];
                if !params.is_empty() {
                    args.push(Value::Object(params.clone()));
                }
                args
            }
            Command::Event { name, params, callback } => {
                let mut params = params.clone();
                if let Some(id) = callback {
                    params.insert("event_callback".to_string(), Value::from(*id));
                }
                vec![Value::from("event"), Value::from(name.as_str()), Value::Object(params)]
            }
            Command::Consent { mode, choices } => vec![
                Value::from("consent"),
                Value::from(mode.as_str()),
                choices.clone(),
            ],
        }
    }
}

/// Passively observed records pushed straight onto the data layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngagementEvent {
    ScrollDepth { percent: u8 },
    DownloadGuide { guide_id: String },
    CtaClick { cta_id: String, cta_location: String },
    SessionAttributionReady { attribution: Attribution },
}

impl EngagementEvent {
    pub fn name(&self) -> &'static str {
        match self {
            EngagementEvent::ScrollDepth { .. } => "scroll_depth",
            EngagementEvent::DownloadGuide { .. } => "download_guide",
            EngagementEvent::CtaClick { .. } => "cta_click",
            EngagementEvent::SessionAttributionReady { .. } => "session_attribution_ready",
        }
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    Command(Command),
    Record(EngagementEvent),
}

pub type DataLayer = DrainQueue<Entry>;

impl DrainQueue<Entry> {
    pub fn gtag(&mut self, command: Command) {
        self.push(Entry::Command(command));
    }

    pub fn record(&mut self, event: EngagementEvent) {
        self.push(Entry::Record(event));
    }

    pub fn commands(&self) -> impl Iterator<Item = &Command> {
        self.items().iter().filter_map(|e| match e {
            Entry::Command(c) => Some(c),
            Entry::Record(_) => None,
        })
    }

    pub fn records(&self) -> impl Iterator<Item = &EngagementEvent> {
        self.items().iter().filter_map(|e| match e {
            Entry::Record(r) => Some(r),
            Entry::Command(_) => None,
        })
    }

    /// Names of all records in order, for quick inspection.
    pub fn event_names(&self) -> Vec<&'static str> {
        self.records().map(EngagementEvent::name).collect()
    }

    /// Most recent record with the given name.
    pub fn last_record(&self, name: &str) -> Option<&EngagementEvent> {
        self.records().filter(|r| r.name() == name).last()
    }

    /// Conversion events queued so far.
    pub fn conversions(&self) -> impl Iterator<Item = &Command> {
        self.commands()
            .filter(|c| matches!(c, Command::Event { name, .. } if name == "conversion"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn records_serialize_with_event_tag() {
        let e = EngagementEvent::ScrollDepth { percent: 50 };
        assert_eq!(e.to_json(), json!({"event": "scroll_depth", "percent": 50}));
        let e = EngagementEvent::CtaClick {
            cta_id: "hero_cta".into(),
            cta_location: "hero".into(),
        };
        assert_eq!(
            e.to_json(),
            json!({"event": "cta_click", "cta_id": "hero_cta", "cta_location": "hero"})
        );
    }

    #[test]
    fn command_args_match_gtag_calls() {
        let ts = Utc.with_ymd_and_hms(2025, 10, 24, 12, 0, 0).unwrap();
        assert_eq!(
            Command::Js { timestamp: ts }.to_args(),
            vec![json!("js"), json!("2025-10-24T12:00:00.000Z")]
        );
        assert_eq!(
            Command::Config { target: "G-ABC".into(), params: Map::new() }.to_args(),
            vec![json!("config"), json!("G-ABC")]
        );
        let mut params = Map::new();
        params.insert("value".into(), json!(1.0));
        let event = Command::Event { name: "conversion".into(), params, callback: Some(3) };
        assert_eq!(
            event.to_args(),
            vec![json!("event"), json!("conversion"), json!({"value": 1.0, "event_callback": 3})]
        );
    }

    #[test]
    fn layer_helpers_filter_by_kind() {
        let mut layer = DataLayer::new();
        layer.record(EngagementEvent::ScrollDepth { percent: 25 });
        layer.gtag(Command::Consent { mode: "update".into(), choices: json!({}) });
        layer.record(EngagementEvent::DownloadGuide { guide_id: "default".into() });
        layer.record(EngagementEvent::ScrollDepth { percent: 50 });

        assert_eq!(layer.event_names(), vec!["scroll_depth", "download_guide", "scroll_depth"]);
        assert_eq!(layer.commands().count(), 1);
        assert_eq!(
            layer.last_record("scroll_depth"),
            Some(&EngagementEvent::ScrollDepth { percent: 50 })
        );
        assert!(layer.last_record("cta_click").is_none());
        assert_eq!(layer.conversions().count(), 0);
    }
}
