//! Consent-aware gtag loader.
//!
//! Loads only after at least one consent category is granted, and at most
//! once per page however many times it is asked.

use log::{debug, info, warn};
use serde_json::{Map, Value};
use url::Url;

use crate::config::GoogleConfig;
use crate::consent::{is_authorized, ConsentDecision, ConsentValue, Listen};
use crate::data_layer::{Command, DataLayer, Entry};
use crate::dom::Host;
use crate::queue::Sink;
use crate::snippet::ScriptTag;

/// `?debug-consent=1` forces consent on for tag-assistant checks.
pub const DEBUG_CONSENT_PARAM: &str = "debug-consent";

/// Load flags for one third-party runtime. Lives in `PageState`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BootstrapState {
    /// The emission primitive exists and the script has been requested.
    pub requested: bool,
    /// The script loaded and the queue is being consumed.
    pub ready: bool,
    /// The script failed to load; the queue will never be consumed.
    pub failed: bool,
}

impl BootstrapState {
    /// Whether emitted commands can still reach a runtime.
    pub fn can_deliver(&self) -> bool {
        self.requested && !self.failed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Started,
    AlreadyRequested,
}

pub fn debug_consent_requested(location: &Url) -> bool {
    location
        .query_pairs()
        .any(|(k, v)| k == DEBUG_CONSENT_PARAM && v == "1")
}

#[derive(Debug, Clone)]
pub struct Bootstrapper {
    google: GoogleConfig,
    debug: bool,
    force_consent: bool,
}

impl Bootstrapper {
    pub fn new(google: GoogleConfig, debug: bool) -> Self {
        Bootstrapper {
            google,
            debug,
            force_consent: false,
        }
    }

    pub fn tracked_ids(&self) -> Vec<String> {
        self.google.tracked_ids()
    }

    /// Page-load check. `Keep` means the caller should subscribe for
    /// consent notifications.
    pub fn start(
        &mut self,
        decision: &ConsentDecision,
        state: &mut BootstrapState,
        host: &mut dyn Host,
        layer: &mut DataLayer,
    ) -> Listen {
        self.force_consent = debug_consent_requested(host.location());
        if self.force_consent || is_authorized(decision) {
            self.ensure_loaded(state, host, layer);
            return Listen::Done;
        }
        debug!("gtag waiting for consent");
        Listen::Keep
    }

    /// Consent notification. Once anything has been requested every later
    /// notification is a no-op.
    pub fn on_consent(
        &mut self,
        decision: &ConsentDecision,
        state: &mut BootstrapState,
        host: &mut dyn Host,
        layer: &mut DataLayer,
    ) -> Listen {
        if state.requested {
            return Listen::Done;
        }
        if !is_authorized(decision) {
            return Listen::Keep;
        }
        self.ensure_loaded(state, host, layer);
        Listen::Done
    }

    /// Idempotent load. Guarded by `state.requested`, not by looking for the
    /// script element, so callers racing ahead of the element still load once.
    pub fn ensure_loaded(
        &self,
        state: &mut BootstrapState,
        host: &mut dyn Host,
        layer: &mut DataLayer,
    ) -> LoadOutcome {
        if state.requested {
            return LoadOutcome::AlreadyRequested;
        }
        state.requested = true;

        // Another component on the page may have injected it already.
        if !host.element_exists(&self.google.script_id) {
            host.append_script(ScriptTag::gtag(&self.google));
        }

        layer.gtag(Command::Js { timestamp: host.now() });
        let ids = self.tracked_ids();
        for id in &ids {
            layer.gtag(Command::Config {
                target: id.clone(),
                params: config_params(id),
            });
        }

        if self.force_consent {
            layer.gtag(Command::Consent {
                mode: "update".to_string(),
                choices: ConsentDecision::all(ConsentValue::Granted).to_choices(),
            });
        }

        if self.debug {
            info!("[ADS] gtag initialized (consent-aware) {:?}", ids);
        }
        LoadOutcome::Started
    }

    /// The script element loaded: hand the runtime its queue.
    pub fn on_script_loaded(
        &self,
        state: &mut BootstrapState,
        layer: &mut DataLayer,
        runtime: Box<dyn Sink<Entry>>,
    ) -> usize {
        if !state.requested {
            warn!("gtag runtime reported ready before it was requested; ignoring");
            return 0;
        }
        state.ready = true;
        state.failed = false;
        layer.attach(runtime)
    }

    pub fn on_script_error(&self, state: &mut BootstrapState) {
        if state.requested && !state.ready {
            warn!("gtag script failed to load; events stay queued");
            state.failed = true;
        }
    }
}

/// Ads accounts get enhanced conversions and no automatic page view.
fn config_params(id: &str) -> Map<String, Value> {
    let mut params = Map::new();
    if id.starts_with("AW-") {
        params.insert("allow_enhanced_conversions".to_string(), Value::Bool(true));
        params.insert("send_page_view".to_string(), Value::Bool(false));
    }
    params
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ads_config_params() {
        let aw = config_params("AW-1");
        assert_eq!(aw.get("allow_enhanced_conversions"), Some(&Value::Bool(true)));
        assert_eq!(aw.get("send_page_view"), Some(&Value::Bool(false)));
        assert!(config_params("G-ABC").is_empty());
    }

    #[test]
    fn debug_consent_flag_requires_exact_value() {
        let on = Url::parse("https://site.test/?a=b&debug-consent=1").unwrap();
        let off = Url::parse("https://site.test/?debug-consent=true").unwrap();
        assert!(debug_consent_requested(&on));
        assert!(!debug_consent_requested(&off));
    }

    #[test]
    fn delivery_depends_on_request_and_failure() {
        let mut s = BootstrapState::default();
        assert!(!s.can_deliver());
        s.requested = true;
        assert!(s.can_deliver());
        s.failed = true;
        assert!(!s.can_deliver());
    }
}
