//! Fire a conversion, then carry on with the navigation the user asked for.
//!
//! Same-context navigations are held back until the runtime acknowledges
//! the hit. That wait is bounded: it ends on the runtime callback, on the
//! deadline, or as soon as the runtime is known to be missing, whichever
//! comes first, and it ends exactly once.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use log::{debug, warn};
use serde_json::{Map, Value};

use crate::config::{Currency, SendTarget};
use crate::data_layer::{CallbackId, Command, DataLayer};
use crate::dom::Host;

/// Upper bound accepted for `callback_timeout_ms`.
pub const MAX_CALLBACK_TIMEOUT_MS: u64 = 60_000;

/// One user action worth attributing.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionRequest {
    pub target: Option<String>,
    pub opens_new_context: bool,
    pub currency: Currency,
    pub value: f64,
    pub send_to: SendTarget,
}

impl ConversionRequest {
    fn params(&self) -> Map<String, Value> {
        let mut params = Map::new();
        params.insert("send_to".to_string(), Value::from(self.send_to.to_string()));
        params.insert("value".to_string(), Value::from(self.value));
        params.insert("currency".to_string(), Value::from(self.currency.as_str()));
        params
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// New context already opened by the browser; just emit.
    FireAndForget,
    /// Hold the navigation until the runtime calls back.
    FireThenNavigate,
    /// No runtime to emit to; go straight away.
    NavigateNow,
}

pub fn choose_strategy(request: &ConversionRequest, emission_available: bool) -> Strategy {
    if request.opens_new_context {
        Strategy::FireAndForget
    } else if emission_available {
        Strategy::FireThenNavigate
    } else {
        Strategy::NavigateNow
    }
}

/// What the click handler must do with the browser's default action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Proceed,
    /// Prevent default and stop propagation; navigation is ours now.
    Intercepted,
}

impl Disposition {
    /// The `onclick` return value.
    pub fn allows_default(&self) -> bool {
        matches!(self, Disposition::Proceed)
    }
}

/// Why a pending navigation was released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    Callback,
    Deadline,
    RuntimeUnavailable,
}

#[derive(Debug, Clone, PartialEq)]
struct PendingNavigation {
    target: Option<String>,
    deadline: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ConversionDispatcher {
    timeout: Duration,
    next_callback: CallbackId,
    pending: BTreeMap<CallbackId, PendingNavigation>,
}

impl ConversionDispatcher {
    pub fn new(timeout_ms: u64) -> Self {
        ConversionDispatcher {
            timeout: Duration::milliseconds(timeout_ms.min(MAX_CALLBACK_TIMEOUT_MS) as i64),
            next_callback: 1,
            pending: BTreeMap::new(),
        }
    }

    pub fn dispatch(
        &mut self,
        request: ConversionRequest,
        emission_available: bool,
        layer: &mut DataLayer,
        host: &mut dyn Host,
    ) -> Disposition {
        match choose_strategy(&request, emission_available) {
            Strategy::FireAndForget => {
                if emission_available {
                    self.emit(&request, None, layer);
                }
                Disposition::Proceed
            }
            Strategy::FireThenNavigate => {
                let id = self.next_callback;
                self.next_callback += 1;
                self.pending.insert(
                    id,
                    PendingNavigation {
                        target: request.target.clone(),
                        deadline: host.now() + self.timeout,
                    },
                );
                self.emit(&request, Some(id), layer);
                Disposition::Intercepted
            }
            Strategy::NavigateNow => {
                warn!("Conversion runtime not available, navigating without tracking");
                if let Some(url) = &request.target {
                    host.navigate(url);
                }
                Disposition::Intercepted
            }
        }
    }

    /// Emit without holding any navigation.
    pub fn emit_only(&self, request: &ConversionRequest, layer: &mut DataLayer) {
        self.emit(request, None, layer);
    }

    fn emit(
        &self,
        request: &ConversionRequest,
        callback: Option<CallbackId>,
        layer: &mut DataLayer,
    ) {
        layer.gtag(Command::Event {
            name: "conversion".to_string(),
            params: request.params(),
            callback,
        });
    }

    /// The runtime invoked `event_callback`. False for unknown or
    /// already-released ids.
    pub fn complete(&mut self, id: CallbackId, host: &mut dyn Host) -> bool {
        self.release(id, Release::Callback, host)
    }

    /// Release everything whose deadline has passed.
    pub fn expire(&mut self, host: &mut dyn Host) -> usize {
        let now = host.now();
        let due: Vec<CallbackId> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in &due {
            self.release(*id, Release::Deadline, host);
        }
        due.len()
    }

    /// The runtime is gone for good; release all waiting navigations.
    pub fn abandon_all(&mut self, host: &mut dyn Host) -> usize {
        let ids: Vec<CallbackId> = self.pending.keys().copied().collect();
        for id in &ids {
            self.release(*id, Release::RuntimeUnavailable, host);
        }
        ids.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, id: CallbackId) -> bool {
        self.pending.contains_key(&id)
    }

    fn release(&mut self, id: CallbackId, why: Release, host: &mut dyn Host) -> bool {
        let Some(pending) = self.pending.remove(&id) else {
            return false;
        };
        debug!("Releasing conversion navigation #{} ({:?})", id, why);
        if why == Release::Deadline {
            warn!("Conversion callback #{} timed out, navigating anyway", id);
        }
        if let Some(url) = pending.target {
            host.navigate(&url);
        }
        true
    }
}
