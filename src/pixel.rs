//! Facebook Pixel loader, gated on the ads consent categories.

use log::{debug, info, warn};
use serde_json::{Map, Value};

use crate::bootstrap::{debug_consent_requested, BootstrapState};
use crate::config::PixelConfig;
use crate::consent::{ads_authorized, ConsentDecision, Listen};
use crate::dom::Host;
use crate::queue::{DrainQueue, Sink};
use crate::snippet::ScriptTag;

/// One `fbq(...)` call.
#[derive(Debug, Clone, PartialEq)]
pub enum PixelCommand {
    Init { pixel_id: String },
    Track { event: String, params: Map<String, Value> },
}

impl PixelCommand {
    pub fn track(event: &str) -> Self {
        PixelCommand::Track {
            event: event.to_string(),
            params: Map::new(),
        }
    }

    pub fn to_args(&self) -> Vec<Value> {
        match self {
            PixelCommand::Init { pixel_id } => {
                vec![Value::from("init"), Value::from(pixel_id.as_str())]
            }
            PixelCommand::Track { event, params } => {
                let mut args = vec![Value::from("track"), Value::from(event.as_str())];
                if !params.is_empty() {
                    args.push(Value::Object(params.clone()));
                }
                args
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelStart {
    /// No usable pixel id; nothing will ever load.
    Disabled,
    AwaitingConsent,
    Initialized,
}

pub struct PixelLoader {
    config: PixelConfig,
    /// `fbq.queue`, consumed once the script loads.
    queue: DrainQueue<PixelCommand>,
    /// Calls made before `fbq` existed.
    early: Vec<PixelCommand>,
}

impl PixelLoader {
    pub fn new(config: PixelConfig) -> Self {
        PixelLoader {
            config,
            queue: DrainQueue::new(),
            early: Vec::new(),
        }
    }

    pub fn start(
        &mut self,
        decision: &ConsentDecision,
        state: &mut BootstrapState,
        host: &mut dyn Host,
    ) -> PixelStart {
        if self.config.usable_id().is_none() {
            warn!("[Pixel] No pixel id configured; pixel not initialized");
            return PixelStart::Disabled;
        }
        // `debug-consent=1` grants every category, ads included.
        let forced = debug_consent_requested(host.location());
        if !forced && !ads_authorized(decision) {
            info!("[Pixel] Waiting for ads consent before initializing");
            return PixelStart::AwaitingConsent;
        }
        self.init(state, host);
        PixelStart::Initialized
    }

    pub fn on_consent(
        &mut self,
        decision: &ConsentDecision,
        state: &mut BootstrapState,
        host: &mut dyn Host,
    ) -> Listen {
        if state.requested {
            return Listen::Done;
        }
        if !ads_authorized(decision) {
            return Listen::Keep;
        }
        self.init(state, host);
        Listen::Done
    }

    fn init(&mut self, state: &mut BootstrapState, host: &mut dyn Host) {
        let Some(pixel_id) = self.config.usable_id().map(str::to_string) else {
            return;
        };
        if state.requested {
            info!("[Pixel] Already initialized");
            return;
        }
        state.requested = true;
        if !host.element_exists(&self.config.script_id) {
            host.append_script(ScriptTag::pixel(&self.config));
        }
        self.queue.push(PixelCommand::Init { pixel_id: pixel_id.clone() });
        self.queue.push(PixelCommand::track("PageView"));
        // pixel:ready
        for command in self.early.drain(..) {
            self.queue.push(command);
        }
        info!("[Pixel] Initialized with id {}", pixel_id);
    }

    /// `queueFbq`: call now if `fbq` exists, otherwise hold until it does.
    /// Once the script is known to have failed, calls are dropped.
    pub fn queue_fbq(&mut self, state: &BootstrapState, command: PixelCommand) {
        if state.failed {
            debug!("[Pixel] Dropping {:?}; script unavailable", command);
            return;
        }
        if state.requested {
            self.queue.push(command);
        } else {
            self.early.push(command);
        }
    }

    pub fn on_script_loaded(
        &mut self,
        state: &mut BootstrapState,
        runtime: Box<dyn Sink<PixelCommand>>,
    ) -> usize {
        if !state.requested {
            return 0;
        }
        state.ready = true;
        self.queue.attach(runtime)
    }

    pub fn on_script_error(&self, state: &mut BootstrapState) {
        if state.requested && !state.ready {
            warn!("[Pixel] Script failed to load");
            state.failed = true;
        }
    }

    pub fn commands(&self) -> &[PixelCommand] {
        self.queue.items()
    }

    pub fn early_calls(&self) -> &[PixelCommand] {
        &self.early
    }
}
