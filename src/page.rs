//! One loaded page: the state object every component shares, and the entry
//! points the host calls when browser events happen.

use std::collections::BTreeSet;

use chrono::Duration;
use log::{debug, info};
use serde_json::Value;

use crate::attribution::{self, Attribution};
use crate::bootstrap::{BootstrapState, Bootstrapper};
use crate::config::TrackingConfig;
use crate::consent::{ConsentChannel, ConsentDecision, ConsentStore, Listen};
use crate::conversion::{ConversionDispatcher, ConversionRequest, Disposition};
use crate::cta::{self, CtaOptions};
use crate::data_layer::{CallbackId, DataLayer, EngagementEvent, Entry};
use crate::dom::{ClickEvent, Host};
use crate::engagement::{EngagementTracker, ScrollMetrics};
use crate::pixel::{PixelCommand, PixelLoader, PixelStart};
use crate::queue::Sink;

/// Installers that may run at most once per page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Installer {
    Attribution,
    EngagementTracker,
    CtaListener,
    ConversionHelper,
    CtaHelper,
    AdsLoader,
    PixelLoader,
}

/// Page-lifetime flags. Never reset.
#[derive(Debug, Clone, Default)]
pub struct PageState {
    installed: BTreeSet<Installer>,
    pub gtag: BootstrapState,
    pub pixel: BootstrapState,
}

impl PageState {
    /// Check-then-set. True only for the first caller.
    pub fn claim(&mut self, installer: Installer) -> bool {
        self.installed.insert(installer)
    }

    pub fn is_installed(&self, installer: Installer) -> bool {
        self.installed.contains(&installer)
    }
}

/// Who listens on the consent channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subscriber {
    Analytics,
    Pixel,
}

pub struct Page<H: Host> {
    host: H,
    config: TrackingConfig,
    state: PageState,
    layer: DataLayer,
    consent: ConsentChannel<Subscriber>,
    bootstrap: Bootstrapper,
    pixel: PixelLoader,
    dispatcher: ConversionDispatcher,
    engagement: EngagementTracker,
    attribution: Option<Attribution>,
}

impl<H: Host> Page<H> {
    /// Run every installer the configuration enables, in script order.
    pub fn new(host: H, config: TrackingConfig) -> Self {
        let mut page = Page {
            bootstrap: Bootstrapper::new(config.google.clone(), config.debug),
            pixel: PixelLoader::new(config.pixel.clone()),
            dispatcher: ConversionDispatcher::new(config.conversion.callback_timeout_ms),
            host,
            config,
            state: PageState::default(),
            layer: DataLayer::new(),
            consent: ConsentChannel::new(),
            engagement: EngagementTracker::new(),
            attribution: None,
        };
        let features = page.config.features.clone();
        if features.attribution {
            page.capture_attribution();
        }
        if features.engagement {
            page.install_engagement_tracker();
        }
        if features.conversion_helper {
            page.install_conversion_helper();
        }
        if features.cta_binder {
            page.install_cta_binder();
        }
        if features.cta_helper {
            page.install_cta_helper();
        }
        page.start_analytics();
        if features.pixel {
            page.start_pixel();
        }
        page
    }

    // ── Installers ──────────────────────────────────────────────────

    pub fn capture_attribution(&mut self) -> bool {
        if !self.state.claim(Installer::Attribution) {
            return false;
        }
        let now = self.host.now();
        let ttl = Duration::days(self.config.attribution.ttl_days);
        let location = self.host.location().clone();
        let captured = attribution::capture(&location, self.host.storage_mut(), now, ttl);
        self.layer.record(EngagementEvent::SessionAttributionReady {
            attribution: captured.clone(),
        });
        self.attribution = Some(captured);
        true
    }

    pub fn install_engagement_tracker(&mut self) -> bool {
        self.state.claim(Installer::EngagementTracker)
    }

    /// Defines `report_conversion`. A second call changes nothing.
    pub fn install_conversion_helper(&mut self) -> bool {
        self.state.claim(Installer::ConversionHelper)
    }

    /// Attaches the capture-phase document listener.
    pub fn install_cta_binder(&mut self) -> bool {
        self.state.claim(Installer::CtaListener)
    }

    /// Defines `track_cta_event`.
    pub fn install_cta_helper(&mut self) -> bool {
        self.state.claim(Installer::CtaHelper)
    }

    /// The gtag bootstrap entry point. Safe to call from every component
    /// that includes it; only the first call does anything.
    pub fn start_analytics(&mut self) -> bool {
        if !self.state.claim(Installer::AdsLoader) {
            return false;
        }
        let decision = self.host.storage().decision();
        let listen = self
            .bootstrap
            .start(&decision, &mut self.state.gtag, &mut self.host, &mut self.layer);
        if listen == Listen::Keep {
            self.consent.subscribe(Subscriber::Analytics);
        }
        true
    }

    pub fn start_pixel(&mut self) -> bool {
        if !self.state.claim(Installer::PixelLoader) {
            return false;
        }
        let decision = self.host.storage().decision();
        let started = self
            .pixel
            .start(&decision, &mut self.state.pixel, &mut self.host);
        if started == PixelStart::AwaitingConsent {
            self.consent.subscribe(Subscriber::Pixel);
        }
        true
    }

    // ── Browser events ──────────────────────────────────────────────

    /// `consent_update` fired; `detail` is the event's detail object.
    pub fn on_consent_update(&mut self, detail: &Value) {
        let decision = ConsentDecision::from_event_detail(detail);
        let mut channel = std::mem::take(&mut self.consent);
        channel.notify(|subscriber| match subscriber {
            Subscriber::Analytics => {
                self.bootstrap
                    .on_consent(&decision, &mut self.state.gtag, &mut self.host, &mut self.layer)
            }
            Subscriber::Pixel => {
                self.pixel
                    .on_consent(&decision, &mut self.state.pixel, &mut self.host)
            }
        });
        self.consent = channel;
    }

    /// The gtag script loaded; `runtime` consumes the data layer from now on.
    pub fn on_tag_script_loaded(&mut self, runtime: Box<dyn Sink<Entry>>) -> usize {
        self.bootstrap
            .on_script_loaded(&mut self.state.gtag, &mut self.layer, runtime)
    }

    /// The gtag script will never arrive. Held navigations go now.
    pub fn on_tag_script_failed(&mut self) -> usize {
        self.bootstrap.on_script_error(&mut self.state.gtag);
        if self.state.gtag.failed {
            return self.dispatcher.abandon_all(&mut self.host);
        }
        0
    }

    pub fn on_pixel_script_loaded(&mut self, runtime: Box<dyn Sink<PixelCommand>>) -> usize {
        self.pixel.on_script_loaded(&mut self.state.pixel, runtime)
    }

    pub fn on_pixel_script_failed(&mut self) {
        self.pixel.on_script_error(&mut self.state.pixel);
    }

    pub fn on_scroll(&mut self) -> bool {
        if !self.state.is_installed(Installer::EngagementTracker) {
            return false;
        }
        self.engagement.on_scroll(&mut self.host)
    }

    pub fn on_animation_frame(&mut self, metrics: ScrollMetrics) -> Vec<u8> {
        if !self.state.is_installed(Installer::EngagementTracker) {
            return Vec::new();
        }
        self.engagement.on_frame(metrics, &mut self.layer)
    }

    /// Run a click through the document listeners: the CTA binder in the
    /// capture phase, then the lead-magnet listener while bubbling. The host
    /// performs the default action afterwards unless it was prevented.
    pub fn on_click(&mut self, event: &mut ClickEvent) {
        if self.state.is_installed(Installer::CtaListener)
            && self.state.is_installed(Installer::ConversionHelper)
        {
            if let Some(handler) = cta::resolve(&event.path) {
                debug!("CTA click on {} ({:?})", handler.href, handler.marker);
                let request = ConversionRequest {
                    target: Some(handler.href.clone()),
                    opens_new_context: handler.navigation.opens_new_context(),
                    currency: self.config.conversion.helper_currency.clone(),
                    value: self.config.conversion.value,
                    send_to: self.config.google.send_target(),
                };
                if self.dispatch(request) == Disposition::Intercepted {
                    event.prevent_default();
                    event.stop_propagation();
                }
            }
        }

        if event.propagation_stopped() {
            return;
        }
        if self.state.is_installed(Installer::EngagementTracker) {
            self.engagement.on_click(&event.path, &mut self.layer);
        }
    }

    /// The runtime invoked an `event_callback`.
    pub fn on_event_callback(&mut self, id: CallbackId) -> bool {
        self.dispatcher.complete(id, &mut self.host)
    }

    /// Timer tick: release conversions whose wait is over.
    pub fn tick(&mut self) -> usize {
        self.dispatcher.expire(&mut self.host)
    }

    // ── Public helpers ──────────────────────────────────────────────

    /// `gtag_report_conversion(url)`. `None` when this page does not include
    /// the helper. Always intercepts: the helper owns the navigation.
    pub fn report_conversion(&mut self, url: Option<&str>) -> Option<Disposition> {
        if !self.state.is_installed(Installer::ConversionHelper) {
            return None;
        }
        let request = ConversionRequest {
            target: url.map(str::to_string),
            opens_new_context: false,
            currency: self.config.conversion.helper_currency.clone(),
            value: self.config.conversion.value,
            send_to: self.config.google.send_target(),
        };
        Some(self.dispatch(request))
    }

    /// `trackCTAEvent(opts)`. Always logs `cta_click`; returns whether the
    /// browser's default navigation should go ahead.
    pub fn track_cta_event(&mut self, opts: CtaOptions) -> Option<Disposition> {
        if !self.state.is_installed(Installer::CtaHelper) {
            return None;
        }
        self.layer.record(opts.click_event());
        if !opts.conversion {
            return Some(Disposition::Proceed);
        }

        let direct = ConversionRequest {
            target: opts.href.clone(),
            opens_new_context: opts.navigation().opens_new_context(),
            currency: self.config.conversion.cta_currency.clone(),
            value: self.config.conversion.value,
            send_to: self.config.google.send_target(),
        };
        if direct.opens_new_context {
            return Some(self.dispatch(direct));
        }
        if self.state.is_installed(Installer::ConversionHelper) {
            return self.report_conversion(opts.href.as_deref());
        }
        if self.state.gtag.can_deliver() {
            self.dispatcher.emit_only(&direct, &mut self.layer);
        }
        Some(Disposition::Proceed)
    }

    /// `queueFbq(...)`.
    pub fn queue_fbq(&mut self, command: PixelCommand) {
        self.pixel.queue_fbq(&self.state.pixel, command);
    }

    fn dispatch(&mut self, request: ConversionRequest) -> Disposition {
        let available = self.state.gtag.can_deliver();
        let disposition = self
            .dispatcher
            .dispatch(request, available, &mut self.layer, &mut self.host);
        if self.config.debug {
            info!(
                "[ADS] conversion dispatched ({:?}, runtime available: {})",
                disposition, available
            );
        }
        disposition
    }

    // ── Inspection ──────────────────────────────────────────────────

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn config(&self) -> &TrackingConfig {
        &self.config
    }

    pub fn state(&self) -> &PageState {
        &self.state
    }

    pub fn data_layer(&self) -> &DataLayer {
        &self.layer
    }

    pub fn pixel(&self) -> &PixelLoader {
        &self.pixel
    }

    pub fn attribution(&self) -> Option<&Attribution> {
        self.attribution.as_ref()
    }

    /// Hidden inputs for lead forms on this page. Empty when attribution
    /// capture is not installed.
    pub fn attribution_fields(&self) -> Vec<(&'static str, String)> {
        self.attribution
            .as_ref()
            .map(Attribution::hidden_fields)
            .unwrap_or_default()
    }

    pub fn pending_conversions(&self) -> usize {
        self.dispatcher.pending_count()
    }

    pub fn is_consent_subscribed(&self, subscriber: Subscriber) -> bool {
        self.consent.is_subscribed(subscriber)
    }
}
