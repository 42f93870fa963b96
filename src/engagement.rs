//! Scroll-depth milestones and lead-magnet clicks.
//!
//! Runs regardless of consent: records only land on the data layer, which
//! nothing reads until a runtime is permitted to load.

use std::collections::BTreeSet;

use crate::data_layer::{DataLayer, EngagementEvent};
use crate::dom::{ClickPath, Host};

pub const SCROLL_MILESTONES: [u8; 4] = [25, 50, 75, 100];

pub const LEAD_MAGNET_ATTR: &str = "data-open-lead-magnet";
pub const GUIDE_ID_ATTR: &str = "data-guide-id";
pub const DEFAULT_GUIDE_ID: &str = "default";

/// Viewport and document measurements at sampling time, in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollMetrics {
    pub scroll_top: f64,
    pub viewport_height: f64,
    /// `max(documentElement.scrollHeight, body.scrollHeight)`.
    pub document_height: f64,
}

impl ScrollMetrics {
    pub fn new(scroll_top: f64, viewport_height: f64, document_height: f64) -> Self {
        ScrollMetrics {
            scroll_top,
            viewport_height,
            document_height,
        }
    }

    /// `round(min(100, (top + viewport) / height * 100))`, clamped to 0..=100.
    pub fn percent(&self) -> u8 {
        let seen = self.scroll_top + self.viewport_height;
        if !seen.is_finite() {
            return 0;
        }
        if !(self.document_height > 0.0) {
            return if seen > 0.0 { 100 } else { 0 };
        }
        let pct = (seen / self.document_height * 100.0).min(100.0).round();
        if pct <= 0.0 {
            0
        } else {
            pct as u8
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngagementTracker {
    sent: BTreeSet<u8>,
    sample_pending: bool,
}

impl Default for EngagementTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl EngagementTracker {
    pub fn new() -> Self {
        EngagementTracker {
            // 0 is never announced.
            sent: BTreeSet::from([0]),
            sample_pending: false,
        }
    }

    /// Scroll listener. Returns true when this call scheduled a frame.
    pub fn on_scroll(&mut self, host: &mut dyn Host) -> bool {
        if self.sample_pending {
            return false;
        }
        self.sample_pending = true;
        host.request_animation_frame();
        true
    }

    /// Animation-frame callback. Returns the milestones announced this frame.
    pub fn on_frame(&mut self, metrics: ScrollMetrics, layer: &mut DataLayer) -> Vec<u8> {
        self.sample_pending = false;
        self.sample(metrics, layer)
    }

    pub fn sample(&mut self, metrics: ScrollMetrics, layer: &mut DataLayer) -> Vec<u8> {
        let pct = metrics.percent();
        let mut emitted = Vec::new();
        for mark in SCROLL_MILESTONES {
            if pct >= mark && self.sent.insert(mark) {
                layer.record(EngagementEvent::ScrollDepth { percent: mark });
                emitted.push(mark);
            }
        }
        emitted
    }

    pub fn sample_pending(&self) -> bool {
        self.sample_pending
    }

    pub fn milestones_sent(&self) -> Vec<u8> {
        self.sent.iter().copied().filter(|m| *m != 0).collect()
    }

    /// Bubble-phase click listener for lead-magnet triggers.
    pub fn on_click(&self, path: &ClickPath, layer: &mut DataLayer) -> bool {
        let Some(trigger) = path.closest(|e| e.has_attr(LEAD_MAGNET_ATTR)) else {
            return false;
        };
        let guide_id = trigger
            .attr(GUIDE_ID_ATTR)
            .filter(|g| !g.is_empty())
            .unwrap_or(DEFAULT_GUIDE_ID);
        layer.record(EngagementEvent::DownloadGuide {
            guide_id: guide_id.to_string(),
        });
        true
    }
}
