//! Call-to-action detection and the explicit tracking helper.
//!
//! Detection (`detect`, `resolve`) only answers "is this a trackable CTA and
//! what does it want?"; the page decides what to do with the answer.

use crate::data_layer::EngagementEvent;
use crate::dom::{ClickPath, Element};

pub const CTA_CLASSES: [&str; 2] = ["whatsapp-float", "contact-float"];
pub const TRACK_CONVERSION_ATTR: &str = "data-track-conv";

pub const DEFAULT_CTA_ID: &str = "cta_unknown";
pub const DEFAULT_CTA_LOCATION: &str = "global";

/// Why an element counts as a CTA.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CtaMarker {
    Class(&'static str),
    Attribute,
}

/// Anchors only: `a.whatsapp-float`, `a.contact-float`, `a[data-track-conv]`.
pub fn detect(element: &Element) -> Option<CtaMarker> {
    if !element.is("a") {
        return None;
    }
    if let Some(class) = CTA_CLASSES.iter().find(|c| element.has_class(c)) {
        return Some(CtaMarker::Class(*class));
    }
    element
        .has_attr(TRACK_CONVERSION_ATTR)
        .then_some(CtaMarker::Attribute)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationMode {
    SameContext,
    NewContext,
}

impl NavigationMode {
    pub fn from_target(target: Option<&str>) -> Self {
        match target {
            Some(t) if t.trim().eq_ignore_ascii_case("_blank") => NavigationMode::NewContext,
            _ => NavigationMode::SameContext,
        }
    }

    pub fn opens_new_context(&self) -> bool {
        matches!(self, NavigationMode::NewContext)
    }
}

/// What a recognised CTA asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CtaHandler {
    pub marker: CtaMarker,
    pub href: String,
    pub conversion: bool,
    pub navigation: NavigationMode,
}

/// Closest CTA anchor on the click path. An anchor without an `href` is
/// matched but yields nothing; outer anchors are not consulted.
pub fn resolve(path: &ClickPath) -> Option<CtaHandler> {
    let anchor = path.closest(|e| detect(e).is_some())?;
    let marker = detect(anchor)?;
    let href = anchor.href()?;
    Some(CtaHandler {
        marker,
        href: href.to_string(),
        conversion: true,
        navigation: NavigationMode::from_target(anchor.attr("target")),
    })
}

/// Arguments of `track_cta_event`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CtaOptions {
    pub cta_id: Option<String>,
    pub cta_location: Option<String>,
    pub href: Option<String>,
    pub conversion: bool,
    pub target: Option<String>,
}

impl CtaOptions {
    pub fn new(cta_id: &str, cta_location: &str) -> Self {
        CtaOptions {
            cta_id: Some(cta_id.to_string()),
            cta_location: Some(cta_location.to_string()),
            ..Default::default()
        }
    }

    pub fn href(mut self, href: &str) -> Self {
        self.href = Some(href.to_string());
        self
    }

    pub fn conversion(mut self, conversion: bool) -> Self {
        self.conversion = conversion;
        self
    }

    pub fn target(mut self, target: &str) -> Self {
        self.target = Some(target.to_string());
        self
    }

    pub fn navigation(&self) -> NavigationMode {
        NavigationMode::from_target(self.target.as_deref())
    }

    pub fn click_event(&self) -> EngagementEvent {
        let pick = |v: &Option<String>, default: &str| {
            v.as_deref()
                .filter(|s| !s.is_empty())
                .unwrap_or(default)
                .to_string()
        };
        EngagementEvent::CtaClick {
            cta_id: pick(&self.cta_id, DEFAULT_CTA_ID),
            cta_location: pick(&self.cta_location, DEFAULT_CTA_LOCATION),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_classes_and_marker_on_anchors_only() {
        let wa = Element::anchor("https://wa.me/1").with_class("whatsapp-float");
        let contact = Element::anchor("/contact").with_class("contact-float");
        let marked = Element::anchor("/pricing").with_attr(TRACK_CONVERSION_ATTR, "");
        let button = Element::new("button").with_class("whatsapp-float");
        assert_eq!(detect(&wa), Some(CtaMarker::Class("whatsapp-float")));
        assert_eq!(detect(&contact), Some(CtaMarker::Class("contact-float")));
        assert_eq!(detect(&marked), Some(CtaMarker::Attribute));
        assert_eq!(detect(&button), None);
        assert_eq!(detect(&Element::anchor("/plain")), None);
    }

    #[test]
    fn resolve_uses_closest_anchor() {
        let path = ClickPath::new(vec![
            Element::new("img"),
            Element::anchor("https://wa.me/1")
                .with_class("whatsapp-float")
                .with_attr("target", "_blank"),
        ]);
        let handler = resolve(&path).unwrap();
        assert_eq!(handler.href, "https://wa.me/1");
        assert_eq!(handler.navigation, NavigationMode::NewContext);
        assert!(handler.conversion);
    }

    #[test]
    fn anchor_without_href_yields_nothing() {
        let path = ClickPath::new(vec![
            Element::new("a").with_attr(TRACK_CONVERSION_ATTR, ""),
            Element::anchor("/outer").with_class("contact-float"),
        ]);
        assert!(resolve(&path).is_none());
    }

    #[test]
    fn only_blank_target_is_new_context() {
        assert_eq!(NavigationMode::from_target(Some(" _BLANK")), NavigationMode::NewContext);
        assert_eq!(NavigationMode::from_target(Some("_self")), NavigationMode::SameContext);
        assert_eq!(NavigationMode::from_target(Some("reviews")), NavigationMode::SameContext);
        assert_eq!(NavigationMode::from_target(None), NavigationMode::SameContext);
    }

    #[test]
    fn options_default_ids() {
        let opts = CtaOptions::default();
        assert_eq!(
            opts.click_event(),
            EngagementEvent::CtaClick {
                cta_id: "cta_unknown".into(),
                cta_location: "global".into()
            }
        );
        assert_eq!(
            CtaOptions::new("hero_cta", "hero").target("_blank").navigation(),
            NavigationMode::NewContext
        );
    }
}
