use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use url::Url;

use crate::consent::KeyValueStorage;
use crate::snippet::ScriptTag;

/// What the page needs from the browser. Every method is synchronous; the
/// asynchronous halves (script load, animation frame, runtime callbacks)
/// come back in through `Page`.
pub trait Host {
    fn now(&self) -> DateTime<Utc>;
    fn location(&self) -> &Url;
    fn storage(&self) -> &dyn KeyValueStorage;
    fn storage_mut(&mut self) -> &mut dyn KeyValueStorage;
    fn element_exists(&self, id: &str) -> bool;
    /// Append to `<head>`; the host reports load or failure later.
    fn append_script(&mut self, script: ScriptTag);
    /// Same-context navigation (`window.location = url`).
    fn navigate(&mut self, url: &str);
    fn request_animation_frame(&mut self);
}

/// Just enough of an element to route clicks.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Element {
    pub tag: String,
    pub classes: Vec<String>,
    pub attributes: BTreeMap<String, String>,
}

impl Element {
    pub fn new(tag: &str) -> Self {
        Element {
            tag: tag.to_ascii_lowercase(),
            ..Default::default()
        }
    }

    pub fn anchor(href: &str) -> Self {
        Element::new("a").with_attr("href", href)
    }

    pub fn with_class(mut self, class: &str) -> Self {
        self.classes.push(class.to_string());
        self
    }

    pub fn with_attr(mut self, name: &str, value: &str) -> Self {
        self.attributes.insert(name.to_string(), value.to_string());
        self
    }

    pub fn is(&self, tag: &str) -> bool {
        self.tag.eq_ignore_ascii_case(tag)
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.classes.iter().any(|c| c == class)
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    /// Non-empty `href`, if any.
    pub fn href(&self) -> Option<&str> {
        self.attr("href").filter(|h| !h.is_empty())
    }
}

/// Clicked element followed by its ancestors, innermost first.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClickPath {
    elements: Vec<Element>,
}

impl ClickPath {
    pub fn new(elements: Vec<Element>) -> Self {
        ClickPath { elements }
    }

    pub fn single(element: Element) -> Self {
        ClickPath { elements: vec![element] }
    }

    /// `Element.closest`.
    pub fn closest<P>(&self, predicate: P) -> Option<&Element>
    where
        P: Fn(&Element) -> bool,
    {
        self.elements.iter().find(|e| predicate(e))
    }

    pub fn target(&self) -> Option<&Element> {
        self.elements.first()
    }
}

/// A click travelling through the page's listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClickEvent {
    pub path: ClickPath,
    default_prevented: bool,
    propagation_stopped: bool,
}

impl ClickEvent {
    pub fn new(path: ClickPath) -> Self {
        ClickEvent {
            path,
            default_prevented: false,
            propagation_stopped: false,
        }
    }

    pub fn on(element: Element) -> Self {
        Self::new(ClickPath::single(element))
    }

    pub fn prevent_default(&mut self) {
        self.default_prevented = true;
    }

    pub fn stop_propagation(&mut self) {
        self.propagation_stopped = true;
    }

    pub fn default_prevented(&self) -> bool {
        self.default_prevented
    }

    pub fn propagation_stopped(&self) -> bool {
        self.propagation_stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closest_walks_outwards() {
        let path = ClickPath::new(vec![
            Element::new("span"),
            Element::anchor("/pricing").with_class("cta"),
            Element::new("div").with_attr("data-open-lead-magnet", ""),
        ]);
        assert_eq!(path.closest(|e| e.is("a")).and_then(Element::href), Some("/pricing"));
        assert!(path.closest(|e| e.has_attr("data-open-lead-magnet")).is_some());
        assert!(path.closest(|e| e.is("form")).is_none());
        assert!(path.target().map(|e| e.is("SPAN")).unwrap_or(false));
    }

    #[test]
    fn empty_href_is_none() {
        assert!(Element::anchor("").href().is_none());
    }
}
