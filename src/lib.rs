//! Consent-gated analytics bootstrap and conversion attribution.
//!
//! A [`page::Page`] is one loaded page. The host forwards browser events to
//! it (consent updates, script load results, clicks, scroll frames, timer
//! ticks) and carries out what comes back: inject a script, navigate,
//! prevent a click's default action.

pub mod attribution;
pub mod bootstrap;
pub mod config;
pub mod consent;
pub mod conversion;
pub mod cta;
pub mod data_layer;
pub mod dom;
pub mod engagement;
pub mod page;
pub mod pixel;
pub mod queue;
pub mod snippet;


pub use config::TrackingConfig;
pub use consent::{ConsentCategory, ConsentDecision, ConsentValue};
pub use conversion::Disposition;
pub use data_layer::{Command, DataLayer, EngagementEvent, Entry};
pub use dom::{ClickEvent, ClickPath, Element, Host};
pub use page::{Installer, Page, PageState};
