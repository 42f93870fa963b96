use serde_json::json;

use crate::config::{GoogleConfig, PixelConfig, TrackingConfig};

/// A `<script>` element the page appends to `<head>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptTag {
    pub id: String,
    pub src: String,
    pub is_async: bool,
}

impl ScriptTag {
    /// `gtag/js?id=<primary id>`.
    pub fn gtag(google: &GoogleConfig) -> Self {
        let primary = google.primary_id();
        let id: String = url::form_urlencoded::byte_serialize(primary.as_bytes()).collect();
        ScriptTag {
            id: google.script_id.clone(),
            src: format!("{}?id={}", google.tag_endpoint, id),
            is_async: true,
        }
    }

    pub fn pixel(pixel: &PixelConfig) -> Self {
        ScriptTag {
            id: pixel.script_id.clone(),
            src: pixel.script_src.clone(),
            is_async: true,
        }
    }

    pub fn to_html(&self) -> String {
        format!(
            r#"<script id="{}"{} src="{}"></script>"#,
            html_escape(&self.id),
            if self.is_async { " async" } else { "" },
            html_escape(&self.src),
        )
    }
}

/// Inline script publishing the public tracking ids to the page, so pages
/// built without the bundler agree with the loaders on every id.
pub fn build_config_script(config: &TrackingConfig) -> String {
    let ads = json!({
        "google": {
            "conversionLabel": config.google.conversion_label,
            "ga4MeasurementId": config.google.ga4_measurement_id,
            "adsAccountId": config.google.ads_account_id,
        }
    });
    let mut body = format!(
        "window.ADS_CONFIG=Object.assign({{}},window.ADS_CONFIG||{{}},{});",
        script_json(&ads.to_string())
    );
    if let Some(pid) = config.pixel.usable_id() {
        body.push_str(&format!(
            "window.FB_PIXEL_ID=window.FB_PIXEL_ID||{};",
            script_json(&json!(pid).to_string())
        ));
    }
    format!("<script>{}</script>", body)
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// JSON is valid JS, but `</script>` inside a string would end the element.
fn script_json(s: &str) -> String {
    s.replace("</", "<\\/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gtag_tag_uses_primary_id_and_stable_element_id() {
        let tag = ScriptTag::gtag(&GoogleConfig::default());
        assert_eq!(tag.id, "gtag-lib");
        assert_eq!(tag.src, "https://www.googletagmanager.com/gtag/js?id=G-CMMHJP9LEY");
        let expected = concat!(
            r#"<script id="gtag-lib" async "#,
            r#"src="https://www.googletagmanager.com/gtag/js?id=G-CMMHJP9LEY"></script>"#,
        );
        assert_eq!(tag.to_html(), expected);
    }

    #[test]
    fn html_attributes_are_escaped() {
        let tag = ScriptTag {
            id: "x\"y".into(),
            src: "https://cdn.test/a.js?a=1&b=<2>".into(),
            is_async: false,
        };
        assert_eq!(
            tag.to_html(),
            r#"<script id="x&quot;y" src="https://cdn.test/a.js?a=1&amp;b=&lt;2&gt;"></script>"#
        );
    }

    #[test]
    fn config_script_carries_ids() {
        let html = build_config_script(&TrackingConfig::default());
        assert!(html.starts_with("<script>window.ADS_CONFIG="));
        assert!(html.contains(r#""conversionLabel":"mdOMCOTV3acbEMWes9VB""#));
        assert!(html.contains(r#""ga4MeasurementId":"G-CMMHJP9LEY""#));
        assert!(html.contains(r#"window.FB_PIXEL_ID=window.FB_PIXEL_ID||"1102565141856929";"#));
    }

    #[test]
    fn config_script_cannot_close_its_element() {
        let mut config = TrackingConfig::default();
        config.google.conversion_label = "</script><b>".into();
        config.pixel.pixel_id = None;
        let html = build_config_script(&config);
        assert_eq!(html.matches("</script>").count(), 1);
        assert!(!html.contains("FB_PIXEL_ID"));
    }
}
