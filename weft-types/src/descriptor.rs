//! Client handshake descriptor.
//!
//! Parsing is lenient: every field that is missing, out of range or of the
//! wrong type falls back to its documented default and is reported as a
//! [`DescriptorIssue`] instead of failing the handshake.

use serde::Serialize;

use crate::Value;

pub const DEFAULT_LOCALE: &str = "en-US";
pub const DEFAULT_TIMEZONE: &str = "UTC";
pub const DEFAULT_WINDOW_WIDTH: f64 = 1280.0;
pub const DEFAULT_WINDOW_HEIGHT: f64 = 720.0;
pub const DEFAULT_URL: &str = "/";

/// Largest window dimension accepted from a client, in logical pixels.
pub const MAX_WINDOW_DIMENSION: f64 = 100_000.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientDescriptor {
    pub locale: String,
    pub timezone: String,
    pub window_width: f64,
    pub window_height: f64,
    pub prefers_light_theme: bool,
    pub user_settings: serde_json::Map<String, Value>,
    pub url: String,
}

impl Default for ClientDescriptor {
    fn default() -> Self {
        Self {
            locale: DEFAULT_LOCALE.to_string(),
            timezone: DEFAULT_TIMEZONE.to_string(),
            window_width: DEFAULT_WINDOW_WIDTH,
            window_height: DEFAULT_WINDOW_HEIGHT,
            prefers_light_theme: true,
            user_settings: serde_json::Map::new(),
            url: DEFAULT_URL.to_string(),
        }
    }
}

/// A handshake field that was replaced by its default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorIssue {
    pub field: &'static str,
    pub reason: String,
}

impl DescriptorIssue {
    fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

impl ClientDescriptor {
    /// Read a descriptor from handshake params.
    pub fn from_params(params: &Value) -> (Self, Vec<DescriptorIssue>) {
        let mut out = Self::default();
        let mut issues = Vec::new();

        let Some(obj) = params.as_object() else {
            issues.push(DescriptorIssue::new("params", "expected an object"));
            return (out, issues);
        };

        match obj.get("locale") {
            Some(Value::String(s)) if is_plausible_tag(s) => out.locale = s.clone(),
            Some(other) => issues.push(DescriptorIssue::new("locale", format!("invalid value {other}"))),
            None => issues.push(DescriptorIssue::new("locale", "missing")),
        }

        match obj.get("timezone") {
            Some(Value::String(s)) if !s.trim().is_empty() => out.timezone = s.clone(),
            Some(other) => issues.push(DescriptorIssue::new("timezone", format!("invalid value {other}"))),
            None => issues.push(DescriptorIssue::new("timezone", "missing")),
        }

        if let Some(width) = read_dimension(obj.get("windowWidth"), "windowWidth", &mut issues) {
            out.window_width = width;
        }
        if let Some(height) = read_dimension(obj.get("windowHeight"), "windowHeight", &mut issues) {
            out.window_height = height;
        }

        match obj.get("prefersLightTheme") {
            Some(Value::Bool(b)) => out.prefers_light_theme = *b,
            Some(other) => issues.push(DescriptorIssue::new(
                "prefersLightTheme",
                format!("invalid value {other}"),
            )),
            None => {}
        }

        match obj.get("userSettings") {
            Some(Value::Object(map)) => out.user_settings = map.clone(),
            Some(Value::Null) | None => {}
            Some(other) => issues.push(DescriptorIssue::new(
                "userSettings",
                format!("expected an object, got {other}"),
            )),
        }

        match obj.get("url") {
            Some(Value::String(s)) if s.starts_with('/') => out.url = s.clone(),
            Some(other) => issues.push(DescriptorIssue::new("url", format!("invalid value {other}"))),
            None => {}
        }

        (out, issues)
    }
}

fn is_plausible_tag(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= 35
        && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn read_dimension(
    value: Option<&Value>,
    field: &'static str,
    issues: &mut Vec<DescriptorIssue>,
) -> Option<f64> {
    match value {
        Some(v) => match v.as_f64() {
            Some(n) if n.is_finite() && n > 0.0 && n <= MAX_WINDOW_DIMENSION => Some(n),
            _ => {
                issues.push(DescriptorIssue::new(field, format!("out of range: {v}")));
                None
            }
        },
        None => {
            issues.push(DescriptorIssue::new(field, "missing"));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_well_formed_descriptor() {
        let (desc, issues) = ClientDescriptor::from_params(&json!({
            "locale": "de-DE",
            "timezone": "Europe/Berlin",
            "windowWidth": 1024,
            "windowHeight": 768.5,
            "prefersLightTheme": false,
            "userSettings": {"volume": 3},
            "url": "/settings",
        }));
        assert!(issues.is_empty(), "{issues:?}");
        assert_eq!(desc.locale, "de-DE");
        assert_eq!(desc.window_width, 1024.0);
        assert_eq!(desc.window_height, 768.5);
        assert!(!desc.prefers_light_theme);
        assert_eq!(desc.user_settings.get("volume"), Some(&json!(3)));
        assert_eq!(desc.url, "/settings");
    }

    #[test]
    fn test_invalid_fields_fall_back_to_defaults() {
        let (desc, issues) = ClientDescriptor::from_params(&json!({
            "locale": 42,
            "timezone": "UTC",
            "windowWidth": -5,
            "windowHeight": "tall",
            "userSettings": [1, 2],
        }));
        assert_eq!(desc.locale, DEFAULT_LOCALE);
        assert_eq!(desc.window_width, DEFAULT_WINDOW_WIDTH);
        assert_eq!(desc.window_height, DEFAULT_WINDOW_HEIGHT);
        assert!(desc.user_settings.is_empty());

        let fields: Vec<_> = issues.iter().map(|i| i.field).collect();
        assert_eq!(fields, vec!["locale", "windowWidth", "windowHeight", "userSettings"]);
    }

    #[test]
    fn test_non_object_params() {
        let (desc, issues) = ClientDescriptor::from_params(&json!("hello"));
        assert_eq!(desc, ClientDescriptor::default());
        assert_eq!(issues.len(), 1);
    }
}
