//! User configuration, persisted in the sync area.
//!
//! Inputs come from options forms and are loosely typed (numbers may arrive as
//! strings), so every field goes through a normalizer that falls back to a
//! default rather than rejecting the payload.

use crate::matcher::SiteMatcher;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub const SETTINGS_KEY: &str = "settings";

pub const DEFAULT_SITES: [&str; 7] = [
    "chatgpt.com",
    "chatgpt.com/codex",
    "github.com",
    "x.com",
    "youtube.com",
    "music.youtube.com",
    "reddit.com",
];

const DEFAULT_BACKGROUND_COLOR: &str = "#0f172a";
const DEFAULT_TEXT_COLOR: &str = "#ffffff";
const DEFAULT_BACKGROUND_OPACITY: f64 = 0.92;

/// Upper bound for any minute limit: one year.
pub const MAX_LIMIT_MINUTES: f64 = 365.0 * 24.0 * 60.0;

pub type MinuteLimits = BTreeMap<String, f64>;

pub fn minutes_to_ms(minutes: f64) -> i64 {
    (minutes * 60_000.0).round() as i64
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub tracked_sites: Vec<String>,
    pub overlay_enabled: bool,
    pub overlay_scale: f64,
    pub overlay_background_color: String,
    pub overlay_text_color: String,
    pub overlay_background_opacity: f64,
    pub overlay_click_through: bool,
    pub menu_text_scale: f64,
    pub time_limits: MinuteLimits,
    pub break_after_limits: MinuteLimits,
    pub break_duration_limits: MinuteLimits,
    pub wait_limits: MinuteLimits,
    pub entry_delay_limits: MinuteLimits,
    pub tab_limits: BTreeMap<String, u32>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            tracked_sites: DEFAULT_SITES.iter().map(|s| s.to_string()).collect(),
            overlay_enabled: true,
            overlay_scale: 1.0,
            overlay_background_color: DEFAULT_BACKGROUND_COLOR.to_string(),
            overlay_text_color: DEFAULT_TEXT_COLOR.to_string(),
            overlay_background_opacity: DEFAULT_BACKGROUND_OPACITY,
            overlay_click_through: true,
            menu_text_scale: 1.0,
            time_limits: MinuteLimits::new(),
            break_after_limits: MinuteLimits::new(),
            break_duration_limits: MinuteLimits::new(),
            wait_limits: MinuteLimits::new(),
            entry_delay_limits: MinuteLimits::new(),
            tab_limits: BTreeMap::new(),
        }
    }
}

/// Per-key view of every setting that an edit lock protects.
#[derive(Clone, Debug, PartialEq)]
pub struct KeyPolicy {
    pub tracked: bool,
    pub time_limit: Option<f64>,
    pub break_after: Option<f64>,
    pub break_duration: Option<f64>,
    pub wait: Option<f64>,
    pub entry_delay: Option<f64>,
    pub tab_limit: Option<u32>,
}

impl Settings {
    /// Builds settings from a loosely typed JSON object. Missing or invalid
    /// fields take their defaults.
    pub fn from_value(raw: &Value) -> Self {
        let empty = Map::new();
        let obj = raw.as_object().unwrap_or(&empty);
        let d = Settings::default();

        let tracked_sites = match obj.get("trackedSites") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect(),
            _ => d.tracked_sites,
        };

        Self {
            tracked_sites,
            overlay_enabled: match obj.get("overlayEnabled") {
                Some(v) => truthy(v),
                None => d.overlay_enabled,
            },
            overlay_scale: parse_number(obj.get("overlayScale"))
                .filter(|v| *v > 0.0)
                .unwrap_or(d.overlay_scale),
            overlay_background_color: normalize_hex_color(
                obj.get("overlayBackgroundColor"),
                DEFAULT_BACKGROUND_COLOR,
            ),
            overlay_text_color: normalize_hex_color(obj.get("overlayTextColor"), DEFAULT_TEXT_COLOR),
            overlay_background_opacity: parse_number(obj.get("overlayBackgroundOpacity"))
                .map(|v| v.clamp(0.0, 1.0))
                .unwrap_or(d.overlay_background_opacity),
            overlay_click_through: true,
            menu_text_scale: parse_number(obj.get("menuTextScale")).unwrap_or(d.menu_text_scale),
            time_limits: normalize_minute_limits(obj.get("timeLimits")),
            break_after_limits: normalize_minute_limits(obj.get("breakAfterLimits")),
            break_duration_limits: normalize_minute_limits(obj.get("breakDurationLimits")),
            wait_limits: normalize_minute_limits(obj.get("waitLimits")),
            entry_delay_limits: normalize_minute_limits(obj.get("entryDelayLimits")),
            tab_limits: normalize_tab_limits(obj.get("tabLimits")),
        }
    }

    pub fn matcher(&self) -> SiteMatcher {
        SiteMatcher::new(&self.tracked_sites)
    }

    pub fn time_limit(&self, key: &str) -> Option<f64> {
        self.time_limits.get(key).copied()
    }

    pub fn tab_limit(&self, key: &str) -> Option<u32> {
        self.tab_limits.get(key).copied().filter(|v| *v > 0)
    }

    pub fn entry_delay(&self, key: &str) -> Option<f64> {
        self.entry_delay_limits.get(key).copied()
    }

    pub fn wait(&self, key: &str) -> Option<f64> {
        self.wait_limits.get(key).copied()
    }

    /// `(breakAfterMinutes, breakDurationMinutes)`, only when both are set.
    pub fn break_policy(&self, key: &str) -> Option<(f64, f64)> {
        let after = self.break_after_limits.get(key).copied()?;
        let duration = self.break_duration_limits.get(key).copied()?;
        Some((after, duration))
    }

    pub fn key_policy(&self, key: &str) -> KeyPolicy {
        KeyPolicy {
            tracked: self.matcher().keys().iter().any(|k| k == key),
            time_limit: self.time_limit(key),
            break_after: self.break_after_limits.get(key).copied(),
            break_duration: self.break_duration_limits.get(key).copied(),
            wait: self.wait(key),
            entry_delay: self.entry_delay(key),
            tab_limit: self.tab_limit(key),
        }
    }

    /// Every key mentioned anywhere in the configuration.
    pub fn all_keys(&self) -> Vec<String> {
        let mut keys = self.matcher().keys();
        let maps = [
            &self.time_limits,
            &self.break_after_limits,
            &self.break_duration_limits,
            &self.wait_limits,
            &self.entry_delay_limits,
        ];
        for m in maps {
            for k in m.keys() {
                if !keys.contains(k) {
                    keys.push(k.clone());
                }
            }
        }
        for k in self.tab_limits.keys() {
            if !keys.contains(k) {
                keys.push(k.clone());
            }
        }
        keys
    }
}

fn truthy(v: &Value) -> bool {
    match v {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
        Value::Null => false,
    }
}

fn parse_number(v: Option<&Value>) -> Option<f64> {
    let n = match v? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

pub fn normalize_hex_color(v: Option<&Value>, fallback: &str) -> String {
    let Some(s) = v.and_then(|v| v.as_str()) else {
        return fallback.to_string();
    };
    let s = s.trim();
    let valid = s.len() == 7
        && s.starts_with('#')
        && s[1..].chars().all(|c| c.is_ascii_hexdigit());
    if valid {
        s.to_lowercase()
    } else {
        fallback.to_string()
    }
}

pub fn normalize_minute_limits(v: Option<&Value>) -> MinuteLimits {
    let mut out = MinuteLimits::new();
    if let Some(Value::Object(obj)) = v {
        for (k, v) in obj {
            if let Some(n) = parse_number(Some(v)).filter(|n| *n > 0.0) {
                out.insert(k.clone(), n.min(MAX_LIMIT_MINUTES));
            }
        }
    }
    out
}

pub fn normalize_tab_limits(v: Option<&Value>) -> BTreeMap<String, u32> {
    let mut out = BTreeMap::new();
    if let Some(Value::Object(obj)) = v {
        for (k, v) in obj {
            if let Some(n) = parse_number(Some(v)).filter(|n| *n >= 1.0) {
                out.insert(k.clone(), n.floor().min(u32::MAX as f64) as u32);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_apply_to_empty_payload() {
        let s = Settings::from_value(&json!({}));
        assert_eq!(s, Settings::default());
        assert_eq!(s.tracked_sites.len(), DEFAULT_SITES.len());
    }

    #[test]
    fn loose_inputs_are_normalized() {
        let s = Settings::from_value(&json!({
            "trackedSites": ["example.com", 5, "news.site/feed"],
            "overlayEnabled": 0,
            "overlayScale": "-2",
            "overlayBackgroundColor": "#ABCDEF",
            "overlayTextColor": "red",
            "overlayBackgroundOpacity": "1.7",
            "menuTextScale": "1.25",
            "timeLimits": {"example.com": "30", "bad": "x", "zero": 0},
            "tabLimits": {"example.com": 2.9, "neg": -1},
        }));
        assert_eq!(s.tracked_sites, vec!["example.com", "news.site/feed"]);
        assert!(!s.overlay_enabled);
        assert_eq!(s.overlay_scale, 1.0);
        assert_eq!(s.overlay_background_color, "#abcdef");
        assert_eq!(s.overlay_text_color, "#ffffff");
        assert_eq!(s.overlay_background_opacity, 1.0);
        assert_eq!(s.menu_text_scale, 1.25);
        assert_eq!(s.time_limits.len(), 1);
        assert_eq!(s.time_limit("example.com"), Some(30.0));
        assert_eq!(s.tab_limit("example.com"), Some(2));
        assert_eq!(s.tab_limit("neg"), None);
    }

    #[test]
    fn break_policy_requires_both_halves() {
        let s = Settings::from_value(&json!({
            "breakAfterLimits": {"a.com": 5, "b.com": 5},
            "breakDurationLimits": {"a.com": 2},
        }));
        assert_eq!(s.break_policy("a.com"), Some((5.0, 2.0)));
        assert_eq!(s.break_policy("b.com"), None);
    }

    #[test]
    fn stored_settings_round_trip_through_from_value() {
        let mut s = Settings::default();
        s.wait_limits.insert("github.com".into(), 10.0);
        s.tab_limits.insert("github.com".into(), 3);
        let v = serde_json::to_value(&s).unwrap();
        assert_eq!(Settings::from_value(&v), s);
    }

    #[test]
    fn huge_minute_limits_are_capped() {
        let s = Settings::from_value(&json!({
            "waitLimits": {"a.com": 1e300},
            "entryDelayLimits": {"a.com": "1e300"},
        }));
        assert_eq!(s.wait("a.com"), Some(MAX_LIMIT_MINUTES));
        assert_eq!(s.entry_delay("a.com"), Some(MAX_LIMIT_MINUTES));
        assert_eq!(minutes_to_ms(MAX_LIMIT_MINUTES), 31_536_000_000);
    }
}
