//! Wire types exchanged with the extension.

use crate::browser::{Tab, TabId, WindowId};
use crate::settings::Settings;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Request/response messages from popup, options and content surfaces.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Request {
    GetTodayTimes,
    GetSettings,
    SetSettings {
        #[serde(flatten)]
        payload: Map<String, Value>,
    },
    ResetToday,
    PopupOpen,
    PopupClosed,
    RequestOverlayState,
    RequestBlockState,
    GetActiveSiteTotal,
    GetEditLocks,
    UserActivity {
        /// Set when the page synthesizes activity, e.g. fullscreen video.
        #[serde(default)]
        reason: Option<String>,
    },
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sender {
    #[serde(default)]
    pub tab_id: Option<TabId>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Reply {
    TodayTimes {
        ok: bool,
        key: String,
        times: BTreeMap<String, i64>,
    },
    Settings {
        ok: bool,
        settings: Settings,
    },
    ActiveSiteTotal {
        ok: bool,
        tracked: bool,
        #[serde(rename = "siteKey", skip_serializing_if = "Option::is_none")]
        site_key: Option<String>,
        #[serde(rename = "totalMs", skip_serializing_if = "Option::is_none")]
        total_ms: Option<i64>,
    },
    EditLocks {
        ok: bool,
        locks: BTreeMap<String, i64>,
    },
    Failed {
        ok: bool,
        error: String,
    },
    Ack {
        ok: bool,
    },
}

impl Reply {
    pub fn ack() -> Self {
        Reply::Ack { ok: true }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Reply::Failed {
            ok: false,
            error: error.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        match self {
            Reply::TodayTimes { ok, .. }
            | Reply::Settings { ok, .. }
            | Reply::ActiveSiteTotal { ok, .. }
            | Reply::EditLocks { ok, .. }
            | Reply::Failed { ok, .. }
            | Reply::Ack { ok } => *ok,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum BlockReason {
    Daily,
    Cooldown,
    EntryDelay,
}

/// Fire-and-forget messages to content surfaces.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum Push {
    OverlayShow {
        key: String,
        scale: f64,
        background_color: String,
        text_color: String,
        background_opacity: f64,
        click_through: bool,
        limit_minutes: Option<f64>,
        tab_count: Option<usize>,
        tab_limit: Option<u32>,
    },
    OverlayHide,
    OverlayTick,
    OverlayTabStatus {
        key: String,
        tab_count: usize,
        tab_limit: u32,
    },
    BlockShow {
        key: String,
        reason: BlockReason,
        #[serde(skip_serializing_if = "Option::is_none")]
        limit_minutes: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        break_after_minutes: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        break_duration_minutes: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        entry_delay_minutes: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        blocked_until: Option<i64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        total_ms: Option<i64>,
    },
    BlockHide,
    BreakWarning {
        remaining_ms: i64,
    },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdleState {
    #[default]
    Active,
    Idle,
    Locked,
}

/// Browser-originated events.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum BrowserEvent {
    Snapshot {
        tabs: Vec<Tab>,
        #[serde(default)]
        focused_window_id: Option<WindowId>,
    },
    TabCreated {
        tab: Tab,
    },
    TabUpdated {
        tab_id: TabId,
        #[serde(default)]
        url: Option<String>,
        tab: Tab,
    },
    TabActivated {
        tab_id: TabId,
        window_id: WindowId,
    },
    TabRemoved {
        tab_id: TabId,
        #[serde(default)]
        window_id: Option<WindowId>,
    },
    WindowFocusChanged {
        #[serde(default)]
        window_id: Option<WindowId>,
    },
    IdleStateChanged {
        state: IdleState,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn requests_parse_from_extension_shape() {
        let r: Request = serde_json::from_value(json!({"type": "GET_TODAY_TIMES"})).unwrap();
        assert_eq!(r, Request::GetTodayTimes);

        let r: Request = serde_json::from_value(json!({
            "type": "SET_SETTINGS",
            "trackedSites": ["a.com"],
            "overlayEnabled": true,
        }))
        .unwrap();
        match r {
            Request::SetSettings { payload } => {
                assert_eq!(payload["trackedSites"], json!(["a.com"]));
                assert!(!payload.contains_key("type"));
            }
            other => panic!("unexpected {other:?}"),
        }

        let r: Request = serde_json::from_value(json!({"type": "USER_ACTIVITY"})).unwrap();
        assert_eq!(r, Request::UserActivity { reason: None });
    }

    #[test]
    fn pushes_use_camel_case_fields() {
        let v = serde_json::to_value(Push::BlockShow {
            key: "a.com".into(),
            reason: BlockReason::EntryDelay,
            limit_minutes: None,
            break_after_minutes: None,
            break_duration_minutes: None,
            entry_delay_minutes: Some(2.0),
            blocked_until: Some(120_000),
            total_ms: None,
        })
        .unwrap();
        assert_eq!(
            v,
            json!({
                "type": "BLOCK_SHOW",
                "key": "a.com",
                "reason": "entryDelay",
                "entryDelayMinutes": 2.0,
                "blockedUntil": 120000,
            })
        );

        let v = serde_json::to_value(Push::BreakWarning { remaining_ms: 5 }).unwrap();
        assert_eq!(v, json!({"type": "BREAK_WARNING", "remainingMs": 5}));
    }

    #[test]
    fn replies_serialize_flat() {
        let v = serde_json::to_value(Reply::ActiveSiteTotal {
            ok: true,
            tracked: false,
            site_key: None,
            total_ms: None,
        })
        .unwrap();
        assert_eq!(v, json!({"ok": true, "tracked": false}));
        assert_eq!(
            serde_json::to_value(Reply::failed("locked:a.com")).unwrap(),
            json!({"ok": false, "error": "locked:a.com"})
        );
    }

    #[test]
    fn browser_events_parse() {
        let e: BrowserEvent = serde_json::from_value(json!({
            "type": "TAB_UPDATED",
            "tabId": 4,
            "url": "https://a.com/",
            "tab": {"id": 4, "windowId": 1, "active": true, "url": "https://a.com/"},
        }))
        .unwrap();
        assert!(matches!(e, BrowserEvent::TabUpdated { tab_id: 4, .. }));

        let e: BrowserEvent = serde_json::from_value(json!({
            "type": "IDLE_STATE_CHANGED",
            "state": "locked",
        }))
        .unwrap();
        assert_eq!(e, BrowserEvent::IdleStateChanged { state: IdleState::Locked });
    }
}
