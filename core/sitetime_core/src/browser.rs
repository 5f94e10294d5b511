//! Browser capability: tab/window queries and outbound effects.

use crate::messages::Push;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type TabId = i64;
pub type WindowId = i64;

/// `windows.WINDOW_ID_NONE` in extension APIs.
pub const WINDOW_ID_NONE: WindowId = -1;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tab {
    pub id: TabId,
    pub window_id: WindowId,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub pending_url: Option<String>,
}

impl Tab {
    /// The URL the tab is on or about to be on.
    pub fn effective_url(&self) -> Option<&str> {
        self.pending_url
            .as_deref()
            .or(self.url.as_deref())
            .filter(|u| !u.is_empty())
    }
}

/// Effects the extension must carry out on the real browser.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    CloseTab {
        #[serde(rename = "tabId")]
        tab_id: TabId,
    },
    Push {
        #[serde(rename = "tabId")]
        tab_id: TabId,
        message: Push,
    },
    SetBadge {
        text: String,
    },
}

pub trait Browser: Send {
    fn tab(&self, id: TabId) -> Option<Tab>;
    fn tabs(&self) -> Vec<Tab>;
    fn active_tab_in(&self, window: WindowId) -> Option<Tab>;
    fn focused_window(&self) -> Option<WindowId>;
    /// `None` when the window no longer exists.
    fn window_focused(&self, window: WindowId) -> Option<bool>;
    fn close_tab(&mut self, id: TabId);
    /// Best effort: undeliverable pushes are dropped.
    fn send(&mut self, tab: TabId, message: Push);
    fn set_badge(&mut self, text: &str);
}

/// In-memory copy of the browser's tab and window state, kept current by
/// browser events. Effects are queued and handed back to the extension.
#[derive(Debug, Default)]
pub struct TabMirror {
    tabs: BTreeMap<TabId, Tab>,
    focused_window: Option<WindowId>,
    outbox: Vec<Command>,
    badge: String,
}

impl TabMirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole picture (extension start-up).
    pub fn reset(&mut self, tabs: Vec<Tab>, focused_window: Option<WindowId>) {
        self.tabs = tabs.into_iter().map(|t| (t.id, t)).collect();
        self.focused_window = focused_window.filter(|w| *w != WINDOW_ID_NONE);
    }

    pub fn upsert(&mut self, tab: Tab) {
        if tab.active {
            for other in self.tabs.values_mut() {
                if other.window_id == tab.window_id && other.id != tab.id {
                    other.active = false;
                }
            }
        }
        self.tabs.insert(tab.id, tab);
    }

    pub fn set_url(&mut self, id: TabId, url: &str) {
        if let Some(tab) = self.tabs.get_mut(&id) {
            tab.url = Some(url.to_string());
            tab.pending_url = None;
        }
    }

    pub fn activate(&mut self, id: TabId, window: WindowId) {
        for tab in self.tabs.values_mut() {
            if tab.window_id == window {
                tab.active = tab.id == id;
            }
        }
    }

    pub fn remove(&mut self, id: TabId) -> Option<Tab> {
        self.tabs.remove(&id)
    }

    pub fn set_focused_window(&mut self, window: Option<WindowId>) {
        self.focused_window = window.filter(|w| *w != WINDOW_ID_NONE);
    }

    pub fn badge(&self) -> &str {
        &self.badge
    }

    pub fn drain_commands(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.outbox)
    }

    pub fn pending_commands(&self) -> &[Command] {
        &self.outbox
    }
}

impl Browser for TabMirror {
    fn tab(&self, id: TabId) -> Option<Tab> {
        self.tabs.get(&id).cloned()
    }

    fn tabs(&self) -> Vec<Tab> {
        self.tabs.values().cloned().collect()
    }

    fn active_tab_in(&self, window: WindowId) -> Option<Tab> {
        self.tabs
            .values()
            .find(|t| t.window_id == window && t.active)
            .cloned()
    }

    fn focused_window(&self) -> Option<WindowId> {
        self.focused_window
    }

    fn window_focused(&self, window: WindowId) -> Option<bool> {
        if !self.tabs.values().any(|t| t.window_id == window) {
            return None;
        }
        Some(self.focused_window == Some(window))
    }

    fn close_tab(&mut self, id: TabId) {
        if self.tabs.remove(&id).is_some() {
            self.outbox.push(Command::CloseTab { tab_id: id });
        }
    }

    fn send(&mut self, tab: TabId, message: Push) {
        if !self.tabs.contains_key(&tab) {
            return;
        }
        self.outbox.push(Command::Push {
            tab_id: tab,
            message,
        });
    }

    fn set_badge(&mut self, text: &str) {
        if self.badge == text {
            return;
        }
        self.badge = text.to_string();
        self.outbox.push(Command::SetBadge {
            text: text.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tab(id: TabId, window_id: WindowId, active: bool, url: &str) -> Tab {
        Tab {
            id,
            window_id,
            active,
            url: Some(url.to_string()),
            pending_url: None,
        }
    }

    #[test]
    fn activation_is_exclusive_per_window() {
        let mut m = TabMirror::new();
        m.upsert(tab(1, 10, true, "https://a.com"));
        m.upsert(tab(2, 10, false, "https://b.com"));
        m.upsert(tab(3, 20, true, "https://c.com"));

        m.activate(2, 10);
        assert_eq!(m.active_tab_in(10).map(|t| t.id), Some(2));
        assert_eq!(m.active_tab_in(20).map(|t| t.id), Some(3));

        m.upsert(tab(4, 10, true, "https://d.com"));
        assert_eq!(m.active_tab_in(10).map(|t| t.id), Some(4));
    }

    #[test]
    fn pushes_to_unknown_tabs_are_dropped() {
        let mut m = TabMirror::new();
        m.upsert(tab(1, 10, true, "https://a.com"));
        m.send(1, Push::OverlayTick);
        m.send(99, Push::OverlayTick);
        m.close_tab(99);
        assert_eq!(
            m.drain_commands(),
            vec![Command::Push {
                tab_id: 1,
                message: Push::OverlayTick
            }]
        );
        assert!(m.drain_commands().is_empty());
    }

    #[test]
    fn badge_only_emits_on_change() {
        let mut m = TabMirror::new();
        m.set_badge("3m");
        m.set_badge("3m");
        m.set_badge("");
        assert_eq!(m.drain_commands().len(), 2);
        assert_eq!(m.badge(), "");
    }

    #[test]
    fn pending_url_wins_and_focus_none_is_normalized() {
        let mut t = tab(1, 10, true, "https://a.com");
        t.pending_url = Some("https://b.com".into());
        assert_eq!(t.effective_url(), Some("https://b.com"));

        let mut m = TabMirror::new();
        m.reset(vec![t], Some(WINDOW_ID_NONE));
        assert_eq!(m.focused_window(), None);
        assert_eq!(m.window_focused(10), Some(false));
        assert_eq!(m.window_focused(11), None);
    }
}
