use super::Tracker;
use crate::browser::{Browser, Tab};
use crate::ledger::allowlist;
use crate::messages::Push;
use crate::settings::Settings;
use crate::store::StoreError;
use std::collections::BTreeSet;
use tracing::info;

impl<B: Browser> Tracker<B> {
    /// Closes `tab` when its site has more open tabs than allowed and `tab`
    /// is not allowlisted.
    pub fn enforce_tab_limit(&mut self, tab: &Tab) -> Result<(), StoreError> {
        let settings = self.settings()?;
        let matcher = settings.matcher();
        let Some(key) = Self::key_for_tab(tab, &matcher) else {
            return Ok(());
        };
        let Some(limit) = settings.tab_limit(&key) else {
            return Ok(());
        };

        let open: BTreeSet<i64> = self
            .tabs_for_key(&key, &matcher)
            .into_iter()
            .map(|t| t.id)
            .collect();
        let allowed = allowlist::prune(&mut *self.store, &key, &open)?;
        if open.len() <= limit as usize || allowed.contains(&tab.id) || !open.contains(&tab.id) {
            return Ok(());
        }

        info!(site = %key, tab_id = tab.id, open = open.len(), limit, "closing tab over limit");
        self.browser.close_tab(tab.id);
        self.forget_tab(tab.id)?;
        self.send_tab_status_for_key(&key, &settings);
        Ok(())
    }

    /// Exempts every tab open right now for each limited key, so a newly
    /// applied limit only closes tabs opened after it.
    pub fn refresh_allowlists(&mut self) -> Result<(), StoreError> {
        let settings = self.settings()?;
        let matcher = settings.matcher();
        let limited: BTreeSet<String> = settings.tab_limits.keys().cloned().collect();
        for key in &limited {
            let ids = self
                .tabs_for_key(key, &matcher)
                .into_iter()
                .map(|t| t.id)
                .collect();
            allowlist::replace(&mut *self.store, key, ids)?;
        }
        allowlist::retain_keys(&mut *self.store, &limited)
    }

    pub(crate) fn send_tab_status_for_key(&mut self, key: &str, settings: &Settings) {
        let Some(tab_limit) = settings.tab_limit(key) else {
            return;
        };
        let matching = self.tabs_for_key(key, &settings.matcher());
        let tab_count = matching.len();
        for tab in matching {
            self.browser.send(
                tab.id,
                Push::OverlayTabStatus {
                    key: key.to_string(),
                    tab_count,
                    tab_limit,
                },
            );
        }
    }

    pub(crate) fn send_tab_status_for_tab(&mut self, tab: &Tab) -> Result<(), StoreError> {
        let settings = self.settings()?;
        if let Some(key) = Self::key_for_tab(tab, &settings.matcher()) {
            self.send_tab_status_for_key(&key, &settings);
        }
        Ok(())
    }

    pub(crate) fn send_tab_status_all(&mut self) -> Result<(), StoreError> {
        let settings = self.settings()?;
        let keys: Vec<String> = settings.tab_limits.keys().cloned().collect();
        for key in keys {
            self.send_tab_status_for_key(&key, &settings);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{pushes, tab, tracker_with};
    use super::*;
    use crate::browser::{Command, TabMirror};
    use crate::messages::{BrowserEvent, Request, Sender};
    use serde_json::json;

    fn open(t: &mut Tracker<TabMirror>, id: i64, url: &str) {
        t.handle_event(BrowserEvent::TabCreated {
            tab: tab(id, 1, false, url),
        })
        .unwrap();
    }

    #[test]
    fn newest_tab_over_limit_is_closed() {
        let (mut t, _clock) = tracker_with(json!({
            "trackedSites": ["x.com"],
            "tabLimits": {"x.com": 2},
        }));
        open(&mut t, 1, "https://x.com/a");
        open(&mut t, 2, "https://x.com/b");
        open(&mut t, 3, "https://x.com/c");
        open(&mut t, 4, "https://other.org/");

        let closed: Vec<i64> = t
            .drain_commands()
            .into_iter()
            .filter_map(|c| match c {
                Command::CloseTab { tab_id } => Some(tab_id),
                _ => None,
            })
            .collect();
        assert_eq!(closed, vec![3]);
        let ids: Vec<i64> = t.browser().tabs().iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![1, 2, 4]);
    }

    #[test]
    fn tabs_open_when_limit_is_applied_are_exempt() {
        let (mut t, _clock) = tracker_with(json!({"trackedSites": ["x.com"]}));
        open(&mut t, 1, "https://x.com/a");
        open(&mut t, 2, "https://x.com/b");
        open(&mut t, 3, "https://x.com/c");

        let reply = t
            .handle_message(
                Request::SetSettings {
                    payload: json!({"trackedSites": ["x.com"], "tabLimits": {"x.com": 1}})
                        .as_object()
                        .cloned()
                        .unwrap(),
                },
                &Sender::default(),
            )
            .unwrap();
        assert!(reply.is_ok());
        t.drain_commands();

        // Existing tabs survive navigation within the site.
        t.handle_event(BrowserEvent::TabUpdated {
            tab_id: 2,
            url: Some("https://x.com/d".into()),
            tab: tab(2, 1, false, "https://x.com/d"),
        })
        .unwrap();
        assert_eq!(t.browser().tabs().len(), 3);

        // A new one is over the cap and not exempt.
        open(&mut t, 4, "https://x.com/e");
        assert!(t.browser().tab(4).is_none());

        // Closing an exempt tab removes its exemption.
        t.handle_event(BrowserEvent::TabRemoved {
            tab_id: 1,
            window_id: Some(1),
        })
        .unwrap();
        let list = allowlist::load(t.store()).unwrap();
        assert_eq!(list["x.com"], BTreeSet::from([2, 3]));
    }

    #[test]
    fn tab_status_is_broadcast_to_matching_tabs() {
        let (mut t, _clock) = tracker_with(json!({
            "trackedSites": ["x.com"],
            "tabLimits": {"x.com": 5},
        }));
        open(&mut t, 1, "https://x.com/a");
        open(&mut t, 2, "https://x.com/b");
        let status: Vec<Push> = pushes(&mut t)
            .into_iter()
            .filter(|p| matches!(p, Push::OverlayTabStatus { .. }))
            .collect();
        // One broadcast after the first tab, two after the second.
        assert_eq!(status.len(), 3);
        assert_eq!(
            status.last(),
            Some(&Push::OverlayTabStatus {
                key: "x.com".into(),
                tab_count: 2,
                tab_limit: 5
            })
        );
    }

    #[test]
    fn snapshot_replaces_stale_exemptions() {
        let (mut t, _clock) = tracker_with(json!({
            "trackedSites": ["x.com"],
            "tabLimits": {"x.com": 1},
        }));
        // Left over from a previous browser session.
        allowlist::replace(&mut *t.store, "x.com", BTreeSet::from([1, 2])).unwrap();

        t.handle_event(BrowserEvent::Snapshot {
            tabs: vec![tab(11, 1, true, "https://x.com/a"), tab(12, 1, false, "https://x.com/b")],
            focused_window_id: Some(1),
        })
        .unwrap();
        t.drain_commands();

        t.handle_event(BrowserEvent::TabUpdated {
            tab_id: 11,
            url: Some("https://x.com/c".into()),
            tab: tab(11, 1, true, "https://x.com/c"),
        })
        .unwrap();
        assert!(!t
            .drain_commands()
            .iter()
            .any(|c| matches!(c, Command::CloseTab { .. })));
        assert_eq!(t.browser().tabs().len(), 2);
        let list = allowlist::load(t.store()).unwrap();
        assert_eq!(list["x.com"], BTreeSet::from([11, 12]));
    }
}
