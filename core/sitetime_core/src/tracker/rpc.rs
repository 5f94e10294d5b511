use super::Tracker;
use crate::browser::Browser;
use crate::ledger::{cycle, edit_lock, time};
use crate::messages::{Reply, Request, Sender};
use crate::settings::{Settings, SETTINGS_KEY};
use crate::store::{Area, StoreError, StoreExt};
use serde_json::Value;
use tracing::{debug, info, warn};

impl<B: Browser> Tracker<B> {
    /// Answers one request from a popup, options page or content script.
    pub fn handle_message(&mut self, request: Request, sender: &Sender) -> Result<Reply, StoreError> {
        let now = self.clock.now_ms();
        match request {
            Request::GetTodayTimes => {
                let day = self.clock.today();
                let times = time::day_totals(&*self.store, &day)?;
                Ok(Reply::TodayTimes {
                    ok: true,
                    key: day,
                    times,
                })
            }
            Request::GetSettings => Ok(Reply::Settings {
                ok: true,
                settings: self.settings()?,
            }),
            Request::SetSettings { payload } => self.save_settings(Value::Object(payload), now),
            Request::ResetToday => {
                let day = self.clock.today();
                time::reset_day(&mut *self.store, &day)?;
                cycle::reset_day(&mut *self.store, &day)?;
                self.warned.clear();
                if self.session.last_tick_ms.is_some() {
                    self.session.last_tick_ms = Some(now);
                }
                info!(%day, "today reset");
                self.update_badge()?;
                if let Some(tab) = self.session.active_tab {
                    let key = self.session.active_key.clone();
                    self.update_block_state(tab, key.as_deref())?;
                }
                Ok(Reply::ack())
            }
            Request::PopupOpen => {
                self.popup_open = true;
                Ok(Reply::ack())
            }
            Request::PopupClosed => {
                self.popup_open = false;
                Ok(Reply::ack())
            }
            Request::RequestOverlayState => {
                if let Some(tab) = sender.tab_id {
                    self.update_overlay(tab)?;
                }
                Ok(Reply::ack())
            }
            Request::RequestBlockState => {
                if let Some(tab_id) = sender.tab_id {
                    let matcher = self.settings()?.matcher();
                    let key = self
                        .browser
                        .tab(tab_id)
                        .and_then(|t| Self::key_for_tab(&t, &matcher));
                    self.update_block_state(tab_id, key.as_deref())?;
                }
                Ok(Reply::ack())
            }
            Request::GetActiveSiteTotal => {
                let matcher = self.settings()?.matcher();
                let key = self
                    .focused_tab()
                    .and_then(|t| Self::key_for_tab(&t, &matcher));
                Ok(match key {
                    Some(key) => Reply::ActiveSiteTotal {
                        ok: true,
                        tracked: true,
                        total_ms: Some(self.today_total(&key)?),
                        site_key: Some(key),
                    },
                    None => Reply::ActiveSiteTotal {
                        ok: true,
                        tracked: false,
                        site_key: None,
                        total_ms: None,
                    },
                })
            }
            Request::GetEditLocks => {
                let settings = self.settings()?;
                let locks = edit_lock::sync_with_settings(&mut *self.store, &settings, now)?;
                Ok(Reply::EditLocks { ok: true, locks })
            }
            Request::UserActivity { reason } => {
                if let Some(tab) = sender.tab_id {
                    debug!(tab_id = tab, reason = reason.as_deref().unwrap_or("input"), "user activity");
                    self.user_activity(tab)?;
                }
                Ok(Reply::ack())
            }
        }
    }

    fn save_settings(&mut self, raw: Value, now: i64) -> Result<Reply, StoreError> {
        let current = self.settings()?;
        let proposed = Settings::from_value(&raw);

        if let Some(key) = edit_lock::violation(&*self.store, &current, &proposed, now)? {
            warn!(site = %key, "settings change rejected, key is locked");
            return Ok(Reply::failed(format!("locked:{key}")));
        }

        self.store.put(Area::Sync, SETTINGS_KEY, &proposed)?;
        edit_lock::rearm_changed(&mut *self.store, &current, &proposed, now)?;
        debug!(sites = proposed.tracked_sites.len(), "settings saved");

        // Re-resolve the session against the new site list.
        self.flush(now)?;
        let focused = self.focused_tab();
        let focused_id = focused.as_ref().map(|t| t.id);
        self.set_active_from_tab(focused, now)?;
        if let Some(id) = focused_id {
            self.update_overlay(id)?;
        }

        if current.tracked_sites != proposed.tracked_sites
            || current.tab_limits != proposed.tab_limits
            || current.time_limits != proposed.time_limits
        {
            self.refresh_allowlists()?;
        }
        self.send_tab_status_all()?;
        Ok(Reply::ack())
    }
}
