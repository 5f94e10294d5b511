//! Active-session tracker.
//!
//! Owns the single notion of "which tab is active and trackable" and turns
//! wall-clock ticks into ledger time. Every browser event, user message and
//! periodic tick goes through `&mut self`, so ledger read-modify-writes never
//! interleave.

mod block;
mod rpc;
mod tab_limit;

pub use block::BlockState;

use crate::browser::{Browser, Command, Tab, TabId, TabMirror, WindowId, WINDOW_ID_NONE};
use crate::clock::Clock;
use crate::ledger::{allowlist, cycle, time};
use crate::matcher::SiteMatcher;
use crate::messages::{BrowserEvent, IdleState, Push};
use crate::settings::{minutes_to_ms, Settings, SETTINGS_KEY};
use crate::store::{Area, Store, StoreError};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

pub const DEFAULT_IDLE_PAUSE_MS: i64 = 60_000;
pub const DEFAULT_BREAK_WARNING_MS: i64 = 10_000;

#[derive(Clone, Copy, Debug)]
pub struct TrackerConfig {
    /// Activity older than this stops accrual; idle time past it is never counted.
    pub idle_pause_ms: i64,
    /// Lead time of the one-shot break warning.
    pub break_warning_ms: i64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            idle_pause_ms: DEFAULT_IDLE_PAUSE_MS,
            break_warning_ms: DEFAULT_BREAK_WARNING_MS,
        }
    }
}

/// Volatile session state. `last_tick_ms == None` means accrual is paused.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Session {
    pub active_tab: Option<TabId>,
    pub active_key: Option<String>,
    pub last_tick_ms: Option<i64>,
    pub active_window: Option<WindowId>,
    pub idle_state: IdleState,
}

/// Whether time may accrue for the active tab at `now`.
pub fn tracking_allowed(
    session: &Session,
    last_activity: &HashMap<TabId, i64>,
    now: i64,
    idle_pause_ms: i64,
) -> bool {
    let Some(tab) = session.active_tab else {
        return false;
    };
    if session.idle_state == IdleState::Locked {
        return false;
    }
    match last_activity.get(&tab) {
        Some(at) => now - at <= idle_pause_ms,
        None => false,
    }
}

#[derive(Clone, Debug)]
struct EntryGate {
    key: String,
    blocked_until: i64,
}

pub struct Tracker<B: Browser = TabMirror> {
    store: Box<dyn Store>,
    browser: B,
    clock: Box<dyn Clock>,
    config: TrackerConfig,
    session: Session,
    popup_open: bool,
    last_activity: HashMap<TabId, i64>,
    entry_gates: HashMap<TabId, EntryGate>,
    warned: HashSet<String>,
}

impl<B: Browser> Tracker<B> {
    pub fn new(store: Box<dyn Store>, browser: B, clock: Box<dyn Clock>, config: TrackerConfig) -> Self {
        Self {
            store,
            browser,
            clock,
            config,
            session: Session::default(),
            popup_open: false,
            last_activity: HashMap::new(),
            entry_gates: HashMap::new(),
            warned: HashSet::new(),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn browser(&self) -> &B {
        &self.browser
    }

    pub fn store(&self) -> &dyn Store {
        &*self.store
    }

    pub fn settings(&self) -> Result<Settings, StoreError> {
        Ok(match self.store.get_raw(Area::Sync, SETTINGS_KEY)? {
            Some(v) => Settings::from_value(&v),
            None => Settings::default(),
        })
    }

    pub fn today_total(&self, key: &str) -> Result<i64, StoreError> {
        time::day_total(&*self.store, &self.clock.today(), key)
    }

    fn tracking_allowed_at(&self, now: i64) -> bool {
        tracking_allowed(
            &self.session,
            &self.last_activity,
            now,
            self.config.idle_pause_ms,
        )
    }

    fn clear_session(&mut self) {
        let idle_state = self.session.idle_state;
        self.session = Session {
            idle_state,
            ..Session::default()
        };
    }

    fn key_for_tab(tab: &Tab, matcher: &SiteMatcher) -> Option<String> {
        tab.effective_url()
            .and_then(|u| matcher.match_str(u))
            .map(|p| p.key.clone())
    }

    fn tabs_for_key(&self, key: &str, matcher: &SiteMatcher) -> Vec<Tab> {
        self.browser
            .tabs()
            .into_iter()
            .filter(|t| Self::key_for_tab(t, matcher).as_deref() == Some(key))
            .collect()
    }

    fn focused_tab(&self) -> Option<Tab> {
        self.browser
            .focused_window()
            .and_then(|w| self.browser.active_tab_in(w))
    }

    /// End of the accrual interval: `now`, or the idle boundary when the last
    /// recorded activity is older than the idle pause.
    fn accrual_end(&self, now: i64) -> i64 {
        let activity = self
            .session
            .active_tab
            .and_then(|t| self.last_activity.get(&t).copied());
        match activity {
            Some(at) if now - at > self.config.idle_pause_ms => at + self.config.idle_pause_ms,
            Some(_) => now,
            None => self.session.last_tick_ms.unwrap_or(now),
        }
    }

    /// Converts time since the last tick into ledger time for the active key.
    pub(crate) fn flush(&mut self, now: i64) -> Result<(), StoreError> {
        let (Some(key), Some(last)) = (self.session.active_key.clone(), self.session.last_tick_ms)
        else {
            return Ok(());
        };
        let end = self.accrual_end(now);
        self.session.last_tick_ms = Some(now);
        let delta = end - last;
        if delta <= 0 {
            return Ok(());
        }
        self.accrue(&key, delta, end)?;
        self.update_badge()
    }

    /// Adds `delta` ms ending at `at`, honoring break cycles and cooldowns.
    fn accrue(&mut self, key: &str, delta: i64, at: i64) -> Result<(), StoreError> {
        let day = self.clock.today();
        let settings = self.settings()?;
        let Some((after_minutes, duration_minutes)) = settings.break_policy(key) else {
            return time::add_time(&mut *self.store, &day, key, delta);
        };

        let mut delta = delta;
        if let Some(until) = cycle::cooldown_until(&*self.store, &day, key)? {
            if at <= until {
                debug!(site = key, blocked_until = until, "cooldown active, skipping accrual");
                return Ok(());
            }
            info!(site = key, "break completed");
            cycle::reset_cooldown_state(&mut *self.store, &day, key, until)?;
            delta = delta.min(at - until);
        }

        cycle::apply_decay(&mut *self.store, &day, key, at - delta)?;
        time::add_time(&mut *self.store, &day, key, delta)?;
        let cycle_ms = cycle::add_cycle_time(&mut *self.store, &day, key, delta, at)?;

        let threshold = minutes_to_ms(after_minutes);
        if cycle_ms >= threshold {
            let until = at.saturating_add(minutes_to_ms(duration_minutes));
            cycle::set_cooldown_until(&mut *self.store, &day, key, until)?;
            cycle::clear_cycle(&mut *self.store, &day, key, at)?;
            self.warned.remove(key);
            info!(site = key, blocked_until = until, "break started");
        } else if cycle_ms >= threshold.saturating_sub(self.config.break_warning_ms) {
            if self.warned.insert(key.to_string()) {
                if let Some(tab) = self.session.active_tab {
                    self.browser.send(
                        tab,
                        Push::BreakWarning {
                            remaining_ms: threshold - cycle_ms,
                        },
                    );
                }
            }
        } else {
            self.warned.remove(key);
        }
        Ok(())
    }

    fn update_badge(&mut self) -> Result<(), StoreError> {
        let text = match self.session.active_key.as_deref() {
            Some(key) => format!("{}m", self.today_total(key)? / 60_000),
            None => String::new(),
        };
        self.browser.set_badge(&text);
        Ok(())
    }

    /// Resolves `tab` to a tracked key and makes it the active session, or
    /// clears the session when it does not match.
    fn set_active_from_tab(&mut self, tab: Option<Tab>, now: i64) -> Result<(), StoreError> {
        let matcher = self.settings()?.matcher();
        let key = tab.as_ref().and_then(|t| Self::key_for_tab(t, &matcher));
        match (tab, key) {
            (Some(tab), Some(key)) => {
                self.session.active_tab = Some(tab.id);
                self.session.active_key = Some(key.clone());
                self.session.active_window = Some(tab.window_id);
                self.session.last_tick_ms = None;
                if self.tracking_allowed_at(now) {
                    self.session.last_tick_ms = Some(now);
                }
                debug!(tab_id = tab.id, site = %key, ticking = self.session.last_tick_ms.is_some(), "active");
                self.update_badge()?;
                self.update_block_state(tab.id, Some(&key))
            }
            (tab, _) => {
                self.clear_session();
                self.update_badge()?;
                if let Some(tab) = tab {
                    self.browser.send(tab.id, Push::BlockHide);
                }
                Ok(())
            }
        }
    }

    pub fn tab_activated(&mut self, tab_id: TabId) -> Result<(), StoreError> {
        let now = self.clock.now_ms();
        self.flush(now)?;
        let tab = self.browser.tab(tab_id);
        self.set_active_from_tab(tab, now)?;
        self.update_overlay(tab_id)
    }

    /// Navigation within `tab` (its URL changed).
    pub fn tab_updated(&mut self, tab: &Tab) -> Result<(), StoreError> {
        let now = self.clock.now_ms();
        let settings = self.settings()?;
        let matcher = settings.matcher();
        let new_key = Self::key_for_tab(tab, &matcher);

        if let Some(gate) = self.entry_gates.get(&tab.id) {
            let still_gated = matcher.keys().contains(&gate.key)
                && settings.entry_delay(&gate.key).is_some();
            if new_key.as_deref() != Some(gate.key.as_str()) && !still_gated {
                self.entry_gates.remove(&tab.id);
            }
        }

        let focused = self.session.active_tab == Some(tab.id)
            || self.browser.focused_window() == Some(tab.window_id);
        if tab.active && focused {
            self.flush(now)?;
            self.set_active_from_tab(Some(tab.clone()), now)?;
            self.update_overlay(tab.id)?;
        }

        self.enforce_tab_limit(tab)?;
        if self.browser.tab(tab.id).is_some() {
            self.send_tab_status_for_tab(tab)?;
        }
        Ok(())
    }

    pub fn tab_created(&mut self, tab: &Tab) -> Result<(), StoreError> {
        self.enforce_tab_limit(tab)?;
        if self.browser.tab(tab.id).is_some() {
            self.send_tab_status_for_tab(tab)?;
        }
        Ok(())
    }

    pub fn tab_removed(&mut self, tab_id: TabId) -> Result<(), StoreError> {
        self.forget_tab(tab_id)?;
        self.send_tab_status_all()
    }

    /// Drops every per-tab record; ends the session if it was the active tab.
    fn forget_tab(&mut self, tab_id: TabId) -> Result<(), StoreError> {
        allowlist::strip_tab(&mut *self.store, tab_id)?;
        self.entry_gates.remove(&tab_id);
        if self.session.active_tab == Some(tab_id) {
            let now = self.clock.now_ms();
            self.flush(now)?;
            self.clear_session();
            self.update_badge()?;
        }
        self.last_activity.remove(&tab_id);
        Ok(())
    }

    pub fn window_focus_changed(&mut self, window: Option<WindowId>) -> Result<(), StoreError> {
        let now = self.clock.now_ms();
        if self.session.idle_state != IdleState::Active {
            self.flush(now)?;
            self.session.last_tick_ms = None;
            return Ok(());
        }
        let Some(window) = window.filter(|w| *w != WINDOW_ID_NONE) else {
            self.flush(now)?;
            self.clear_session();
            return self.update_badge();
        };
        self.flush(now)?;
        let tab = self.browser.active_tab_in(window);
        let tab_id = tab.as_ref().map(|t| t.id);
        self.set_active_from_tab(tab, now)?;
        match tab_id {
            Some(id) => self.update_overlay(id),
            None => Ok(()),
        }
    }

    pub fn idle_state_changed(&mut self, state: IdleState) -> Result<(), StoreError> {
        if self.session.idle_state == state {
            return Ok(());
        }
        debug!(?state, "idle state changed");
        self.session.idle_state = state;
        if state == IdleState::Locked {
            let now = self.clock.now_ms();
            self.flush(now)?;
            self.session.last_tick_ms = None;
        }
        Ok(())
    }

    /// Records user activity in `tab_id` and resumes a stalled session.
    pub fn user_activity(&mut self, tab_id: TabId) -> Result<(), StoreError> {
        let now = self.clock.now_ms();
        let is_active = self.session.active_tab == Some(tab_id);
        if is_active && self.session.last_tick_ms.is_some() && !self.tracking_allowed_at(now) {
            // Close out the idle stretch before fresh activity makes it look active.
            self.flush(now)?;
            self.session.last_tick_ms = None;
        }
        self.last_activity.insert(tab_id, now);
        if is_active && self.session.last_tick_ms.is_none() && self.tracking_allowed_at(now) {
            debug!(tab_id, "accrual resumed");
            self.session.last_tick_ms = Some(now);
        }
        Ok(())
    }

    /// Periodic tick (1 s cadence).
    pub fn tick(&mut self) -> Result<(), StoreError> {
        let (Some(tab_id), Some(key)) = (self.session.active_tab, self.session.active_key.clone())
        else {
            return Ok(());
        };
        let now = self.clock.now_ms();

        if !self.tracking_allowed_at(now) {
            if self.session.last_tick_ms.is_some() {
                self.flush(now)?;
                self.session.last_tick_ms = None;
                debug!(tab_id, "accrual paused");
            }
            return Ok(());
        }

        let Some(tab) = self.browser.tab(tab_id) else {
            self.clear_session();
            return self.update_badge();
        };
        if !tab.active {
            return Ok(());
        }
        if !self.popup_open {
            if let Some(window) = self.session.active_window {
                if self.browser.window_focused(window) != Some(true) {
                    return Ok(());
                }
            }
        }

        if self.session.last_tick_ms.is_none() {
            self.session.last_tick_ms = Some(now);
            return Ok(());
        }

        self.flush(now)?;
        self.browser.send(tab_id, Push::OverlayTick);
        self.update_block_state(tab_id, Some(&key))
    }
}

impl Tracker<TabMirror> {
    /// Applies a browser event to the mirror, then runs the matching handler.
    pub fn handle_event(&mut self, event: BrowserEvent) -> Result<(), StoreError> {
        match event {
            BrowserEvent::Snapshot {
                tabs,
                focused_window_id,
            } => {
                self.browser.reset(tabs, focused_window_id);
                // Tab ids do not survive a browser restart.
                self.refresh_allowlists()?;
                let now = self.clock.now_ms();
                self.flush(now)?;
                let tab = self.focused_tab();
                let tab_id = tab.as_ref().map(|t| t.id);
                self.set_active_from_tab(tab, now)?;
                if let Some(id) = tab_id {
                    self.update_overlay(id)?;
                }
                self.send_tab_status_all()
            }
            BrowserEvent::TabCreated { tab } => {
                self.browser.upsert(tab.clone());
                self.tab_created(&tab)
            }
            BrowserEvent::TabUpdated { tab_id, url, tab } => {
                self.browser.upsert(tab);
                let Some(url) = url else {
                    return Ok(());
                };
                self.browser.set_url(tab_id, &url);
                match self.browser.tab(tab_id) {
                    Some(tab) => self.tab_updated(&tab),
                    None => Ok(()),
                }
            }
            BrowserEvent::TabActivated { tab_id, window_id } => {
                self.browser.activate(tab_id, window_id);
                self.tab_activated(tab_id)
            }
            BrowserEvent::TabRemoved { tab_id, .. } => {
                self.browser.remove(tab_id);
                self.tab_removed(tab_id)
            }
            BrowserEvent::WindowFocusChanged { window_id } => {
                self.browser.set_focused_window(window_id);
                self.window_focus_changed(window_id)
            }
            BrowserEvent::IdleStateChanged { state } => self.idle_state_changed(state),
        }
    }

    pub fn drain_commands(&mut self) -> Vec<Command> {
        self.browser.drain_commands()
    }
}
