use super::{EntryGate, Tracker};
use crate::browser::{Browser, TabId};
use crate::ledger::{cycle, time};
use crate::messages::{BlockReason, Push};
use crate::settings::minutes_to_ms;
use crate::store::StoreError;

/// Why a site is blocked right now. Exactly one reason per evaluation, in
/// priority order daily limit, break cooldown, entry delay.
#[derive(Clone, Debug, PartialEq)]
pub enum BlockState {
    Unblocked,
    Daily {
        limit_minutes: f64,
        total_ms: i64,
    },
    Cooldown {
        until: i64,
        break_after_minutes: f64,
        break_duration_minutes: f64,
    },
    EntryDelay {
        until: i64,
        minutes: f64,
    },
}

impl BlockState {
    pub fn reason(&self) -> Option<BlockReason> {
        match self {
            BlockState::Unblocked => None,
            BlockState::Daily { .. } => Some(BlockReason::Daily),
            BlockState::Cooldown { .. } => Some(BlockReason::Cooldown),
            BlockState::EntryDelay { .. } => Some(BlockReason::EntryDelay),
        }
    }

    fn into_push(self, key: &str) -> Push {
        let key = key.to_string();
        match self {
            BlockState::Unblocked => Push::BlockHide,
            BlockState::Daily {
                limit_minutes,
                total_ms,
            } => Push::BlockShow {
                key,
                reason: BlockReason::Daily,
                limit_minutes: Some(limit_minutes),
                break_after_minutes: None,
                break_duration_minutes: None,
                entry_delay_minutes: None,
                blocked_until: None,
                total_ms: Some(total_ms),
            },
            BlockState::Cooldown {
                until,
                break_after_minutes,
                break_duration_minutes,
            } => Push::BlockShow {
                key,
                reason: BlockReason::Cooldown,
                limit_minutes: None,
                break_after_minutes: Some(break_after_minutes),
                break_duration_minutes: Some(break_duration_minutes),
                entry_delay_minutes: None,
                blocked_until: Some(until),
                total_ms: None,
            },
            BlockState::EntryDelay { until, minutes } => Push::BlockShow {
                key,
                reason: BlockReason::EntryDelay,
                limit_minutes: None,
                break_after_minutes: None,
                break_duration_minutes: None,
                entry_delay_minutes: Some(minutes),
                blocked_until: Some(until),
                total_ms: None,
            },
        }
    }
}

impl<B: Browser> Tracker<B> {
    /// Evaluates the block policies for `key` as shown in `tab_id`. The first
    /// evaluation of an entry-delayed key in a tab arms its timer.
    pub fn block_state(&mut self, tab_id: TabId, key: &str) -> Result<BlockState, StoreError> {
        let now = self.clock.now_ms();
        let day = self.clock.today();
        let settings = self.settings()?;

        if let Some(limit_minutes) = settings.time_limit(key) {
            let total_ms = time::day_total(&*self.store, &day, key)?;
            if total_ms >= minutes_to_ms(limit_minutes) {
                return Ok(BlockState::Daily {
                    limit_minutes,
                    total_ms,
                });
            }
        }

        if let Some((break_after_minutes, break_duration_minutes)) = settings.break_policy(key) {
            if let Some(until) = cycle::cooldown_until(&*self.store, &day, key)? {
                if now < until {
                    return Ok(BlockState::Cooldown {
                        until,
                        break_after_minutes,
                        break_duration_minutes,
                    });
                }
            }
        }

        if let Some(minutes) = settings.entry_delay(key) {
            match self.entry_gates.get(&tab_id) {
                Some(gate) if gate.key == key => {
                    if now < gate.blocked_until {
                        return Ok(BlockState::EntryDelay {
                            until: gate.blocked_until,
                            minutes,
                        });
                    }
                }
                _ => {
                    let until = now.saturating_add(minutes_to_ms(minutes));
                    self.entry_gates.insert(
                        tab_id,
                        EntryGate {
                            key: key.to_string(),
                            blocked_until: until,
                        },
                    );
                    return Ok(BlockState::EntryDelay { until, minutes });
                }
            }
        }

        Ok(BlockState::Unblocked)
    }

    pub(crate) fn update_block_state(
        &mut self,
        tab_id: TabId,
        key: Option<&str>,
    ) -> Result<(), StoreError> {
        let Some(key) = key else {
            self.browser.send(tab_id, Push::BlockHide);
            return Ok(());
        };
        let state = self.block_state(tab_id, key)?;
        self.browser.send(tab_id, state.into_push(key));
        Ok(())
    }

    /// Pushes the floating timer state and the block state to `tab_id`.
    pub(crate) fn update_overlay(&mut self, tab_id: TabId) -> Result<(), StoreError> {
        let settings = self.settings()?;
        let matcher = settings.matcher();
        let tab = self.browser.tab(tab_id);
        let key = tab.as_ref().and_then(|t| Self::key_for_tab(t, &matcher));

        if !settings.overlay_enabled {
            self.browser.send(tab_id, Push::OverlayHide);
            return self.update_block_state(tab_id, key.as_deref());
        }
        if tab.is_none() {
            return Ok(());
        }
        let Some(key) = key else {
            self.browser.send(tab_id, Push::OverlayHide);
            self.browser.send(tab_id, Push::BlockHide);
            return Ok(());
        };

        let tab_limit = settings.tab_limit(&key);
        let tab_count = tab_limit.map(|_| self.tabs_for_key(&key, &matcher).len());
        self.browser.send(
            tab_id,
            Push::OverlayShow {
                key: key.clone(),
                scale: settings.overlay_scale,
                background_color: settings.overlay_background_color.clone(),
                text_color: settings.overlay_text_color.clone(),
                background_opacity: settings.overlay_background_opacity,
                click_through: settings.overlay_click_through,
                limit_minutes: settings.time_limit(&key),
                tab_count,
                tab_limit,
            },
        );
        self.update_block_state(tab_id, Some(&key))
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{focus_on, pushes, tracker_with, T0};
    use super::*;
    use crate::messages::{Request, Sender};
    use crate::settings::MAX_LIMIT_MINUTES;
    use serde_json::json;

    #[test]
    fn daily_limit_outranks_everything() {
        let (mut t, clock) = tracker_with(json!({
            "trackedSites": ["a.com"],
            "timeLimits": {"a.com": 1},
            "entryDelayLimits": {"a.com": 5},
        }));
        focus_on(&mut t, 1, "https://a.com/");
        // Entry delay armed on first sight.
        assert!(matches!(
            t.block_state(1, "a.com").unwrap(),
            BlockState::EntryDelay { until, .. } if until == T0 + 5 * 60_000
        ));

        for _ in 0..60 {
            clock.advance(1_000);
            t.user_activity(1).unwrap();
            t.tick().unwrap();
        }
        let state = t.block_state(1, "a.com").unwrap();
        assert_eq!(
            state,
            BlockState::Daily {
                limit_minutes: 1.0,
                total_ms: 60_000
            }
        );
        assert_eq!(state.reason(), Some(BlockReason::Daily));
    }

    #[test]
    fn entry_delay_arms_once_per_tab_and_key() {
        let (mut t, clock) = tracker_with(json!({
            "trackedSites": ["a.com", "b.com"],
            "entryDelayLimits": {"a.com": 1},
        }));
        focus_on(&mut t, 1, "https://a.com/");
        let first = t.block_state(1, "a.com").unwrap();
        assert_eq!(
            first,
            BlockState::EntryDelay {
                until: T0 + 60_000,
                minutes: 1.0
            }
        );

        clock.advance(30_000);
        assert_eq!(t.block_state(1, "a.com").unwrap(), first);

        clock.advance(30_000);
        assert_eq!(t.block_state(1, "a.com").unwrap(), BlockState::Unblocked);
        clock.advance(600_000);
        assert_eq!(t.block_state(1, "a.com").unwrap(), BlockState::Unblocked);

        // Another tab starts its own timer.
        assert!(matches!(
            t.block_state(2, "a.com").unwrap(),
            BlockState::EntryDelay { .. }
        ));
        assert_eq!(t.block_state(1, "b.com").unwrap(), BlockState::Unblocked);
    }

    #[test]
    fn overlay_show_carries_theme_and_tab_counts() {
        let (mut t, _clock) = tracker_with(json!({
            "trackedSites": ["a.com"],
            "overlayBackgroundColor": "#112233",
            "timeLimits": {"a.com": 15},
            "tabLimits": {"a.com": 3},
        }));
        focus_on(&mut t, 1, "https://a.com/");
        let shows: Vec<Push> = pushes(&mut t)
            .into_iter()
            .filter(|p| matches!(p, Push::OverlayShow { .. }))
            .collect();
        assert_eq!(shows.len(), 1);
        match &shows[0] {
            Push::OverlayShow {
                key,
                background_color,
                limit_minutes,
                tab_count,
                tab_limit,
                click_through,
                ..
            } => {
                assert_eq!(key, "a.com");
                assert_eq!(background_color, "#112233");
                assert_eq!(*limit_minutes, Some(15.0));
                assert_eq!(*tab_count, Some(1));
                assert_eq!(*tab_limit, Some(3));
                assert!(*click_through);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn disabled_overlay_still_reports_block_state() {
        let (mut t, _clock) = tracker_with(json!({
            "trackedSites": ["a.com"],
            "overlayEnabled": false,
        }));
        focus_on(&mut t, 1, "https://a.com/");
        let p = pushes(&mut t);
        assert!(p.contains(&Push::OverlayHide));
        assert!(p.contains(&Push::BlockHide));
        assert!(!p.iter().any(|m| matches!(m, Push::OverlayShow { .. })));
    }

    #[test]
    fn enormous_minute_values_saturate_at_one_year() {
        let (mut t, clock) = tracker_with(json!({"trackedSites": ["a.com"]}));
        let payload = json!({
            "trackedSites": ["a.com"],
            "waitLimits": {"a.com": 1e300},
            "entryDelayLimits": {"a.com": "1e300"},
            "breakAfterLimits": {"a.com": 1e300},
            "breakDurationLimits": {"a.com": 1e300},
        });
        let reply = t
            .handle_message(
                Request::SetSettings {
                    payload: payload.as_object().cloned().unwrap(),
                },
                &Sender::default(),
            )
            .unwrap();
        assert!(reply.is_ok());

        focus_on(&mut t, 1, "https://a.com/");
        for _ in 0..3 {
            clock.advance(1_000);
            t.user_activity(1).unwrap();
            t.tick().unwrap();
        }

        let year_ms = minutes_to_ms(MAX_LIMIT_MINUTES);
        assert_eq!(
            t.block_state(1, "a.com").unwrap(),
            BlockState::EntryDelay {
                until: T0 + year_ms,
                minutes: MAX_LIMIT_MINUTES
            }
        );
        let locks = t
            .handle_message(Request::GetEditLocks, &Sender::default())
            .unwrap();
        let locks = serde_json::to_value(locks).unwrap();
        assert_eq!(locks["locks"]["a.com"], T0 + year_ms);
    }
}
