//! Work-cycle accumulator and break cooldowns.
//!
//! Per day and site key:
//! - `cycle_<date>`: work time since the last break, in ms.
//! - `cycle_updated_<date>`: when the cycle value was last brought up to date.
//! - `cooldown_<date>`: break deadline; `0` or absent means no cooldown.
//!
//! Cycle time decays 1 ms per elapsed ms between updates, floored at zero.

use crate::store::{Area, Store, StoreError, StoreExt};
use std::collections::BTreeMap;

type PerKey = BTreeMap<String, i64>;

fn cycle_key(day: &str) -> String {
    format!("cycle_{day}")
}

fn updated_key(day: &str) -> String {
    format!("cycle_updated_{day}")
}

fn cooldown_key(day: &str) -> String {
    format!("cooldown_{day}")
}

fn read(store: &dyn Store, sk: &str) -> Result<PerKey, StoreError> {
    store.get_or_default(Area::Local, sk)
}

fn write_one(store: &mut dyn Store, sk: &str, key: &str, value: i64) -> Result<(), StoreError> {
    let mut map = read(store, sk)?;
    map.insert(key.to_string(), value);
    store.put(Area::Local, sk, &map)
}

pub fn cycle_ms(store: &dyn Store, day: &str, key: &str) -> Result<i64, StoreError> {
    Ok(read(store, &cycle_key(day))?.get(key).copied().unwrap_or(0))
}

/// Brings the cycle value for `key` up to `now` and returns it.
///
/// The first call for a key only stamps the update time.
pub fn apply_decay(store: &mut dyn Store, day: &str, key: &str, now: i64) -> Result<i64, StoreError> {
    let current = cycle_ms(store, day, key)?;
    let updated = read(store, &updated_key(day))?.get(key).copied();
    let Some(last) = updated else {
        write_one(store, &updated_key(day), key, now)?;
        return Ok(current);
    };
    let elapsed = now - last;
    if elapsed <= 0 {
        return Ok(current);
    }
    let decayed = (current - elapsed).max(0);
    write_one(store, &cycle_key(day), key, decayed)?;
    write_one(store, &updated_key(day), key, now)?;
    Ok(decayed)
}

/// Adds `delta_ms` of work and stamps the update time to `now`.
pub fn add_cycle_time(
    store: &mut dyn Store,
    day: &str,
    key: &str,
    delta_ms: i64,
    now: i64,
) -> Result<i64, StoreError> {
    let mut next = cycle_ms(store, day, key)?;
    if delta_ms > 0 {
        next += delta_ms;
    }
    write_one(store, &cycle_key(day), key, next)?;
    write_one(store, &updated_key(day), key, now)?;
    Ok(next)
}

pub fn clear_cycle(store: &mut dyn Store, day: &str, key: &str, now: i64) -> Result<(), StoreError> {
    write_one(store, &cycle_key(day), key, 0)?;
    write_one(store, &updated_key(day), key, now)
}

pub fn cooldown_until(store: &dyn Store, day: &str, key: &str) -> Result<Option<i64>, StoreError> {
    Ok(read(store, &cooldown_key(day))?
        .get(key)
        .copied()
        .filter(|ts| *ts > 0))
}

pub fn set_cooldown_until(
    store: &mut dyn Store,
    day: &str,
    key: &str,
    until: i64,
) -> Result<(), StoreError> {
    write_one(store, &cooldown_key(day), key, until)
}

/// Zeroes cycle time and cooldown for `key`, stamping `now`.
pub fn reset_cooldown_state(
    store: &mut dyn Store,
    day: &str,
    key: &str,
    now: i64,
) -> Result<(), StoreError> {
    clear_cycle(store, day, key, now)?;
    write_one(store, &cooldown_key(day), key, 0)
}

pub fn reset_day(store: &mut dyn Store, day: &str) -> Result<(), StoreError> {
    for sk in [cycle_key(day), updated_key(day), cooldown_key(day)] {
        store.put(Area::Local, &sk, &PerKey::new())?;
    }
    Ok(())
}
