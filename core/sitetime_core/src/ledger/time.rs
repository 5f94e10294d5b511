//! Milliseconds spent per site key per calendar day (`time_<date>`).

use crate::store::{Area, Store, StoreError, StoreExt};
use std::collections::BTreeMap;

pub type DayTotals = BTreeMap<String, i64>;

pub fn storage_key(day: &str) -> String {
    format!("time_{day}")
}

/// Adds `delta_ms` to `key` for `day`. Empty keys and non-positive deltas are
/// ignored.
pub fn add_time(
    store: &mut dyn Store,
    day: &str,
    key: &str,
    delta_ms: i64,
) -> Result<(), StoreError> {
    if key.is_empty() || delta_ms <= 0 {
        return Ok(());
    }
    let sk = storage_key(day);
    let mut totals: DayTotals = store.get_or_default(Area::Local, &sk)?;
    *totals.entry(key.to_string()).or_insert(0) += delta_ms;
    store.put(Area::Local, &sk, &totals)
}

pub fn day_totals(store: &dyn Store, day: &str) -> Result<DayTotals, StoreError> {
    store.get_or_default(Area::Local, &storage_key(day))
}

pub fn day_total(store: &dyn Store, day: &str, key: &str) -> Result<i64, StoreError> {
    Ok(day_totals(store, day)?.get(key).copied().unwrap_or(0))
}

pub fn reset_day(store: &mut dyn Store, day: &str) -> Result<(), StoreError> {
    store.put(Area::Local, &storage_key(day), &DayTotals::new())
}
