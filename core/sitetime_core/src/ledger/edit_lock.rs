//! Per-key settings locks (`editLocks`).
//!
//! A key with a wait limit carries a lock record. While `now < lockedUntil`
//! none of that key's settings may change. Every accepted change to a waited
//! key re-arms its lock.

use crate::settings::{minutes_to_ms, Settings};
use crate::store::{Area, Store, StoreError, StoreExt};
use std::collections::BTreeMap;

const STORAGE_KEY: &str = "editLocks";

pub type EditLocks = BTreeMap<String, i64>;

pub fn load(store: &dyn Store) -> Result<EditLocks, StoreError> {
    store.get_or_default(Area::Local, STORAGE_KEY)
}

/// Arms a lock for every waited key that has none and drops records of keys
/// that no longer have a wait limit.
pub fn sync_with_settings(
    store: &mut dyn Store,
    settings: &Settings,
    now: i64,
) -> Result<EditLocks, StoreError> {
    let mut locks = load(store)?;
    let before = locks.clone();
    locks.retain(|k, _| settings.wait(k).is_some());
    for (key, minutes) in &settings.wait_limits {
        locks
            .entry(key.clone())
            .or_insert_with(|| now.saturating_add(minutes_to_ms(*minutes)));
    }
    if locks != before {
        store.put(Area::Local, STORAGE_KEY, &locks)?;
    }
    Ok(locks)
}

/// First key whose lock is active and whose settings differ between
/// `current` and `proposed`.
pub fn violation(
    store: &dyn Store,
    current: &Settings,
    proposed: &Settings,
    now: i64,
) -> Result<Option<String>, StoreError> {
    let locks = load(store)?;
    Ok(locks
        .iter()
        .filter(|(_, until)| now < **until)
        .map(|(key, _)| key)
        .find(|key| current.key_policy(key) != proposed.key_policy(key))
        .cloned())
}

/// After an accepted save: re-arms waited keys whose settings changed and
/// drops records of keys that lost their wait limit.
pub fn rearm_changed(
    store: &mut dyn Store,
    previous: &Settings,
    saved: &Settings,
    now: i64,
) -> Result<(), StoreError> {
    let mut locks = load(store)?;
    let mut keys = previous.all_keys();
    for k in saved.all_keys() {
        if !keys.contains(&k) {
            keys.push(k);
        }
    }
    for key in keys {
        match saved.wait(&key) {
            Some(minutes) => {
                if previous.key_policy(&key) != saved.key_policy(&key) {
                    locks.insert(key, now.saturating_add(minutes_to_ms(minutes)));
                }
            }
            None => {
                locks.remove(&key);
            }
        }
    }
    store.put(Area::Local, STORAGE_KEY, &locks)
}
