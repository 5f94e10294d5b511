//! Tabs exempt from a site's open-tab cap (`tabLimitAllowlist`).

use crate::store::{Area, Store, StoreError, StoreExt};
use std::collections::{BTreeMap, BTreeSet};

const STORAGE_KEY: &str = "tabLimitAllowlist";

pub type Allowlist = BTreeMap<String, BTreeSet<i64>>;

pub fn load(store: &dyn Store) -> Result<Allowlist, StoreError> {
    store.get_or_default(Area::Local, STORAGE_KEY)
}

fn save(store: &mut dyn Store, list: &Allowlist) -> Result<(), StoreError> {
    store.put(Area::Local, STORAGE_KEY, list)
}

/// Keeps only the ids of `key` that are still open and returns what is left.
pub fn prune(
    store: &mut dyn Store,
    key: &str,
    open: &BTreeSet<i64>,
) -> Result<BTreeSet<i64>, StoreError> {
    let mut list = load(store)?;
    let Some(ids) = list.get_mut(key) else {
        return Ok(BTreeSet::new());
    };
    let before = ids.len();
    ids.retain(|id| open.contains(id));
    let kept = ids.clone();
    if kept.is_empty() {
        list.remove(key);
    }
    if kept.len() != before {
        save(store, &list)?;
    }
    Ok(kept)
}

/// Exempts exactly `ids` for `key`.
pub fn replace(store: &mut dyn Store, key: &str, ids: BTreeSet<i64>) -> Result<(), StoreError> {
    let mut list = load(store)?;
    if ids.is_empty() {
        list.remove(key);
    } else {
        list.insert(key.to_string(), ids);
    }
    save(store, &list)
}

/// Drops every key not in `keep`.
pub fn retain_keys(store: &mut dyn Store, keep: &BTreeSet<String>) -> Result<(), StoreError> {
    let mut list = load(store)?;
    let before = list.len();
    list.retain(|k, _| keep.contains(k));
    if list.len() != before {
        save(store, &list)?;
    }
    Ok(())
}

/// Removes a closed tab from every key.
pub fn strip_tab(store: &mut dyn Store, tab_id: i64) -> Result<(), StoreError> {
    let mut list = load(store)?;
    let mut changed = false;
    for ids in list.values_mut() {
        changed |= ids.remove(&tab_id);
    }
    if changed {
        list.retain(|_, ids| !ids.is_empty());
        save(store, &list)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn set(ids: &[i64]) -> BTreeSet<i64> {
        ids.iter().copied().collect()
    }

    #[test]
    fn prune_keeps_only_open_tabs() {
        let mut store = MemoryStore::new();
        replace(&mut store, "x.com", set(&[1, 2, 3])).unwrap();
        let kept = prune(&mut store, "x.com", &set(&[2, 3, 9])).unwrap();
        assert_eq!(kept, set(&[2, 3]));
        assert_eq!(load(&store).unwrap()["x.com"], set(&[2, 3]));

        assert!(prune(&mut store, "y.com", &set(&[1])).unwrap().is_empty());
    }

    #[test]
    fn strip_tab_touches_every_key() {
        let mut store = MemoryStore::new();
        replace(&mut store, "x.com", set(&[1, 2])).unwrap();
        replace(&mut store, "y.com", set(&[2])).unwrap();
        strip_tab(&mut store, 2).unwrap();

        let list = load(&store).unwrap();
        assert_eq!(list["x.com"], set(&[1]));
        assert!(!list.contains_key("y.com"));
    }

    #[test]
    fn retain_keys_drops_unlimited_sites() {
        let mut store = MemoryStore::new();
        replace(&mut store, "x.com", set(&[1])).unwrap();
        replace(&mut store, "y.com", set(&[2])).unwrap();
        retain_keys(&mut store, &["y.com".to_string()].into_iter().collect()).unwrap();
        assert_eq!(load(&store).unwrap().keys().collect::<Vec<_>>(), vec!["y.com"]);
    }
}
