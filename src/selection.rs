use chrono::Utc;
use log::{debug, warn};
use rocket::tokio::sync::broadcast;
use rusqlite::TransactionBehavior;

use crate::db::{self, DbPool};
use crate::error::AppError;

const CHANGE_CAPACITY: usize = 64;

/// Key a selection set is persisted under.
pub fn storage_key(user_id: &str, budget_id: &str) -> String {
    format!("config/{user_id}/{budget_id}/selected-categories")
}

/// Emitted after a selection set was actually modified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionChange {
    pub key: String,
}

/// Persisted, ordered category selections with change notifications.
#[derive(Clone)]
pub struct SelectionStore {
    pool: DbPool,
    changes: broadcast::Sender<SelectionChange>,
}

fn decode(key: &str, raw: Option<String>) -> Vec<String> {
    let Some(raw) = raw else {
        return Vec::new();
    };
    serde_json::from_str(&raw).unwrap_or_else(|err| {
        warn!("selection under {key} is not a list of ids ({err}), starting empty");
        Vec::new()
    })
}

/// Selecting a present id keeps the order; unselecting drops only that id.
pub fn apply_toggle(current: &[String], category_id: &str, selected: bool) -> Vec<String> {
    let mut next: Vec<String> = current
        .iter()
        .filter(|id| selected || id.as_str() != category_id)
        .cloned()
        .collect();
    if selected && !next.iter().any(|id| id == category_id) {
        next.push(category_id.to_string());
    }
    next
}

impl SelectionStore {
    pub fn new(pool: DbPool) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        Self { pool, changes }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SelectionChange> {
        self.changes.subscribe()
    }

    pub fn current_selection(&self, key: &str) -> Result<Vec<String>, AppError> {
        let conn = self.pool.get()?;
        Ok(decode(key, db::read_setting(&conn, key)?))
    }

    /// Applies one toggle and returns the set as stored afterwards.
    pub fn toggle(&self, key: &str, category_id: &str, selected: bool) -> Result<Vec<String>, AppError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let current = decode(key, db::read_setting(&tx, key)?);
        let next = apply_toggle(&current, category_id, selected);
        if next == current {
            tx.commit()?;
            return Ok(next);
        }
        db::write_setting(&tx, key, &serde_json::to_string(&next)?, Utc::now())?;
        tx.commit()?;

        debug!("selection {key} now holds {} categories", next.len());
        // No receivers just means no other view is open.
        let _ = self.changes.send(SelectionChange {
            key: key.to_string(),
        });
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn key_is_scoped_by_user_and_budget() {
        assert_eq!(
            storage_key("u-1", "b-2"),
            "config/u-1/b-2/selected-categories"
        );
    }

    #[test]
    fn unknown_key_reads_empty() {
        let (_dir, pool) = test_pool();
        let store = SelectionStore::new(pool);
        assert!(store.current_selection("config/u/b/selected-categories").unwrap().is_empty());
    }

    #[test]
    fn selecting_twice_keeps_order() {
        let (_dir, pool) = test_pool();
        let store = SelectionStore::new(pool);
        let key = storage_key("u", "b");
        store.toggle(&key, "a", true).unwrap();
        store.toggle(&key, "b", true).unwrap();
        store.toggle(&key, "c", true).unwrap();
        store.toggle(&key, "a", true).unwrap();
        assert_eq!(store.current_selection(&key).unwrap(), ids(&["a", "b", "c"]));
    }

    #[test]
    fn unselecting_removes_exactly_one() {
        let (_dir, pool) = test_pool();
        let store = SelectionStore::new(pool);
        let key = storage_key("u", "b");
        for id in ["a", "b", "c"] {
            store.toggle(&key, id, true).unwrap();
        }
        assert_eq!(store.toggle(&key, "b", false).unwrap(), ids(&["a", "c"]));
        assert_eq!(store.toggle(&key, "zzz", false).unwrap(), ids(&["a", "c"]));
        assert_eq!(store.current_selection(&key).unwrap(), ids(&["a", "c"]));
    }

    #[test]
    fn selections_are_independent_per_key() {
        let (_dir, pool) = test_pool();
        let store = SelectionStore::new(pool);
        store.toggle(&storage_key("u", "b1"), "a", true).unwrap();
        assert!(store.current_selection(&storage_key("u", "b2")).unwrap().is_empty());
        assert!(store.current_selection(&storage_key("v", "b1")).unwrap().is_empty());
    }

    #[test]
    fn garbage_value_reads_as_empty() {
        let (_dir, pool) = test_pool();
        let key = storage_key("u", "b");
        {
            let conn = pool.get().unwrap();
            db::write_setting(&conn, &key, "{\"not\":\"a list\"}", Utc::now()).unwrap();
        }
        let store = SelectionStore::new(pool);
        assert!(store.current_selection(&key).unwrap().is_empty());
        assert_eq!(store.toggle(&key, "a", true).unwrap(), ids(&["a"]));
    }

    #[test]
    fn effective_changes_are_broadcast() {
        let (_dir, pool) = test_pool();
        let store = SelectionStore::new(pool);
        let mut changes = store.subscribe();
        let key = storage_key("u", "b");

        store.toggle(&key, "a", true).unwrap();
        assert_eq!(changes.try_recv().unwrap(), SelectionChange { key: key.clone() });

        store.toggle(&key, "a", true).unwrap();
        assert!(changes.try_recv().is_err());

        store.toggle(&key, "a", false).unwrap();
        assert_eq!(changes.try_recv().unwrap().key, key);
    }

    #[test]
    fn apply_toggle_is_pure() {
        let current = ids(&["x", "y"]);
        assert_eq!(apply_toggle(&current, "y", true), ids(&["x", "y"]));
        assert_eq!(apply_toggle(&current, "z", true), ids(&["x", "y", "z"]));
        assert_eq!(apply_toggle(&current, "x", false), ids(&["y"]));
    }
}
