//! The shared world-state store.
//!
//! State is a single JSON tree addressed by dotted paths (`"heat.current"`,
//! `"world.reputation.syndicate"`). Anyone holding a `GameState` handle can
//! read and subscribe; writing requires a `NamespaceWriter`, and each top-level
//! namespace can be claimed exactly once. A subsystem therefore owns its
//! namespace by owning its writer, and the compiler enforces that nobody else
//! writes there.

use crate::common::{lock, SubscriptionId};
use crate::error::{Result, ShadowError};
use serde_json::{Map, Value};
use slotmap::SlotMap;
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::{debug, trace};

/// Called with `(new_value, old_value)` at the subscribed path.
pub type StateCallback = Arc<dyn Fn(&Value, &Value) + Send + Sync>;

struct Subscriber {
    path: String,
    callback: StateCallback,
}

struct StateInner {
    root: Value,
    subscribers: SlotMap<SubscriptionId, Subscriber>,
    claimed: HashSet<String>,
}

/// Options for `NamespaceWriter::batch_update`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchOptions {
    /// Apply the writes without notifying subscribers.
    pub silent: bool,
}

/// A cloneable handle to the world-state tree.
#[derive(Clone)]
pub struct GameState {
    inner: Arc<Mutex<StateInner>>,
}

impl Default for GameState {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for GameState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = lock(&self.inner);
        f.debug_struct("GameState")
            .field("namespaces", &inner.claimed)
            .field("subscribers", &inner.subscribers.len())
            .finish()
    }
}

fn lookup<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(root);
    }
    path.split('.').try_fold(root, |node, key| node.get(key))
}

fn ensure_object(node: &mut Value) -> &mut Map<String, Value> {
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    match node {
        Value::Object(map) => map,
        _ => unreachable!("node was just made an object"),
    }
}

fn assign(root: &mut Value, path: &str, value: Value) {
    let keys: Vec<&str> = path.split('.').collect();
    let Some((last, parents)) = keys.split_last() else {
        return;
    };
    let mut node = root;
    for key in parents {
        node = ensure_object(node)
            .entry(key.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    ensure_object(node).insert(last.to_string(), value);
}

impl GameState {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(StateInner {
                root: Value::Object(Map::new()),
                subscribers: SlotMap::with_key(),
                claimed: HashSet::new(),
            })),
        }
    }

    /// Returns a copy of the value at `path`, if present.
    pub fn get(&self, path: &str) -> Option<Value> {
        lookup(&lock(&self.inner).root, path).cloned()
    }

    pub fn get_f64(&self, path: &str) -> Option<f64> {
        lookup(&lock(&self.inner).root, path).and_then(Value::as_f64)
    }

    pub fn get_str(&self, path: &str) -> Option<String> {
        lookup(&lock(&self.inner).root, path)
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    /// Watches `path`. The callback fires after any write that changes the
    /// value found at `path`, including writes to its parents or children.
    pub fn subscribe<F>(&self, path: &str, callback: F) -> SubscriptionId
    where
        F: Fn(&Value, &Value) + Send + Sync + 'static,
    {
        lock(&self.inner).subscribers.insert(Subscriber {
            path: path.to_string(),
            callback: Arc::new(callback),
        })
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        lock(&self.inner).subscribers.remove(id).is_some()
    }

    /// A deep copy of the whole tree, for persistence.
    pub fn snapshot(&self) -> Value {
        lock(&self.inner).root.clone()
    }

    /// Replaces the whole tree, notifying every subscriber whose value changed.
    ///
    /// Only the application context should call this, when loading a save.
    pub fn restore(&self, root: Value) {
        let root = if root.is_object() {
            root
        } else {
            Value::Object(Map::new())
        };
        self.apply(|tree| *tree = root, false);
    }

    /// Claims write access to the top-level `namespace`.
    pub fn claim(&self, namespace: &str) -> Result<NamespaceWriter> {
        if namespace.is_empty() || namespace.contains('.') {
            return Err(ShadowError::InvalidNamespace(namespace.to_string()));
        }
        let mut inner = lock(&self.inner);
        if !inner.claimed.insert(namespace.to_string()) {
            return Err(ShadowError::NamespaceClaimed(namespace.to_string()));
        }
        debug!(namespace, "State namespace claimed.");
        Ok(NamespaceWriter {
            state: self.clone(),
            namespace: namespace.to_string(),
        })
    }

    fn apply(&self, mutate: impl FnOnce(&mut Value), silent: bool) {
        let notifications = {
            let mut inner = lock(&self.inner);
            if silent {
                mutate(&mut inner.root);
                return;
            }
            let before: Vec<(SubscriptionId, Value)> = inner
                .subscribers
                .iter()
                .map(|(id, sub)| {
                    let old = lookup(&inner.root, &sub.path).cloned().unwrap_or(Value::Null);
                    (id, old)
                })
                .collect();
            mutate(&mut inner.root);
            before
                .into_iter()
                .filter_map(|(id, old)| {
                    let sub = inner.subscribers.get(id)?;
                    let new = lookup(&inner.root, &sub.path).cloned().unwrap_or(Value::Null);
                    (new != old).then(|| (sub.callback.clone(), new, old))
                })
                .collect::<Vec<_>>()
        };
        for (callback, new, old) in notifications {
            callback(&new, &old);
        }
    }
}

/// Write capability for one top-level namespace of the state tree.
///
/// Paths passed to the writer are relative to the namespace.
pub struct NamespaceWriter {
    state: GameState,
    namespace: String,
}

impl fmt::Debug for NamespaceWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamespaceWriter")
            .field("namespace", &self.namespace)
            .finish()
    }
}

impl NamespaceWriter {
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// A read handle on the whole store.
    pub fn state(&self) -> &GameState {
        &self.state
    }

    fn full_path(&self, path: &str) -> String {
        if path.is_empty() {
            self.namespace.clone()
        } else {
            format!("{}.{}", self.namespace, path)
        }
    }

    pub fn get(&self, path: &str) -> Option<Value> {
        self.state.get(&self.full_path(path))
    }

    pub fn set(&self, path: &str, value: Value) {
        let full = self.full_path(path);
        trace!(path = %full, "State write.");
        self.state.apply(|root| assign(root, &full, value), false);
    }

    /// Applies several writes, then notifies each affected subscriber once.
    pub fn batch_update<I, S>(&self, updates: I, options: BatchOptions)
    where
        I: IntoIterator<Item = (S, Value)>,
        S: AsRef<str>,
    {
        let updates: Vec<(String, Value)> = updates
            .into_iter()
            .map(|(path, value)| (self.full_path(path.as_ref()), value))
            .collect();
        if updates.is_empty() {
            return;
        }
        self.state.apply(
            |root| {
                for (path, value) in updates {
                    assign(root, &path, value);
                }
            },
            options.silent,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;

    #[test]
    fn set_creates_intermediate_objects() {
        let state = GameState::new();
        let heat = state.claim("heat").unwrap();
        heat.set("meter.current", json!(12.5));
        assert_eq!(state.get_f64("heat.meter.current"), Some(12.5));
        assert_eq!(state.get("heat.meter"), Some(json!({"current": 12.5})));
        assert_eq!(state.get("heat.missing.deeper"), None);
    }

    #[test]
    fn namespaces_are_claimed_once() {
        let state = GameState::new();
        let _writer = state.claim("resources").unwrap();
        assert!(matches!(
            state.claim("resources"),
            Err(ShadowError::NamespaceClaimed(_))
        ));
        assert!(matches!(
            state.claim("a.b"),
            Err(ShadowError::InvalidNamespace(_))
        ));
        assert!(state.claim("events").is_ok());
    }

    #[test]
    fn subscribers_see_new_and_old_values() {
        let state = GameState::new();
        let writer = state.claim("world").unwrap();
        writer.set("morality", json!(0.0));

        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = seen.clone();
        state.subscribe("world.morality", move |new, old| {
            sink.lock().unwrap().push((new.clone(), old.clone()));
        });
        let parent_hits = Arc::new(StdMutex::new(0));
        let counter = parent_hits.clone();
        state.subscribe("world", move |_, _| *counter.lock().unwrap() += 1);

        writer.set("morality", json!(5.0));
        writer.set("morality", json!(5.0));
        writer.set("reputation.syndicate", json!(10.0));

        assert_eq!(*seen.lock().unwrap(), vec![(json!(5.0), json!(0.0))]);
        assert_eq!(*parent_hits.lock().unwrap(), 2);
    }

    #[test]
    fn batch_update_notifies_once_and_can_be_silent() {
        let state = GameState::new();
        let writer = state.claim("resources").unwrap();
        let hits = Arc::new(StdMutex::new(0));
        let counter = hits.clone();
        state.subscribe("resources", move |_, _| *counter.lock().unwrap() += 1);

        writer.batch_update(
            [("energy", json!(1.0)), ("data", json!(2.0))],
            BatchOptions::default(),
        );
        writer.batch_update([("energy", json!(3.0))], BatchOptions { silent: true });

        assert_eq!(*hits.lock().unwrap(), 1);
        assert_eq!(state.get_f64("resources.energy"), Some(3.0));
    }

    #[test]
    fn restore_replaces_tree_and_keeps_writers_valid() {
        let state = GameState::new();
        let writer = state.claim("stats").unwrap();
        writer.set("ticks", json!(1));
        state.restore(json!({"stats": {"ticks": 40}}));
        assert_eq!(state.get("stats.ticks"), Some(json!(40)));
        writer.set("ticks", json!(41));
        assert_eq!(state.get("stats.ticks"), Some(json!(41)));
        state.restore(json!("garbage"));
        assert_eq!(state.snapshot(), json!({}));
    }
}
