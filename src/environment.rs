use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::context::HttpContext;
use crate::value::{FromValue, Value};

/// The untyped, per-request key/value representation of one HTTP transaction.
///
/// `Environment` is a handle: clones share one map, so a write through any
/// clone is visible through every other. The caller that created the map
/// owns the request; adapters built over it are views that must not outlive
/// that request.
///
/// The internal lock is held only for a single read or write and never
/// across an `.await`.
///
/// Besides its entries, an environment carries one typed slot for the
/// [`HttpContext`] of an enclosing typed pipeline. The slot is not an entry:
/// [`keys`](Environment::keys), [`get`](Environment::get) and
/// [`len`](Environment::len) never see it.
///
/// # Examples
///
/// ```
/// use owin_bridge::{keys, Environment};
///
/// let env = Environment::new();
/// env.insert(keys::REQUEST_METHOD, "GET");
///
/// let alias = env.clone();
/// assert_eq!(alias.get_as::<String>(keys::REQUEST_METHOD).as_deref(), Some("GET"));
/// assert!(alias.ptr_eq(&env));
/// ```
#[derive(Clone, Default)]
pub struct Environment {
    entries: Arc<Mutex<HashMap<String, Value>>>,
    context: Arc<Mutex<Option<HttpContext>>>,
}

impl Environment {
    /// Name of the typed context slot, used in diagnostics.
    pub const CONTEXT_SLOT: &'static str = "host.HttpContext";

    /// Creates an empty environment.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Value>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the raw entry stored under `key`.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.lock().get(key).cloned()
    }

    /// Returns the entry under `key` as `T`.
    ///
    /// An absent key, a null entry, or an entry of another type all yield
    /// `None`. Callers treat `None` as the type's default.
    pub fn get_as<T: FromValue>(&self, key: &str) -> Option<T> {
        let value = self.get(key)?;
        let typed = T::from_value(&value);
        if typed.is_none() && !value.is_null() {
            tracing::trace!(
                key,
                found = value.type_name(),
                expected = std::any::type_name::<T>(),
                "environment entry has unexpected type; treating as absent"
            );
        }
        typed
    }

    /// Stores `value` under `key`, returning the previous entry.
    pub fn insert(&self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.lock().insert(key.into(), value.into())
    }

    /// Removes `key`, returning its entry.
    pub fn remove(&self, key: &str) -> Option<Value> {
        self.lock().remove(key)
    }

    /// Returns whether `key` is present (null entries count as present).
    pub fn contains_key(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    /// Returns whether `key` holds a non-null entry.
    pub fn has_non_null(&self, key: &str) -> bool {
        self.lock().get(key).is_some_and(|v| !v.is_null())
    }

    /// Snapshot of the keys currently present.
    pub fn keys(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` if the environment has no entries.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Returns whether both handles refer to the same map.
    pub fn ptr_eq(&self, other: &Environment) -> bool {
        Arc::ptr_eq(&self.entries, &other.entries)
    }

    /// The typed context parked by an enclosing typed pipeline, if any.
    pub fn context(&self) -> Option<HttpContext> {
        self.context
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replaces the typed context slot, returning the previous occupant.
    pub(crate) fn replace_context(&self, ctx: Option<HttpContext>) -> Option<HttpContext> {
        let mut slot = self.context.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *slot, ctx)
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys = self.keys();
        keys.sort();
        f.debug_struct("Environment").field("keys", &keys).finish()
    }
}
