//! Per-resolution memoization.
//!
//! A [`Scope`] is where a resolver keeps the values it has already produced.
//! It is *not* a dependency lifetime policy (singleton/request/transient) —
//! Makhzan's Injected graph carries no such annotation — it is purely the
//! append-only cache that makes "resolve the same key twice, get the same
//! object" true within one resolution tree, plus the parent/override
//! chaining that lets a child resolver reuse its parent's work.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::BoxFuture;
use tokio::sync::OnceCell;

use crate::error::Result;
use crate::events::EventDistributor;
use crate::injected::Value;
use crate::key::BindKey;

/// A single cache slot. `OnceCell::get_or_try_init` gives at-most-once
/// execution per key: concurrent callers for the same slot await the same
/// in-flight initialization, and a failed attempt does not poison the slot
/// (a later caller may retry).
type Slot = Arc<OnceCell<Value>>;

fn slot_map() -> DashMap<BindKey, Slot> {
    DashMap::new()
}

/// Per-resolution memoization layer.
///
/// - [`Scope::Root`] is the top of a resolution tree; it owns the event
///   distributor every descendant reports through.
/// - [`Scope::Child`] consults its parent for any key not in its own
///   `overrides` set; it never mutates the parent's cache.
/// - [`Scope::Overriding`] is a fixed, pre-populated lookup consulted before
///   falling through to an inner scope — used to seed a resolver's
///   `__resolver__` handle and similar always-present values.
pub enum Scope {
    Root { cache: DashMap<BindKey, Slot>, distributor: Arc<EventDistributor> },
    Child { parent: Arc<Scope>, overrides: HashSet<BindKey>, cache: DashMap<BindKey, Slot> },
    Overriding { inner: Arc<Scope>, preset: DashMap<BindKey, Slot> },
}

impl Scope {
    pub fn root() -> Arc<Scope> {
        Arc::new(Scope::Root { cache: slot_map(), distributor: Arc::new(EventDistributor::new()) })
    }

    pub fn child(parent: Arc<Scope>, overrides: HashSet<BindKey>) -> Arc<Scope> {
        Arc::new(Scope::Child { parent, overrides, cache: slot_map() })
    }

    pub fn overriding(inner: Arc<Scope>) -> Arc<Scope> {
        Arc::new(Scope::Overriding { inner, preset: slot_map() })
    }

    /// The event distributor for the resolution tree this scope belongs to.
    pub fn distributor(&self) -> &Arc<EventDistributor> {
        match self {
            Scope::Root { distributor, .. } => distributor,
            Scope::Child { parent, .. } => parent.distributor(),
            Scope::Overriding { inner, .. } => inner.distributor(),
        }
    }

    /// Seeds `key` with an already-resolved value, bypassing providers
    /// entirely. Used to pre-bind the resolver handle in every scope.
    pub fn preset(&self, key: BindKey, value: Value) {
        let cell = OnceCell::new();
        // infallible: a freshly constructed cell is always empty.
        let _ = cell.set(value);
        match self {
            Scope::Root { cache, .. } => {
                cache.insert(key, Arc::new(cell));
            }
            Scope::Child { cache, .. } => {
                cache.insert(key, Arc::new(cell));
            }
            Scope::Overriding { preset, .. } => {
                preset.insert(key, Arc::new(cell));
            }
        }
    }

    /// Returns the value cached for `key` in this scope or one of its
    /// ancestors, without running any provider. Used for the `__resolver__`
    /// handle and similar always-preset keys.
    pub fn peek(&self, key: &BindKey) -> Option<Value> {
        match self {
            Scope::Root { cache, .. } => cache.get(key).and_then(|s| s.get().cloned()),
            Scope::Child { parent, overrides, cache } => {
                if overrides.contains(key) {
                    cache.get(key).and_then(|s| s.get().cloned())
                } else {
                    cache.get(key).and_then(|s| s.get().cloned()).or_else(|| parent.peek(key))
                }
            }
            Scope::Overriding { inner, preset } => {
                preset.get(key).and_then(|s| s.get().cloned()).or_else(|| inner.peek(key))
            }
        }
    }

    /// Resolves `key` through this scope's cache, delegating to a parent
    /// (or consulting a preset mapping) per the variant's rule. `init` runs
    /// at most once per key per owning scope.
    pub fn get_or_init<'a>(
        self: &'a Arc<Scope>,
        key: &'a BindKey,
        init: impl FnOnce() -> BoxFuture<'a, Result<Value>> + Send + 'a,
    ) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            match self.as_ref() {
                Scope::Root { cache, .. } => {
                    let slot = cache.entry(key.clone()).or_insert_with(|| Arc::new(OnceCell::new())).clone();
                    slot.get_or_try_init(init).await.map(|v| v.clone())
                }
                Scope::Child { parent, overrides, cache } => {
                    if overrides.contains(key) {
                        let slot = cache.entry(key.clone()).or_insert_with(|| Arc::new(OnceCell::new())).clone();
                        slot.get_or_try_init(init).await.map(|v| v.clone())
                    } else {
                        parent.get_or_init(key, init).await
                    }
                }
                Scope::Overriding { inner, preset } => {
                    if let Some(slot) = preset.get(key) {
                        if let Some(v) = slot.get() {
                            return Ok(v.clone());
                        }
                    }
                    inner.get_or_init(key, init).await
                }
            }
        })
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scope::Root { cache, .. } => write!(f, "Scope::Root(cached={})", cache.len()),
            Scope::Child { overrides, cache, .. } => {
                write!(f, "Scope::Child(overrides={}, cached={})", overrides.len(), cache.len())
            }
            Scope::Overriding { preset, .. } => write!(f, "Scope::Overriding(preset={})", preset.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn erase(n: i32) -> Value {
        Arc::new(n)
    }

    #[tokio::test]
    async fn key_runs_its_provider_at_most_once() {
        let scope = Scope::root();
        let calls = Arc::new(AtomicU32::new(0));
        let key = BindKey::named("a");
        for _ in 0..5 {
            let calls = calls.clone();
            let v = scope
                .get_or_init(&key, move || {
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(erase(1))
                    }
                    .boxed()
                })
                .await
                .unwrap();
            assert_eq!(*v.downcast_ref::<i32>().unwrap(), 1);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn child_without_override_reuses_parent_value() {
        let root = Scope::root();
        let key = BindKey::named("a");
        root.get_or_init(&key, || async { Ok(erase(1)) }.boxed()).await.unwrap();

        let child = Scope::child(root.clone(), HashSet::new());
        let v = child.get_or_init(&key, || async { Ok(erase(999)) }.boxed()).await.unwrap();
        assert_eq!(*v.downcast_ref::<i32>().unwrap(), 1);
    }

    #[tokio::test]
    async fn child_with_override_computes_its_own_value() {
        let root = Scope::root();
        let key = BindKey::named("a");
        root.get_or_init(&key, || async { Ok(erase(1)) }.boxed()).await.unwrap();

        let overrides: HashSet<BindKey> = [key.clone()].into_iter().collect();
        let child = Scope::child(root.clone(), overrides);
        let v = child.get_or_init(&key, || async { Ok(erase(2)) }.boxed()).await.unwrap();
        assert_eq!(*v.downcast_ref::<i32>().unwrap(), 2);

        // Parent is untouched.
        let v_parent = root.get_or_init(&key, || async { Ok(erase(3)) }.boxed()).await.unwrap();
        assert_eq!(*v_parent.downcast_ref::<i32>().unwrap(), 1);
    }

    #[tokio::test]
    async fn preset_value_is_returned_without_running_init() {
        let scope = Scope::root();
        let key = BindKey::named("__resolver__");
        scope.preset(key.clone(), erase(42));
        let v = scope
            .get_or_init(&key, || async { panic!("init should not run for a preset key") }.boxed())
            .await
            .unwrap();
        assert_eq!(*v.downcast_ref::<i32>().unwrap(), 42);
    }
}
