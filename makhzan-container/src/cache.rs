//! Cache combinators: `Injected` wrappers that memoize a program's result
//! against an external async-dict store, keyed by a SHA-256 fingerprint of
//! its declared dependency ingredients.
//!
//! Grounded in `injected_cache_utils.py`/`cached_function.py`
//! (`examples/original_source/packages/injected_utils`): those modules
//! layer a `CachedFunction`/`AsyncCachedFunction` over an arbitrary dict-like
//! store, hashing the call's arguments (there, via `cloudpickle`+SHA-256;
//! here, via a caller-supplied per-ingredient formatter) into the cache key.
//! The per-fingerprint coalescing lock and the "recompute once on write
//! failure" retry are this crate's realization of that module's intent,
//! simplified to the in-memory reference store this crate ships.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use parking_lot::Mutex as SyncMutex;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex as AsyncMutex;

use crate::error::Result;
use crate::injected::{clone_downcast, InjectedNode, ResolverHandle, Value};

/// The async-dict contract external cache stores satisfy. `key` is
/// always the hex-encoded SHA-256 fingerprint computed by the cache
/// combinator, never a raw ingredient.
#[async_trait]
pub trait AsyncDict: Send + Sync {
    async fn get(&self, key: &str) -> Option<Value>;
    async fn set(&self, key: &str, value: Value) -> std::result::Result<(), String>;
    async fn delete(&self, key: &str);
    async fn contains(&self, key: &str) -> bool;
}

/// A reference in-memory implementation of [`AsyncDict`], sufficient to
/// exercise the cache contract without an external store. Persistence-backed
/// stores (SQLite, LZMA-compressed files, etc.) are expected to live outside
/// this crate and implement the same trait.
#[derive(Default)]
pub struct InMemoryAsyncDict {
    entries: SyncMutex<HashMap<String, Value>>,
}

impl InMemoryAsyncDict {
    pub fn new() -> Self {
        InMemoryAsyncDict::default()
    }

    pub fn shared() -> Arc<InMemoryAsyncDict> {
        Arc::new(InMemoryAsyncDict::new())
    }
}

#[async_trait]
impl AsyncDict for InMemoryAsyncDict {
    async fn get(&self, key: &str) -> Option<Value> {
        self.entries.lock().get(key).cloned()
    }

    async fn set(&self, key: &str, value: Value) -> std::result::Result<(), String> {
        self.entries.lock().insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) {
        self.entries.lock().remove(key);
    }

    async fn contains(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }
}

/// Canonical serialization of a cache's key ingredients: each ingredient is
/// already a string (produced by the per-dependency formatter given to
/// `Injected::cache`/`Injected::async_cache`), joined by a byte that cannot
/// appear in a formatter's output by convention (`\x1f`, ASCII unit
/// separator) so concatenated ingredients cannot collide across boundaries.
fn fingerprint(ingredients: &[String]) -> String {
    let mut hasher = Sha256::new();
    for (i, ingredient) in ingredients.iter().enumerate() {
        if i > 0 {
            hasher.update([0x1f]);
        }
        hasher.update(ingredient.as_bytes());
    }
    hex::encode(hasher.finalize())
}


/// Per-(cache instance, fingerprint) locks, keyed by the cache's `Arc`
/// pointer identity. Coalesces concurrent misses for the same fingerprint
/// into a single `program` resolution.
static BUILD_LOCKS: Lazy<DashMap<(usize, String), Arc<AsyncMutex<()>>>> = Lazy::new(DashMap::new);

fn build_lock(cache_identity: usize, fingerprint: &str) -> Arc<AsyncMutex<()>> {
    BUILD_LOCKS
        .entry((cache_identity, fingerprint.to_string()))
        .or_insert_with(|| Arc::new(AsyncMutex::new(())))
        .clone()
}

/// Resolves an `InjectedNode::Cache`: consult `store` for `fingerprint`;
/// on hit, return the stored value. On miss, resolve `program` under a
/// per-fingerprint lock (coalescing concurrent misses), write through, and
/// return. A write failure triggers one recompute-and-retry before giving
/// up and returning the freshly computed value regardless.
pub(crate) async fn resolve_cached(
    store_value: Value,
    ingredients: Vec<String>,
    program: Arc<InjectedNode>,
    handle: ResolverHandle,
    trace: &[String],
) -> Result<Value> {
    let store = clone_downcast::<Arc<dyn AsyncDict>>(&store_value, "<cache-store>")?;
    let key = fingerprint(&ingredients);

    if let Some(hit) = store.get(&key).await {
        return Ok(hit);
    }

    let cache_identity = Arc::as_ptr(&store) as *const () as usize;
    let lock = build_lock(cache_identity, &key);
    let _guard = lock.lock().await;

    // Re-check: another task may have filled the slot while we waited.
    if let Some(hit) = store.get(&key).await {
        return Ok(hit);
    }

    let mut trace = trace.to_vec();
    trace.push("<cached-program>".to_string());
    let value = handle.resolve_node(&program, &trace).await?;

    if store.set(&key, value.clone()).await.is_err() {
        let retried = handle.resolve_node(&program, &trace).await?;
        let _ = store.set(&key, retried.clone()).await;
        return Ok(retried);
    }

    Ok(value)
}

/// Builds an `Injected::cache`/`Injected::async_cache` node: `store` produces
/// the `AsyncDict` to consult, `program` is the guarded computation, and
/// `program_dependencies` are resolved to supply the fingerprint's
/// ingredients — each paired with a formatter turning its resolved value
/// into the ingredient's canonical string form.
pub fn cache_node(
    store: Arc<InjectedNode>,
    program: Arc<InjectedNode>,
    program_dependencies: Vec<(Arc<InjectedNode>, Arc<dyn Fn(&Value) -> String + Send + Sync>)>,
) -> Arc<InjectedNode> {
    Arc::new(InjectedNode::Cache { store, program, program_deps: program_dependencies })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::error::{DependencyResolutionError, DependencyResolutionFailure, FailureCause, MakhzanError};
    use crate::injected::{DynamicResolve, Injected, NodeContext};
    use futures::future::BoxFuture;
    use futures::FutureExt;

    struct NullResolver;
    impl NodeContext for NullResolver {
        fn resolve_name<'a>(&'a self, name: &'a str, trace: &'a [String]) -> BoxFuture<'a, Result<Value>> {
            let name = name.to_string();
            let mut trace = trace.to_vec();
            trace.push(name.clone());
            async move {
                Err(MakhzanError::Resolution(DependencyResolutionError::single(DependencyResolutionFailure {
                    key: name,
                    trace,
                    cause: FailureCause::Missing,
                })))
            }
            .boxed()
        }
    }
    impl DynamicResolve for NullResolver {
        fn resolve_name<'a>(&'a self, name: &'a str, trace: &'a [String]) -> BoxFuture<'a, Result<Value>> {
            NodeContext::resolve_name(self, name, trace)
        }
        fn resolve_node<'a>(&'a self, node: &'a Arc<InjectedNode>, trace: &'a [String]) -> BoxFuture<'a, Result<Value>> {
            node.resolve(self, trace)
        }
    }

    #[tokio::test]
    async fn hit_avoids_recompute() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();
        let program = Injected::bind::<_, _>("prog", Vec::<String>::new(), move |_| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(1)
            }
        });
        let resolver: ResolverHandle = Arc::new(NullResolver);
        let ingredients = vec!["k".to_string()];
        let key = fingerprint(&ingredients);
        let dict: Arc<dyn AsyncDict> = InMemoryAsyncDict::shared();
        dict.set(&key, Arc::new(123i32)).await.unwrap();
        let store_value: Value = Arc::new(dict);
        let result = resolve_cached(store_value, ingredients, program.node().clone(), resolver, &[]).await.unwrap();
        assert_eq!(*result.downcast_ref::<i32>().unwrap(), 123);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn miss_runs_program_once_and_writes_through() {
        let dict: Arc<dyn AsyncDict> = InMemoryAsyncDict::shared();
        let store_value: Value = Arc::new(dict.clone());
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();
        let program = Injected::bind::<_, _>("prog", Vec::<String>::new(), move |_| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(7)
            }
        });
        let resolver: ResolverHandle = Arc::new(NullResolver);
        let ingredients = vec!["same-key".to_string()];

        let results = futures::future::join_all((0..10).map(|_| {
            resolve_cached(store_value.clone(), ingredients.clone(), program.node().clone(), resolver.clone(), &[])
        }))
        .await;

        for r in results {
            let v = r.unwrap();
            assert_eq!(*v.downcast_ref::<i32>().unwrap(), 7);
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(dict.contains(&fingerprint(&ingredients)).await);
    }

    #[test]
    fn fingerprint_is_order_sensitive() {
        let a = fingerprint(&["x".into(), "y".into()]);
        let b = fingerprint(&["y".into(), "x".into()]);
        assert_ne!(a, b);
    }

    #[test]
    fn fingerprint_is_deterministic() {
        let a = fingerprint(&["same".into()]);
        let b = fingerprint(&["same".into()]);
        assert_eq!(a, b);
    }
}
