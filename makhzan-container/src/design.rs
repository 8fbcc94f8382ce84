//! [`Design`]: an immutable mapping from [`BindKey`] to [`Bind`], monoidal
//! under merge.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::ops::Add;
use std::sync::Arc;

use crate::bind::{Bind, BindMetadata, Validator};
use crate::injected::{Injected, ProvidedArgs, Value};
use crate::key::BindKey;
use crate::error::ProviderResult;
use crate::registry::RegisteredBinding;
use crate::resolver::AsyncResolver;

/// Immutable `BindKey → Bind` mapping. Every mutating method takes `self`
/// by value and returns a new `Design`; the old one stays valid (its
/// `Bind`s are cheaply `Arc`-shared, not deep-copied).
#[derive(Clone, Default)]
pub struct Design {
    bindings: HashMap<BindKey, Bind>,
}

impl Design {
    pub fn new() -> Self {
        Design { bindings: HashMap::new() }
    }

    /// Registers `injected` at `key`, replacing any existing binding.
    pub fn bind(mut self, key: impl Into<BindKey>, injected: Injected<Value>) -> Self {
        self.bindings.insert(key.into(), Bind::new(injected, BindMetadata::default()));
        self
    }

    /// Like [`Design::bind`] but attaches explicit metadata.
    pub fn bind_with_metadata(mut self, key: impl Into<BindKey>, injected: Injected<Value>, metadata: BindMetadata) -> Self {
        self.bindings.insert(key.into(), Bind::new(injected, metadata));
        self
    }

    /// Binds a constant value (the `Pure` case of the construction rule).
    pub fn value<T: Send + Sync + 'static>(self, key: impl Into<BindKey>, value: T) -> Self {
        self.bind(key, Injected::pure(value).erase())
    }

    /// Binds an async function whose dependencies are plain `ByName`
    /// references (the `FromFunction` case of the construction rule).
    #[track_caller]
    pub fn provider<T, F, Fut>(self, key: impl Into<BindKey>, deps: impl IntoIterator<Item = impl Into<String>>, f: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(ProvidedArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ProviderResult<T>> + Send + 'static,
    {
        let key = key.into();
        let injected = Injected::bind(key.name().to_string(), deps, f).erase();
        self.bind(key, injected)
    }

    /// Attaches a validator to an existing binding: it runs against the
    /// produced value before it is memoized, rejecting it with a
    /// `MakhzanError::Validation` diagnostic on failure (§7). A no-op if
    /// `key` isn't present.
    pub fn validate(mut self, key: &BindKey, validator: Validator) -> Self {
        if let Some(bind) = self.bindings.remove(key) {
            self.bindings.insert(key.clone(), bind.with_validator(validator));
        }
        self
    }

    /// Removes a binding; a no-op if `key` wasn't present.
    pub fn unbind(mut self, key: &BindKey) -> Self {
        self.bindings.remove(key);
        self
    }

    /// Replaces the metadata of an existing binding; a no-op if `key`
    /// isn't present.
    pub fn add_metadata(mut self, key: &BindKey, metadata: BindMetadata) -> Self {
        if let Some(bind) = self.bindings.remove(key) {
            self.bindings.insert(key.clone(), bind.with_metadata(metadata));
        }
        self
    }

    pub fn get(&self, key: &BindKey) -> Option<&Bind> {
        self.bindings.get(key)
    }

    pub fn contains(&self, key: &BindKey) -> bool {
        self.bindings.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &BindKey> {
        self.bindings.keys()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub(crate) fn bindings(&self) -> &HashMap<BindKey, Bind> {
        &self.bindings
    }

    /// Right-biased merge: `other`'s keys win, unmatched keys from both
    /// sides are kept.
    pub fn merge(mut self, other: Design) -> Design {
        for (k, v) in other.bindings {
            self.bindings.insert(k, v);
        }
        self
    }

    /// Collects every binding submitted to the process-wide implicit
    /// registry whose label passes `filter`. Explicit by design: nothing
    /// reads the registry unless a `Design` asks for it.
    pub fn from_registry(filter: impl Fn(&str) -> bool) -> Design {
        let mut design = Design::new();
        for registered in inventory::iter::<RegisteredBinding> {
            if filter(registered.label) {
                design = design.bind_with_metadata(
                    BindKey::named(registered.label),
                    (registered.build)(),
                    BindMetadata { origin: None, protocol: Some(registered.label.to_string()) },
                );
            }
        }
        design
    }

    /// Builds an `AsyncResolver` whose effective design is `self`.
    pub fn to_resolver(self) -> AsyncResolver {
        AsyncResolver::new(self)
    }

    /// Builds an `AsyncResolver` whose effective design is `self + overrides`.
    pub fn to_resolver_with_overrides(self, overrides: Design) -> AsyncResolver {
        AsyncResolver::new(self.merge(overrides))
    }
}

impl Add for Design {
    type Output = Design;

    fn add(self, rhs: Design) -> Design {
        self.merge(rhs)
    }
}

impl fmt::Debug for Design {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Design({:?})", self.bindings.keys().collect::<Vec<_>>())
    }
}

/// Shorthand matching the external `design(**bindings)` constructor: builds
/// a `Design` from `(key, value)` pairs of already-erased `Injected`s.
pub fn design(bindings: impl IntoIterator<Item = (impl Into<BindKey>, Injected<Value>)>) -> Design {
    let mut d = Design::new();
    for (k, v) in bindings {
        d = d.bind(k, v);
    }
    d
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::injected::Injected;

    #[tokio::test]
    async fn pure_binding_round_trips() {
        let d = Design::new().value("a", 1i32);
        let r = d.to_resolver();
        let v: i32 = r.resolve_by_name("a").await.unwrap();
        assert_eq!(v, 1);
    }

    #[test]
    fn merge_is_right_biased() {
        let a = Design::new().value("x", 1i32);
        let b = Design::new().value("x", 2i32);
        let merged = a.merge(b);
        assert_eq!(merged.len(), 1);
    }

    #[test]
    fn merge_keeps_unmatched_keys_from_both_sides() {
        let a = Design::new().value("x", 1i32);
        let b = Design::new().value("y", 2i32);
        let merged = a.merge(b);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn empty_design_is_merge_identity() {
        let d = Design::new().value("x", 1i32);
        let merged = Design::new().merge(d.clone());
        assert_eq!(merged.len(), d.len());
    }

    #[test]
    fn unbind_removes_key() {
        let d = Design::new().value("x", 1i32);
        let key = BindKey::named("x");
        let d = d.unbind(&key);
        assert!(!d.contains(&key));
    }

    #[test]
    #[allow(unused)]
    fn design_helper_builds_from_pairs() {
        let pairs: Vec<(BindKey, Injected<Value>)> = vec![(BindKey::named("a"), Injected::pure(1i32).erase())];
        let d = design(pairs);
        assert_eq!(d.len(), 1);
    }
}
