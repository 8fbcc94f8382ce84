//! The async resolver: turns a [`Design`] plus a root [`Scope`] into a
//! machine that turns an `Injected` expression into a concrete value.
//!
//! The missing-key / cycle analysis below walks the dependency graph with a
//! plain DFS: a `visiting`/`validated` pair of sets plus an explicit path
//! vector, so a repeated key on the current path can be reported with the
//! exact cycle chain sliced from its first occurrence.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{debug, instrument, warn};

use crate::bind::Bind;
use crate::design::Design;
use crate::error::{DependencyResolutionError, DependencyResolutionFailure, FailureCause, MakhzanError, Result};
use crate::events::ProvideEvent;
use crate::expr::DelegatedVar;
use crate::injected::{clone_downcast, DynamicResolve, Injected, InjectedNode, NodeContext, ResolverHandle, Value, RESOLVER_KEY};
use crate::key::BindKey;
use crate::scope::Scope;

/// A concurrent, memoized evaluator over a fixed [`Design`] and a private
/// [`Scope`]. Cheap to clone: both fields are `Arc`-shared, and cloning is
/// exactly how a resolver hands itself to dynamic branches as a
/// [`ResolverHandle`].
pub struct AsyncResolver {
    design: Arc<Design>,
    scope: Arc<Scope>,
}

impl Clone for AsyncResolver {
    fn clone(&self) -> Self {
        AsyncResolver { design: self.design.clone(), scope: self.scope.clone() }
    }
}

impl AsyncResolver {
    /// Builds a resolver over `design` with a fresh root scope, and
    /// pre-binds [`RESOLVER_KEY`] to a handle on itself so `Conditional`,
    /// `Cache`, and `Injected::dynamic` nodes can call back in.
    pub fn new(design: Design) -> AsyncResolver {
        let scope = Scope::root();
        let resolver = AsyncResolver { design: Arc::new(design), scope: scope.clone() };
        resolver.bind_self_handle(&scope);
        resolver
    }

    fn bind_self_handle(&self, scope: &Arc<Scope>) {
        let handle: ResolverHandle = Arc::new(self.clone());
        let erased: Value = Arc::new(handle);
        scope.preset(BindKey::named(RESOLVER_KEY), erased);
    }

    /// A new resolver over `self`'s design merged with `overrides`, whose
    /// scope is a `Child` of `self`'s: keys in `overrides` (plus the
    /// resolver handle itself) are recomputed locally, every other key
    /// falls through to the parent's already-memoized value.
    pub fn child(&self, overrides: Design) -> AsyncResolver {
        let merged = (*self.design).clone().merge(overrides.clone());
        let mut own_keys: HashSet<BindKey> = overrides.keys().cloned().collect();
        own_keys.insert(BindKey::named(RESOLVER_KEY));
        let scope = Scope::child(self.scope.clone(), own_keys);
        let resolver = AsyncResolver { design: Arc::new(merged), scope: scope.clone() };
        resolver.bind_self_handle(&scope);
        resolver
    }

    /// A new resolver over `self`'s design whose scope is an [`Scope::Overriding`]
    /// layer wrapping `self`'s scope: each key in `presets` is served
    /// directly from the fixed layer, memoized once, and never reaches its
    /// bound provider; any other key falls through to `self`'s scope
    /// unchanged (§4.4's pre-populated, always-checked-first scope).
    pub fn overriding(&self, presets: Vec<(BindKey, Value)>) -> AsyncResolver {
        let scope = Scope::overriding(self.scope.clone());
        for (key, value) in presets {
            scope.preset(key, value);
        }
        let resolver = AsyncResolver { design: self.design.clone(), scope: scope.clone() };
        resolver.bind_self_handle(&scope);
        resolver
    }

    /// Resolves an already-built `Injected` expression: runs the analysis
    /// phase over its static dependency closure, then evaluates the node.
    #[instrument(skip(self, injected), name = "resolve")]
    pub async fn resolve<T>(&self, injected: Injected<T>) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.analyze(injected.dependencies())?;
        let value = injected.node().resolve(self, &[]).await?;
        clone_downcast::<T>(&value, "<resolve>")
    }

    /// Shorthand for `resolve(Injected::by_name(name))`.
    pub async fn resolve_by_name<T>(&self, name: &str) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.resolve(Injected::<T>::by_name(name)).await
    }

    /// Reifies `var` via [`DelegatedVar::eval`] and resolves the result.
    pub async fn resolve_var<T>(&self, var: DelegatedVar<T>) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let evaled = var.eval();
        self.analyze(evaled.dependencies())?;
        let value = evaled.node().resolve(self, &[]).await?;
        clone_downcast::<T>(&value, "<resolve>")
    }

    /// Walks `providable`'s static dependency closure without resolving
    /// anything, reporting `Bound`/`Missing`/`Cyclic` per reachable key.
    /// Purely diagnostic: no provider runs, no scope slot is touched.
    pub fn dependency_tree<T: Send + Sync + 'static>(&self, providable: &Injected<T>) -> Vec<DependencyTree> {
        let mut path = Vec::new();
        providable
            .dependencies()
            .into_iter()
            .map(|name| self.tree_for(&name, &mut path))
            .collect()
    }

    fn tree_for(&self, name: &str, path: &mut Vec<String>) -> DependencyTree {
        if path.iter().any(|p| p == name) {
            return DependencyTree { key: name.to_string(), outcome: DependencyOutcome::Cyclic, children: Vec::new() };
        }
        if name == RESOLVER_KEY {
            return DependencyTree { key: name.to_string(), outcome: DependencyOutcome::Bound, children: Vec::new() };
        }
        match self.design.get(&BindKey::named(name)) {
            None => DependencyTree { key: name.to_string(), outcome: DependencyOutcome::Missing, children: Vec::new() },
            Some(bind) => {
                path.push(name.to_string());
                let children = bind.node().dependencies().into_iter().map(|child| self.tree_for(&child, path)).collect();
                path.pop();
                DependencyTree { key: name.to_string(), outcome: DependencyOutcome::Bound, children }
            }
        }
    }

    /// DFS over `roots` through `self.design`, collecting every missing
    /// binding and every cycle before any provider runs. `RESOLVER_KEY` is
    /// always considered satisfied since every scope has it preset.
    #[instrument(skip(self, roots))]
    fn analyze(&self, roots: HashSet<String>) -> std::result::Result<(), MakhzanError> {
        let mut visiting = HashSet::new();
        let mut validated = HashSet::new();
        let mut path = Vec::new();
        let mut failures = Vec::new();

        let mut roots: Vec<String> = roots.into_iter().collect();
        roots.sort();
        for name in roots {
            self.analyze_key(&name, &mut visiting, &mut validated, &mut path, &mut failures);
        }

        if failures.is_empty() {
            debug!("dependency analysis passed");
            Ok(())
        } else {
            warn!(failure_count = failures.len(), "dependency analysis found unresolvable keys");
            Err(MakhzanError::Resolution(DependencyResolutionError::new(failures)))
        }
    }

    fn analyze_key(
        &self,
        name: &str,
        visiting: &mut HashSet<String>,
        validated: &mut HashSet<String>,
        path: &mut Vec<String>,
        failures: &mut Vec<DependencyResolutionFailure>,
    ) {
        if validated.contains(name) || name == RESOLVER_KEY {
            return;
        }

        if visiting.contains(name) {
            let cycle_start = path.iter().position(|k| k == name).unwrap_or(0);
            let mut trace: Vec<String> = path[cycle_start..].to_vec();
            trace.push(name.to_string());
            failures.push(DependencyResolutionFailure { key: name.to_string(), trace, cause: FailureCause::Cyclic });
            return;
        }

        let bind = match self.design.get(&BindKey::named(name)) {
            Some(bind) => bind.clone(),
            None => {
                let mut trace = path.clone();
                trace.push(name.to_string());
                failures.push(DependencyResolutionFailure { key: name.to_string(), trace, cause: FailureCause::Missing });
                return;
            }
        };

        visiting.insert(name.to_string());
        path.push(name.to_string());
        for dep in bind.node().dependencies() {
            self.analyze_key(&dep, visiting, validated, path, failures);
        }
        path.pop();
        visiting.remove(name);
        validated.insert(name.to_string());
    }

    fn lookup(&self, name: &str) -> Option<Bind> {
        self.design.get(&BindKey::named(name)).cloned()
    }
}

/// One node of a [`AsyncResolver::dependency_tree`] report.
#[derive(Debug, Clone)]
pub struct DependencyTree {
    pub key: String,
    pub outcome: DependencyOutcome,
    pub children: Vec<DependencyTree>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyOutcome {
    Bound,
    Missing,
    Cyclic,
}

impl NodeContext for AsyncResolver {
    fn resolve_name<'a>(&'a self, name: &'a str, trace: &'a [String]) -> BoxFuture<'a, Result<Value>> {
        async move {
            if trace.iter().any(|t| t == name) {
                let mut cyclic_trace = trace.to_vec();
                cyclic_trace.push(name.to_string());
                return Err(MakhzanError::Resolution(DependencyResolutionError::single(DependencyResolutionFailure {
                    key: name.to_string(),
                    trace: cyclic_trace,
                    cause: FailureCause::Cyclic,
                })));
            }

            let mut next_trace = trace.to_vec();
            next_trace.push(name.to_string());
            let key = BindKey::named(name);

            if name == RESOLVER_KEY {
                if let Some(v) = self.scope.peek(&key) {
                    return Ok(v);
                }
            }

            let bind = self.lookup(name).ok_or_else(|| {
                MakhzanError::Resolution(DependencyResolutionError::single(DependencyResolutionFailure {
                    key: name.to_string(),
                    trace: next_trace.clone(),
                    cause: FailureCause::Missing,
                }))
            })?;

            self.scope.distributor().emit(ProvideEvent::request(next_trace.clone()));

            let node = bind.node().clone();
            let validator = bind.validator.clone();
            let resolver = self.clone();
            let trace_for_init = next_trace.clone();
            let key_for_validation = name.to_string();
            let value = self
                .scope
                .get_or_init(&key, move || {
                    let node = node.clone();
                    let validator = validator.clone();
                    let resolver = resolver.clone();
                    let trace = trace_for_init.clone();
                    let key_for_validation = key_for_validation.clone();
                    async move {
                        let produced = node.resolve(&resolver, &trace).await?;
                        if let Some(validator) = &validator {
                            validator(&produced).map_err(|diagnostic| {
                                MakhzanError::Validation { key: key_for_validation.clone(), diagnostic }
                            })?;
                        }
                        Ok(produced)
                    }
                    .boxed()
                })
                .await?;

            self.scope.distributor().emit(ProvideEvent::provide(next_trace));
            Ok(value)
        }
        .boxed()
    }
}

impl DynamicResolve for AsyncResolver {
    fn resolve_name<'a>(&'a self, name: &'a str, trace: &'a [String]) -> BoxFuture<'a, Result<Value>> {
        NodeContext::resolve_name(self, name, trace)
    }

    fn resolve_node<'a>(&'a self, node: &'a Arc<InjectedNode>, trace: &'a [String]) -> BoxFuture<'a, Result<Value>> {
        node.resolve(self, trace)
    }
}
