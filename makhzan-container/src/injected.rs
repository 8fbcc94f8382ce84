//! The `Injected` algebra: expression trees describing how to produce a
//! value from named dependencies, closed under mapping, zipping, dict/list
//! construction, partial application, dynamic dispatch, and caching.
//!
//! Python's `Injected[T]` is a dynamically-typed tagged union. The Rust
//! realization keeps the same closed-enum shape but splits it in two:
//! [`InjectedNode`] is the internal, non-generic algebra (so every variant
//! can be matched exhaustively in one place), and [`Injected<T>`] is a thin
//! `PhantomData`-tagged facade over `Arc<InjectedNode>` that only exists to
//! carry a type hint at construction and resolution call sites. Produced
//! values are themselves type-erased (`Arc<dyn Any + Send + Sync>`) and are
//! downcast back to `T` at the edges — the same type-erasure trick the
//! container's registry already used for its factories.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::panic::Location;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::error::{DependencyResolutionError, DependencyResolutionFailure, FailureCause, MakhzanError, ProviderResult, Result};
use crate::expr::{DelegatedVar, Expr};

/// A type-erased, resolved value.
pub type Value = Arc<dyn Any + Send + Sync>;

/// Resolved values for a node's declared dependencies, keyed by name.
pub type ProvidedArgs = HashMap<String, Value>;

/// An async provider: given resolved kwargs, produces a value or raises any
/// error. The resolver wraps a raised error into a structured
/// `DependencyResolutionError` (§7's `ProviderFailure`) at the call site,
/// where the failing node's trace is known; the provider itself never has
/// to construct one.
pub type ProviderFn = Arc<dyn Fn(ProvidedArgs) -> BoxFuture<'static, ProviderResult<Value>> + Send + Sync>;

/// Reserved dependency name bound to a handle on the running resolver.
/// Pre-bound in every scope per the ownership design note: branches and
/// caches that need dynamic resolution receive this as an ordinary
/// dependency rather than through a hidden global.
pub const RESOLVER_KEY: &str = "__resolver__";

fn erase<T: Send + Sync + 'static>(value: T) -> Value {
    Arc::new(value)
}

/// Raised when a resolved `Value` doesn't downcast to the type a combinator
/// expected of it — a bug in how the expression was built, not a provider
/// failure, but reported through the same `FailureCause::Provider` slot
/// since there is no dedicated error kind for it in §7.
#[derive(Debug)]
struct TypeMismatch {
    expected: &'static str,
}

impl fmt::Display for TypeMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "resolved value is not a `{}`", self.expected)
    }
}

impl std::error::Error for TypeMismatch {}

/// Scope memoization means a `Value` is routinely shared (the cache holds
/// one `Arc`, a consumer holds another), so reading a typed value back out
/// always goes through `downcast_ref` + `clone` rather than consuming the
/// `Arc` — hence the `Clone` bound on every combinator that needs to look
/// inside a resolved value.
pub(crate) fn clone_downcast<T: Clone + Send + Sync + 'static>(value: &Value, key: &str) -> Result<T> {
    value.downcast_ref::<T>().cloned().ok_or_else(|| {
        MakhzanError::Resolution(DependencyResolutionError::single(DependencyResolutionFailure {
            key: key.to_string(),
            trace: vec![key.to_string()],
            cause: FailureCause::Provider(Box::new(TypeMismatch { expected: std::any::type_name::<T>() })),
        }))
    })
}

/// Where a binding was constructed, for diagnostics.
#[derive(Debug, Clone, Copy)]
pub struct Origin {
    pub file: &'static str,
    pub line: u32,
}

impl Origin {
    #[track_caller]
    pub fn here() -> Self {
        let loc = Location::caller();
        Origin { file: loc.file(), line: loc.line() }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// A handle the resolver hands to dynamic-dispatch nodes (`Conditional`,
/// `Cache`, `Injected::dynamic`) so they can resolve further sub-nodes or
/// named keys against the same scope, extending the trace as they go.
pub trait DynamicResolve: Send + Sync {
    fn resolve_name<'a>(&'a self, name: &'a str, trace: &'a [String]) -> BoxFuture<'a, Result<Value>>;
    fn resolve_node<'a>(&'a self, node: &'a Arc<InjectedNode>, trace: &'a [String]) -> BoxFuture<'a, Result<Value>>;
}

pub type ResolverHandle = Arc<dyn DynamicResolve>;

/// Context a node needs in order to resolve itself: a way to look up a
/// named key (memoized by the scope) and a way to recurse into an arbitrary
/// child node. [`crate::resolver::AsyncResolver`] is the real implementation;
/// [`standalone_ctx`] provides a trivial one for `ByName`-free compositions.
pub trait NodeContext: Send + Sync {
    fn resolve_name<'a>(&'a self, name: &'a str, trace: &'a [String]) -> BoxFuture<'a, Result<Value>>;
}

struct StandaloneCtx;

impl NodeContext for StandaloneCtx {
    fn resolve_name<'a>(&'a self, name: &'a str, trace: &'a [String]) -> BoxFuture<'a, Result<Value>> {
        let mut trace = trace.to_vec();
        trace.push(name.to_string());
        async move {
            Err(MakhzanError::Resolution(DependencyResolutionError::single(DependencyResolutionFailure {
                key: name.to_string(),
                trace,
                cause: FailureCause::Missing,
            })))
        }
        .boxed()
    }
}

/// Internal, type-erased node of the `Injected` algebra.
#[derive(Clone)]
pub enum InjectedNode {
    Pure(Value),
    ByName(String),
    FromFunction {
        kwargs: Vec<(String, Arc<InjectedNode>)>,
        dynamic_deps: HashSet<String>,
        provider: ProviderFn,
        label: String,
        origin: Origin,
    },
    Mapped {
        src: Arc<InjectedNode>,
        map: Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value>> + Send + Sync>,
    },
    MZipped {
        srcs: Vec<Arc<InjectedNode>>,
    },
    Dict {
        entries: Vec<(String, Arc<InjectedNode>)>,
    },
    Partial {
        targets: Vec<(String, Arc<InjectedNode>)>,
        call: Arc<dyn Fn(Vec<Value>, Vec<Value>) -> BoxFuture<'static, Result<Value>> + Send + Sync>,
        signature_name: String,
        /// Number of positional arguments `call_impl` expects at call time,
        /// beyond the DI-bound `targets` — checked by `PartialInjected::call`
        /// before building the invocation node (§4.5 signature mismatch).
        arity: usize,
        origin: Origin,
    },
    WithDynamicDeps {
        src: Arc<InjectedNode>,
        extra: HashSet<String>,
    },
    Conditional {
        cond: Arc<InjectedNode>,
        if_true: Arc<InjectedNode>,
        if_false: Arc<InjectedNode>,
    },
    Cache {
        store: Arc<InjectedNode>,
        program: Arc<InjectedNode>,
        program_deps: Vec<(Arc<InjectedNode>, Arc<dyn Fn(&Value) -> String + Send + Sync>)>,
    },
    Evaled {
        value: Arc<InjectedNode>,
        ast: Expr,
    },
}

impl fmt::Debug for InjectedNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InjectedNode::Pure(_) => write!(f, "Pure(..)"),
            InjectedNode::ByName(n) => write!(f, "ByName({n:?})"),
            InjectedNode::FromFunction { label, kwargs, .. } => {
                write!(f, "FromFunction({label}, deps={:?})", kwargs.iter().map(|(k, _)| k).collect::<Vec<_>>())
            }
            InjectedNode::Mapped { .. } => write!(f, "Mapped(..)"),
            InjectedNode::MZipped { srcs } => write!(f, "MZipped(n={})", srcs.len()),
            InjectedNode::Dict { entries } => write!(f, "Dict(keys={:?})", entries.iter().map(|(k, _)| k).collect::<Vec<_>>()),
            InjectedNode::Partial { signature_name, .. } => write!(f, "Partial({signature_name})"),
            InjectedNode::WithDynamicDeps { extra, .. } => write!(f, "WithDynamicDeps(extra={extra:?})"),
            InjectedNode::Conditional { .. } => write!(f, "Conditional(..)"),
            InjectedNode::Cache { .. } => write!(f, "Cache(..)"),
            InjectedNode::Evaled { ast, .. } => write!(f, "Evaled({ast:?})"),
        }
    }
}

impl InjectedNode {
    /// Statically known required names — the set the resolver's analysis
    /// phase walks to build the resolution schedule.
    pub fn dependencies(&self) -> HashSet<String> {
        match self {
            InjectedNode::Pure(_) => HashSet::new(),
            InjectedNode::ByName(n) => {
                let mut s = HashSet::new();
                s.insert(n.clone());
                s
            }
            InjectedNode::FromFunction { kwargs, .. } => kwargs.iter().flat_map(|(_, v)| v.dependencies()).collect(),
            InjectedNode::Mapped { src, .. } => src.dependencies(),
            InjectedNode::MZipped { srcs } => srcs.iter().flat_map(|s| s.dependencies()).collect(),
            InjectedNode::Dict { entries } => entries.iter().flat_map(|(_, v)| v.dependencies()).collect(),
            InjectedNode::Partial { targets, .. } => targets.iter().flat_map(|(_, v)| v.dependencies()).collect(),
            InjectedNode::WithDynamicDeps { src, .. } => src.dependencies(),
            InjectedNode::Conditional { cond, .. } => {
                let mut deps = cond.dependencies();
                deps.insert(RESOLVER_KEY.to_string());
                deps
            }
            InjectedNode::Cache { store, program_deps, .. } => {
                let mut deps = store.dependencies();
                deps.insert(RESOLVER_KEY.to_string());
                for (dep, _) in program_deps {
                    deps.extend(dep.dependencies());
                }
                deps
            }
            InjectedNode::Evaled { value, .. } => value.dependencies(),
        }
    }

    /// Additional names resolved lazily (conditional branches, caches'
    /// guarded program, dynamic lookups) — advertised for analysis but not
    /// eagerly scheduled.
    pub fn dynamic_dependencies(&self) -> HashSet<String> {
        match self {
            InjectedNode::Pure(_) | InjectedNode::ByName(_) => HashSet::new(),
            InjectedNode::FromFunction { kwargs, dynamic_deps, .. } => {
                let mut d: HashSet<String> = kwargs.iter().flat_map(|(_, v)| v.dynamic_dependencies()).collect();
                d.extend(dynamic_deps.iter().cloned());
                d
            }
            InjectedNode::Mapped { src, .. } => src.dynamic_dependencies(),
            InjectedNode::MZipped { srcs } => srcs.iter().flat_map(|s| s.dynamic_dependencies()).collect(),
            InjectedNode::Dict { entries } => entries.iter().flat_map(|(_, v)| v.dynamic_dependencies()).collect(),
            InjectedNode::Partial { targets, .. } => targets.iter().flat_map(|(_, v)| v.dynamic_dependencies()).collect(),
            InjectedNode::WithDynamicDeps { src, extra } => {
                let mut d = src.dynamic_dependencies();
                d.extend(extra.iter().cloned());
                d
            }
            InjectedNode::Conditional { cond, if_true, if_false } => {
                let mut d = cond.dynamic_dependencies();
                d.extend(if_true.complete_dependencies());
                d.extend(if_false.complete_dependencies());
                d
            }
            InjectedNode::Cache { store, program, .. } => {
                let mut d = store.dynamic_dependencies();
                d.extend(program.complete_dependencies());
                d
            }
            InjectedNode::Evaled { value, .. } => value.dynamic_dependencies(),
        }
    }

    /// Transitive closure of static and dynamic dependencies.
    pub fn complete_dependencies(&self) -> HashSet<String> {
        let mut d = self.dependencies();
        d.extend(self.dynamic_dependencies());
        d
    }

    /// Resolves this node to a value given a context able to look up named
    /// keys and recurse into dynamic sub-nodes.
    pub fn resolve<'a>(self: &'a Arc<InjectedNode>, ctx: &'a dyn NodeContext, trace: &'a [String]) -> BoxFuture<'a, Result<Value>> {
        match self.as_ref() {
            InjectedNode::Pure(v) => {
                let v = v.clone();
                async move { Ok(v) }.boxed()
            }
            InjectedNode::ByName(name) => ctx.resolve_name(name, trace),
            InjectedNode::FromFunction { kwargs, provider, label, .. } => {
                let provider = provider.clone();
                let label = label.clone();
                async move {
                    let mut args = ProvidedArgs::new();
                    for (name, node) in kwargs {
                        let value = node.resolve(ctx, trace).await?;
                        args.insert(name.clone(), value);
                    }
                    provider(args).await.map_err(|source| {
                        // `trace` already ends with this node's own key (pushed by the
                        // caller that looked it up by name), so it doesn't need extending.
                        let failure_trace = if trace.last().is_some_and(|last| last == &label) {
                            trace.to_vec()
                        } else {
                            let mut t = trace.to_vec();
                            t.push(label.clone());
                            t
                        };
                        MakhzanError::Resolution(DependencyResolutionError::single(DependencyResolutionFailure {
                            key: label.clone(),
                            trace: failure_trace,
                            cause: FailureCause::Provider(source),
                        }))
                    })
                }
                .boxed()
            }
            InjectedNode::Mapped { src, map } => {
                let map = map.clone();
                async move {
                    let v = src.resolve(ctx, trace).await?;
                    map(v).await
                }
                .boxed()
            }
            InjectedNode::MZipped { srcs } => async move {
                let mut values = Vec::with_capacity(srcs.len());
                for s in srcs {
                    values.push(s.resolve(ctx, trace).await?);
                }
                Ok(erase(values))
            }
            .boxed(),
            InjectedNode::Dict { entries } => async move {
                let mut map = HashMap::with_capacity(entries.len());
                for (k, v) in entries {
                    map.insert(k.clone(), v.resolve(ctx, trace).await?);
                }
                Ok(erase(map))
            }
            .boxed(),
            InjectedNode::Partial { targets, call, .. } => {
                let call = call.clone();
                async move {
                    let mut target_values = Vec::with_capacity(targets.len());
                    for (_, node) in targets {
                        target_values.push(node.resolve(ctx, trace).await?);
                    }
                    let handle: Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, Result<Value>> + Send + Sync> =
                        Arc::new(move |call_args: Vec<Value>| call(target_values.clone(), call_args));
                    Ok(erase(handle))
                }
                .boxed()
            }
            InjectedNode::WithDynamicDeps { src, .. } => src.resolve(ctx, trace),
            InjectedNode::Conditional { cond, if_true, if_false } => async move {
                let c = cond.resolve(ctx, trace).await?;
                let flag = *c.downcast_ref::<bool>().ok_or_else(|| {
                    MakhzanError::Resolution(DependencyResolutionError::single(DependencyResolutionFailure {
                        key: "<conditional>".to_string(),
                        trace: trace.to_vec(),
                        cause: FailureCause::Provider(Box::new(TypeMismatch { expected: "bool" })),
                    }))
                })?;
                let chosen = if flag { if_true } else { if_false };
                let handle_value = ctx.resolve_name(RESOLVER_KEY, trace).await?;
                let handle = handle_value
                    .downcast_ref::<ResolverHandle>()
                    .expect("resolver handle pre-bound in every scope")
                    .clone();
                handle.resolve_node(chosen, trace).await
            }
            .boxed(),
            InjectedNode::Cache { store, program, program_deps } => async move {
                let store_value = store.resolve(ctx, trace).await?;
                let mut ingredients = Vec::with_capacity(program_deps.len());
                for (dep, format) in program_deps {
                    let v = dep.resolve(ctx, trace).await?;
                    ingredients.push(format(&v));
                }
                let handle_value = ctx.resolve_name(RESOLVER_KEY, trace).await?;
                let handle = handle_value
                    .downcast_ref::<ResolverHandle>()
                    .expect("resolver handle pre-bound in every scope")
                    .clone();
                crate::cache::resolve_cached(store_value, ingredients, program.clone(), handle, trace).await
            }
            .boxed(),
            InjectedNode::Evaled { value, .. } => value.resolve(ctx, trace),
        }
    }
}

/// A facade over [`InjectedNode`] carrying a type hint for its resolution
/// site. Cloning is cheap (an `Arc` bump); the node itself is immutable.
pub struct Injected<T> {
    node: Arc<InjectedNode>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Injected<T> {
    fn clone(&self) -> Self {
        Injected { node: self.node.clone(), _marker: PhantomData }
    }
}

impl<T> fmt::Debug for Injected<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Injected({:?})", self.node)
    }
}

impl<T: Send + Sync + 'static> Injected<T> {
    pub(crate) fn from_node(node: Arc<InjectedNode>) -> Self {
        Injected { node, _marker: PhantomData }
    }

    pub fn node(&self) -> &Arc<InjectedNode> {
        &self.node
    }

    /// Drops the type hint; every combinator past this point works over
    /// the erased `Value`.
    pub fn erase(self) -> Injected<Value> {
        Injected::from_node(self.node)
    }

    pub fn dependencies(&self) -> HashSet<String> {
        self.node.dependencies()
    }

    pub fn dynamic_dependencies(&self) -> HashSet<String> {
        self.node.dynamic_dependencies()
    }

    pub fn complete_dependencies(&self) -> HashSet<String> {
        self.node.complete_dependencies()
    }

    /// A constant value; no dependencies.
    pub fn pure(value: T) -> Self {
        Injected::from_node(Arc::new(InjectedNode::Pure(erase(value))))
    }

    /// Resolves to the value bound at `name` in the effective design.
    pub fn by_name(name: impl Into<String>) -> Self {
        Injected::from_node(Arc::new(InjectedNode::ByName(name.into())))
    }

    /// Binds an async function whose keyword arguments are each implicitly
    /// `ByName(dep)` for the given dependency names, in order.
    #[track_caller]
    pub fn bind<F, Fut>(label: impl Into<String>, deps: impl IntoIterator<Item = impl Into<String>>, f: F) -> Self
    where
        F: Fn(ProvidedArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ProviderResult<T>> + Send + 'static,
    {
        let kwargs = deps
            .into_iter()
            .map(|d| {
                let name = d.into();
                (name.clone(), Arc::new(InjectedNode::ByName(name)) as Arc<InjectedNode>)
            })
            .collect();
        let provider: ProviderFn = Arc::new(move |args| {
            let fut = f(args);
            async move { fut.await.map(erase) }.boxed()
        });
        Injected::from_node(Arc::new(InjectedNode::FromFunction {
            kwargs,
            dynamic_deps: HashSet::new(),
            provider,
            label: label.into(),
            origin: Origin::here(),
        }))
    }

    /// General form of [`Injected::bind`]: each keyword argument is an
    /// arbitrary `Injected` sub-expression, not just a bare name reference,
    /// and extra dynamic dependencies may be declared explicitly.
    #[track_caller]
    pub fn bind_with<F, Fut>(
        label: impl Into<String>,
        kwargs: Vec<(impl Into<String>, Injected<Value>)>,
        dynamic_deps: impl IntoIterator<Item = impl Into<String>>,
        f: F,
    ) -> Self
    where
        F: Fn(ProvidedArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ProviderResult<T>> + Send + 'static,
    {
        let kwargs = kwargs.into_iter().map(|(k, v)| (k.into(), v.node)).collect();
        let provider: ProviderFn = Arc::new(move |args| {
            let fut = f(args);
            async move { fut.await.map(erase) }.boxed()
        });
        Injected::from_node(Arc::new(InjectedNode::FromFunction {
            kwargs,
            dynamic_deps: dynamic_deps.into_iter().map(Into::into).collect(),
            provider,
            label: label.into(),
            origin: Origin::here(),
        }))
    }

    /// Applies a synchronous function to the resolved value.
    pub fn map<U, F>(self, g: F) -> Injected<U>
    where
        T: Clone,
        U: Send + Sync + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        let map: Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value>> + Send + Sync> = Arc::new(move |v: Value| {
            let input = clone_downcast::<T>(&v, "<mapped>");
            let out = input.map(&g);
            async move { out.map(erase) }.boxed()
        });
        Injected::from_node(Arc::new(InjectedNode::Mapped { src: self.node, map }))
    }

    /// Applies an asynchronous function to the resolved value.
    pub fn map_async<U, F, Fut>(self, g: F) -> Injected<U>
    where
        T: Clone,
        U: Send + Sync + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = U> + Send + 'static,
    {
        let map: Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value>> + Send + Sync> = Arc::new(move |v: Value| {
            let input = clone_downcast::<T>(&v, "<mapped>");
            async move { Ok(erase(g(input?).await)) }.boxed()
        });
        Injected::from_node(Arc::new(InjectedNode::Mapped { src: self.node, map }))
    }

    /// Zips with another `Injected`, resolving both concurrently.
    pub fn zip<U>(self, other: Injected<U>) -> Injected<(T, U)>
    where
        T: Clone,
        U: Clone + Send + Sync + 'static,
    {
        let node = Arc::new(InjectedNode::MZipped { srcs: vec![self.node, other.node] });
        let map: Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value>> + Send + Sync> = Arc::new(move |v: Value| {
            let values = v.downcast_ref::<Vec<Value>>().expect("mzipped tuple");
            let a = clone_downcast::<T>(&values[0], "<zip.0>");
            let b = clone_downcast::<U>(&values[1], "<zip.1>");
            async move { Ok(erase((a?, b?))) }.boxed()
        });
        Injected::from_node(Arc::new(InjectedNode::Mapped { src: node, map }))
    }

    /// Lifts this value into a [`crate::expr::DelegatedVar`] proxy for
    /// deferred attribute/item/call/operator composition.
    pub fn proxy(self) -> DelegatedVar<T> {
        DelegatedVar::from_node(self.node)
    }

    /// Advertises extra dynamic dependency names without changing the
    /// produced value.
    pub fn add_dynamic_dependencies(self, names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Injected::from_node(Arc::new(InjectedNode::WithDynamicDeps {
            src: self.node,
            extra: names.into_iter().map(Into::into).collect(),
        }))
    }

    /// Resolves `name` only at execution time, through the resolver handle;
    /// `name` is a dynamic, not static, dependency.
    pub fn dynamic(name: impl Into<String>) -> Self {
        let name = name.into();
        let dyn_name = name.clone();
        let provider: ProviderFn = Arc::new(move |args| {
            let handle = args
                .get(RESOLVER_KEY)
                .and_then(|v| v.downcast_ref::<ResolverHandle>())
                .expect("resolver handle pre-bound in every scope")
                .clone();
            let name = dyn_name.clone();
            async move { handle.resolve_name(&name, &[]).await.map_err(|e| Box::new(e) as crate::error::ProviderError) }.boxed()
        });
        Injected::from_node(Arc::new(InjectedNode::FromFunction {
            kwargs: vec![(RESOLVER_KEY.to_string(), Arc::new(InjectedNode::ByName(RESOLVER_KEY.to_string())))],
            dynamic_deps: [name].into_iter().collect(),
            provider,
            label: "dynamic".to_string(),
            origin: Origin::here(),
        }))
    }

    /// Dispatches to `if_true` or `if_false` depending on `cond`, through the
    /// resolver so only the chosen branch is ever executed.
    pub fn conditional(cond: Injected<bool>, if_true: Injected<T>, if_false: Injected<T>) -> Self {
        Injected::from_node(Arc::new(InjectedNode::Conditional {
            cond: cond.node,
            if_true: if_true.node,
            if_false: if_false.node,
        }))
    }

    /// Wraps `program` in a cache combinator backed by `store`: on
    /// resolution, `program_dependencies` are resolved concurrently into the
    /// fingerprint's key ingredients (each paired with a formatter turning
    /// its resolved value into the ingredient's canonical string), `store`
    /// is consulted by that fingerprint, and `program` only runs on a miss.
    /// `store` itself is `Injected` so it may come from the design like any
    /// other dependency (e.g. a binding that hands back a shared
    /// `Arc<dyn AsyncDict>`).
    pub fn cache(
        store: Injected<Arc<dyn crate::cache::AsyncDict>>,
        program: Injected<T>,
        program_dependencies: Vec<(Injected<Value>, Arc<dyn Fn(&Value) -> String + Send + Sync>)>,
    ) -> Self {
        let program_deps = program_dependencies.into_iter().map(|(dep, format)| (dep.node, format)).collect();
        Injected::from_node(crate::cache::cache_node(store.node, program.node, program_deps))
    }

    /// Alias for [`Injected::cache`]; kept as a distinct name for call
    /// sites that want to read as "this store is always awaited", since
    /// this crate's `AsyncDict` contract is async-only and both
    /// constructors build the same node.
    pub fn async_cache(
        store: Injected<Arc<dyn crate::cache::AsyncDict>>,
        program: Injected<T>,
        program_dependencies: Vec<(Injected<Value>, Arc<dyn Fn(&Value) -> String + Send + Sync>)>,
    ) -> Self {
        Injected::cache(store, program, program_dependencies)
    }

    /// Resolves using a trivial context that fails on any `ByName` lookup;
    /// only useful for compositions built entirely from `Pure`/`Mapped`/
    /// `MZipped` (e.g. proxy expressions over already-pure leaves).
    pub fn resolve_standalone(&self) -> BoxFuture<'_, Result<T>>
    where
        T: Clone,
    {
        let node = self.node.clone();
        async move {
            let ctx = StandaloneCtx;
            let value = node.resolve(&ctx, &[]).await?;
            clone_downcast::<T>(&value, "<standalone>")
        }
        .boxed()
    }

    /// Synchronously produces the resolved value, blocking the current
    /// thread on the underlying async resolution. Interop-only: for use from
    /// non-async call sites that cannot await `resolve_standalone`. Panics if
    /// called from within a single-threaded async runtime that forbids
    /// nested blocking (e.g. `tokio`'s current-thread flavor).
    pub fn desync(&self) -> Result<T>
    where
        T: Clone,
    {
        futures::executor::block_on(self.resolve_standalone())
    }
}

/// Builds a `Value` tuple of arbitrary arity by zipping erased sources.
pub fn mzip(srcs: Vec<Injected<Value>>) -> Injected<Vec<Value>> {
    let nodes = srcs.into_iter().map(|s| s.node).collect();
    Injected::from_node(Arc::new(InjectedNode::MZipped { srcs: nodes }))
}

/// Builds a name-keyed mapping by resolving each entry concurrently.
pub fn dict(entries: Vec<(impl Into<String>, Injected<Value>)>) -> Injected<HashMap<String, Value>> {
    let entries = entries.into_iter().map(|(k, v)| (k.into(), v.node)).collect();
    Injected::from_node(Arc::new(InjectedNode::Dict { entries }))
}

/// `Injected.tuple(*xs)`: resolves `xs` concurrently into an ordered tuple.
/// Rust has no variable-arity tuple type to target, so — like `mzip` — this
/// yields the same `Vec<Value>` gather; kept as its own named combinator
/// because call sites that mean "a fixed positional tuple" read differently
/// from ones that mean "a zip of two arbitrary sources" (`mzip`/`zip`).
pub fn tuple(xs: Vec<Injected<Value>>) -> Injected<Vec<Value>> {
    mzip(xs)
}

/// `Injected.list(*xs)`: resolves `xs` concurrently into an ordered list.
/// Same representation as [`tuple`]/[`mzip`]; the distinct name matches the
/// list-vs-tuple construction rule the algebra exposes (§4.2).
pub fn list(xs: Vec<Injected<Value>>) -> Injected<Vec<Value>> {
    mzip(xs)
}

/// A partially applied async function: a subset of parameters are bound to
/// `Injected` sources, the rest are supplied when [`PartialInjected::call`]
/// is invoked from an expression context.
pub struct PartialInjected {
    node: Arc<InjectedNode>,
    signature_name: String,
    origin: Origin,
    arity: usize,
}

impl PartialInjected {
    /// `targets` are the DI-bound parameters (resolved before `call_impl`
    /// runs); `call_impl` receives the resolved targets (in the given
    /// order) followed by the caller-supplied arguments. `arity` is the
    /// number of positional arguments `call_impl` expects at call time —
    /// [`PartialInjected::call`] checks it before ever invoking `call_impl`.
    #[track_caller]
    pub fn new<F, Fut>(
        signature_name: impl Into<String>,
        targets: Vec<(impl Into<String>, Injected<Value>)>,
        arity: usize,
        call_impl: F,
    ) -> Self
    where
        F: Fn(Vec<Value>, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let signature_name = signature_name.into();
        let origin = Origin::here();
        let targets = targets.into_iter().map(|(k, v)| (k.into(), v.node)).collect();
        let call: Arc<dyn Fn(Vec<Value>, Vec<Value>) -> BoxFuture<'static, Result<Value>> + Send + Sync> =
            Arc::new(move |t, a| call_impl(t, a).boxed());
        PartialInjected {
            node: Arc::new(InjectedNode::Partial { targets, call, signature_name: signature_name.clone(), arity, origin }),
            signature_name,
            origin,
            arity,
        }
    }

    pub fn injected(&self) -> Injected<Value> {
        Injected::from_node(self.node.clone())
    }

    /// Calls the partial inside an expression context: `args` are resolved
    /// concurrently with the bound targets, then `call_impl` runs with both.
    ///
    /// If `args.len()` doesn't match the `arity` this partial was built
    /// with, `call_impl` never runs: the returned `Injected` instead always
    /// resolves to a `MakhzanError::SignatureMismatch` carrying the
    /// function's name and definition site (§4.5, §7).
    pub fn call(&self, args: Vec<Injected<Value>>) -> Injected<Value> {
        if args.len() != self.arity {
            let function = self.signature_name.clone();
            let location = self.origin.to_string();
            let message = format!("expected {} positional argument(s), got {}", self.arity, args.len());
            let src = Arc::new(InjectedNode::Pure(erase(())));
            let map: Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value>> + Send + Sync> = Arc::new(move |_: Value| {
                let function = function.clone();
                let location = location.clone();
                let message = message.clone();
                async move { Err(MakhzanError::SignatureMismatch { function, location, message }) }.boxed()
            });
            return Injected::from_node(Arc::new(InjectedNode::Mapped { src, map }));
        }

        let mut srcs = vec![self.node.clone()];
        srcs.extend(args.into_iter().map(|a| a.node));
        let gathered = Arc::new(InjectedNode::MZipped { srcs });
        let map: Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value>> + Send + Sync> = Arc::new(move |v: Value| {
            let values = v.downcast_ref::<Vec<Value>>().expect("mzipped tuple").clone();
            let handle = values[0]
                .downcast_ref::<Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, Result<Value>> + Send + Sync>>()
                .expect("Partial always resolves to a callable handle")
                .clone();
            let call_args = values[1..].to_vec();
            async move { handle(call_args).await }.boxed()
        });
        Injected::from_node(Arc::new(InjectedNode::Mapped { src: gathered, map }))
    }
}

impl Injected<Value> {
    /// `Injected.partial(f, **targets)`: binds a subset of `f`'s parameters
    /// to DI sources, leaving `arity` positional arguments to be supplied at
    /// call time via [`PartialInjected::call`].
    #[track_caller]
    pub fn partial<F, Fut>(
        signature_name: impl Into<String>,
        targets: Vec<(impl Into<String>, Injected<Value>)>,
        arity: usize,
        call_impl: F,
    ) -> PartialInjected
    where
        F: Fn(Vec<Value>, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        PartialInjected::new(signature_name, targets, arity, call_impl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::design::Design;

    #[tokio::test]
    async fn pure_has_no_dependencies() {
        let i = Injected::pure(1);
        assert!(i.dependencies().is_empty());
    }

    #[tokio::test]
    async fn by_name_depends_on_itself() {
        let i: Injected<i32> = Injected::by_name("a");
        assert_eq!(i.dependencies(), ["a".to_string()].into_iter().collect());
    }

    #[tokio::test]
    async fn map_composes_under_resolution() {
        let design = Design::new();
        let resolver = design.to_resolver();
        let i = Injected::pure(1).map(|v| v + 1).map(|v| v * 10);
        let value: i32 = resolver.resolve(i).await.unwrap();
        assert_eq!(value, 20);
    }

    #[tokio::test]
    async fn zip_resolves_both_sides() {
        let design = Design::new();
        let resolver = design.to_resolver();
        let i = Injected::pure(1).zip(Injected::pure("x"));
        let value: (i32, &'static str) = resolver.resolve(i).await.unwrap();
        assert_eq!(value, (1, "x"));
    }

    #[tokio::test]
    async fn conditional_only_runs_chosen_branch() {
        let design = Design::new();
        let resolver = design.to_resolver();
        let counter_true = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let counter_false = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let ct = counter_true.clone();
        let cf = counter_false.clone();
        let if_true = Injected::bind::<_, _>("t", Vec::<String>::new(), move |_| {
            let ct = ct.clone();
            async move {
                ct.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok(1)
            }
        });
        let if_false = Injected::bind::<_, _>("f", Vec::<String>::new(), move |_| {
            let cf = cf.clone();
            async move {
                cf.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok(0)
            }
        });
        let cond = Injected::pure(true);
        let i = Injected::conditional(cond, if_true, if_false);
        let value: i32 = resolver.resolve(i).await.unwrap();
        assert_eq!(value, 1);
        assert_eq!(counter_true.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(counter_false.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[derive(Debug)]
    struct Boom;

    impl fmt::Display for Boom {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "boom")
        }
    }

    impl std::error::Error for Boom {}

    #[tokio::test]
    async fn a_raising_provider_is_reported_as_a_provider_failure_with_trace() {
        let design = Design::new()
            .bind(
                "broken",
                Injected::<()>::bind("broken", Vec::<String>::new(), |_| async {
                    Err(Box::new(Boom) as crate::error::ProviderError)
                })
                .erase(),
            )
            .bind("needs_it", Injected::by_name("broken").erase());
        let resolver = design.to_resolver();
        let err = resolver.resolve_by_name::<Value>("needs_it").await.unwrap_err();
        let msg = format!("{err}");
        assert!(msg.contains("Provider Failures"), "{msg}");
        assert!(msg.contains("boom"), "{msg}");
        assert!(msg.contains("needs_it => broken"), "{msg}");
        assert!(!msg.contains("broken => broken"), "{msg}");
    }
}
