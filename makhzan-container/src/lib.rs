//! Core container implementation for Makhzan DI: an async, name-keyed
//! dependency-injection algebra (`Injected`/`Design`) and the resolver that
//! evaluates it.
//!
//! ```
//! use makhzan_container::{Design, Injected};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let design = Design::new()
//!     .value("greeting", "hello".to_string())
//!     .provider("shout", ["greeting"], |args| async move {
//!         let greeting = args["greeting"].downcast_ref::<String>().unwrap();
//!         Ok(format!("{}!", greeting.to_uppercase()))
//!     });
//!
//! let resolver = design.to_resolver();
//! let shout: String = resolver.resolve_by_name("shout").await.unwrap();
//! assert_eq!(shout, "HELLO!");
//! # }
//! ```

pub mod bind;
pub mod cache;
pub mod design;
pub mod error;
pub mod events;
pub mod expr;
pub mod injected;
pub mod key;
pub mod registry;
pub mod resolver;
pub mod scope;

/// Re-exported so `#[makhzan::provides]`-generated code can reach
/// `inventory::submit!` through this crate's path without every downstream
/// crate declaring its own `inventory` dependency.
pub use inventory;

pub use bind::{Bind, BindMetadata, Validator};
pub use cache::{AsyncDict, InMemoryAsyncDict};
pub use design::{design, Design};
pub use error::{DependencyResolutionError, DependencyResolutionFailure, FailureCause, MakhzanError, Result};
pub use events::{EventDistributor, EventKind, ProvideEvent, SubscriptionId};
pub use expr::DelegatedVar;
pub use injected::{dict, list, mzip, tuple, Injected, Origin, PartialInjected, ProvidedArgs, Value, RESOLVER_KEY};
pub use key::BindKey;
pub use registry::RegisteredBinding;
pub use resolver::{AsyncResolver, DependencyOutcome, DependencyTree};
pub use scope::Scope;

/// End-to-end coverage of the resolver's cross-module behavior, wired
/// purely through the public `Design`/`AsyncResolver` surface rather than
/// any one module's internals.
#[cfg(test)]
mod scenario_tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use crate::cache::InMemoryAsyncDict;
    use crate::design::Design;
    use crate::injected::Injected;

    #[tokio::test]
    async fn pure_value_resolves_directly() {
        let design = Design::new().value("a", 1i32);
        let resolver = design.to_resolver();
        let a: i32 = resolver.resolve_by_name("a").await.unwrap();
        assert_eq!(a, 1);
    }

    #[tokio::test]
    async fn provider_resolves_its_declared_dependency() {
        let design = Design::new().value("a", 2i32).provider("b", ["a"], |args| async move {
            let a = *args["a"].downcast_ref::<i32>().unwrap();
            Ok(a + 10)
        });
        let resolver = design.to_resolver();
        let b: i32 = resolver.resolve_by_name("b").await.unwrap();
        assert_eq!(b, 12);
    }

    #[tokio::test]
    async fn diamond_shaped_dependency_runs_its_shared_leaf_once() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_for_c = counter.clone();
        let c = Injected::<u32>::bind("c", Vec::<String>::new(), move |_args| {
            let counter = counter_for_c.clone();
            async move { Ok(counter.fetch_add(1, Ordering::SeqCst) + 1) }
        });
        let design = Design::new()
            .bind("c", c.erase())
            .provider("x", ["c"], |args| async move { Ok(*args["c"].downcast_ref::<u32>().unwrap()) })
            .provider("y", ["c"], |args| async move { Ok(*args["c"].downcast_ref::<u32>().unwrap()) })
            .provider("z", ["x", "y"], |args| async move {
                let x = *args["x"].downcast_ref::<u32>().unwrap();
                let y = *args["y"].downcast_ref::<u32>().unwrap();
                Ok((x, y))
            });
        let resolver = design.to_resolver();
        let z: (u32, u32) = resolver.resolve_by_name("z").await.unwrap();
        assert_eq!(z, (1, 1));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_dependency_reports_key_and_trace() {
        let design = Design::new().provider("b", ["a"], |args| async move {
            Ok(*args["a"].downcast_ref::<i32>().unwrap())
        });
        let resolver = design.to_resolver();
        let err = resolver.resolve_by_name::<i32>("b").await.unwrap_err();
        let msg = format!("{err}");
        assert!(msg.contains("Missing Dependencies"));
        assert!(msg.contains("b => a"));
    }

    #[tokio::test]
    async fn concurrent_resolutions_share_one_cache_build() {
        let cache = InMemoryAsyncDict::shared();
        let counter = Arc::new(AtomicU32::new(0));
        let counter_for_program = counter.clone();
        let program = Injected::<u32>::bind("program", Vec::<String>::new(), move |_args| {
            let counter = counter_for_program.clone();
            async move { Ok(counter.fetch_add(1, Ordering::SeqCst) + 1) }
        });
        let cached = Injected::<u32>::cache(
            Injected::pure(cache as Arc<dyn crate::cache::AsyncDict>),
            program,
            vec![(
                Injected::pure("key-ingredient".to_string()).erase(),
                Arc::new(|v: &crate::injected::Value| v.downcast_ref::<String>().cloned().unwrap_or_default()) as _,
            )],
        );
        let design = Design::new().bind("prog", cached.erase());
        let resolver = design.to_resolver();

        let mut handles = Vec::new();
        for _ in 0..10 {
            let resolver = resolver.clone();
            handles.push(tokio::spawn(async move { resolver.resolve_by_name::<u32>("prog").await.unwrap() }));
        }
        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }
        assert!(results.iter().all(|v| *v == results[0]));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn child_override_shadows_without_mutating_parent() {
        let parent_design = Design::new().value("a", 1i32).provider("b", ["a"], |args| async move {
            Ok(*args["a"].downcast_ref::<i32>().unwrap() * 10)
        });
        let parent = parent_design.to_resolver();
        let child = parent.child(Design::new().value("a", 2i32));

        let b_parent: i32 = parent.resolve_by_name("b").await.unwrap();
        let b_child: i32 = child.resolve_by_name("b").await.unwrap();
        let b_parent_again: i32 = parent.resolve_by_name("b").await.unwrap();

        assert_eq!(b_parent, 10);
        assert_eq!(b_child, 20);
        assert_eq!(b_parent_again, 10);
    }
}
