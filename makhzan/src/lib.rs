//! # Makhzan — Dependency Injection Container for Rust
//!
//! مخزن — "The Vault"
//!
//! An async, name-keyed dependency-injection container built around a
//! closed `Injected` expression algebra: bindings are collected into a
//! `Design`, a `Design` is turned into an `AsyncResolver`, and the resolver
//! evaluates an `Injected` expression into a concrete value, memoizing per
//! key and reporting missing/cyclic dependencies as a single structured
//! error before running any provider.
//!
//! # Quick Start
//! ```
//! use makhzan::prelude::*;
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
//!
//! # With `#[provides]`
//! ```ignore
//! use makhzan::prelude::*;
//!
//! #[makhzan::provides]
//! async fn greeting() -> String {
//!     "hello".to_string()
//! }
//!
//! #[makhzan::provides(name = "shout")]
//! async fn shout_it(greeting: String) -> String {
//!     format!("{}!", greeting.to_uppercase())
//! }
//!
//! # #[tokio::main]
//! # async fn main() {
//! let design = Design::from_registry(|_| true);
//! let resolver = design.to_resolver();
//! let shout: String = resolver.resolve_by_name("shout").await.unwrap();
//! assert_eq!(shout, "HELLO!");
//! # }
//! ```

pub use makhzan_container::*;
pub use makhzan_derive::provides;
pub use makhzan_support::rendering;

/// Everything a consumer of the container typically needs in scope.
pub mod prelude {
    pub use makhzan_container::{
        design, AsyncDict, AsyncResolver, Bind, BindKey, BindMetadata, DelegatedVar, Design, EventDistributor, EventKind,
        FailureCause, InMemoryAsyncDict, Injected, MakhzanError, ProvideEvent, ProvidedArgs, Result, Scope, Value,
    };
    pub use makhzan_derive::provides;
}

/// Exercises `#[provides]` end to end from a crate that (like any real
/// consumer reached through `makhzan::prelude`) depends on
/// `makhzan-container` directly, so the macro's generated
/// `::makhzan_container::...` paths actually resolve.
#[cfg(test)]
mod provides_macro_tests {
    use crate::prelude::*;

    #[provides]
    async fn greeting() -> String {
        "hello".to_string()
    }

    #[provides(name = "shout")]
    async fn shout_it(greeting: String) -> String {
        format!("{}!", greeting.to_uppercase())
    }

    #[tokio::test]
    async fn registered_bindings_resolve_through_the_design() {
        let design = Design::from_registry(|label| label == "greeting" || label == "shout");
        let resolver = design.to_resolver();
        let shout: String = resolver.resolve_by_name("shout").await.unwrap();
        assert_eq!(shout, "HELLO!");
    }

    #[tokio::test]
    async fn from_registry_filter_excludes_unmatched_labels() {
        let design = Design::from_registry(|label| label == "greeting");
        assert!(!design.contains(&BindKey::named("shout")));
    }
}
