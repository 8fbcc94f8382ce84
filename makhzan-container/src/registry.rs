//! The implicit, process-wide binding registry.
//!
//! `pinjected`'s `@instance`/`@injected` decorators quietly append to a
//! module-level list the moment Python imports the decorated function; any
//! `Design` can then silently pick up whatever has accumulated. Makhzan
//! keeps the collection mechanism (process-wide, populated by a macro) but
//! makes *reading* it an explicit opt-in: nothing is added to a
//! [`Design`](crate::design::Design) unless code calls
//! [`Design::from_registry`](crate::design::Design::from_registry).
//!
//! [`makhzan-macros`]'s `#[provides]` attribute submits one
//! [`RegisteredBinding`] per annotated item via `inventory::submit!`.

use crate::injected::{Injected, Value};

/// One entry submitted by `#[makhzan::provides]`.
///
/// `build` is a plain function pointer (not a closure) because
/// `inventory::submit!` items must be constructible in a `const` context.
pub struct RegisteredBinding {
    /// Fully qualified name the binding was declared under, used both as
    /// its default [`BindKey`](crate::key::BindKey) name and as the input to
    /// `Design::from_registry`'s filter.
    pub label: &'static str,
    pub build: fn() -> Injected<Value>,
}

inventory::collect!(RegisteredBinding);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::design::Design;
    use crate::key::BindKey;

    fn build_probe() -> Injected<Value> {
        Injected::pure(7i32).erase()
    }

    inventory::submit! {
        RegisteredBinding { label: "registry_tests::probe", build: build_probe }
    }

    #[test]
    fn from_registry_is_explicit_and_filterable() {
        let design = Design::from_registry(|label| label == "registry_tests::probe");
        assert!(design.contains(&BindKey::named("registry_tests::probe")));

        let empty = Design::from_registry(|label| label == "does_not_exist");
        assert!(empty.is_empty());
    }
}
