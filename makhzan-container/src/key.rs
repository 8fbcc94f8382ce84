//! Binding identity.
//!
//! A [`BindKey`] is the opaque address under which an [`Injected`](crate::injected::Injected)
//! expression is registered in a [`Design`](crate::design::Design). Unlike a
//! `TypeId`-based key, bindings here are addressed by name: the algebra
//! resolves dependencies through `ByName` references, and names are what a
//! function binding's keyword arguments carry.

use std::borrow::Borrow;
use std::fmt;

/// Tagged identity used to index bindings.
///
/// The variant set is intentionally small today (only [`BindKey::Named`]);
/// it is written as a plain enum rather than a single string newtype so that
/// future tags (e.g. a positional/anonymous key) can be added without
/// changing every call site.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BindKey {
    /// A binding addressed by name, e.g. `"database"` or `"user_service"`.
    Named(String),
}

impl BindKey {
    /// Builds a named key from anything string-like.
    pub fn named(name: impl Into<String>) -> Self {
        BindKey::Named(name.into())
    }

    /// The key's display name, regardless of tag.
    pub fn name(&self) -> &str {
        match self {
            BindKey::Named(n) => n,
        }
    }
}

impl fmt::Display for BindKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl From<&str> for BindKey {
    fn from(value: &str) -> Self {
        BindKey::Named(value.to_string())
    }
}

impl From<String> for BindKey {
    fn from(value: String) -> Self {
        BindKey::Named(value)
    }
}

impl Borrow<str> for BindKey {
    fn borrow(&self) -> &str {
        self.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_keys_compare_by_name() {
        assert_eq!(BindKey::named("a"), BindKey::named("a"));
        assert_ne!(BindKey::named("a"), BindKey::named("b"));
    }

    #[test]
    fn display_is_the_name() {
        assert_eq!(BindKey::named("database").to_string(), "database");
    }

    #[test]
    fn from_str_and_string() {
        let a: BindKey = "x".into();
        let b: BindKey = String::from("x").into();
        assert_eq!(a, b);
    }

    #[test]
    fn keys_order_lexicographically() {
        assert!(BindKey::named("a") < BindKey::named("b"));
    }
}
