//! A single [`Design`](crate::design::Design) entry: an `Injected` value
//! packaged with optional metadata.

use std::fmt;
use std::sync::Arc;

use crate::injected::{Injected, InjectedNode, Origin, Value};

/// An optional per-binding validator: runs against the produced value before
/// it is memoized, rejecting it with a diagnostic string on failure. Wired
/// through to `MakhzanError::Validation` at the resolver boundary (§7).
pub type Validator = Arc<dyn Fn(&Value) -> std::result::Result<(), String> + Send + Sync>;

/// Where a binding came from, for diagnostics and for tooling that wants to
/// jump to the definition site.
#[derive(Debug, Clone)]
pub struct BindMetadata {
    pub origin: Option<Origin>,
    /// Free-form documentation attached via `Design::add_metadata`.
    pub protocol: Option<String>,
}

impl Default for BindMetadata {
    fn default() -> Self {
        BindMetadata { origin: None, protocol: None }
    }
}

impl fmt::Display for BindMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.origin, &self.protocol) {
            (Some(origin), Some(protocol)) => write!(f, "{origin} ({protocol})"),
            (Some(origin), None) => write!(f, "{origin}"),
            (None, Some(protocol)) => write!(f, "({protocol})"),
            (None, None) => write!(f, "<unknown origin>"),
        }
    }
}

/// A Design entry: an `Injected` expression plus its metadata.
///
/// Binds are immutable; `with_metadata` returns a new one rather than
/// mutating in place, matching the Design's own immutability.
#[derive(Clone)]
pub struct Bind {
    node: Arc<InjectedNode>,
    pub metadata: BindMetadata,
    pub validator: Option<Validator>,
}

impl Bind {
    pub fn new(injected: Injected<Value>, metadata: BindMetadata) -> Self {
        Bind { node: injected.node().clone(), metadata, validator: None }
    }

    pub fn from_node(node: Arc<InjectedNode>, metadata: BindMetadata) -> Self {
        Bind { node, metadata, validator: None }
    }

    pub fn node(&self) -> &Arc<InjectedNode> {
        &self.node
    }

    pub fn injected(&self) -> Injected<Value> {
        Injected::from_node(self.node.clone())
    }

    pub fn with_metadata(self, metadata: BindMetadata) -> Self {
        Bind { node: self.node, metadata, validator: self.validator }
    }

    /// Attaches (or replaces) this binding's validator.
    pub fn with_validator(self, validator: Validator) -> Self {
        Bind { validator: Some(validator), ..self }
    }
}

impl fmt::Debug for Bind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bind({:?}, {})", self.node, self.metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_validator_attaches_without_touching_metadata() {
        let bind = Bind::new(Injected::pure(1i32).erase(), BindMetadata::default())
            .with_validator(Arc::new(|_: &Value| Err("always rejected".to_string())));
        assert!(bind.validator.is_some());
        assert!(bind.metadata.origin.is_none());
    }
}
