//! Error types for dependency resolution.
//!
//! Makhzan reports failures as a single structured aggregate rather than
//! bailing out on the first problem: missing bindings and dependency cycles
//! are discovered in an analysis pass before any provider runs, and are
//! reported together with their resolution trace.

use std::fmt;

/// Main error type for all Makhzan operations.
#[derive(Debug, thiserror::Error)]
pub enum MakhzanError {
    /// One or more bindings could not be resolved: missing keys, cycles, or
    /// a provider that raised while running.
    #[error("{0}")]
    Resolution(#[from] DependencyResolutionError),

    /// A partial application was called with arguments that didn't match
    /// the wrapped function's reduced signature.
    #[error("signature mismatch calling `{function}` (bound at {location}): {message}")]
    SignatureMismatch {
        function: String,
        location: String,
        message: String,
    },

    /// A per-binding validator rejected a produced value.
    #[error("validation failed for `{key}`: {diagnostic}")]
    Validation { key: String, diagnostic: String },
}

/// Convenient Result type for Makhzan operations.
pub type Result<T> = std::result::Result<T, MakhzanError>;

/// The error type a provider closure raises. Any error type can cross this
/// boundary (`?`/`.into()` both work against it); the resolver is
/// responsible for wrapping whatever comes out into a `DependencyResolutionError`
/// carrying the trace to the failing node, per §7's `ProviderFailure`.
pub type ProviderError = Box<dyn std::error::Error + Send + Sync>;

/// What a provider closure returns: the produced value, or any error.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Why a single key's resolution failed.
#[derive(Debug)]
pub enum FailureCause {
    /// No binding exists for this key in the effective design.
    Missing,
    /// The key appears in its own resolution trace.
    Cyclic,
    /// The provider bound to this key raised while executing.
    Provider(Box<dyn std::error::Error + Send + Sync>),
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureCause::Missing => write!(f, "no binding registered"),
            FailureCause::Cyclic => write!(f, "cyclic dependency"),
            FailureCause::Provider(source) => write!(f, "provider failed: {source}"),
        }
    }
}

/// A single key that failed to resolve, with the path taken to reach it.
#[derive(Debug)]
pub struct DependencyResolutionFailure {
    /// The key that could not be produced.
    pub key: String,
    /// Trace from the resolution root to this key, e.g. `["b", "a"]`.
    pub trace: Vec<String>,
    pub cause: FailureCause,
}

impl DependencyResolutionFailure {
    pub fn trace_str(&self) -> String {
        makhzan_support::rendering::render_chain(&self.trace, " => ")
    }

    pub fn explanation_str(&self) -> String {
        format!("{} ({}): {}", self.key, self.trace_str(), self.cause)
    }
}

/// Aggregate of every failure discovered while resolving a target.
///
/// The analysis phase collects every missing key and cycle before any
/// provider runs; a provider failure, by contrast, can only surface a
/// single failure per resolution since execution stops at the first one.
#[derive(Debug)]
pub struct DependencyResolutionError {
    pub failures: Vec<DependencyResolutionFailure>,
}

impl DependencyResolutionError {
    pub fn new(failures: Vec<DependencyResolutionFailure>) -> Self {
        Self { failures }
    }

    pub fn single(failure: DependencyResolutionFailure) -> Self {
        Self { failures: vec![failure] }
    }

    fn of_cause(&self, pick: impl Fn(&FailureCause) -> bool) -> Vec<&DependencyResolutionFailure> {
        self.failures.iter().filter(|f| pick(&f.cause)).collect()
    }
}

impl fmt::Display for DependencyResolutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let missing = self.of_cause(|c| matches!(c, FailureCause::Missing));
        let cyclic = self.of_cause(|c| matches!(c, FailureCause::Cyclic));
        let failed = self.of_cause(|c| matches!(c, FailureCause::Provider(_)));

        writeln!(f, "Dependency resolution failed ({} failure(s)):", self.failures.len())?;

        if !missing.is_empty() {
            writeln!(f, "Missing Dependencies:")?;
            for failure in &missing {
                writeln!(f, "  - {}", failure.explanation_str())?;
            }
        }
        if !cyclic.is_empty() {
            writeln!(f, "Circular Dependencies:")?;
            for failure in &cyclic {
                writeln!(f, "  - {}", failure.explanation_str())?;
            }
        }
        if !failed.is_empty() {
            writeln!(f, "Provider Failures:")?;
            for failure in &failed {
                writeln!(f, "  - {}", failure.explanation_str())?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for DependencyResolutionError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_dependency_message() {
        let err = DependencyResolutionError::single(DependencyResolutionFailure {
            key: "a".into(),
            trace: vec!["b".into(), "a".into()],
            cause: FailureCause::Missing,
        });
        let msg = format!("{err}");
        assert!(msg.contains("Missing Dependencies"));
        assert!(msg.contains("b => a"));
    }

    #[test]
    fn cyclic_dependency_message() {
        let err = DependencyResolutionError::single(DependencyResolutionFailure {
            key: "a".into(),
            trace: vec!["a".into(), "b".into(), "a".into()],
            cause: FailureCause::Cyclic,
        });
        let msg = format!("{err}");
        assert!(msg.contains("Circular Dependencies"));
    }

    #[test]
    fn provider_failure_message() {
        let err = DependencyResolutionError::single(DependencyResolutionFailure {
            key: "b".into(),
            trace: vec!["b".into()],
            cause: FailureCause::Provider(Box::new(std::io::Error::other("boom"))),
        });
        let msg = format!("{err}");
        assert!(msg.contains("Provider Failures"));
        assert!(msg.contains("boom"));
    }

    #[test]
    fn signature_mismatch_display() {
        let err = MakhzanError::SignatureMismatch {
            function: "compute_total".into(),
            location: "src/lib.rs:10".into(),
            message: "expected 2 arguments, got 1".into(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("compute_total"));
        assert!(msg.contains("src/lib.rs:10"));
    }
}
