//! Text rendering utilities for human-friendly error messages.

/// Renders a dependency trace as a single separator-joined string.
///
/// ```
/// use makhzan_support::rendering::render_chain;
///
/// let chain = vec!["a", "b", "c"];
/// assert_eq!(render_chain(&chain, " => "), "a => b => c");
/// ```
pub fn render_chain(chain: &[impl AsRef<str>], separator: &str) -> String {
    chain.iter().map(|s| s.as_ref()).collect::<Vec<_>>().join(separator)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_simple_chain() {
        let chain = vec!["A", "B", "C", "A"];
        assert_eq!(render_chain(&chain, " => "), "A => B => C => A");
    }

    #[test]
    fn render_single_element_chain() {
        let chain = vec!["A"];
        assert_eq!(render_chain(&chain, " => "), "A");
    }

    #[test]
    fn render_empty_chain() {
        let chain: Vec<&str> = vec![];
        assert_eq!(render_chain(&chain, " => "), "");
    }
}
