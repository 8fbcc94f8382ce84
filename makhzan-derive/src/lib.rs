//! Thin re-export of the `makhzan-macros` proc-macro crate.
//!
//! Proc-macro crates cannot export anything but macros, so the attribute
//! lives in `makhzan-macros` and this crate exists purely so the facade
//! crate (and its users) can depend on one ordinary library crate rather
//! than reaching into the proc-macro crate directly.

pub use makhzan_macros::provides;
