// ABOUTME: Sealed trait pattern for runtime traits.
// ABOUTME: Only backends inside this crate may implement the capability traits.

/// Sealed trait to prevent external implementations.
///
/// Lets the capability traits grow new methods without breaking callers.
pub trait Sealed {}
