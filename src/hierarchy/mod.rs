//! Parent derivation and deferred hierarchy resolution.
//!
//! Each imported node records its parent candidates (`parent_refs`). A
//! [`HierarchyBuilder`] resolves candidates against a [`NodeIndex`] of the
//! nodes that exist so far; children whose parent is not loaded yet stay
//! deferred until the next [`resolve`](HierarchyBuilder::resolve) and are
//! reported as dangling by [`finish`](HierarchyBuilder::finish).

mod builder;
mod range;
mod rule;

pub use builder::{HierarchyBuilder, NodeIndex};
pub use range::CodeRange;
pub use rule::{HierarchyRules, ParentRef, ParentRule};
