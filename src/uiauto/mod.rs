//! UI tree accessor: finders, node snapshots, and finder-based operations.

pub mod automation;
pub mod finder;
pub mod node;
pub mod vkb;

pub use automation::UiAutoContext;
pub use finder::Finder;
pub use node::{NodeInfo, NodeState, Point, Rect, Role, UiNode};
