//! Terrain quadtree and its replacement policy.
//!
//! [`TileTree`] owns every node of one tiling scheme in an arena and hands out
//! [`NodeId`]s. Children are created lazily, four at a time, and nodes are
//! never removed; evicting a node frees its payload and resets its state.
//! [`ReplacementQueue`] decides which nodes to evict once per frame.
//!
//! # Example
//!
//! ```ignore
//! use terrastream::quadtree::{ReplacementQueue, TileTree};
//!
//! let mut tree: TileTree<MyTile> = TileTree::new(tiling_scheme);
//! let mut queue = ReplacementQueue::new();
//!
//! let roots = tree.create_root_tiles().to_vec();
//! queue.mark_frame_start();
//! for id in roots {
//!     queue.mark_used(id);
//! }
//! queue.trim(&mut tree, 100);
//! ```

mod node;
mod replacement;
mod tree;

pub use node::{NodeId, TileKey, TileLoadState, TileNode, TilePayload};
pub use replacement::{Iter, ReplacementQueue};
pub use tree::TileTree;
