//! Quadtree node types.

use std::fmt;

use crate::tiling::Rectangle;

/// Tile coordinates within a quadtree level.
///
/// `(0, 0)` is the northwest corner of the tiling scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileKey {
    pub x: u32,
    pub y: u32,
    pub level: u32,
}

impl TileKey {
    pub fn new(x: u32, y: u32, level: u32) -> Self {
        Self { x, y, level }
    }

    /// Key of the parent tile, or `None` for level 0.
    pub fn parent(&self) -> Option<TileKey> {
        if self.level == 0 {
            return None;
        }
        Some(TileKey::new(self.x / 2, self.y / 2, self.level - 1))
    }

    /// Keys of the four children in NW, NE, SW, SE order.
    pub fn children(&self) -> [TileKey; 4] {
        let x = self.x * 2;
        let y = self.y * 2;
        let level = self.level + 1;
        [
            TileKey::new(x, y, level),
            TileKey::new(x + 1, y, level),
            TileKey::new(x, y + 1, level),
            TileKey::new(x + 1, y + 1, level),
        ]
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}/{}/{}", self.level, self.x, self.y)
    }
}

/// Loading state of a quadtree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TileLoadState {
    #[default]
    Start,
    Loading,
    Done,
    Failed,
}

/// Generation-checked reference to a node of a [`TileTree`](super::TileTree).
///
/// Slots of freed nodes are reused; an id whose node was freed no longer
/// resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    pub(crate) index: usize,
    pub(crate) generation: u32,
}

impl NodeId {
    /// Slot index in the arena. Shared by every generation of the slot.
    pub fn index(&self) -> usize {
        self.index
    }
}

/// Capabilities a node payload may provide.
///
/// Both methods have defaults, so a payload type that needs neither can use
/// an empty `impl`.
pub trait TilePayload {
    /// Release external resources before the payload is dropped.
    fn free_resources(&mut self) {}

    /// Return false to pin the node, e.g. while the draw path uses it.
    fn eligible_for_eviction(&self) -> bool {
        true
    }
}

impl TilePayload for () {}

/// A quadtree tile.
#[derive(Debug)]
pub struct TileNode<P> {
    pub(crate) key: TileKey,
    pub(crate) rectangle: Rectangle,
    pub(crate) parent: Option<NodeId>,
    /// NW, NE, SW, SE.
    pub(crate) children: Option<[NodeId; 4]>,
    pub(crate) state: TileLoadState,
    pub(crate) payload: Option<P>,
}

impl<P> TileNode<P> {
    pub(crate) fn new(key: TileKey, rectangle: Rectangle, parent: Option<NodeId>) -> Self {
        Self {
            key,
            rectangle,
            parent,
            children: None,
            state: TileLoadState::Start,
            payload: None,
        }
    }

    pub fn key(&self) -> TileKey {
        self.key
    }

    pub fn rectangle(&self) -> &Rectangle {
        &self.rectangle
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn state(&self) -> TileLoadState {
        self.state
    }

    pub fn payload(&self) -> Option<&P> {
        self.payload.as_ref()
    }
}
