//! Arena-backed quadtree.
//!
//! Nodes live in slots addressed by generation-checked [`NodeId`]s. Freeing a
//! node detaches its children and returns their slots to a free list, so the
//! arena only holds the nodes that are currently reachable from the roots.

use std::fmt;
use std::sync::Arc;

use tracing::trace;

use super::node::{NodeId, TileKey, TileLoadState, TileNode, TilePayload};
use crate::tiling::{Rectangle, TilingScheme};

struct Slot<P> {
    generation: u32,
    node: Option<TileNode<P>>,
}

/// Owns every quadtree node of one tiling scheme.
///
/// Children are created lazily, four at a time. Root nodes live as long as
/// the tree; every other node lives until an ancestor is freed.
///
/// Accessors taking a [`NodeId`] panic when the node has been freed, like
/// indexing a slice out of bounds. Use [`contains`](Self::contains) or
/// [`get`](Self::get) for ids that may be stale.
pub struct TileTree<P> {
    tiling_scheme: Arc<dyn TilingScheme>,
    slots: Vec<Slot<P>>,
    free: Vec<usize>,
    live: usize,
    roots: Vec<NodeId>,
}

impl<P: TilePayload> TileTree<P> {
    pub fn new(tiling_scheme: Arc<dyn TilingScheme>) -> Self {
        Self {
            tiling_scheme,
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
            roots: Vec::new(),
        }
    }

    pub fn tiling_scheme(&self) -> &Arc<dyn TilingScheme> {
        &self.tiling_scheme
    }

    /// Level-zero nodes, row-major from the northwest corner.
    ///
    /// Created on first call.
    pub fn create_root_tiles(&mut self) -> &[NodeId] {
        if self.roots.is_empty() {
            let columns = self.tiling_scheme.number_of_x_tiles_at_level(0);
            let rows = self.tiling_scheme.number_of_y_tiles_at_level(0);
            for y in 0..rows {
                for x in 0..columns {
                    let id = self.allocate(TileKey::new(x, y, 0), None);
                    self.roots.push(id);
                }
            }
        }
        &self.roots
    }

    pub fn root_tiles(&self) -> &[NodeId] {
        &self.roots
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Number of slots ever allocated, live or free.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Whether `id` still refers to a live node.
    pub fn contains(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    pub fn get(&self, id: NodeId) -> Option<&TileNode<P>> {
        self.slots
            .get(id.index)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_ref())
    }

    pub fn node(&self, id: NodeId) -> &TileNode<P> {
        match self.get(id) {
            Some(node) => node,
            None => panic!("node {:?} has been freed", id),
        }
    }

    fn node_mut(&mut self, id: NodeId) -> &mut TileNode<P> {
        let node = self
            .slots
            .get_mut(id.index)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_mut());
        match node {
            Some(node) => node,
            None => panic!("node {:?} has been freed", id),
        }
    }

    pub fn key(&self, id: NodeId) -> TileKey {
        self.node(id).key
    }

    pub fn rectangle(&self, id: NodeId) -> Rectangle {
        self.node(id).rectangle
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent
    }

    pub fn state(&self, id: NodeId) -> TileLoadState {
        self.node(id).state
    }

    pub fn set_state(&mut self, id: NodeId, state: TileLoadState) {
        self.node_mut(id).state = state;
    }

    pub fn payload(&self, id: NodeId) -> Option<&P> {
        self.node(id).payload.as_ref()
    }

    pub fn payload_mut(&mut self, id: NodeId) -> Option<&mut P> {
        self.node_mut(id).payload.as_mut()
    }

    /// Replaces the payload, returning the previous one.
    pub fn set_payload(&mut self, id: NodeId, payload: P) -> Option<P> {
        self.node_mut(id).payload.replace(payload)
    }

    /// Children in NW, NE, SW, SE order, if already created.
    pub fn existing_children(&self, id: NodeId) -> Option<[NodeId; 4]> {
        self.node(id).children
    }

    /// Children in NW, NE, SW, SE order, created on first access.
    pub fn children(&mut self, id: NodeId) -> [NodeId; 4] {
        if let Some(children) = self.node(id).children {
            return children;
        }

        let keys = self.node(id).key.children();
        let children = keys.map(|key| self.allocate(key, Some(id)));
        self.node_mut(id).children = Some(children);
        children
    }

    pub fn northwest_child(&mut self, id: NodeId) -> NodeId {
        self.children(id)[0]
    }

    pub fn northeast_child(&mut self, id: NodeId) -> NodeId {
        self.children(id)[1]
    }

    pub fn southwest_child(&mut self, id: NodeId) -> NodeId {
        self.children(id)[2]
    }

    pub fn southeast_child(&mut self, id: NodeId) -> NodeId {
        self.children(id)[3]
    }

    /// Locates an existing node without creating children.
    pub fn find(&self, key: TileKey) -> Option<NodeId> {
        let root_x = key.x >> key.level;
        let root_y = key.y >> key.level;
        let columns = self.tiling_scheme.number_of_x_tiles_at_level(0);
        if root_x >= columns {
            return None;
        }
        let root_index = (root_y * columns + root_x) as usize;
        let mut current = *self.roots.get(root_index)?;

        for depth in (0..key.level).rev() {
            let children = self.get(current)?.children?;
            let x_bit = ((key.x >> depth) & 1) as usize;
            let y_bit = ((key.y >> depth) & 1) as usize;
            current = children[y_bit * 2 + x_bit];
        }

        (self.get(current)?.key == key).then_some(current)
    }

    /// Frees a node and its descendants.
    ///
    /// Children are freed first. Each node's payload gets its
    /// `free_resources` hook, is dropped, and the state returns to `Start`.
    /// The node itself stays in the tree, but its children are detached and
    /// will be created again on the next [`children`](Self::children) call.
    /// Calling this on an already freed node only resets the state again.
    ///
    /// Returns the ids of the detached descendants in post-order. They no
    /// longer resolve.
    pub fn free_resources(&mut self, id: NodeId) -> Vec<NodeId> {
        let mut detached = Vec::new();
        self.free_subtree(id, &mut detached);
        if !detached.is_empty() {
            trace!(tile = %self.key(id), detached = detached.len(), "Detached children");
        }
        detached
    }

    /// Whether the node may be evicted. Nodes without payload are eligible.
    pub fn eligible_for_eviction(&self, id: NodeId) -> bool {
        self.node(id)
            .payload
            .as_ref()
            .map_or(true, |payload| payload.eligible_for_eviction())
    }

    fn free_subtree(&mut self, id: NodeId, detached: &mut Vec<NodeId>) {
        if let Some(children) = self.node_mut(id).children.take() {
            for child in children {
                self.free_subtree(child, detached);
                self.release(child);
                detached.push(child);
            }
        }

        let node = self.node_mut(id);
        if let Some(mut payload) = node.payload.take() {
            payload.free_resources();
        }
        node.state = TileLoadState::Start;
    }

    fn allocate(&mut self, key: TileKey, parent: Option<NodeId>) -> NodeId {
        let rectangle = self.tiling_scheme.tile_xy_to_rectangle(key.x, key.y, key.level);
        let node = TileNode::new(key, rectangle, parent);
        self.live += 1;

        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index];
                slot.node = Some(node);
                NodeId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    node: Some(node),
                });
                NodeId {
                    index: self.slots.len() - 1,
                    generation: 0,
                }
            }
        }
    }

    fn release(&mut self, id: NodeId) {
        let slot = &mut self.slots[id.index];
        if slot.generation != id.generation || slot.node.take().is_none() {
            return;
        }
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.live -= 1;
    }
}

impl<P> fmt::Debug for TileTree<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TileTree")
            .field("tiling_scheme", &self.tiling_scheme)
            .field("live", &self.live)
            .field("slots", &self.slots.len())
            .field("roots", &self.roots.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tiling::{GeographicTilingScheme, WebMercatorTilingScheme};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingPayload {
        freed: Arc<AtomicUsize>,
        pinned: bool,
    }

    impl TilePayload for CountingPayload {
        fn free_resources(&mut self) {
            self.freed.fetch_add(1, Ordering::SeqCst);
        }

        fn eligible_for_eviction(&self) -> bool {
            !self.pinned
        }
    }

    fn geographic_tree<P: TilePayload>() -> TileTree<P> {
        TileTree::new(Arc::new(GeographicTilingScheme::default()))
    }

    #[test]
    fn test_root_tiles_row_major() {
        let mut tree: TileTree<()> = geographic_tree();
        let roots = tree.create_root_tiles().to_vec();
        assert_eq!(roots.len(), 2);
        assert_eq!(tree.key(roots[0]), TileKey::new(0, 0, 0));
        assert_eq!(tree.key(roots[1]), TileKey::new(1, 0, 0));

        // Idempotent
        assert_eq!(tree.create_root_tiles().to_vec(), roots);
        assert_eq!(tree.len(), 2);
    }

    #[test]
    fn test_children_created_once() {
        let mut tree: TileTree<()> = geographic_tree();
        let root = tree.create_root_tiles()[1];

        let children = tree.children(root);
        assert_eq!(tree.len(), 6);
        assert_eq!(tree.children(root), children);
        assert_eq!(tree.len(), 6);

        let northwest = tree.northwest_child(root);
        assert_eq!(tree.key(northwest), TileKey::new(2, 0, 1));
        let northeast = tree.northeast_child(root);
        assert_eq!(tree.key(northeast), TileKey::new(3, 0, 1));
        let southwest = tree.southwest_child(root);
        assert_eq!(tree.key(southwest), TileKey::new(2, 1, 1));
        let southeast = tree.southeast_child(root);
        assert_eq!(tree.key(southeast), TileKey::new(3, 1, 1));
        for child in children {
            assert_eq!(tree.parent(child), Some(root));
        }
    }

    #[test]
    fn test_child_rectangles_partition_parent() {
        let mut tree: TileTree<()> = TileTree::new(Arc::new(WebMercatorTilingScheme::default()));
        let root = tree.create_root_tiles()[0];
        let parent = tree.rectangle(root);
        let [nw, _, _, se] = tree.children(root);

        let nw = tree.rectangle(nw);
        let se = tree.rectangle(se);
        assert!((nw.west - parent.west).abs() < 1e-12);
        assert!((nw.north - parent.north).abs() < 1e-9);
        assert!((se.east - parent.east).abs() < 1e-12);
        assert!((se.south - parent.south).abs() < 1e-9);
        assert!(nw.south.abs() < 1e-12);
    }

    #[test]
    fn test_find() {
        let mut tree: TileTree<()> = geographic_tree();
        let root = tree.create_root_tiles()[1];
        let se = tree.southeast_child(root);
        let deep = tree.northwest_child(se);

        assert_eq!(tree.find(TileKey::new(1, 0, 0)), Some(root));
        assert_eq!(tree.find(TileKey::new(3, 1, 1)), Some(se));
        assert_eq!(tree.find(tree.key(deep)), Some(deep));
        assert_eq!(tree.find(TileKey::new(0, 0, 3)), None);
        assert_eq!(tree.find(TileKey::new(9, 0, 0)), None);
    }

    #[test]
    fn test_free_resources_post_order_and_idempotent() {
        let freed = Arc::new(AtomicUsize::new(0));
        let mut tree: TileTree<CountingPayload> = geographic_tree();
        let root = tree.create_root_tiles()[0];
        let children = tree.children(root);

        for id in std::iter::once(root).chain(children) {
            tree.set_payload(
                id,
                CountingPayload {
                    freed: Arc::clone(&freed),
                    pinned: false,
                },
            );
            tree.set_state(id, TileLoadState::Done);
        }

        tree.free_resources(root);
        assert_eq!(freed.load(Ordering::SeqCst), 5);
        for id in std::iter::once(root).chain(children) {
            assert!(tree.payload(id).is_none());
            assert_eq!(tree.state(id), TileLoadState::Start);
        }
        tree.free_resources(root);
        assert_eq!(freed.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_free_resources_detaches_children() {
        let mut tree: TileTree<()> = geographic_tree();
        let root = tree.create_root_tiles()[0];
        let children = tree.children(root);
        let grandchildren = tree.children(children[3]);
        assert_eq!(tree.len(), 10);

        let detached = tree.free_resources(root);
        assert_eq!(detached.len(), 8);
        assert_eq!(&detached[..3], &children[..3]);
        assert_eq!(&detached[3..7], &grandchildren);
        assert_eq!(detached[7], children[3]);
        assert_eq!(tree.len(), 2);
        assert_eq!(tree.existing_children(root), None);
        for id in children.into_iter().chain(grandchildren) {
            assert!(!tree.contains(id));
        }
        assert_eq!(tree.find(TileKey::new(1, 1, 1)), None);

        // Recreated lazily in reused slots, under new generations
        let recreated = tree.children(root);
        assert_eq!(tree.len(), 6);
        assert_eq!(tree.capacity(), 10);
        assert_eq!(tree.key(recreated[0]), TileKey::new(0, 0, 1));
        for (old, new) in children.into_iter().zip(recreated) {
            assert_ne!(old, new);
        }
        assert!(tree.free_resources(recreated[0]).is_empty());
    }

    #[test]
    fn test_arena_bounded_across_repeated_descents() {
        let mut tree: TileTree<()> = geographic_tree();
        let root = tree.create_root_tiles()[0];

        for _ in 0..50 {
            let mut id = root;
            for _ in 0..6 {
                id = tree.southeast_child(id);
            }
            tree.free_resources(root);
        }

        assert_eq!(tree.len(), 2);
        assert_eq!(tree.capacity(), 2 + 4 * 6);
    }

    #[test]
    #[should_panic]
    fn test_stale_id_panics() {
        let mut tree: TileTree<()> = geographic_tree();
        let root = tree.create_root_tiles()[0];
        let child = tree.northwest_child(root);
        tree.free_resources(root);
        let _ = tree.key(child);
    }

    #[test]
    fn test_eligibility() {
        let freed = Arc::new(AtomicUsize::new(0));
        let mut tree: TileTree<CountingPayload> = geographic_tree();
        let roots = tree.create_root_tiles().to_vec();

        assert!(tree.eligible_for_eviction(roots[0]));
        tree.set_payload(
            roots[0],
            CountingPayload {
                freed,
                pinned: true,
            },
        );
        assert!(!tree.eligible_for_eviction(roots[0]));
        assert!(tree.eligible_for_eviction(roots[1]));
    }
}
