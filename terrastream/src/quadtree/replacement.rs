//! Least-recently-used replacement queue for quadtree nodes.
//!
//! The queue is a doubly linked list threaded through node ids. Links live in
//! the queue itself, so nodes carry no list state. `head` is the most recently
//! used node; a frame marker separates nodes used in the current frame (head
//! side) from everything older, and trimming never walks past it.
//!
//! Evicting a node detaches its children from the tree. Queued descendants
//! and ids freed elsewhere are dropped from the queue as trimming meets them,
//! and a slot reused by a new node replaces the stale entry.
//!
//! # Example
//!
//! ```ignore
//! queue.mark_frame_start();
//! for id in visible_tiles {
//!     queue.mark_used(id);
//! }
//! let evicted = queue.trim(&mut tree, config.tile_cache_size);
//! ```

use tracing::debug;

use super::node::{NodeId, TilePayload};
use super::tree::TileTree;

#[derive(Debug, Clone, Copy)]
struct Link {
    id: NodeId,
    /// Toward head (more recently used).
    previous: Option<NodeId>,
    /// Toward tail (less recently used).
    next: Option<NodeId>,
}

/// LRU list of quadtree nodes with a per-frame marker.
#[derive(Debug, Default)]
pub struct ReplacementQueue {
    links: Vec<Option<Link>>,
    head: Option<NodeId>,
    tail: Option<NodeId>,
    marker: Option<NodeId>,
    count: usize,
}

impl ReplacementQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nodes in the queue.
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn head(&self) -> Option<NodeId> {
        self.head
    }

    pub fn tail(&self) -> Option<NodeId> {
        self.tail
    }

    /// Newest node not yet used in the current frame.
    pub fn marker(&self) -> Option<NodeId> {
        self.marker
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.link(id).is_some()
    }

    /// Starts a new frame. Call once per frame before any [`mark_used`](Self::mark_used).
    pub fn mark_frame_start(&mut self) {
        self.marker = self.head;
    }

    /// Records that a node was used this frame, moving it to the head.
    pub fn mark_used(&mut self, id: NodeId) {
        if self.head == Some(id) {
            if self.marker == Some(id) {
                self.marker = self.link(id).and_then(|link| link.next);
            }
            return;
        }

        if let Some(stale) = self.slot(id).filter(|link| link.id != id) {
            self.unlink(stale.id);
        }
        if self.contains(id) {
            self.unlink(id);
        }

        match self.head {
            Some(head) => self.set_previous(head, Some(id)),
            None => self.tail = Some(id),
        }
        self.set_link(Link {
            id,
            previous: None,
            next: self.head,
        });
        self.head = Some(id);
        self.count += 1;
    }

    /// Evicts least recently used nodes until at most `maximum` remain.
    ///
    /// Walks from the tail toward the head and stops once the frame marker has
    /// been examined, so nodes used this frame survive even when that leaves
    /// the queue above `maximum`. Ineligible nodes are skipped and stay
    /// queued. Evicted nodes have their resources freed through `tree` and are
    /// returned oldest first.
    ///
    /// Descendants detached by an eviction leave the queue without counting
    /// as evicted, as do ids that no longer resolve in `tree`.
    pub fn trim<P: TilePayload>(&mut self, tree: &mut TileTree<P>, maximum: usize) -> Vec<NodeId> {
        let mut evicted = Vec::new();
        let mut detached = Vec::new();
        let mut candidate = self.tail;
        let mut keep_trimming = true;

        while keep_trimming && self.marker.is_some() && self.count - detached.len() > maximum {
            let Some(id) = candidate else {
                break;
            };
            keep_trimming = self.marker != Some(id);
            candidate = self.link(id).and_then(|link| link.previous);

            if !tree.contains(id) {
                if !detached.contains(&id) {
                    self.unlink(id);
                }
                continue;
            }

            if tree.eligible_for_eviction(id) {
                for descendant in tree.free_resources(id) {
                    if self.contains(descendant) {
                        detached.push(descendant);
                    }
                }
                self.unlink(id);
                evicted.push(id);
            }
        }

        for &id in &detached {
            self.unlink(id);
        }

        if !evicted.is_empty() {
            debug!(
                evicted = evicted.len(),
                detached = detached.len(),
                remaining = self.count,
                maximum,
                "Trimmed tile replacement queue"
            );
        }
        evicted
    }

    /// Unlinks a node without freeing it. Returns false if it was not queued.
    pub fn remove(&mut self, id: NodeId) -> bool {
        if !self.contains(id) {
            return false;
        }
        self.unlink(id);
        true
    }

    /// Empties the queue. Nodes are not freed.
    pub fn clear(&mut self) {
        self.links.clear();
        self.head = None;
        self.tail = None;
        self.marker = None;
        self.count = 0;
    }

    /// Iterates from most to least recently used.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            queue: self,
            next: self.head,
        }
    }

    /// Whatever link occupies the slot of `id`, whichever generation it is for.
    fn slot(&self, id: NodeId) -> Option<Link> {
        self.links.get(id.index()).copied().flatten()
    }

    fn link(&self, id: NodeId) -> Option<Link> {
        self.slot(id).filter(|link| link.id == id)
    }

    fn set_previous(&mut self, id: NodeId, previous: Option<NodeId>) {
        if let Some(Some(link)) = self.links.get_mut(id.index()) {
            link.previous = previous;
        }
    }

    fn set_next(&mut self, id: NodeId, next: Option<NodeId>) {
        if let Some(Some(link)) = self.links.get_mut(id.index()) {
            link.next = next;
        }
    }

    fn set_link(&mut self, link: Link) {
        let index = link.id.index();
        if self.links.len() <= index {
            self.links.resize(index + 1, None);
        }
        self.links[index] = Some(link);
    }

    fn unlink(&mut self, id: NodeId) {
        let Some(link) = self.link(id) else {
            return;
        };
        self.links[id.index()] = None;

        if self.marker == Some(id) {
            self.marker = link.next;
        }

        match link.previous {
            Some(previous) => self.set_next(previous, link.next),
            None => self.head = link.next,
        }
        match link.next {
            Some(next) => self.set_previous(next, link.previous),
            None => self.tail = link.previous,
        }

        self.count -= 1;
    }
}

/// Iterator over queued node ids, head first.
pub struct Iter<'a> {
    queue: &'a ReplacementQueue,
    next: Option<NodeId>,
}

impl Iterator for Iter<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let current = self.next?;
        self.next = self.queue.link(current).and_then(|link| link.next);
        Some(current)
    }
}

impl<'a> IntoIterator for &'a ReplacementQueue {
    type Item = NodeId;
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Iter<'a> {
        self.iter()
    }
}
