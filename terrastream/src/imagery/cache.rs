//! Reference-counted imagery cache.
//!
//! Imagery tiles are shared between every terrain tile they overlap, so the
//! cache hands out [`ImageryHandle`]s and counts references explicitly. When
//! the count of an entry drops to zero its slot is tombstoned: the entry is
//! dropped, the slot's generation is bumped so that stale handles no longer
//! resolve, and the slot is reused for the next new entry.
//!
//! Releases that happen where the cache is not reachable, such as in a
//! terrain payload's `free_resources` hook, go through an
//! [`ImageryReleaser`] and are applied by
//! [`ImageryCache::process_releases`].

use std::collections::HashMap;
use std::fmt;

use tokio::sync::mpsc;
use tracing::trace;

use super::entry::Imagery;
use crate::quadtree::TileKey;
use crate::tiling::TilingScheme;

/// Generation-checked reference to a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageryHandle {
    index: usize,
    generation: u32,
}

struct Slot {
    generation: u32,
    entry: Option<Imagery>,
}

/// Deduplicating store of imagery tiles keyed by `(x, y, level)`.
pub struct ImageryCache {
    slots: Vec<Slot>,
    free: Vec<usize>,
    by_key: HashMap<TileKey, ImageryHandle>,
    release_tx: mpsc::UnboundedSender<ImageryHandle>,
    release_rx: mpsc::UnboundedReceiver<ImageryHandle>,
}

impl Default for ImageryCache {
    fn default() -> Self {
        let (release_tx, release_rx) = mpsc::unbounded_channel();
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            by_key: HashMap::new(),
            release_tx,
            release_rx,
        }
    }
}

impl ImageryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    /// Returns the entry for `key`, creating it if needed, and takes a
    /// reference on it.
    ///
    /// A new entry takes a reference on its parent tile, creating the whole
    /// ancestor chain up to level 0 as needed.
    pub fn get_or_create(&mut self, key: TileKey, tiling_scheme: &dyn TilingScheme) -> ImageryHandle {
        if let Some(&handle) = self.by_key.get(&key) {
            self.add_reference(handle);
            return handle;
        }

        let parent = key.parent().map(|parent| self.get_or_create(parent, tiling_scheme));
        let rectangle = tiling_scheme.tile_xy_to_rectangle(key.x, key.y, key.level);

        let mut imagery = Imagery::new(key, rectangle, parent);
        imagery.reference_count = 1;

        let handle = self.allocate(imagery);
        self.by_key.insert(key, handle);
        trace!(tile = %key, "Imagery created");
        handle
    }

    /// Looks up an existing entry without taking a reference.
    pub fn find(&self, key: TileKey) -> Option<ImageryHandle> {
        self.by_key.get(&key).copied()
    }

    pub fn get(&self, handle: ImageryHandle) -> Option<&Imagery> {
        self.slots
            .get(handle.index)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.entry.as_ref())
    }

    pub fn get_mut(&mut self, handle: ImageryHandle) -> Option<&mut Imagery> {
        self.slots
            .get_mut(handle.index)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.entry.as_mut())
    }

    /// Reference count of the entry, or 0 for a stale handle.
    pub fn reference_count(&self, handle: ImageryHandle) -> usize {
        self.get(handle).map_or(0, Imagery::reference_count)
    }

    /// Takes another reference. Returns false for a stale handle.
    pub fn add_reference(&mut self, handle: ImageryHandle) -> bool {
        match self.get_mut(handle) {
            Some(imagery) => {
                imagery.reference_count += 1;
                true
            }
            None => false,
        }
    }

    /// Drops a reference. Returns true if the entry was removed.
    ///
    /// Removing an entry cancels its in-flight request and releases its
    /// reference on the parent tile.
    pub fn release(&mut self, handle: ImageryHandle) -> bool {
        let Some(imagery) = self.get_mut(handle) else {
            return false;
        };

        imagery.reference_count = imagery.reference_count.saturating_sub(1);
        if imagery.reference_count > 0 {
            return false;
        }

        let slot = &mut self.slots[handle.index];
        let Some(mut imagery) = slot.entry.take() else {
            return false;
        };
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        self.by_key.remove(&imagery.key);

        imagery.free_resources();
        trace!(tile = %imagery.key, "Imagery removed");

        if let Some(parent) = imagery.parent {
            self.release(parent);
        }
        true
    }

    /// A handle for releasing references from outside the cache's owner.
    pub fn releaser(&self) -> ImageryReleaser {
        ImageryReleaser {
            sender: self.release_tx.clone(),
        }
    }

    /// Applies releases queued through [`ImageryReleaser`]s.
    ///
    /// Returns the number of releases applied.
    pub fn process_releases(&mut self) -> usize {
        let mut processed = 0;
        while let Ok(handle) = self.release_rx.try_recv() {
            self.release(handle);
            processed += 1;
        }
        processed
    }

    /// Iterates over live entries.
    pub fn iter(&self) -> impl Iterator<Item = (ImageryHandle, &Imagery)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.entry.as_ref().map(|imagery| {
                (
                    ImageryHandle {
                        index,
                        generation: slot.generation,
                    },
                    imagery,
                )
            })
        })
    }

    fn allocate(&mut self, imagery: Imagery) -> ImageryHandle {
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index];
                slot.entry = Some(imagery);
                ImageryHandle {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    entry: Some(imagery),
                });
                ImageryHandle {
                    index: self.slots.len() - 1,
                    generation: 0,
                }
            }
        }
    }
}

impl fmt::Debug for ImageryCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageryCache")
            .field("entries", &self.by_key.len())
            .field("slots", &self.slots.len())
            .field("free", &self.free.len())
            .finish()
    }
}

/// Queues reference releases for an [`ImageryCache`].
///
/// Cheap to clone. Releases take effect at the cache's next
/// [`process_releases`](ImageryCache::process_releases); sending to a cache
/// that no longer exists is a no-op.
#[derive(Debug, Clone)]
pub struct ImageryReleaser {
    sender: mpsc::UnboundedSender<ImageryHandle>,
}

impl ImageryReleaser {
    pub fn release(&self, handle: ImageryHandle) {
        let _ = self.sender.send(handle);
    }

    pub fn release_all(&self, handles: impl IntoIterator<Item = ImageryHandle>) {
        for handle in handles {
            self.release(handle);
        }
    }
}
