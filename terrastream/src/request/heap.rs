//! Fixed-capacity binary min-heap.
//!
//! The heap is ordered by a caller-supplied comparator: the element that
//! compares `Less` than every other element sits at the top and is returned
//! first by [`BoundedPriorityHeap::pop`]. Once the heap holds
//! `maximum_length` elements, inserting evicts the lowest-priority element,
//! which may be the element being inserted.
//!
//! # Example
//!
//! ```
//! use terrastream::request::BoundedPriorityHeap;
//!
//! let mut heap = BoundedPriorityHeap::new(2, |a: &u32, b: &u32| a.cmp(b));
//!
//! assert_eq!(heap.insert(5), None);
//! assert_eq!(heap.insert(3), None);
//! // Heap is full: 5 is the least urgent and gets evicted
//! assert_eq!(heap.insert(1), Some(5));
//! assert_eq!(heap.pop(), Some(1));
//! ```

use std::cmp::Ordering;
use std::fmt;

/// Comparator used to order heap elements.
pub type Comparator<T> = Box<dyn Fn(&T, &T) -> Ordering + Send + Sync>;

// =============================================================================
// Bounded Priority Heap
// =============================================================================

/// Array-backed binary min-heap with a maximum length.
pub struct BoundedPriorityHeap<T> {
    items: Vec<T>,
    maximum_length: usize,
    comparator: Comparator<T>,
}

impl<T> BoundedPriorityHeap<T> {
    /// Creates an empty heap holding at most `maximum_length` elements.
    pub fn new<F>(maximum_length: usize, comparator: F) -> Self
    where
        F: Fn(&T, &T) -> Ordering + Send + Sync + 'static,
    {
        Self {
            items: Vec::with_capacity(maximum_length),
            maximum_length,
            comparator: Box::new(comparator),
        }
    }

    /// Returns the number of elements in the heap.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if the heap is empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Returns the maximum number of elements the heap may hold.
    pub fn maximum_length(&self) -> usize {
        self.maximum_length
    }

    /// Changes the capacity of the heap.
    ///
    /// When shrinking below the current length, the lowest-priority elements
    /// are evicted and returned (least urgent first).
    pub fn set_maximum_length(&mut self, maximum_length: usize) -> Vec<T> {
        self.maximum_length = maximum_length;
        let mut evicted = Vec::new();
        while self.items.len() > maximum_length {
            match self.worst_index() {
                Some(index) => evicted.push(self.remove_at(index)),
                None => break,
            }
        }
        evicted
    }

    /// Returns the most urgent element without removing it.
    pub fn peek(&self) -> Option<&T> {
        self.items.first()
    }

    /// Removes and returns the most urgent element.
    pub fn pop(&mut self) -> Option<T> {
        if self.items.is_empty() {
            return None;
        }
        Some(self.remove_at(0))
    }

    /// Inserts an element.
    ///
    /// Returns the element evicted to stay within `maximum_length`, if any.
    /// When the heap is full and `element` is not more urgent than the least
    /// urgent element already queued, `element` itself is returned and the
    /// heap is left unchanged.
    pub fn insert(&mut self, element: T) -> Option<T> {
        if self.maximum_length == 0 {
            return Some(element);
        }

        if self.items.len() < self.maximum_length {
            self.items.push(element);
            self.sift_up(self.items.len() - 1);
            return None;
        }

        let worst = self.worst_index()?;
        if (self.comparator)(&element, &self.items[worst]) != Ordering::Less {
            return Some(element);
        }

        let evicted = self.remove_at(worst);
        self.items.push(element);
        self.sift_up(self.items.len() - 1);
        Some(evicted)
    }

    /// Iterates over the elements in arbitrary (heap) order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    /// Mutable iteration in heap order.
    ///
    /// If the mutation changes ordering, call [`resort`](Self::resort)
    /// afterwards to restore the heap property.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.items.iter_mut()
    }

    /// Restores the heap property after in-place priority changes.
    pub fn resort(&mut self) {
        let len = self.items.len();
        for index in (0..len / 2).rev() {
            self.sift_down(index);
        }
    }

    /// Removes every element, returning them in arbitrary order.
    pub fn drain(&mut self) -> Vec<T> {
        std::mem::take(&mut self.items)
    }

    /// Removes and returns the first element matching `predicate`.
    pub fn remove_where<P>(&mut self, predicate: P) -> Option<T>
    where
        P: Fn(&T) -> bool,
    {
        let index = self.items.iter().position(predicate)?;
        Some(self.remove_at(index))
    }

    /// Index of the least urgent element. In a min-heap it is always a leaf.
    fn worst_index(&self) -> Option<usize> {
        let len = self.items.len();
        if len == 0 {
            return None;
        }
        let mut worst = len / 2;
        if len == 1 {
            worst = 0;
        }
        for index in worst + 1..len {
            if (self.comparator)(&self.items[index], &self.items[worst]) == Ordering::Greater {
                worst = index;
            }
        }
        Some(worst)
    }

    fn remove_at(&mut self, index: usize) -> T {
        let last = self.items.len() - 1;
        self.items.swap(index, last);
        let removed = self.items.swap_remove(last);
        if index < self.items.len() {
            self.sift_down(index);
            self.sift_up(index);
        }
        removed
    }

    fn sift_up(&mut self, mut index: usize) {
        while index > 0 {
            let parent = (index - 1) / 2;
            if (self.comparator)(&self.items[index], &self.items[parent]) == Ordering::Less {
                self.items.swap(index, parent);
                index = parent;
            } else {
                break;
            }
        }
    }

    fn sift_down(&mut self, mut index: usize) {
        let len = self.items.len();
        loop {
            let left = 2 * index + 1;
            let right = left + 1;
            let mut smallest = index;

            if left < len
                && (self.comparator)(&self.items[left], &self.items[smallest]) == Ordering::Less
            {
                smallest = left;
            }
            if right < len
                && (self.comparator)(&self.items[right], &self.items[smallest]) == Ordering::Less
            {
                smallest = right;
            }
            if smallest == index {
                break;
            }
            self.items.swap(index, smallest);
            index = smallest;
        }
    }
}

impl<T> fmt::Debug for BoundedPriorityHeap<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedPriorityHeap")
            .field("len", &self.items.len())
            .field("maximum_length", &self.maximum_length)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn heap(maximum_length: usize) -> BoundedPriorityHeap<f64> {
        BoundedPriorityHeap::new(maximum_length, |a: &f64, b: &f64| a.total_cmp(b))
    }

    fn drain_sorted(mut heap: BoundedPriorityHeap<f64>) -> Vec<f64> {
        let mut out = Vec::new();
        while let Some(value) = heap.pop() {
            out.push(value);
        }
        out
    }

    #[test]
    fn test_pop_returns_in_priority_order() {
        let mut h = heap(10);
        for p in [5.0, 1.0, 4.0, 2.0, 3.0] {
            assert!(h.insert(p).is_none());
        }
        assert_eq!(drain_sorted(h), vec![1.0, 2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_full_heap_evicts_existing_lowest_priority() {
        let mut h = heap(2);
        assert!(h.insert(5.0).is_none());
        assert!(h.insert(3.0).is_none());
        assert_eq!(h.insert(1.0), Some(5.0));
        assert_eq!(drain_sorted(h), vec![1.0, 3.0]);
    }

    #[test]
    fn test_full_heap_evicts_inserted_when_least_urgent() {
        let mut h = heap(2);
        h.insert(1.0);
        h.insert(3.0);
        assert_eq!(h.insert(5.0), Some(5.0));
        assert_eq!(h.len(), 2);
    }

    #[test]
    fn test_tie_with_worst_evicts_inserted() {
        let mut h = heap(2);
        h.insert(1.0);
        h.insert(3.0);
        assert_eq!(h.insert(3.0), Some(3.0));
        assert_eq!(drain_sorted(h), vec![1.0, 3.0]);
    }

    #[test]
    fn test_zero_capacity_rejects_everything() {
        let mut h = heap(0);
        assert_eq!(h.insert(1.0), Some(1.0));
        assert!(h.is_empty());
    }

    #[test]
    fn test_shrinking_evicts_least_urgent() {
        let mut h = heap(5);
        for p in [1.0, 2.0, 3.0, 4.0, 5.0] {
            h.insert(p);
        }
        let evicted = h.set_maximum_length(2);
        assert_eq!(evicted, vec![5.0, 4.0, 3.0]);
        assert_eq!(drain_sorted(h), vec![1.0, 2.0]);
    }

    #[test]
    fn test_resort_after_priority_change() {
        let mut h = heap(5);
        for p in [1.0, 2.0, 3.0] {
            h.insert(p);
        }
        for value in h.iter_mut() {
            *value = 10.0 - *value;
        }
        h.resort();
        assert_eq!(drain_sorted(h), vec![7.0, 8.0, 9.0]);
    }

    #[test]
    fn test_remove_where() {
        let mut h = heap(5);
        for p in [4.0, 1.0, 3.0, 2.0] {
            h.insert(p);
        }
        assert_eq!(h.remove_where(|v| *v == 3.0), Some(3.0));
        assert_eq!(h.remove_where(|v| *v == 42.0), None);
        assert_eq!(drain_sorted(h), vec![1.0, 2.0, 4.0]);
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn test_eviction_never_drops_a_more_urgent_element(
                capacity in 1usize..8,
                priorities in proptest::collection::vec(0u32..50, 1..40)
            ) {
                let mut h = BoundedPriorityHeap::new(capacity, |a: &u32, b: &u32| a.cmp(b));
                for p in priorities {
                    let evicted = h.insert(p);
                    prop_assert!(h.len() <= capacity);
                    if let Some(evicted) = evicted {
                        for remaining in h.iter() {
                            prop_assert!(evicted >= *remaining);
                        }
                    }
                }

                let mut last = 0;
                while let Some(value) = h.pop() {
                    prop_assert!(value >= last);
                    last = value;
                }
            }
        }
    }
}
