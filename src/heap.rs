use std::cmp::Ordering;

/// Array-backed binary min-heap ordered by a caller-supplied comparator.
///
/// `std::collections::BinaryHeap` needs `Ord` on the element type; the A*
/// open list orders by f-score with tie-breaks that live outside the node,
/// so the comparator is a closure here instead.
pub struct BinaryMinHeap<T, F>
where
    F: Fn(&T, &T) -> Ordering,
{
    items: Vec<T>,
    cmp: F,
}

impl<T, F> BinaryMinHeap<T, F>
where
    F: Fn(&T, &T) -> Ordering,
{
    pub fn new(cmp: F) -> Self {
        Self {
            items: Vec::new(),
            cmp,
        }
    }

    pub fn with_capacity(capacity: usize, cmp: F) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
            cmp,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn peek(&self) -> Option<&T> {
        self.items.first()
    }

    pub fn push(&mut self, item: T) {
        self.items.push(item);
        self.bubble_up(self.items.len() - 1);
    }

    pub fn pop(&mut self) -> Option<T> {
        if self.items.is_empty() {
            return None;
        }
        let last = self.items.len() - 1;
        self.items.swap(0, last);
        let top = self.items.pop();
        if !self.items.is_empty() {
            self.bubble_down(0);
        }
        top
    }

    fn less(&self, a: usize, b: usize) -> bool {
        (self.cmp)(&self.items[a], &self.items[b]) == Ordering::Less
    }

    fn bubble_up(&mut self, mut idx: usize) {
        while idx > 0 {
            let parent = (idx - 1) / 2;
            if !self.less(idx, parent) {
                break;
            }
            self.items.swap(idx, parent);
            idx = parent;
        }
    }

    fn bubble_down(&mut self, mut idx: usize) {
        let len = self.items.len();
        loop {
            let left = idx * 2 + 1;
            let right = left + 1;
            let mut smallest = idx;
            if left < len && self.less(left, smallest) {
                smallest = left;
            }
            if right < len && self.less(right, smallest) {
                smallest = right;
            }
            if smallest == idx {
                break;
            }
            self.items.swap(idx, smallest);
            idx = smallest;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn pops_in_ascending_order() {
        let mut heap = BinaryMinHeap::new(|a: &i32, b: &i32| a.cmp(b));
        for v in [5, 1, 9, 3, 3, 0, 7] {
            heap.push(v);
        }
        assert_eq!(heap.peek(), Some(&0));
        let mut out = Vec::new();
        while let Some(v) = heap.pop() {
            out.push(v);
        }
        assert_eq!(out, vec![0, 1, 3, 3, 5, 7, 9]);
        assert!(heap.is_empty());
        assert_eq!(heap.pop(), None);
    }

    #[test]
    fn comparator_decides_order() {
        let mut heap = BinaryMinHeap::new(|a: &(f32, u32), b: &(f32, u32)| {
            a.0.total_cmp(&b.0).then_with(|| b.1.cmp(&a.1))
        });
        heap.push((2.0, 1));
        heap.push((1.0, 4));
        heap.push((1.0, 9));
        assert_eq!(heap.pop(), Some((1.0, 9)));
        assert_eq!(heap.pop(), Some((1.0, 4)));
        assert_eq!(heap.len(), 1);
    }

    proptest! {
        #[test]
        fn matches_sorted_vec(values in proptest::collection::vec(-1000i32..1000, 0..200)) {
            let mut heap = BinaryMinHeap::with_capacity(values.len(), |a: &i32, b: &i32| a.cmp(b));
            for v in &values {
                heap.push(*v);
            }
            let mut expected = values.clone();
            expected.sort();
            let mut got = Vec::new();
            while let Some(v) = heap.pop() {
                got.push(v);
            }
            prop_assert_eq!(got, expected);
        }
    }
}
