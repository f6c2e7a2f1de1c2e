/// Fixed-capacity min-heap. Once full, a push only succeeds when the new item's
/// key beats the current minimum, which is then evicted, so the heap always
/// holds the `capacity` largest items seen.
pub struct BoundedMinHeap<T, K: Ord> {
    items: Vec<T>,
    capacity: usize,
    key: fn(&T) -> K,
}

impl<T, K: Ord> BoundedMinHeap<T, K> {
    pub fn new(capacity: usize, key: fn(&T) -> K) -> Self {
        Self { items: Vec::with_capacity(capacity), capacity, key }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn peek(&self) -> Option<&T> {
        self.items.first()
    }

    /// Returns whether `item` was kept.
    pub fn push(&mut self, item: T) -> bool {
        if self.capacity == 0 {
            return false;
        }
        if self.items.len() < self.capacity {
            self.items.push(item);
            self.sift_up(self.items.len() - 1);
            return true;
        }
        if (self.key)(&item) > (self.key)(&self.items[0]) {
            self.items[0] = item;
            self.sift_down(0);
            return true;
        }
        false
    }

    pub fn pop(&mut self) -> Option<T> {
        if self.items.is_empty() {
            return None;
        }
        let last = self.items.len() - 1;
        self.items.swap(0, last);
        let min = self.items.pop();
        if !self.items.is_empty() {
            self.sift_down(0);
        }
        min
    }

    /// Drain into a vector ordered by key, largest first.
    pub fn into_sorted_desc(mut self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.items.len());
        while let Some(item) = self.pop() {
            out.push(item);
        }
        out.reverse();
        out
    }

    fn less(&self, a: usize, b: usize) -> bool {
        (self.key)(&self.items[a]) < (self.key)(&self.items[b])
    }

    fn sift_up(&mut self, mut i: usize) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if !self.less(i, parent) {
                break;
            }
            self.items.swap(i, parent);
            i = parent;
        }
    }

    fn sift_down(&mut self, mut i: usize) {
        let n = self.items.len();
        loop {
            let (l, r) = (2 * i + 1, 2 * i + 2);
            let mut smallest = i;
            if l < n && self.less(l, smallest) {
                smallest = l;
            }
            if r < n && self.less(r, smallest) {
                smallest = r;
            }
            if smallest == i {
                break;
            }
            self.items.swap(i, smallest);
            i = smallest;
        }
    }
}
