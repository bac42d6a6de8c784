use parking_lot::Mutex;

/// Thread-safe id allocator with a free-list. Freed ids are handed out again
/// before the high watermark advances.
#[derive(Debug)]
pub struct IdAllocator {
    inner: Mutex<Inner>,
}

#[derive(Debug)]
struct Inner {
    next: u64,
    free: Vec<u64>,
}

impl IdAllocator {
    pub fn new(first: u64) -> Self {
        Self {
            inner: Mutex::new(Inner {
                next: first,
                free: Vec::new(),
            }),
        }
    }

    pub fn next_id(&self) -> u64 {
        let mut inner = self.inner.lock();
        match inner.free.pop() {
            Some(id) => id,
            None => {
                let id = inner.next;
                inner.next += 1;
                id
            }
        }
    }

    pub fn free_id(&self, id: u64) {
        self.inner.lock().free.push(id);
    }

    pub fn high_id(&self) -> u64 {
        self.inner.lock().next
    }

    /// Raises the high watermark. Used when refreshing allocators from store
    /// contents after recovery; never lowers it.
    pub fn set_high_id(&self, high: u64) {
        let mut inner = self.inner.lock();
        if high > inner.next {
            inner.next = high;
        }
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn freed_ids_are_reused() {
        let ids = IdAllocator::new(0);
        assert_eq!(ids.next_id(), 0);
        assert_eq!(ids.next_id(), 1);
        ids.free_id(0);
        assert_eq!(ids.next_id(), 0);
        assert_eq!(ids.next_id(), 2);
    }

    #[test]
    fn high_id_only_advances() {
        let ids = IdAllocator::new(5);
        ids.set_high_id(3);
        assert_eq!(ids.high_id(), 5);
        ids.set_high_id(10);
        assert_eq!(ids.next_id(), 10);
    }
}
