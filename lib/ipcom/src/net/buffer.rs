/// Byte window for the receive path. Data is appended at the tail and
/// consumed from the head; space behind the head is reclaimed once it
/// crosses the compaction threshold so the allocation stays bounded by the
/// receive rate.
pub struct Buffer {
    data: Vec<u8>,
    head: usize,
}

const COMPACT_THRESHOLD: usize = 4096;

impl Buffer {
    #[inline]
    pub fn new() -> Buffer {
        Buffer {
            data: Vec::new(),
            head: 0,
        }
    }

    /// Number of unconsumed bytes in the window.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len() - self.head
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends received bytes at the tail.
    #[inline]
    pub fn extend(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// The unconsumed bytes, oldest first.
    #[inline]
    pub fn read_slice(&self) -> &[u8] {
        &self.data[self.head..]
    }

    /// Advances the head past `count` consumed bytes.
    #[inline]
    pub fn consume(&mut self, count: usize) {
        if count > self.len() {
            panic!(
                "Attempted to consume {} bytes with only {} buffered",
                count,
                self.len()
            );
        }

        self.head += count;

        if self.head >= COMPACT_THRESHOLD {
            self.data.drain(..self.head);
            self.head = 0;
        }
    }

    /// Drops everything, consumed or not.
    #[inline]
    pub fn clear(&mut self) {
        self.data.clear();
        self.head = 0;
    }
}
