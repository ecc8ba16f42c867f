//! A simple k-hash bloom filter used as a fast negative pre-check for
//! duplicate event ids before the storage engine does an exact lookup.

/// Fixed-size bloom filter over an arbitrary byte slice key.
#[derive(Debug, Clone)]
pub struct BloomFilter {
    bits: Vec<u8>,
    size_bits: usize,
    hash_count: u16,
}

impl BloomFilter {
    /// `size_bits` and `hash_count` must both be nonzero.
    pub fn new(size_bits: usize, hash_count: u16) -> Self {
        assert!(size_bits > 0, "bloom filter size_bits must be nonzero");
        assert!(hash_count > 0, "bloom filter hash_count must be nonzero");
        Self {
            bits: vec![0u8; (size_bits + 7) / 8],
            size_bits,
            hash_count,
        }
    }

    fn indices(&self, data: &[u8]) -> impl Iterator<Item = usize> + '_ {
        (0..self.hash_count).map(move |slot| {
            let mut hasher = blake3::Hasher::new();
            hasher.update(data);
            hasher.update(&slot.to_be_bytes());
            let digest = hasher.finalize();
            let value = u64::from_be_bytes(digest.as_bytes()[0..8].try_into().unwrap());
            (value % self.size_bits as u64) as usize
        })
    }

    fn set_bit(&mut self, index: usize) {
        self.bits[index / 8] |= 1 << (index % 8);
    }

    fn get_bit(&self, index: usize) -> bool {
        self.bits[index / 8] & (1 << (index % 8)) != 0
    }

    pub fn add(&mut self, data: &[u8]) {
        for index in self.indices(data).collect::<Vec<_>>() {
            self.set_bit(index);
        }
    }

    /// Never produces a false negative: if this returns `false`, `data`
    /// was never added.
    pub fn might_contain(&self, data: &[u8]) -> bool {
        self.indices(data).all(|index| self.get_bit(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_item_may_report_absent() {
        let filter = BloomFilter::new(1024, 4);
        assert!(!filter.might_contain(b"never added"));
    }

    #[test]
    fn added_item_always_reports_present() {
        let mut filter = BloomFilter::new(1024, 4);
        filter.add(b"hello");
        assert!(filter.might_contain(b"hello"));
    }

    #[test]
    fn never_false_negative_across_many_items() {
        let mut filter = BloomFilter::new(4096, 5);
        let items: Vec<String> = (0..200).map(|i| format!("item-{i}")).collect();
        for item in &items {
            filter.add(item.as_bytes());
        }
        for item in &items {
            assert!(filter.might_contain(item.as_bytes()));
        }
    }
}
