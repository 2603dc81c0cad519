//! Load/Store Alias Predictor (LSAP).
//!
//! A small fully-associative table of load RIPs known to have aliased with
//! an earlier store. A load whose RIP hits here must wait for every older
//! store with an unresolved address instead of issuing speculatively; this
//! breaks the otherwise repeating alias-annul cycle.

/// Fully-associative RIP tag table with round-robin replacement.
pub struct AliasPredictor {
    tags: Vec<Option<u64>>,
    victim: usize,
}

impl AliasPredictor {
    /// Creates a predictor with `size` entries.
    pub fn new(size: usize) -> Self {
        AliasPredictor {
            tags: vec![None; size],
            victim: 0,
        }
    }

    /// True if `rip` is a known-aliasing load.
    pub fn probe(&self, rip: u64) -> bool {
        self.tags.iter().any(|tag| *tag == Some(rip))
    }

    /// Records `rip` as aliasing, evicting round-robin if not present.
    pub fn select(&mut self, rip: u64) {
        if self.probe(rip) {
            return;
        }
        if let Some(slot) = self.tags.iter().position(|tag| tag.is_none()) {
            self.tags[slot] = Some(rip);
            return;
        }
        self.tags[self.victim] = Some(rip);
        self.victim = (self.victim + 1) % self.tags.len();
    }

    /// Discards all entries.
    pub fn reset(&mut self) {
        self.tags.iter_mut().for_each(|tag| *tag = None);
        self.victim = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_learn_and_probe() {
        let mut lsap = AliasPredictor::new(4);
        assert!(!lsap.probe(0x1000));
        lsap.select(0x1000);
        assert!(lsap.probe(0x1000));
        // Idempotent
        lsap.select(0x1000);
        assert!(lsap.probe(0x1000));
    }

    #[test]
    fn test_eviction_round_robin() {
        let mut lsap = AliasPredictor::new(2);
        lsap.select(1);
        lsap.select(2);
        lsap.select(3);
        assert!(!lsap.probe(1));
        assert!(lsap.probe(2));
        assert!(lsap.probe(3));
    }
}
