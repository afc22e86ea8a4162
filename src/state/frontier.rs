//! Two-tier crawl frontier
//!
//! Entries live in an in-memory queue until it reaches its capacity; further
//! entries are appended to a spill segment in storage, addressed by sequence
//! number. When the in-memory queue runs dry it is refilled from the head of
//! the spill, so entries always come out in discovery order. Callers only see
//! `push` and `pop`.

use crate::storage::{SpillStore, StorageResult};
use crate::url::Fingerprint;
use std::collections::{HashSet, VecDeque};
use url::Url;

/// A URL waiting to be crawled, tagged with its link depth from the source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontierEntry {
    pub url: String,
    pub depth: u32,
    pub fingerprint: Fingerprint,
}

impl FrontierEntry {
    /// Creates an entry for a normalized URL
    pub fn new(url: &Url, depth: u32) -> Self {
        Self {
            url: url.to_string(),
            depth,
            fingerprint: Fingerprint::of_url(url),
        }
    }
}

/// Ordered, depth-tagged queue with an overflow spill
#[derive(Debug, Clone)]
pub struct Frontier {
    state_id: String,
    memory: VecDeque<FrontierEntry>,
    memory_cap: usize,
    /// Sequence number of the oldest spilled entry not yet drained
    spill_head: u64,
    /// Sequence number the next spilled entry will receive
    spill_tail: u64,
    /// Fingerprints of every entry in either tier
    queued: HashSet<Fingerprint>,
}

impl Frontier {
    /// Creates an empty frontier for the crawl state `state_id`
    pub fn new(state_id: &str, memory_cap: usize) -> Self {
        Self {
            state_id: state_id.to_string(),
            memory: VecDeque::new(),
            memory_cap: memory_cap.max(1),
            spill_head: 0,
            spill_tail: 0,
            queued: HashSet::new(),
        }
    }

    /// Rebuilds a frontier from persisted parts
    ///
    /// # Arguments
    ///
    /// * `memory` - The in-memory tier, in queue order
    /// * `spill_range` - `(head, tail)` of the live spill segment
    /// * `spilled` - Fingerprints of the entries inside the spill range
    pub fn restore(
        state_id: &str,
        memory_cap: usize,
        memory: Vec<FrontierEntry>,
        spill_range: (u64, u64),
        spilled: impl IntoIterator<Item = Fingerprint>,
    ) -> Self {
        let mut queued: HashSet<Fingerprint> = memory.iter().map(|e| e.fingerprint).collect();
        queued.extend(spilled);
        Self {
            state_id: state_id.to_string(),
            memory: memory.into(),
            memory_cap: memory_cap.max(1),
            spill_head: spill_range.0,
            spill_tail: spill_range.1.max(spill_range.0),
            queued,
        }
    }

    /// Appends an entry unless its fingerprint is already queued
    ///
    /// Returns whether the entry was added. Once anything has spilled, new
    /// entries keep spilling until the spill drains, otherwise they would
    /// overtake older entries.
    pub fn push<S: SpillStore + ?Sized>(
        &mut self,
        entry: FrontierEntry,
        store: &mut S,
    ) -> StorageResult<bool> {
        if self.queued.contains(&entry.fingerprint) {
            return Ok(false);
        }

        if self.has_spill() || self.memory.len() >= self.memory_cap {
            store.spill_write(&self.state_id, self.spill_tail, &entry)?;
            self.spill_tail += 1;
        } else {
            self.memory.push_back(entry.clone());
        }
        self.queued.insert(entry.fingerprint);
        Ok(true)
    }

    /// Returns a popped entry to the head of the queue
    ///
    /// The in-memory tier may briefly exceed its capacity by one.
    pub fn push_front(&mut self, entry: FrontierEntry) {
        if self.queued.insert(entry.fingerprint) {
            self.memory.push_front(entry);
        }
    }

    /// Removes and returns the oldest entry
    pub fn pop<S: SpillStore + ?Sized>(
        &mut self,
        store: &mut S,
    ) -> StorageResult<Option<FrontierEntry>> {
        if self.memory.is_empty() && self.has_spill() {
            self.refill(store)?;
        }

        let entry = self.memory.pop_front();
        if let Some(e) = &entry {
            self.queued.remove(&e.fingerprint);
        }
        Ok(entry)
    }

    fn refill<S: SpillStore + ?Sized>(&mut self, store: &mut S) -> StorageResult<()> {
        let end = self
            .spill_tail
            .min(self.spill_head + self.memory_cap as u64);
        let entries = store.spill_read(&self.state_id, self.spill_head, end)?;
        tracing::debug!(
            "Refilled {} frontier entries from spill for {}",
            entries.len(),
            self.state_id
        );

        // A short read means rows went missing; skip the gap rather than loop on it
        self.spill_head = end;
        self.memory.extend(entries);
        Ok(())
    }

    /// Checks whether a fingerprint is waiting in either tier
    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.queued.contains(fingerprint)
    }

    fn has_spill(&self) -> bool {
        self.spill_head < self.spill_tail
    }

    /// Total number of queued entries across both tiers
    pub fn len(&self) -> usize {
        self.memory.len() + (self.spill_tail - self.spill_head) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries currently held in memory, in queue order
    pub fn memory_entries(&self) -> impl Iterator<Item = &FrontierEntry> {
        self.memory.iter()
    }

    pub fn memory_len(&self) -> usize {
        self.memory.len()
    }

    /// `(head, tail)` of the live spill segment
    pub fn spill_range(&self) -> (u64, u64) {
        (self.spill_head, self.spill_tail)
    }

    pub fn state_id(&self) -> &str {
        &self.state_id
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::BTreeMap;

    /// Spill store backed by a map, counting writes
    #[derive(Default)]
    pub(crate) struct MemorySpill {
        pub rows: BTreeMap<(String, u64), FrontierEntry>,
        pub writes: usize,
    }

    impl SpillStore for MemorySpill {
        fn spill_write(
            &mut self,
            state_id: &str,
            seq: u64,
            entry: &FrontierEntry,
        ) -> StorageResult<()> {
            self.writes += 1;
            self.rows.insert((state_id.to_string(), seq), entry.clone());
            Ok(())
        }

        fn spill_read(
            &mut self,
            state_id: &str,
            from_seq: u64,
            to_seq: u64,
        ) -> StorageResult<Vec<FrontierEntry>> {
            Ok(self
                .rows
                .range((state_id.to_string(), from_seq)..(state_id.to_string(), to_seq))
                .map(|(_, e)| e.clone())
                .collect())
        }
    }

    pub(crate) fn entry(path: &str, depth: u32) -> FrontierEntry {
        let url = Url::parse(&format!("https://example.com{}", path)).unwrap();
        FrontierEntry::new(&url, depth)
    }

    fn drain(frontier: &mut Frontier, store: &mut MemorySpill) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(e) = frontier.pop(store).unwrap() {
            out.push(e.url);
        }
        out
    }

    #[test]
    fn test_fifo_in_memory() {
        let mut store = MemorySpill::default();
        let mut frontier = Frontier::new("s1", 10);
        for i in 0..5 {
            assert!(frontier.push(entry(&format!("/p{}", i), 1), &mut store).unwrap());
        }
        assert_eq!(store.writes, 0);
        assert_eq!(frontier.len(), 5);

        let urls = drain(&mut frontier, &mut store);
        assert_eq!(urls[0], "https://example.com/p0");
        assert_eq!(urls[4], "https://example.com/p4");
        assert!(frontier.is_empty());
    }

    #[test]
    fn test_spill_preserves_discovery_order() {
        let mut store = MemorySpill::default();
        let mut frontier = Frontier::new("s1", 3);
        for i in 0..10 {
            frontier.push(entry(&format!("/p{}", i), 1), &mut store).unwrap();
        }
        assert_eq!(frontier.memory_len(), 3);
        assert_eq!(store.writes, 7);
        assert_eq!(frontier.len(), 10);

        // Interleave pushes with pops: new entries must queue behind the spill
        let first = frontier.pop(&mut store).unwrap().unwrap();
        assert_eq!(first.url, "https://example.com/p0");
        frontier.push(entry("/late", 2), &mut store).unwrap();

        let rest = drain(&mut frontier, &mut store);
        let expected: Vec<String> = (1..10)
            .map(|i| format!("https://example.com/p{}", i))
            .chain(std::iter::once("https://example.com/late".to_string()))
            .collect();
        assert_eq!(rest, expected);
    }

    #[test]
    fn test_duplicate_push_is_noop_in_both_tiers() {
        let mut store = MemorySpill::default();
        let mut frontier = Frontier::new("s1", 1);
        assert!(frontier.push(entry("/a", 1), &mut store).unwrap());
        assert!(frontier.push(entry("/b", 1), &mut store).unwrap());
        assert!(!frontier.push(entry("/a", 1), &mut store).unwrap());
        assert!(!frontier.push(entry("/b", 2), &mut store).unwrap());
        assert_eq!(frontier.len(), 2);
        assert_eq!(store.writes, 1);
    }

    #[test]
    fn test_restore_continues_from_spill_head() {
        let mut store = MemorySpill::default();
        let mut frontier = Frontier::new("s1", 2);
        for i in 0..6 {
            frontier.push(entry(&format!("/p{}", i), 1), &mut store).unwrap();
        }
        frontier.pop(&mut store).unwrap();

        let memory: Vec<FrontierEntry> = frontier.memory_entries().cloned().collect();
        let (head, tail) = frontier.spill_range();
        let spilled: Vec<Fingerprint> = store
            .rows
            .range(("s1".to_string(), head)..("s1".to_string(), tail))
            .map(|(_, e)| e.fingerprint)
            .collect();
        let mut restored = Frontier::restore("s1", 2, memory, (head, tail), spilled);

        assert_eq!(restored.len(), 5);
        assert!(restored.contains(&entry("/p5", 1).fingerprint));
        let urls = drain(&mut restored, &mut store);
        assert_eq!(urls.first().map(String::as_str), Some("https://example.com/p1"));
        assert_eq!(urls.last().map(String::as_str), Some("https://example.com/p5"));
    }
}
