//! Per-node transaction mapping.

use crate::tx::TxEntry;
use gridmesh_api::affinity::Key;
use gridmesh_api::{NodeInfo, VersionedId};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// The entries of one transaction mapped onto one owning node.
///
/// Created lazily the first time a transaction touches a key owned by
/// that node; destroyed when the transaction completes or all its
/// entries are evicted.
///
/// The entry collection supports concurrent append from multiple
/// transaction threads while an eviction scan proceeds, without locking
/// out writers and without copying the collection. Entries are keyed by
/// an append sequence so the insertion order can be recovered for the
/// read/write views; a key index maps each key to its live sequence
/// numbers for constant-time removal.
pub struct TxMapping {
    node: Arc<NodeInfo>,
    entries: dashmap::DashMap<u64, TxEntry>,
    index: dashmap::DashMap<Key, Vec<u64>>,
    seq: AtomicU64,
    explicit_lock: AtomicBool,
    dht_version: Mutex<Option<VersionedId>>,
}

impl std::fmt::Debug for TxMapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxMapping")
            .field("node", &self.node.id)
            .field("entries", &self.entries.len())
            .field(
                "explicit_lock",
                &self.explicit_lock.load(Ordering::Relaxed),
            )
            .finish()
    }
}

impl TxMapping {
    /// Construct an empty mapping for the given owning node.
    pub fn new(node: Arc<NodeInfo>) -> Self {
        Self {
            node,
            entries: dashmap::DashMap::new(),
            index: dashmap::DashMap::new(),
            seq: AtomicU64::new(0),
            explicit_lock: AtomicBool::new(false),
            dht_version: Mutex::new(None),
        }
    }

    /// The node this mapping belongs to.
    pub fn node(&self) -> &Arc<NodeInfo> {
        &self.node
    }

    /// Append an entry. O(1) amortized; safe to call concurrently with
    /// eviction scans.
    ///
    /// If the mapping was already stamped with a dht version, the entry
    /// inherits it, keeping the shared-stamp invariant.
    pub fn add(&self, mut entry: TxEntry) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        // the version lock is held across the insert: either this entry
        // is visible to a concurrent stamping scan, or it inherits the
        // stamp here. An entry can never slip between the two.
        let stamp = self.dht_version.lock().expect("poisoned");
        if let Some(v) = *stamp {
            entry.dht_version = Some(v);
        }
        self.index
            .entry(entry.key.clone())
            .or_default()
            .push(seq);
        self.entries.insert(seq, entry);
    }

    /// Remove the entry for a key. Returns `true` if an entry was
    /// removed. If several entries share the key, one is removed per
    /// call.
    pub fn remove_entry(&self, key: &Key) -> bool {
        let seq = match self.index.get_mut(key) {
            Some(mut seqs) => seqs.value_mut().pop(),
            None => None,
        };
        match seq {
            Some(seq) => {
                self.index.remove_if(key, |_, seqs| seqs.is_empty());
                self.entries.remove(&seq).is_some()
            }
            None => false,
        }
    }

    fn unindex(&self, key: &Key, seq: u64) {
        if let Some(mut seqs) = self.index.get_mut(key) {
            seqs.value_mut().retain(|s| *s != seq);
        }
        self.index.remove_if(key, |_, seqs| seqs.is_empty());
    }

    /// All entries, in insertion order.
    pub fn entries(&self) -> Vec<TxEntry> {
        let mut out: Vec<(u64, TxEntry)> = self
            .entries
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        out.sort_by_key(|(seq, _)| *seq);
        out.into_iter().map(|(_, e)| e).collect()
    }

    /// Read entries, in insertion order. A derived view over the same
    /// entry set, not a second copy.
    pub fn reads(&self) -> Vec<TxEntry> {
        self.entries().into_iter().filter(|e| e.is_read()).collect()
    }

    /// Write entries, in insertion order. A derived view over the same
    /// entry set, not a second copy.
    pub fn writes(&self) -> Vec<TxEntry> {
        self.entries()
            .into_iter()
            .filter(|e| e.is_write())
            .collect()
    }

    /// Number of entries currently mapped.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` if no entries remain.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Mark this mapping as holding explicit locks.
    pub fn mark_explicit_lock(&self) {
        self.explicit_lock.store(true, Ordering::Relaxed);
    }

    /// `true` if the lock is explicit.
    pub fn explicit_lock(&self) -> bool {
        self.explicit_lock.load(Ordering::Relaxed)
    }

    /// Stamp the mapping and every current entry with the version
    /// assigned by the confirmed primary owner.
    ///
    /// All replicas can then be ordered against the same baseline even
    /// though the entries were added at different local times. Entries
    /// appended after the stamp inherit it on [TxMapping::add].
    pub fn set_dht_version(&self, version: VersionedId) {
        // held for the whole scan so no append lands unstamped behind it
        let mut stamp = self.dht_version.lock().expect("poisoned");
        *stamp = Some(version);
        for mut e in self.entries.iter_mut() {
            e.value_mut().dht_version = Some(version);
        }
    }

    /// The dht version, once a primary has been confirmed.
    pub fn dht_version(&self) -> Option<VersionedId> {
        *self.dht_version.lock().expect("poisoned")
    }

    /// Remove entries whose partition is in the moved set.
    ///
    /// Used to shed stale state on topology change without waiting for
    /// transaction completion. Exact: entries in other partitions are
    /// untouched. Idempotent.
    pub fn evict_partitions(&self, parts: &[u32]) {
        if parts.is_empty() {
            return;
        }
        self.evict(|e| parts.contains(&e.partition));
    }

    /// Remove cached read-only entries for keys no longer of interest
    /// (e.g. after a remote read lease expires). Write entries for the
    /// same keys are untouched; this path is decoupled from write-path
    /// eviction.
    pub fn evict_readers(&self, keys: &[Key]) {
        if keys.is_empty() {
            return;
        }
        self.evict(|e| e.is_read() && keys.contains(&e.key));
    }

    /// Remove entries matching the predicate, keeping the key index in
    /// sync. Appends racing the scan are untouched.
    fn evict(&self, doomed: impl Fn(&TxEntry) -> bool) {
        let hits: Vec<(u64, Key)> = self
            .entries
            .iter()
            .filter(|e| doomed(e.value()))
            .map(|e| (*e.key(), e.value().key.clone()))
            .collect();
        for (seq, key) in hits {
            if self.entries.remove(&seq).is_some() {
                self.unindex(&key, seq);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::tx::TxOp;
    use gridmesh_api::{NodeId, VersionSource};
    use gridmesh_test_utils::test_node;

    fn mapping() -> TxMapping {
        TxMapping::new(Arc::new(test_node(1)))
    }

    fn entry_in(key: &str, partition: u32, op: TxOp) -> TxEntry {
        let mut e = match op {
            TxOp::Read => TxEntry::read(key),
            TxOp::Write => TxEntry::write(key, None),
        };
        e.partition = partition;
        e
    }

    #[test]
    fn add_remove() {
        let m = mapping();
        assert!(m.is_empty());

        m.add(entry_in("a", 0, TxOp::Write));
        m.add(entry_in("b", 1, TxOp::Read));
        assert_eq!(2, m.len());

        assert!(m.remove_entry(&Key::from("a")));
        assert!(!m.remove_entry(&Key::from("a")));
        assert_eq!(1, m.len());
    }

    #[test]
    fn remove_entry_takes_one_duplicate_at_a_time() {
        let m = mapping();
        m.add(entry_in("a", 0, TxOp::Read));
        m.add(entry_in("a", 0, TxOp::Write));

        assert!(m.remove_entry(&Key::from("a")));
        assert_eq!(1, m.len());
        assert!(m.remove_entry(&Key::from("a")));
        assert!(m.is_empty());
        assert!(!m.remove_entry(&Key::from("a")));
    }

    #[test]
    fn reads_writes_are_partitioned_views() {
        let m = mapping();
        m.add(entry_in("w1", 0, TxOp::Write));
        m.add(entry_in("r1", 0, TxOp::Read));
        m.add(entry_in("w2", 0, TxOp::Write));

        let reads: Vec<_> =
            m.reads().into_iter().map(|e| e.key).collect();
        let writes: Vec<_> =
            m.writes().into_iter().map(|e| e.key).collect();

        assert_eq!(vec![Key::from("r1")], reads);
        // insertion order preserved
        assert_eq!(vec![Key::from("w1"), Key::from("w2")], writes);
        assert_eq!(m.len(), m.reads().len() + m.writes().len());
    }

    #[test]
    fn dht_version_stamps_all_entries() {
        let src = VersionSource::new(NodeId::new());
        let m = mapping();
        m.add(entry_in("a", 0, TxOp::Write));
        m.add(entry_in("b", 1, TxOp::Write));

        let v = src.next();
        m.set_dht_version(v);
        assert_eq!(Some(v), m.dht_version());

        // entries added after the stamp inherit it
        m.add(entry_in("c", 2, TxOp::Write));

        for e in m.entries() {
            assert_eq!(Some(v), e.dht_version);
        }
    }

    #[test]
    fn evict_partitions_exact_and_idempotent() {
        let m = mapping();
        m.add(entry_in("a", 0, TxOp::Write));
        m.add(entry_in("b", 1, TxOp::Write));
        m.add(entry_in("c", 2, TxOp::Read));
        m.add(entry_in("d", 1, TxOp::Write));

        m.evict_partitions(&[1]);
        let keys: Vec<_> =
            m.entries().into_iter().map(|e| e.key).collect();
        assert_eq!(vec![Key::from("a"), Key::from("c")], keys);

        // idempotent
        m.evict_partitions(&[1]);
        assert_eq!(2, m.len());

        // evicted keys are gone from the removal path too
        assert!(!m.remove_entry(&Key::from("b")));
        assert!(!m.remove_entry(&Key::from("d")));
        assert!(m.remove_entry(&Key::from("a")));
    }

    #[test]
    fn evict_readers_spares_writes() {
        let m = mapping();
        m.add(entry_in("a", 0, TxOp::Read));
        m.add(entry_in("a", 0, TxOp::Write));
        m.add(entry_in("b", 0, TxOp::Read));

        m.evict_readers(&[Key::from("a")]);

        let remaining: Vec<_> = m
            .entries()
            .into_iter()
            .map(|e| (e.key, e.op))
            .collect();
        assert_eq!(
            vec![
                (Key::from("a"), TxOp::Write),
                (Key::from("b"), TxOp::Read),
            ],
            remaining,
        );
    }

    #[test]
    fn explicit_lock_flag() {
        let m = mapping();
        assert!(!m.explicit_lock());
        m.mark_explicit_lock();
        assert!(m.explicit_lock());
    }

    // The historical bug class this structure exists to avoid is copying
    // the entry collection while other threads append to it. Appends
    // from many real threads racing an eviction scan must never lose an
    // entry.
    #[test]
    fn concurrent_append_stress() {
        const THREADS: usize = 8;
        const PER_THREAD: usize = 10_000;

        let m = Arc::new(mapping());

        let handles: Vec<_> = (0..THREADS)
            .map(|t| {
                let m = m.clone();
                std::thread::spawn(move || {
                    for i in 0..PER_THREAD {
                        // partition 9999 never evicted below
                        m.add(entry_in(
                            &format!("k-{t}-{i}"),
                            9999,
                            TxOp::Write,
                        ));
                    }
                })
            })
            .collect();

        // eviction scans race the appends; they target a partition no
        // appended entry lives in, so the final count must be exact
        for _ in 0..100 {
            m.evict_partitions(&[1]);
        }

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(THREADS * PER_THREAD, m.len());
    }

    // Entries added before the stamp get it from the scan, entries
    // added during or after inherit it on append. No interleaving may
    // leave an entry unstamped while the mapping reports a version.
    #[test]
    fn dht_stamp_reaches_racing_appends() {
        const THREADS: usize = 4;
        const PER_THREAD: usize = 2_000;

        let m = Arc::new(mapping());

        // a large backlog keeps the stamping scan busy while the
        // appender threads run
        for i in 0..20_000 {
            m.add(entry_in(&format!("pre-{i}"), 0, TxOp::Write));
        }

        let handles: Vec<_> = (0..THREADS)
            .map(|t| {
                let m = m.clone();
                std::thread::spawn(move || {
                    for i in 0..PER_THREAD {
                        m.add(entry_in(
                            &format!("k-{t}-{i}"),
                            0,
                            TxOp::Write,
                        ));
                    }
                })
            })
            .collect();

        let v = VersionSource::new(NodeId::new()).next();
        m.set_dht_version(v);

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(Some(v), m.dht_version());
        for e in m.entries() {
            assert_eq!(Some(v), e.dht_version);
        }
    }
}
