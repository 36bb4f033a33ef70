//! Transaction entry types.

use gridmesh_api::affinity::Key;
use gridmesh_api::VersionedId;

/// The operation a transaction performs on one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOp {
    /// The entry was read within the transaction.
    Read,

    /// The entry is written (created, updated, or removed) by the
    /// transaction.
    Write,
}

/// One key touched by a transaction.
///
/// Owned by exactly one per-node [TxMapping](crate::tx::TxMapping) for
/// the duration of the transaction; may be evicted when its partition
/// moves away from that node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxEntry {
    /// The cache key.
    pub key: Key,

    /// The value to write; `None` for reads and removes.
    pub value: Option<bytes::Bytes>,

    /// Read or write.
    pub op: TxOp,

    /// Lock/version stamp, set once the entry is locked on its owner.
    pub version: Option<VersionedId>,

    /// The version stamp assigned by the primary owner, shared by every
    /// entry in the same mapping.
    pub dht_version: Option<VersionedId>,

    /// The partition this key hashes to. Set during mapping.
    pub partition: u32,
}

impl TxEntry {
    /// Construct a read entry.
    pub fn read(key: impl Into<Key>) -> Self {
        Self {
            key: key.into(),
            value: None,
            op: TxOp::Read,
            version: None,
            dht_version: None,
            partition: 0,
        }
    }

    /// Construct a write entry.
    pub fn write(key: impl Into<Key>, value: Option<bytes::Bytes>) -> Self {
        Self {
            key: key.into(),
            value,
            op: TxOp::Write,
            version: None,
            dht_version: None,
            partition: 0,
        }
    }

    /// `true` for read entries.
    pub fn is_read(&self) -> bool {
        self.op == TxOp::Read
    }

    /// `true` for write entries.
    pub fn is_write(&self) -> bool {
        self.op == TxOp::Write
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn entry_ops() {
        let r = TxEntry::read("k1");
        assert!(r.is_read());
        assert!(!r.is_write());
        assert_eq!(None, r.value);

        let w = TxEntry::write("k2", Some(bytes::Bytes::from_static(b"v")));
        assert!(w.is_write());
        assert_eq!(Some(bytes::Bytes::from_static(b"v")), w.value);
    }
}
