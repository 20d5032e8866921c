//! Core scalar and payload types shared across the crate.

use std::fmt;

use bytes::Bytes;

/// Index of one edge node in the fixed cluster, in `[0, edge_count)`.
pub type EdgeIndex = u32;

/// Size of a cached object's payload in bytes.
pub type ObjectSize = u32;

/// Nonnegative access-frequency signal for one object at one edge.
pub type Popularity = f32;

/// Admission benefit or eviction cost in the same domain as [`Popularity`].
pub type DeltaReward = f32;

/// Opaque variable-length object key.
///
/// Equality, ordering, and a stable hash are the only operations the core
/// relies on; content is never interpreted.
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key(Bytes);

impl Key {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self(data.into())
    }

    pub fn from_static(data: &'static [u8]) -> Self {
        Self(Bytes::from_static(data))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Wire size of the key frame: `u32` length prefix plus the bytes.
    pub fn payload_size(&self) -> usize {
        4 + self.0.len()
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Self(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Self(Bytes::from(s.into_bytes()))
    }
}

impl From<Vec<u8>> for Key {
    fn from(v: Vec<u8>) -> Self {
        Self(Bytes::from(v))
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) => write!(f, "Key({s:?})"),
            Err(_) => write!(f, "Key(0x{})", hex_prefix(&self.0)),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

fn hex_prefix(bytes: &[u8]) -> String {
    bytes
        .iter()
        .take(8)
        .map(|b| format!("{b:02x}"))
        .collect::<String>()
}

/// Object payload with a tombstone flag.
///
/// `remove` marks an object deleted in place rather than evicting it; the
/// tombstone stays cached (and valid) until capacity management drops it.
/// Only the data bytes cross the wire.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Value {
    data: Bytes,
    deleted: bool,
}

impl Value {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            deleted: false,
        }
    }

    pub fn tombstone() -> Self {
        Self {
            data: Bytes::new(),
            deleted: true,
        }
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    pub fn size(&self) -> ObjectSize {
        self.data.len() as ObjectSize
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.deleted {
            write!(f, "Value(<deleted>)")
        } else {
            write!(f, "Value({} bytes)", self.data.len())
        }
    }
}
