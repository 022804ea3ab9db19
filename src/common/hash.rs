use std::{
    fmt,
    hash::{BuildHasher, Hash, Hasher},
};

/// A caller-supplied 128-bit hash value.
///
/// The tables never hash keys themselves. Callers compute a hash value for
/// each key (typically with a 128-bit hash function) and pass it to every
/// operation; two keys are considered equal if and only if their hash values
/// are equal, so the hash function must be collision resistant enough for the
/// key space in use.
///
/// The all-zero value is reserved to mark unused buckets. Passing it to a table
/// operation panics.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct HashValue {
    w1: u64,
    w2: u64,
}

impl HashValue {
    /// Creates a hash value from its two words. `w2` selects the first probed
    /// bucket.
    pub const fn new(w1: u64, w2: u64) -> Self {
        Self { w1, w2 }
    }

    /// Hashes `key` twice with `build_hasher` (the second time salted) to
    /// produce a 128-bit value.
    ///
    /// This is a convenience for callers that already have a `BuildHasher`. It
    /// never returns the reserved zero value.
    pub fn of<K, S>(build_hasher: &S, key: &K) -> Self
    where
        K: ?Sized + Hash,
        S: BuildHasher,
    {
        let mut hasher = build_hasher.build_hasher();
        key.hash(&mut hasher);
        let w2 = hasher.finish();

        let mut hasher = build_hasher.build_hasher();
        0x9e37_79b9_7f4a_7c15_u64.hash(&mut hasher);
        key.hash(&mut hasher);
        let w1 = hasher.finish();

        if w1 == 0 && w2 == 0 {
            Self::new(0, 1)
        } else {
            Self::new(w1, w2)
        }
    }

    pub fn w1(self) -> u64 {
        self.w1
    }

    pub fn w2(self) -> u64 {
        self.w2
    }

    /// Returns `true` for the reserved value that marks an unused bucket.
    pub fn is_zero(self) -> bool {
        self.w1 == 0 && self.w2 == 0
    }

    pub(crate) fn to_bits(self) -> u128 {
        ((self.w1 as u128) << 64) | self.w2 as u128
    }

    pub(crate) fn from_bits(bits: u128) -> Self {
        Self::new((bits >> 64) as u64, bits as u64)
    }

    /// The first bucket of this value's probe sequence in a store whose last
    /// index is `last_slot`.
    pub(crate) fn index(self, last_slot: usize) -> usize {
        self.w2 as usize & last_slot
    }
}

impl From<u128> for HashValue {
    fn from(bits: u128) -> Self {
        Self::from_bits(bits)
    }
}

impl From<(u64, u64)> for HashValue {
    fn from((w1, w2): (u64, u64)) -> Self {
        Self::new(w1, w2)
    }
}

impl From<u64> for HashValue {
    fn from(w2: u64) -> Self {
        Self::new(0, w2)
    }
}

impl fmt::Debug for HashValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HashValue({:016x}{:016x})", self.w1, self.w2)
    }
}

#[inline]
pub(crate) fn check(hv: HashValue) {
    assert!(
        !hv.is_zero(),
        "the all-zero hash value is reserved for unused buckets"
    );
}
