/// The smallest store a table may be created with, as a power of two (16
/// buckets).
pub(crate) const MIN_SIZE_LOG: u8 = 4;

/// The largest store a table may be created with, as a power of two.
pub(crate) const MAX_SIZE_LOG: u8 = 40;

pub(crate) const DEFAULT_SIZE_LOG: u8 = MIN_SIZE_LOG;

/// Number of retirements a thread performs between two reclamation sweeps.
pub(crate) const DEFAULT_RETIRE_FREQUENCY: usize = 64;

/// Number of failed CAS attempts the wait-free table allows on its fast path
/// before announcing the operation to the help manager.
pub(crate) const DEFAULT_HELP_THRESHOLD: usize = 8;

/// Epoch value published by a thread that is not inside an operation.
pub(crate) const UNRESERVED_EPOCH: u64 = u64::MAX;

// 75% load factor.
pub(crate) const fn threshold_for(len: usize) -> usize {
    len - (len >> 2)
}
