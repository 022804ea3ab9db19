pub(crate) mod constants;
pub(crate) mod error;
pub(crate) mod hash;

#[cfg(feature = "unstable-debug-counters")]
pub(crate) mod debug_counters;
