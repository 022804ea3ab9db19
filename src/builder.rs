use crate::{
    common::{
        constants::{
            DEFAULT_HELP_THRESHOLD, DEFAULT_RETIRE_FREQUENCY, DEFAULT_SIZE_LOG, MAX_SIZE_LOG,
            MIN_SIZE_LOG,
        },
        error::TableError,
    },
    map::Item,
    mmm::Domain,
    BucketLockTable, GlobalLockTable, LockFreeTable, OrderedTable, WaitFreeTable,
};

use std::{marker::PhantomData, sync::Arc, time::Duration};

#[derive(Clone, Debug)]
pub(crate) struct Config {
    pub(crate) size_log: u8,
    pub(crate) migration_backoff: Option<Duration>,
    pub(crate) help_threshold: usize,
    pub(crate) consistent_views: bool,
    pub(crate) retire_frequency: usize,
    pub(crate) domain: Option<Arc<Domain>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            size_log: DEFAULT_SIZE_LOG,
            migration_backoff: None,
            help_threshold: DEFAULT_HELP_THRESHOLD,
            consistent_views: false,
            retire_frequency: DEFAULT_RETIRE_FREQUENCY,
            domain: None,
        }
    }
}

impl Config {
    fn validate(&self) -> Result<(), TableError> {
        if self.size_log < MIN_SIZE_LOG {
            return Err(TableError::SizeTooSmall {
                requested: self.size_log,
                minimum: MIN_SIZE_LOG,
            });
        }
        if self.size_log > MAX_SIZE_LOG {
            return Err(TableError::SizeTooLarge {
                requested: self.size_log,
                maximum: MAX_SIZE_LOG,
            });
        }
        if self.help_threshold == 0 {
            return Err(TableError::InvalidHelpThreshold);
        }
        if self.retire_frequency == 0 {
            return Err(TableError::InvalidRetireFrequency);
        }
        Ok(())
    }
}

/// Builds any of the table types with various configuration knobs.
///
/// Knobs that only make sense for one table type are only available on the
/// builder for that type.
///
/// # Examples
///
/// ```rust
/// use hatrack::{ConcurrentMap, HashValue, LockFreeTable, WaitFreeTable};
///
/// use std::time::Duration;
///
/// let table: LockFreeTable<String> = LockFreeTable::builder()
///     // Start with 2^10 buckets.
///     .initial_size_log(10)
///     // Let a thread that arrives late to a migration wait for the one
///     // already doing it.
///     .migration_backoff(Duration::from_nanos(500))
///     .build();
///
/// table.put(HashValue::new(1, 2), "two".to_string());
///
/// // Ask for help after three lost races instead of the default eight.
/// let table: WaitFreeTable<u64> = WaitFreeTable::builder().help_threshold(3).build();
/// assert!(table.is_empty());
/// ```
///
/// Tables can share one reclamation [`Domain`]:
///
/// ```rust
/// use hatrack::{mmm::Domain, OrderedTable, LockFreeTable};
///
/// use std::sync::Arc;
///
/// let domain = Arc::new(Domain::new());
/// let _names: OrderedTable<&str> = OrderedTable::builder().domain(Arc::clone(&domain)).build();
/// let _ids: LockFreeTable<u64> = LockFreeTable::builder().domain(domain).build();
/// ```
#[must_use]
pub struct TableBuilder<C> {
    config: Config,
    table_type: PhantomData<C>,
}

impl<C> Default for TableBuilder<C> {
    fn default() -> Self {
        Self {
            config: Config::default(),
            table_type: PhantomData,
        }
    }
}

impl<C> TableBuilder<C> {
    /// Sets the size of the first store to `2^size_log` buckets. Stores grow
    /// and shrink as needed afterwards, but never below the minimum of 16
    /// buckets. A cleaned-up table starts over at this size.
    pub fn initial_size_log(self, size_log: u8) -> Self {
        Self {
            config: Config {
                size_log,
                ..self.config
            },
            ..self
        }
    }

    /// Sets how many objects a thread retires between two reclamation sweeps.
    /// Ignored when a shared [`domain`](Self::domain) is given.
    pub fn retire_frequency(self, retire_frequency: usize) -> Self {
        Self {
            config: Config {
                retire_frequency,
                ..self.config
            },
            ..self
        }
    }

    /// Makes the table reclaim memory through `domain` instead of its own.
    pub fn domain(self, domain: Arc<Domain>) -> Self {
        Self {
            config: Config {
                domain: Some(domain),
                ..self.config
            },
            ..self
        }
    }
}

impl<T: Item> TableBuilder<LockFreeTable<T>> {
    /// Makes a thread that finds a migration already under way sleep for
    /// `backoff` before joining it, and skip it altogether if the migration
    /// finished in the meantime.
    pub fn migration_backoff(self, backoff: Duration) -> Self {
        Self {
            config: Config {
                migration_backoff: Some(backoff),
                ..self.config
            },
            ..self
        }
    }
}

impl<T: Item> TableBuilder<BucketLockTable<T>> {
    /// Makes views lock the whole table while they read it. Writers block for
    /// the duration of a view, but views never mix old and new writes.
    pub fn consistent_views(self, enabled: bool) -> Self {
        Self {
            config: Config {
                consistent_views: enabled,
                ..self.config
            },
            ..self
        }
    }
}

impl<T: Item> TableBuilder<WaitFreeTable<T>> {
    /// Sets how many CAS races a write may lose before it asks other threads
    /// for help.
    pub fn help_threshold(self, threshold: usize) -> Self {
        Self {
            config: Config {
                help_threshold: threshold,
                ..self.config
            },
            ..self
        }
    }
}

macro_rules! impl_build {
    ($table:ident) => {
        impl<T: Item> TableBuilder<$table<T>> {
            /// Builds the table.
            ///
            /// # Panics
            ///
            /// Panics if the configuration is invalid. See
            /// [`try_build`](Self::try_build).
            pub fn build(self) -> $table<T> {
                match self.try_build() {
                    Ok(table) => table,
                    Err(e) => panic!("invalid table configuration: {e}"),
                }
            }

            /// Builds the table, or returns why the configuration is invalid.
            pub fn try_build(self) -> Result<$table<T>, TableError> {
                self.config.validate()?;
                Ok($table::with_config(self.config))
            }
        }
    };
}

impl_build!(GlobalLockTable);
impl_build!(BucketLockTable);
impl_build!(LockFreeTable);
impl_build!(WaitFreeTable);
impl_build!(OrderedTable);
