/// The error type returned by [`TableBuilder::try_build`][try-build] when the
/// requested configuration cannot be honored.
///
/// [try-build]: ../struct.TableBuilder.html#method.try_build
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TableError {
    /// The requested initial store is smaller than the minimum supported size.
    #[error("initial size 2^{requested} is below the minimum supported size 2^{minimum}")]
    SizeTooSmall { requested: u8, minimum: u8 },

    /// The requested initial store is larger than the maximum supported size.
    #[error("initial size 2^{requested} is above the maximum supported size 2^{maximum}")]
    SizeTooLarge { requested: u8, maximum: u8 },

    /// A wait-free table needs at least one fast-path attempt before it asks for
    /// help.
    #[error("help_threshold must be greater than zero")]
    InvalidHelpThreshold,

    /// The epoch domain cannot sweep every zero retirements.
    #[error("retire_frequency must be greater than zero")]
    InvalidRetireFrequency,
}
