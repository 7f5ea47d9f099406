//! Tunables of a [`Heap`](crate::Heap).

use snafu::ensure;

use crate::{
    error::{ChunkSizeSnafu, ConfigError, FitCandidatesSnafu},
    tag::{ALIGNMENT, MIN_BLOCK_SIZE},
};

/// Heap tunables.
///
/// Every value of this type has passed validation; the setters refuse
/// anything the engine cannot work with.
///
/// ```
/// use tagalloc::HeapConfig;
///
/// let config = HeapConfig::new()
///     .with_chunk_size(4096)?
///     .with_fit_candidates(8)?;
/// assert_eq!(config.chunk_size(), 4096);
/// assert!(HeapConfig::new().with_chunk_size(100).is_err());
/// # Ok::<(), tagalloc::ConfigError>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapConfig {
    chunk_size: usize,
    fit_candidates: usize,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl HeapConfig {
    /// Minimum number of bytes requested from the growth source at a time.
    pub const DEFAULT_CHUNK_SIZE: usize = 1792;

    /// Number of sufficiently large free blocks the fit policy compares.
    pub const DEFAULT_FIT_CANDIDATES: usize = 18;

    #[must_use]
    pub const fn new() -> Self {
        Self {
            chunk_size: Self::DEFAULT_CHUNK_SIZE,
            fit_candidates: Self::DEFAULT_FIT_CANDIDATES,
        }
    }

    /// Sets the minimum arena growth step.
    ///
    /// The size of the first free block created at initialisation is also
    /// this value.
    pub fn with_chunk_size(self, chunk_size: usize) -> Result<Self, ConfigError> {
        ensure!(
            chunk_size >= MIN_BLOCK_SIZE && chunk_size.is_multiple_of(ALIGNMENT),
            ChunkSizeSnafu { size: chunk_size }
        );
        Ok(Self { chunk_size, ..self })
    }

    /// Sets how many large-enough free blocks a search looks at before
    /// settling for the smallest of them.
    pub fn with_fit_candidates(self, fit_candidates: usize) -> Result<Self, ConfigError> {
        ensure!(fit_candidates > 0, FitCandidatesSnafu);
        Ok(Self {
            fit_candidates,
            ..self
        })
    }

    #[must_use]
    pub const fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    #[must_use]
    pub const fn fit_candidates(&self) -> usize {
        self.fit_candidates
    }
}
