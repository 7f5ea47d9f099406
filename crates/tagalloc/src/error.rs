use brk_arena::GrowError;
use snafu::Snafu;
use snafu_utils::Location;

/// Reasons an allocation request could not be served.
///
/// The `Option`-returning operations on [`Heap`](crate::Heap) log these and
/// collapse them into `None`; the `try_` variants hand them out.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum AllocError {
    #[snafu(display("zero-sized allocation request"))]
    ZeroSize {
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("allocation of {size} bytes overflows the block size"))]
    SizeOverflow {
        size: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("{count} elements of {size} bytes overflow the address space"))]
    CountOverflow {
        count: usize,
        size: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("failed to extend arena by {bytes} bytes"))]
    Grow {
        bytes: usize,
        #[snafu(source)]
        source: GrowError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display(
        "arena grew at {actual:#x}, expected the span to start at {expected:#x}"
    ))]
    NonContiguous {
        expected: usize,
        actual: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("arena starts at {addr:#x}, which is not 16-byte aligned"))]
    MisalignedArena {
        addr: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("{addr:#x} is not a live allocation of this heap"))]
    NotLive {
        addr: usize,
        #[snafu(implicit)]
        location: Location,
    },
}

impl AllocError {
    /// Whether the growth source ran out of memory.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Grow { .. })
    }
}

/// Rejected [`HeapConfig`](crate::HeapConfig) values.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ConfigError {
    #[snafu(display(
        "chunk size {size} must be a non-zero multiple of 16 and at least 32 bytes"
    ))]
    ChunkSize {
        size: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("the fit policy needs at least one candidate"))]
    FitCandidates {
        #[snafu(implicit)]
        location: Location,
    },
}
