//! wavemap core library
//!
//! Sketch-and-map homology mapping (minmer sampling, hypergeometric
//! candidate admission, ANI estimation, plane-sweep filtering) and tiled
//! wavefront alignment with patching, plus the IO and pipeline plumbing
//! that ties the two stages together.

pub mod config;
pub mod ids;
pub mod index;
pub mod map;
pub mod paf;
pub mod pipeline;
pub mod sam;
pub mod sketch;
pub mod store;
pub mod types;
pub mod wfa;
pub mod wflign;

// Re-export commonly used types
pub use config::{AlignConfig, DualPenalties, FilterMode, HgFilter, MapConfig, Penalties, PipelineContext};
pub use ids::SequenceIdManager;
pub use index::{IndexError, MinmerIndex};
pub use map::Mapper;
pub use paf::{PafError, PafRecord};
pub use pipeline::{Inputs, PipelineError};
pub use store::{SequenceStore, StoreError, StoreHandle};
pub use types::{Alignment, Cigar, CigarOp, Mapping, Minmer, SeqId, Strand};
pub use wfa::{WavefrontAligner, WfaError};
pub use wflign::{Wflign, WflignJob, WflignState};

/// Version information for the wavemap core library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
