//! Link-to-Cable Inference Engine
//!
//! Takes traceroute-derived IP links, per-IP geolocation cluster maps,
//! and the cable atlas, and infers for each oceanic-suspect link which
//! submarine cable it most plausibly traverses: candidate search over a
//! landing-point spatial index, composite plausibility scoring, then
//! connectivity-checked selection with terrestrial reclassification.

use cable_atlas::AtlasError;
use link_classifier::categorize::CategorizerConfig;
use link_classifier::Category;
use std::path::PathBuf;
use thiserror::Error;

pub mod candidates;
pub mod io;
pub mod pipeline;
pub mod scoring;
pub mod selection;

pub use candidates::SearchConfig;
pub use scoring::ScoreWeights;

#[derive(Error, Debug)]
pub enum MapperError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Atlas(#[from] AtlasError),
    #[error("unsupported checkpoint format version {found} in {path:?} (expected {expected})")]
    CheckpointVersion {
        path: PathBuf,
        found: u32,
        expected: u32,
    },
    #[error("unsupported output format version {found} in {path:?} (expected {expected})")]
    OutputVersion {
        path: PathBuf,
        found: u32,
        expected: u32,
    },
    #[error(
        "checkpoint {path:?} belongs to {found_category} shard {found_shard}, \
         expected {expected_category} shard {expected_shard}"
    )]
    CheckpointMismatch {
        path: PathBuf,
        found_category: Category,
        found_shard: usize,
        expected_category: Category,
        expected_shard: usize,
    },
}

pub type Result<T> = std::result::Result<T, MapperError>;

/// Everything tunable about a mapping run, with the production defaults
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Max penalty ratio for a source to pass SoL validation
    pub sol_threshold: f64,
    pub categorizer: CategorizerConfig,
    pub search: SearchConfig,
    pub weights: ScoreWeights,
    /// Relative score threshold for selection pruning (0.05 = keep
    /// within 5% of the best, inclusive)
    pub selection_threshold: f64,
    /// Checkpoint after this many links per category shard
    pub checkpoint_every: usize,
    /// Cables entering service after this year are ignored
    pub analysis_year: i32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sol_threshold: 0.05,
            categorizer: CategorizerConfig::default(),
            search: SearchConfig::default(),
            weights: ScoreWeights::default(),
            selection_threshold: 0.05,
            checkpoint_every: 500,
            analysis_year: 2024,
        }
    }
}

/// Per-run skip and outcome tallies, reported at the end of a run
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize,
)]
pub struct RunStats {
    pub total_links: usize,
    pub mapped: usize,
    pub skipped_no_geolocation: usize,
    pub skipped_penalized: usize,
    pub skipped_no_candidate: usize,
    pub reclassified_to_terrestrial: usize,
}

impl RunStats {
    pub fn absorb(&mut self, other: &RunStats) {
        self.total_links += other.total_links;
        self.mapped += other.mapped;
        self.skipped_no_geolocation += other.skipped_no_geolocation;
        self.skipped_penalized += other.skipped_penalized;
        self.skipped_no_candidate += other.skipped_no_candidate;
        self.reclassified_to_terrestrial += other.reclassified_to_terrestrial;
    }
}
