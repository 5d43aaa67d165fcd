//! Genotype matrix export engine.
//!
//! - [`ChunkSizer`] - records per storage round trip
//! - [`GenotypeDecoder`] - genotype codes to allele strings, with phase tracking
//! - [`ExportJobRunner`] - background export lifecycle and bounded admission
//! - [`ExportJobRegistry`] - job id to progress record
//! - [`ArtifactRetentionSweeper`] - removal of expired artifacts
//! - [`matrix_page`] - synchronous, paged alternative to a background export

mod chunk;
mod decoder;
mod matrix;
mod registry;
mod retention;
mod runner;

pub use chunk::ChunkSizer;
pub use decoder::{DecodeOptions, DecodedGenotype, GenotypeDecoder, PhaseState};
pub use matrix::{MatrixPage, matrix_page};
pub use registry::{ExportJob, ExportJobRegistry, JobState};
pub use retention::{ArtifactRetentionSweeper, SweepReport};
pub use runner::{ExportJobRunner, MATRIX_HEADER, RunnerLimits};

use crate::storage::SampleId;

/// What to export: samples of one dataset, optionally restricted to markers.
#[derive(Debug, Clone)]
pub struct ExportRequest {
    pub dataset: String,
    pub sample_ids: Vec<SampleId>,
    /// Every marker of the dataset, in key order, when `None`.
    pub marker_ids: Option<Vec<String>>,
    pub options: DecodeOptions,
}
