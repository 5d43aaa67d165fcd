//! Storage backend abstraction for genotype datasets.
//!
//! The export engine never talks to a database directly. It consumes the
//! [`GenotypeStore`] trait: ordered range queries over variants, counts,
//! sample lookups and batched genotype retrieval. Anything able to answer
//! those (a document database, a columnar store, an in-memory fixture) can
//! back the service.
//!
//! # Implementations
//!
//! - [`LocalStore`] - datasets loaded from JSON documents on local disk
//!
//! # Example
//!
//! ```no_run
//! use genoexport::storage::{GenotypeStore, LocalStore, VariantQuery};
//! use std::path::Path;
//!
//! # async fn run() -> genoexport::Result<()> {
//! let store = LocalStore::open(Path::new("./data")).await?;
//! let first_page = store.find_variants("demo", &VariantQuery::page(0, 100)).await?;
//! # Ok(())
//! # }
//! ```

mod local;

pub use local::{DatasetDocument, LocalStore};

use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub type SampleId = u32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferencePosition {
    pub sequence: String,
    pub start: u64,
}

/// A marker: one genomic position with its allele dictionary.
///
/// Allele codes in genotype calls index into `alleles`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    pub id: String,
    #[serde(default)]
    pub position: Option<ReferencePosition>,
    #[serde(default)]
    pub alleles: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sample {
    pub id: SampleId,
    pub project_id: u32,
    pub individual: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SampleGenotype {
    /// Allele indices such as `0/1`; empty means no call.
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub phase_group: Option<String>,
}

/// Genotypes produced for one variant by one sequencing run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantRun {
    pub variant_id: String,
    pub project_id: u32,
    pub run: String,
    #[serde(default)]
    pub calls: HashMap<SampleId, SampleGenotype>,
}

#[derive(Debug, Clone)]
pub struct VariantGenotypes {
    pub variant: Variant,
    pub runs: Vec<VariantRun>,
}

/// Restriction applied to variant listings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariantFilter {
    /// Reference sequence (linkage group) names; `None` matches every variant.
    pub sequences: Option<Vec<String>>,
}

impl VariantFilter {
    pub fn sequences(names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            sequences: Some(names.into_iter().map(Into::into).collect()),
        }
    }

    pub fn matches(&self, variant: &Variant) -> bool {
        match &self.sequences {
            None => true,
            Some(names) => variant
                .position
                .as_ref()
                .is_some_and(|p| names.iter().any(|n| *n == p.sequence)),
        }
    }

    /// Stable text form, equal for filters that select the same variants.
    pub fn signature(&self) -> String {
        match &self.sequences {
            None => String::new(),
            Some(names) => {
                let mut names = names.clone();
                names.sort();
                names.dedup();
                format!("seq:{}", names.join(","))
            }
        }
    }
}

/// An ordered range query over variant keys.
#[derive(Debug, Clone, Default)]
pub struct VariantQuery {
    pub filter: VariantFilter,
    /// Only keys strictly greater than this one.
    pub after: Option<String>,
    pub skip: u64,
    pub limit: Option<u64>,
}

impl VariantQuery {
    pub fn page(skip: u64, limit: u64) -> Self {
        Self {
            skip,
            limit: Some(limit),
            ..Default::default()
        }
    }
}

/// Storage backend trait for genotype datasets
#[async_trait]
pub trait GenotypeStore: Send + Sync {
    async fn dataset_exists(&self, dataset: &str) -> Result<bool>;

    /// Variants matching the query, sorted by key.
    async fn find_variants(&self, dataset: &str, query: &VariantQuery) -> Result<Vec<Variant>>;

    async fn count_variants(&self, dataset: &str, filter: &VariantFilter) -> Result<u64>;

    /// Every variant key of the dataset, in key order.
    async fn variant_keys(&self, dataset: &str) -> Result<Vec<String>>;

    async fn samples(&self, dataset: &str, ids: &[SampleId]) -> Result<Vec<Sample>>;

    /// Genotypes of `samples` at `variant_ids`, in the order the ids were given.
    async fn genotypes(
        &self,
        dataset: &str,
        variant_ids: &[String],
        samples: &[SampleId],
    ) -> Result<Vec<VariantGenotypes>>;

    /// Estimated size in bytes of one genotype record.
    async fn avg_record_bytes(&self, dataset: &str) -> Result<u64>;
}
