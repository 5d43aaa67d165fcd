use super::{
    GenotypeStore, Sample, SampleId, Variant, VariantFilter, VariantGenotypes, VariantQuery,
    VariantRun,
};
use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::path::Path;
use tokio::fs;

/// On-disk shape of one dataset (`<name>.json` in the data directory).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatasetDocument {
    #[serde(default)]
    pub variants: Vec<Variant>,
    #[serde(default)]
    pub samples: Vec<Sample>,
    #[serde(default)]
    pub runs: Vec<VariantRun>,
}

struct Dataset {
    variants: BTreeMap<String, Variant>,
    samples: BTreeMap<SampleId, Sample>,
    runs: HashMap<String, Vec<VariantRun>>,
    avg_record_bytes: u64,
}

impl Dataset {
    fn from_document(doc: DatasetDocument) -> Self {
        let avg_record_bytes = if doc.runs.is_empty() {
            1
        } else {
            let total: usize = doc
                .runs
                .iter()
                .map(|r| serde_json::to_vec(r).map(|b| b.len()).unwrap_or(0))
                .sum();
            (total / doc.runs.len()).max(1) as u64
        };

        let mut runs: HashMap<String, Vec<VariantRun>> = HashMap::new();
        for run in doc.runs {
            runs.entry(run.variant_id.clone()).or_default().push(run);
        }

        Self {
            variants: doc
                .variants
                .into_iter()
                .map(|v| (v.id.clone(), v))
                .collect(),
            samples: doc.samples.into_iter().map(|s| (s.id, s)).collect(),
            runs,
            avg_record_bytes,
        }
    }
}

/// In-memory store holding datasets loaded from local JSON documents.
#[derive(Default)]
pub struct LocalStore {
    datasets: HashMap<String, Dataset>,
}

impl LocalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads every `*.json` file in `data_dir`; the file stem names the dataset.
    pub async fn open(data_dir: &Path) -> Result<Self> {
        let mut store = Self::new();
        let mut entries = fs::read_dir(data_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let raw = fs::read(&path).await?;
            let doc: DatasetDocument = serde_json::from_slice(&raw).map_err(|e| {
                Error::Internal(format!("invalid dataset {}: {}", path.display(), e))
            })?;
            tracing::info!(
                "loaded dataset {} ({} variants, {} samples)",
                name,
                doc.variants.len(),
                doc.samples.len()
            );
            store.insert_dataset(name, doc);
        }
        Ok(store)
    }

    pub fn insert_dataset(&mut self, name: impl Into<String>, doc: DatasetDocument) {
        self.datasets.insert(name.into(), Dataset::from_document(doc));
    }

    pub fn with_dataset(mut self, name: impl Into<String>, doc: DatasetDocument) -> Self {
        self.insert_dataset(name, doc);
        self
    }

    fn dataset(&self, name: &str) -> Result<&Dataset> {
        self.datasets
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("dataset {}", name)))
    }
}

#[async_trait]
impl GenotypeStore for LocalStore {
    async fn dataset_exists(&self, dataset: &str) -> Result<bool> {
        Ok(self.datasets.contains_key(dataset))
    }

    async fn find_variants(&self, dataset: &str, query: &VariantQuery) -> Result<Vec<Variant>> {
        let ds = self.dataset(dataset)?;
        let lower = match &query.after {
            Some(key) => Bound::Excluded(key.as_str()),
            None => Bound::Unbounded,
        };
        let limit = query
            .limit
            .map(|l| usize::try_from(l).unwrap_or(usize::MAX))
            .unwrap_or(usize::MAX);
        let skip = usize::try_from(query.skip).unwrap_or(usize::MAX);

        Ok(ds
            .variants
            .range::<str, _>((lower, Bound::Unbounded))
            .map(|(_, v)| v)
            .filter(|v| query.filter.matches(v))
            .skip(skip)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn count_variants(&self, dataset: &str, filter: &VariantFilter) -> Result<u64> {
        let ds = self.dataset(dataset)?;
        Ok(ds.variants.values().filter(|v| filter.matches(v)).count() as u64)
    }

    async fn variant_keys(&self, dataset: &str) -> Result<Vec<String>> {
        Ok(self.dataset(dataset)?.variants.keys().cloned().collect())
    }

    async fn samples(&self, dataset: &str, ids: &[SampleId]) -> Result<Vec<Sample>> {
        let ds = self.dataset(dataset)?;
        ids.iter()
            .map(|id| {
                ds.samples
                    .get(id)
                    .cloned()
                    .ok_or_else(|| Error::NotFound(format!("sample {}", id)))
            })
            .collect()
    }

    async fn genotypes(
        &self,
        dataset: &str,
        variant_ids: &[String],
        samples: &[SampleId],
    ) -> Result<Vec<VariantGenotypes>> {
        let ds = self.dataset(dataset)?;
        variant_ids
            .iter()
            .map(|id| {
                let variant = ds
                    .variants
                    .get(id)
                    .ok_or_else(|| Error::NotFound(format!("marker {}", id)))?;
                let runs = ds
                    .runs
                    .get(id)
                    .map(|runs| {
                        runs.iter()
                            .map(|run| VariantRun {
                                calls: run
                                    .calls
                                    .iter()
                                    .filter(|(sample, _)| samples.contains(sample))
                                    .map(|(sample, call)| (*sample, call.clone()))
                                    .collect(),
                                ..run.clone()
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                Ok(VariantGenotypes {
                    variant: variant.clone(),
                    runs,
                })
            })
            .collect()
    }

    async fn avg_record_bytes(&self, dataset: &str) -> Result<u64> {
        Ok(self.dataset(dataset)?.avg_record_bytes)
    }
}
