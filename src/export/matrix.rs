use super::{ExportRequest, GenotypeDecoder};
use crate::storage::{GenotypeStore, VariantFilter, VariantQuery};
use crate::{Error, Result};

/// One page of `[marker, sample, genotype]` cells.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatrixPage {
    pub rows: Vec<[String; 3]>,
    pub page: u64,
    /// Cells per page after rounding down to whole markers.
    pub page_size: u64,
    pub total_count: u64,
}

/// Serves one page of the allele matrix without a background job.
///
/// `page_size` counts cells; each page holds `page_size / samples` markers
/// (at least one). Calls are decoded without phase information.
pub async fn matrix_page(
    store: &dyn GenotypeStore,
    request: &ExportRequest,
    page: u64,
    page_size: u64,
) -> Result<MatrixPage> {
    let mut sample_ids = request.sample_ids.clone();
    sample_ids.sort_unstable();
    sample_ids.dedup();
    if sample_ids.is_empty() {
        return Err(Error::BadRequest("no samples requested".to_string()));
    }
    if page_size == 0 {
        return Err(Error::BadRequest("pageSize must be positive".to_string()));
    }
    store.samples(&request.dataset, &sample_ids).await?;

    let sample_count = sample_ids.len() as u64;
    let markers_per_page = (page_size / sample_count).max(1);
    let first = page
        .checked_mul(markers_per_page)
        .ok_or_else(|| Error::BadRequest(format!("page {} is out of range", page)))?;

    let (markers, total_markers) = match &request.marker_ids {
        Some(ids) => {
            let start = usize::try_from(first).unwrap_or(usize::MAX).min(ids.len());
            let end = start
                .saturating_add(usize::try_from(markers_per_page).unwrap_or(usize::MAX))
                .min(ids.len());
            (ids[start..end].to_vec(), ids.len() as u64)
        }
        None => {
            let total = store
                .count_variants(&request.dataset, &VariantFilter::default())
                .await?;
            let keys = store
                .find_variants(&request.dataset, &VariantQuery::page(first, markers_per_page))
                .await?
                .into_iter()
                .map(|v| v.id)
                .collect();
            (keys, total)
        }
    };

    let decoder = GenotypeDecoder::new(request.options.clone());
    let mut rows = Vec::new();
    for variant in store
        .genotypes(&request.dataset, &markers, &sample_ids)
        .await?
    {
        for run in &variant.runs {
            for sample in &sample_ids {
                let Some(call) = run.calls.get(sample) else {
                    continue;
                };
                let decoded = decoder.decode(&call.code, &variant.variant.alleles, false)?;
                rows.push([
                    variant.variant.id.clone(),
                    sample.to_string(),
                    decoder.render(&decoded),
                ]);
            }
        }
    }

    Ok(MatrixPage {
        rows,
        page,
        page_size: markers_per_page * sample_count,
        total_count: total_markers * sample_count,
    })
}
