//! Paged marker listing backed by the page boundary cache.

use crate::cursor::{CursorScope, KeyOrderedCursorCache};
use crate::storage::{GenotypeStore, Variant, VariantFilter, VariantQuery};
use crate::{Error, Result};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct MarkerPage {
    pub records: Vec<Variant>,
    pub total_count: u64,
    pub page: u64,
    pub page_size: u64,
}

#[derive(Clone)]
pub struct MarkerLister {
    store: Arc<dyn GenotypeStore>,
    cursors: Arc<KeyOrderedCursorCache>,
    max_page_size: u64,
}

impl MarkerLister {
    pub fn new(
        store: Arc<dyn GenotypeStore>,
        cursors: Arc<KeyOrderedCursorCache>,
        max_page_size: u64,
    ) -> Self {
        Self {
            store,
            cursors,
            max_page_size,
        }
    }

    pub fn max_page_size(&self) -> u64 {
        self.max_page_size
    }

    /// Serves one key-ordered page of markers.
    ///
    /// Resumes after the cached boundary of the previous page when there is
    /// one, otherwise skips `page * page_size` records.
    pub async fn list_page(
        &self,
        dataset: &str,
        filter: &VariantFilter,
        page: u64,
        page_size: u64,
    ) -> Result<MarkerPage> {
        if page_size == 0 {
            return Err(Error::BadRequest("pageSize must be positive".to_string()));
        }
        let page_size = page_size.min(self.max_page_size);
        let first = page
            .checked_mul(page_size)
            .ok_or_else(|| Error::BadRequest(format!("page {} is out of range", page)))?;

        if !self.store.dataset_exists(dataset).await? {
            return Err(Error::NotFound(format!("dataset {}", dataset)));
        }
        let total_count = self.store.count_variants(dataset, filter).await?;

        let scope = CursorScope::new(dataset, filter.signature());
        let after = self.cursors.resolve_start(&scope, page, page_size);
        let query = VariantQuery {
            filter: filter.clone(),
            skip: if after.is_some() { 0 } else { first },
            after,
            limit: Some(page_size),
        };
        let resumed = query.after.is_some();
        let records = self.store.find_variants(dataset, &query).await?;

        if let Some(last) = records.last() {
            let offset = first + records.len() as u64 - 1;
            self.cursors.remember(&scope, offset, last.id.clone());
        }
        tracing::debug!(
            "listed {} markers of {} (page {}, resumed: {})",
            records.len(),
            dataset,
            page,
            resumed
        );

        Ok(MarkerPage {
            records,
            total_count,
            page,
            page_size,
        })
    }
}
