use super::AppState;
use crate::{
    Result,
    auth::{Credential, ensure_readable},
    storage::VariantFilter,
    types::{MarkerPageResponse, MarkersQuery},
};
use axum::{
    Json,
    extract::{Path, Query, State},
};

pub async fn list_markers(
    State(state): State<AppState>,
    Path(dataset): Path<String>,
    credential: Credential,
    Query(query): Query<MarkersQuery>,
) -> Result<Json<MarkerPageResponse>> {
    ensure_readable(state.access.as_ref(), &credential, &dataset)?;

    let filter = match query.linkage_groups() {
        Some(names) => VariantFilter::sequences(names),
        None => VariantFilter::default(),
    };
    let page_size = query
        .page_size
        .unwrap_or_else(|| state.lister.max_page_size());

    let page = state
        .lister
        .list_page(&dataset, &filter, query.page.unwrap_or(0), page_size)
        .await?;

    Ok(Json(MarkerPageResponse {
        page: page.page,
        page_size: page.page_size,
        total_count: page.total_count,
        records: page.records.into_iter().map(Into::into).collect(),
    }))
}
