use super::AppState;
use crate::{
    Error, Result,
    auth::{Credential, ensure_readable},
    export::{ExportJob, ExportJobRunner, ExportRequest, JobState, matrix_page},
    types::{AlleleMatrixBody, AlleleMatrixQuery, ExportStatus, MatrixFormat, MatrixPageResponse},
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};

pub async fn post_allele_matrix(
    State(state): State<AppState>,
    Path(dataset): Path<String>,
    credential: Credential,
    Json(body): Json<AlleleMatrixBody>,
) -> Result<Response> {
    allele_matrix(state, dataset, credential, body).await
}

pub async fn get_allele_matrix(
    State(state): State<AppState>,
    Path(dataset): Path<String>,
    credential: Credential,
    Query(query): Query<AlleleMatrixQuery>,
) -> Result<Response> {
    allele_matrix(state, dataset, credential, query.into()).await
}

/// Allele matrix: a background TSV export, or one synchronous JSON page.
async fn allele_matrix(
    state: AppState,
    dataset: String,
    credential: Credential,
    body: AlleleMatrixBody,
) -> Result<Response> {
    ensure_readable(state.access.as_ref(), &credential, &dataset)?;

    let format = MatrixFormat::parse(body.format.as_deref())?;
    let sample_ids = body.sample_ids()?;
    if sample_ids.is_empty() {
        return Err(Error::BadRequest("markerprofileDbId is required".to_string()));
    }
    let request = ExportRequest {
        dataset,
        sample_ids,
        marker_ids: body.marker_db_id.clone(),
        options: body.decode_options(),
    };

    match format {
        MatrixFormat::Tsv => {
            let swept = state.sweeper.sweep(state.runner.export_dir()).await;
            let pruned = state
                .runner
                .registry()
                .prune_finished(state.job_retention)
                .await;
            if swept.removed + swept.failed + pruned > 0 {
                tracing::debug!(
                    "retention: {} artifacts removed, {} not removable, {} job records dropped",
                    swept.removed,
                    swept.failed,
                    pruned
                );
            }

            let job_id = state.runner.start(&credential, request).await?;
            let status = ExportStatus {
                job_id,
                state: JobState::Running,
                percent_complete: 0,
                message: None,
                artifact_url: None,
            };
            Ok((StatusCode::ACCEPTED, Json(status)).into_response())
        }
        MatrixFormat::Json => {
            let page_size = body
                .page_size
                .unwrap_or(state.max_matrix_page_size)
                .min(state.max_matrix_page_size);
            let page = matrix_page(
                state.store.as_ref(),
                &request,
                body.page.unwrap_or(0),
                page_size,
            )
            .await?;
            Ok(Json(MatrixPageResponse {
                page: page.page,
                page_size: page.page_size,
                total_count: page.total_count,
                data: page.rows,
            })
            .into_response())
        }
    }
}

pub async fn get_export_status(
    State(state): State<AppState>,
    Path((dataset, job_id)): Path<(String, String)>,
    credential: Credential,
) -> Result<Json<ExportStatus>> {
    ensure_readable(state.access.as_ref(), &credential, &dataset)?;

    let job = state.runner.poll(&credential, &dataset, &job_id).await?;
    let artifact_url = match job.state {
        JobState::Complete => Some(artifact_url(&state.base_url, &job.id)?),
        JobState::Running | JobState::Failed => None,
    };

    Ok(Json(status_of(job, artifact_url)))
}

fn status_of(job: ExportJob, artifact_url: Option<String>) -> ExportStatus {
    ExportStatus {
        job_id: job.id,
        state: job.state,
        percent_complete: job.percent_complete,
        message: job.error,
        artifact_url,
    }
}

fn artifact_url(base_url: &str, job_id: &str) -> Result<String> {
    let base = url::Url::parse(&format!("{}/", base_url.trim_end_matches('/')))
        .map_err(|e| Error::Internal(format!("invalid base url {}: {}", base_url, e)))?;
    let url = base
        .join(&format!(
            "exports/{}",
            ExportJobRunner::artifact_file_name(job_id)
        ))
        .map_err(|e| Error::Internal(format!("invalid artifact url: {}", e)))?;
    Ok(url.to_string())
}
