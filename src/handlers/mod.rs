mod allele_matrix;
mod markers;
mod service_info;

pub use allele_matrix::{get_allele_matrix, get_export_status, post_allele_matrix};
pub use markers::list_markers;
pub use service_info::service_info;

use crate::{Config, Error};
use crate::auth::{AccessPolicy, JobIdIssuer, OpenAccess};
use crate::cursor::KeyOrderedCursorCache;
use crate::export::{
    ArtifactRetentionSweeper, ChunkSizer, ExportJobRegistry, ExportJobRunner, RunnerLimits,
};
use crate::listing::MarkerLister;
use crate::storage::GenotypeStore;
use axum::{
    Router,
    extract::Request,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{services::ServeDir, trace::TraceLayer};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn GenotypeStore>,
    pub access: Arc<dyn AccessPolicy>,
    pub cursors: Arc<KeyOrderedCursorCache>,
    pub lister: MarkerLister,
    pub runner: ExportJobRunner,
    pub sweeper: ArtifactRetentionSweeper,
    pub job_retention: Duration,
    pub max_matrix_page_size: u64,
    pub base_url: String,
}

impl AppState {
    pub fn from_config(store: Arc<dyn GenotypeStore>, config: &Config) -> Self {
        let secret = match &config.job_secret {
            Some(secret) => secret.as_bytes().to_vec(),
            None => JobIdIssuer::generate_secret(),
        };
        let cursors = Arc::new(KeyOrderedCursorCache::new(config.cursor_ttl()));
        let runner = ExportJobRunner::new(
            store.clone(),
            Arc::new(ExportJobRegistry::new()),
            Arc::new(JobIdIssuer::new(secret)),
            ChunkSizer::new(config.chunk_budget_bytes),
            config.export_dir.clone(),
            RunnerLimits {
                max_running: config.max_running_exports,
                max_pending: config.max_pending_exports,
            },
        );

        Self {
            lister: MarkerLister::new(store.clone(), cursors.clone(), config.max_page_size),
            store,
            access: Arc::new(OpenAccess),
            cursors,
            runner,
            sweeper: ArtifactRetentionSweeper::new(config.artifact_retention()),
            job_retention: config.job_retention(),
            max_matrix_page_size: config.max_matrix_page_size,
            base_url: config.effective_base_url(),
        }
    }

    pub fn with_access_policy(mut self, access: Arc<dyn AccessPolicy>) -> Self {
        self.access = access;
        self
    }
}

/// Only finished artifacts are downloadable; partial files stay hidden.
async fn finished_artifacts_only(request: Request, next: Next) -> Response {
    if request.uri().path().ends_with(".tsv") {
        next.run(request).await
    } else {
        Error::NotFound(format!("artifact {}", request.uri().path())).into_response()
    }
}

pub fn create_router(state: AppState) -> Router {
    let artifacts = ServiceBuilder::new()
        .layer(middleware::from_fn(finished_artifacts_only))
        .service(ServeDir::new(state.runner.export_dir()));

    Router::new()
        .route("/:dataset/markers", get(list_markers))
        .route(
            "/:dataset/allelematrix",
            get(get_allele_matrix).post(post_allele_matrix),
        )
        .route(
            "/:dataset/allelematrix/status/:job_id",
            get(get_export_status),
        )
        .route("/", get(service_info))
        .route("/service-info", get(service_info))
        .nest_service("/exports", artifacts)
        .with_state(state)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}
