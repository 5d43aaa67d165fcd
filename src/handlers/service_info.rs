use super::AppState;
use crate::types::{ExportCapabilities, ServiceInfo};
use axum::{Json, extract::State};

pub async fn service_info(State(state): State<AppState>) -> Json<ServiceInfo> {
    Json(ServiceInfo {
        id: "org.example.genoexport".to_string(),
        name: "genoexport".to_string(),
        description: Some("Genotype matrix export server".to_string()),
        version: env!("CARGO_PKG_VERSION").to_string(),
        export: ExportCapabilities {
            formats: vec!["json".to_string(), "tsv".to_string()],
            max_page_size: state.lister.max_page_size(),
            max_matrix_page_size: state.max_matrix_page_size,
            artifact_retention_secs: state.sweeper.max_age().as_secs(),
        },
    })
}
