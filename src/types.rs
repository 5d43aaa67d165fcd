use crate::export::{DecodeOptions, JobState};
use crate::storage::{SampleId, Variant};
use serde::{Deserialize, Serialize};

/// Query parameters for marker listings
#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MarkersQuery {
    /// Comma-separated reference sequence names
    pub linkage_group_name: Option<String>,
    pub page: Option<u64>,
    pub page_size: Option<u64>,
}

impl MarkersQuery {
    pub fn linkage_groups(&self) -> Option<Vec<String>> {
        self.linkage_group_name.as_ref().map(|names| {
            names
                .split(',')
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(str::to_string)
                .collect()
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkerPosition {
    pub marker_db_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub linkage_group_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<u64>,
}

impl From<Variant> for MarkerPosition {
    fn from(variant: Variant) -> Self {
        let (linkage_group_name, location) = match variant.position {
            Some(p) => (Some(p.sequence), Some(p.start)),
            None => (None, None),
        };
        Self {
            marker_db_id: variant.id,
            linkage_group_name,
            location,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkerPageResponse {
    pub page: u64,
    pub page_size: u64,
    pub total_count: u64,
    pub records: Vec<MarkerPosition>,
}

/// Output formats of the allele matrix endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatrixFormat {
    /// Synchronous JSON page.
    #[default]
    Json,
    /// Background export to a tab-separated artifact.
    Tsv,
}

impl MatrixFormat {
    pub fn parse(value: Option<&str>) -> crate::Result<Self> {
        match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            None | Some("") | Some("json") | Some("application/json") => Ok(MatrixFormat::Json),
            Some("tsv") | Some("text/tsv") => Ok(MatrixFormat::Tsv),
            Some(other) => Err(crate::Error::BadRequest(format!(
                "unsupported format: {}",
                other
            ))),
        }
    }
}

/// POST body of the allele matrix endpoint
#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AlleleMatrixBody {
    /// Sample ids, as numbers or numeric strings.
    #[serde(rename = "markerprofileDbId", default)]
    pub markerprofile_db_id: Vec<serde_json::Value>,
    pub marker_db_id: Option<Vec<String>>,
    pub unknown_string: Option<String>,
    pub sep_unphased: Option<String>,
    pub sep_phased: Option<String>,
    pub expand_homozygotes: Option<bool>,
    pub format: Option<String>,
    pub page: Option<u64>,
    pub page_size: Option<u64>,
}

/// Query string form of [`AlleleMatrixBody`]; list values are comma-separated.
#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AlleleMatrixQuery {
    #[serde(rename = "markerprofileDbId")]
    pub markerprofile_db_id: Option<String>,
    pub marker_db_id: Option<String>,
    pub unknown_string: Option<String>,
    pub sep_unphased: Option<String>,
    pub sep_phased: Option<String>,
    pub expand_homozygotes: Option<bool>,
    pub format: Option<String>,
    pub page: Option<u64>,
    pub page_size: Option<u64>,
}

fn split_list(value: &str) -> impl Iterator<Item = String> + '_ {
    value
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl From<AlleleMatrixQuery> for AlleleMatrixBody {
    fn from(query: AlleleMatrixQuery) -> Self {
        Self {
            markerprofile_db_id: query
                .markerprofile_db_id
                .as_deref()
                .map(|ids| split_list(ids).map(serde_json::Value::String).collect())
                .unwrap_or_default(),
            marker_db_id: query
                .marker_db_id
                .as_deref()
                .map(|ids| split_list(ids).collect()),
            unknown_string: query.unknown_string,
            sep_unphased: query.sep_unphased,
            sep_phased: query.sep_phased,
            expand_homozygotes: query.expand_homozygotes,
            format: query.format,
            page: query.page,
            page_size: query.page_size,
        }
    }
}

impl AlleleMatrixBody {
    pub fn sample_ids(&self) -> crate::Result<Vec<SampleId>> {
        self.markerprofile_db_id
            .iter()
            .map(|value| {
                let parsed = match value {
                    serde_json::Value::Number(n) => {
                        n.as_u64().and_then(|id| SampleId::try_from(id).ok())
                    }
                    serde_json::Value::String(s) => s.trim().parse::<SampleId>().ok(),
                    _ => None,
                };
                parsed.ok_or_else(|| {
                    crate::Error::BadRequest(format!("invalid markerprofileDbId: {}", value))
                })
            })
            .collect()
    }

    pub fn decode_options(&self) -> DecodeOptions {
        let defaults = DecodeOptions::default();
        DecodeOptions {
            unknown: self.unknown_string.clone().unwrap_or(defaults.unknown),
            unphased_separator: self
                .sep_unphased
                .clone()
                .unwrap_or(defaults.unphased_separator),
            phased_separator: self
                .sep_phased
                .clone()
                .unwrap_or(defaults.phased_separator),
            expand_homozygotes: self.expand_homozygotes.unwrap_or(false),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatrixPageResponse {
    pub page: u64,
    pub page_size: u64,
    pub total_count: u64,
    pub data: Vec<[String; 3]>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportStatus {
    pub job_id: String,
    pub state: JobState,
    pub percent_complete: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_url: Option<String>,
}

/// Service info response
#[derive(Debug, Serialize)]
pub struct ServiceInfo {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub version: String,
    pub export: ExportCapabilities,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportCapabilities {
    pub formats: Vec<String>,
    pub max_page_size: u64,
    pub max_matrix_page_size: u64,
    pub artifact_retention_secs: u64,
}
