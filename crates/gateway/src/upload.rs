//! Knowledge-file uploads over multipart form data.
//!
//! Expects a `file` part and a `profile_name` field.

use axum::{
    extract::{Multipart, State, multipart::MultipartRejection},
    response::Json,
};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::{ApiError, SharedState};

#[derive(Serialize)]
pub struct UploadResponse {
    #[serde(rename = "fileId")]
    pub file_id: String,
}

struct UploadForm {
    profile_name: String,
    file_name: String,
    bytes: Vec<u8>,
}

async fn read_form(mut multipart: Multipart) -> Result<UploadForm, ApiError> {
    let mut profile_name = None;
    let mut file = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::new(e.status(), e.body_text()))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let file_name = field.file_name().unwrap_or("upload.txt").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::new(e.status(), e.body_text()))?;
                file = Some((file_name, bytes.to_vec()));
            }
            Some("profile_name") => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| ApiError::new(e.status(), e.body_text()))?;
                profile_name = Some(value.trim().to_string());
            }
            _ => {}
        }
    }

    let Some((file_name, bytes)) = file else {
        return Err(ApiError::bad_request("missing `file` part"));
    };
    let Some(profile_name) = profile_name.filter(|p| !p.is_empty()) else {
        return Err(ApiError::bad_request("profile name is required"));
    };

    Ok(UploadForm {
        profile_name,
        file_name,
        bytes,
    })
}

pub async fn upload_handler(
    State(state): State<SharedState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, ApiError> {
    let multipart = multipart.map_err(|rejection| {
        warn!(error = %rejection, "Rejected upload body");
        ApiError::bad_request(rejection.body_text())
    })?;
    let form = read_form(multipart).await?;

    info!(
        profile = %form.profile_name,
        file_name = %form.file_name,
        size = form.bytes.len(),
        "Upload received"
    );

    let cancel = state.shutdown.child_token();
    let file_id = state
        .uploader
        .upload(&form.profile_name, &form.file_name, form.bytes, &cancel)
        .await
        .map_err(|e| {
            error!(profile = %form.profile_name, error = %e, "Upload failed");
            ApiError::from(e)
        })?;

    Ok(Json(UploadResponse { file_id }))
}
