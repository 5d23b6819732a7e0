use actix_files::Files;
use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use futures::{StreamExt, TryStreamExt};
use log::info;
use shared::{HealthResponse, ModelSelection, PredictResponse, PredictionResults, RecommendResponse};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;

use crate::config::AppConfig;
use crate::error::ApiError;
use crate::inference::ModelRegistry;
use crate::pipeline::run_selection;
use crate::storage::archive::{extract_archive, ArchiveKind, ArchiveLimits};
use crate::storage::images::{is_image, list_images};
use crate::storage::session::SessionStore;
use crate::trends::TrendService;

const MAX_TEXT_FIELD_BYTES: usize = 4 * 1024;
const EXTRACTED_DIR: &str = "extracted";

pub fn configure_routes(cfg: &mut web::ServiceConfig, predictions_dir: PathBuf) {
    cfg.service(web::resource("/predict/").route(web::post().to(predict)))
        .service(web::resource("/recommend-binary/").route(web::post().to(recommend_binary)))
        .service(web::resource("/fetch_trends/{keyword}").route(web::get().to(fetch_trends)))
        .service(web::resource("/health").route(web::get().to(health)))
        .service(Files::new("/predictions", predictions_dir));
}

/// The uploaded file, spooled to a temp file until it has a home.
struct UploadedFile {
    filename: String,
    temp: NamedTempFile,
}

#[derive(Default)]
struct UploadForm {
    fields: HashMap<String, String>,
    file: Option<UploadedFile>,
}

impl UploadForm {
    fn text(&self, name: &str) -> Result<&str, ApiError> {
        self.fields
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ApiError::BadRequest(format!("Missing field '{}'", name)))
    }

    fn take_file(&mut self) -> Result<UploadedFile, ApiError> {
        self.file
            .take()
            .ok_or_else(|| ApiError::BadRequest("Missing field 'file'".into()))
    }
}

/// Keeps only the last path component of a client-supplied file name.
fn safe_filename(raw: Option<&str>) -> String {
    raw.and_then(|name| Path::new(name).file_name())
        .map(|name| name.to_string_lossy().into_owned())
        .filter(|name| !name.starts_with('.'))
        .unwrap_or_else(|| "upload".to_string())
}

/// Streams a multipart body: text fields into memory, the `file` field into a
/// temp file under `spool_dir`. The whole body is capped at `max_bytes`.
async fn read_form(
    mut payload: Multipart,
    spool_dir: &Path,
    max_bytes: usize,
) -> Result<UploadForm, ApiError> {
    std::fs::create_dir_all(spool_dir)?;
    let mut form = UploadForm::default();
    let mut received = 0usize;

    while let Some(mut field) = payload.try_next().await? {
        let name = field.name().unwrap_or_default().to_string();
        if name == "file" {
            let filename = safe_filename(
                field
                    .content_disposition()
                    .and_then(|cd| cd.get_filename()),
            );
            let mut temp = NamedTempFile::new_in(spool_dir)?;
            while let Some(chunk) = field.next().await {
                let data = chunk?;
                received += data.len();
                if received > max_bytes {
                    return Err(ApiError::PayloadTooLarge(max_bytes));
                }
                temp.write_all(&data)?;
            }
            temp.flush()?;
            form.file = Some(UploadedFile { filename, temp });
        } else {
            let mut value = Vec::new();
            while let Some(chunk) = field.next().await {
                let data = chunk?;
                received += data.len();
                if received > max_bytes || value.len() + data.len() > MAX_TEXT_FIELD_BYTES {
                    return Err(ApiError::PayloadTooLarge(max_bytes));
                }
                value.extend_from_slice(&data);
            }
            let value = String::from_utf8(value)
                .map_err(|_| ApiError::BadRequest(format!("Field '{}' is not UTF-8", name)))?;
            form.fields.insert(name, value);
        }
    }
    Ok(form)
}

/// Runs blocking work on the thread pool, giving up after `timeout`.
async fn run_blocking<T, F>(timeout: Duration, work: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    tokio::time::timeout(timeout, web::block(work))
        .await
        .map_err(|_| ApiError::Timeout(timeout.as_secs()))??
}

async fn predict(
    config: web::Data<AppConfig>,
    sessions: web::Data<SessionStore>,
    models: web::Data<ModelRegistry>,
    payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    let mut form =
        read_form(payload, sessions.uploads_root(), config.limits.max_upload_bytes).await?;
    let user_id = form.text("user_id")?.to_string();
    let selection: ModelSelection = form.text("model_type")?.parse()?;
    let upload = form.take_file()?;

    let session = sessions.open(&user_id).await?;
    let upload_path = session.upload_dir.join(&upload.filename);
    upload
        .temp
        .persist(&upload_path)
        .map_err(|e| ApiError::from(e.error))?;
    info!("Saved upload {} for user {}", upload_path.display(), user_id);

    let limits = ArchiveLimits::from(&config.limits);
    let chain_mode = config.pipeline.chain_mode;
    let models = models.get_ref().clone();

    // The session (and with it the user's lock) moves into the worker so it
    // is released only when the work is done, even if the request times out.
    let results: PredictionResults = run_blocking(config.limits.request_timeout(), move || {
        let session = session;
        let images = if ArchiveKind::from_path(&upload_path).is_some() {
            let extracted = session.upload_dir.join(EXTRACTED_DIR);
            extract_archive(&upload_path, &extracted, &limits)?;
            list_images(&extracted)?
        } else if is_image(&upload_path) {
            vec![upload_path]
        } else {
            return Err(ApiError::BadRequest(format!(
                "Unsupported file type: {}",
                upload_path.display()
            )));
        };
        info!("Running {:?} on {} images", selection, images.len());
        Ok(run_selection(
            selection,
            &images,
            &models,
            &session.prediction_dir,
            chain_mode,
        )?)
    })
    .await?;

    Ok(HttpResponse::Ok().json(PredictResponse { user_id, results }))
}

async fn recommend_binary(
    config: web::Data<AppConfig>,
    sessions: web::Data<SessionStore>,
    models: web::Data<ModelRegistry>,
    payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    let recommender = models
        .recommender
        .clone()
        .ok_or_else(|| ApiError::ModelUnavailable("recommendation model is not loaded".into()))?;
    let mut form =
        read_form(payload, sessions.uploads_root(), config.limits.max_upload_bytes).await?;
    let upload = form.take_file()?;

    // The temp file is deleted when `upload` drops, on every path.
    let recommended_images = run_blocking(config.limits.request_timeout(), move || {
        Ok(recommender.recommend_encoded(upload.temp.path())?)
    })
    .await?;
    info!("Returning {} recommendations", recommended_images.len());

    Ok(HttpResponse::Ok().json(RecommendResponse { recommended_images }))
}

async fn fetch_trends(
    trends: web::Data<TrendService>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let keyword = path.into_inner();
    info!("Fetching trends for '{}'", keyword);
    let report = trends.report(&keyword).await?;
    Ok(HttpResponse::Ok().json(report))
}

async fn health(models: web::Data<ModelRegistry>) -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse {
        status: "ok".to_string(),
        detectors: models.detectors.is_some(),
        textile: models.textile.is_some(),
        recommender: models.recommender.is_some(),
    })
}
