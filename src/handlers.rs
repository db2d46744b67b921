// src/handlers.rs
use crate::services::{HistoryStore, Notification, Notifier};
use crate::{AppState, errors::StudioError, models::*};
use actix_multipart::Multipart;
use actix_web::{Error, HttpResponse, web};
use chrono::Utc;
use futures_util::TryStreamExt;
use serde::Deserialize;
use std::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Per-session working state: the current normalized image, the last result
/// and the cancellation token of the in-flight generation, if any.
pub struct StudioSession {
    current_image: RwLock<Option<NormalizedImage>>,
    last_result_url: RwLock<Option<String>>,
    in_flight: Mutex<Option<CancellationToken>>,
}

impl StudioSession {
    pub fn new() -> Self {
        Self {
            current_image: RwLock::new(None),
            last_result_url: RwLock::new(None),
            in_flight: Mutex::new(None),
        }
    }

    pub fn current_image(&self) -> Option<NormalizedImage> {
        self.current_image.read().unwrap().clone()
    }

    /// Replaces the working image and drops any stale result.
    pub fn set_current_image(&self, image: Option<NormalizedImage>) {
        *self.current_image.write().unwrap() = image;
        *self.last_result_url.write().unwrap() = None;
    }

    pub fn last_result_url(&self) -> Option<String> {
        self.last_result_url.read().unwrap().clone()
    }

    pub fn set_last_result(&self, url: Option<String>) {
        *self.last_result_url.write().unwrap() = url;
    }

    /// Hands out a fresh token, or `None` when a generation is already
    /// running. At most one invocation is in flight per session.
    pub fn begin_generation(&self) -> Option<CancellationToken> {
        let mut in_flight = self.in_flight.lock().unwrap();
        if in_flight.is_some() {
            return None;
        }
        let token = CancellationToken::new();
        *in_flight = Some(token.clone());
        Some(token)
    }

    pub fn end_generation(&self) {
        *self.in_flight.lock().unwrap() = None;
    }

    pub fn cancel_in_flight(&self) -> bool {
        match &*self.in_flight.lock().unwrap() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

impl Default for StudioSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Validation failures on upload surface as toasts, not just status codes.
fn notify_upload_rejected(notifier: &dyn Notifier, err: &StudioError) {
    let notification = match err {
        StudioError::InvalidType(_) => Notification::destructive("Invalid File Type")
            .with_description("Please upload a PNG or JPG image."),
        StudioError::TooLarge(_, _) => {
            Notification::destructive("File Too Large").with_description(format!(
                "Please upload an image smaller than {}MB.",
                MAX_FILE_SIZE_MB
            ))
        }
        _ => Notification::destructive("Upload Failed").with_description(err.to_string()),
    };
    notifier.notify(notification);
}

pub async fn upload_image(
    mut payload: Multipart,
    data: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let size_limit = MAX_FILE_SIZE_MB * 1024 * 1024;

    while let Some(mut field) = payload.try_next().await? {
        let content_type = field
            .content_type()
            .map(|ct| ct.to_string())
            .unwrap_or_else(|| "application/octet-stream".to_string());

        // Stop buffering as soon as the size cap is crossed rather than
        // holding an arbitrarily large body before rejecting it.
        let mut image_data = Vec::new();
        while let Some(chunk) = field.try_next().await? {
            if image_data.len() + chunk.len() > size_limit {
                let err = StudioError::TooLarge(image_data.len() + chunk.len(), MAX_FILE_SIZE_MB);
                notify_upload_rejected(data.notifier.as_ref(), &err);
                return Err(err.into());
            }
            image_data.extend_from_slice(&chunk);
        }

        let upload = UploadedImage {
            content_type,
            data: image_data,
        };
        let normalized = match data.normalizer.normalize(&upload) {
            Ok(normalized) => normalized,
            Err(err) => {
                notify_upload_rejected(data.notifier.as_ref(), &err);
                return Err(err.into());
            }
        };

        data.session.set_current_image(Some(normalized.clone()));

        return Ok(HttpResponse::Ok().json(&normalized));
    }

    Err(StudioError::MissingImage.into())
}

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    pub prompt: String,
    pub style: String,
}

pub async fn generate_image(
    body: web::Json<GenerateRequest>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let style: Style = body.style.parse()?;

    let Some(token) = data.session.begin_generation() else {
        return Ok(HttpResponse::Conflict().json(serde_json::json!({
            "error": "Generation in progress",
            "message": "Wait for the current generation to finish or cancel it first"
        })));
    };

    let image = data.session.current_image();
    let input = GenerationInput {
        image: image.clone(),
        prompt: body.prompt.clone(),
        style,
    };

    let result = data.workflow.run(input, &token).await;
    data.session.end_generation();
    let outcome = result?;

    if let (GenerationOutcome::Success { result_image_url }, Some(source_image)) =
        (&outcome, image)
    {
        let item = HistoryItem {
            id: Uuid::new_v4(),
            source_image,
            prompt: body.prompt.clone(),
            style,
            timestamp: Utc::now(),
            result_image_url: result_image_url.clone(),
        };
        data.history.append(item).await;
        data.session.set_last_result(Some(result_image_url.clone()));
    }

    Ok(HttpResponse::Ok().json(&outcome))
}

pub async fn cancel_generation(data: web::Data<AppState>) -> Result<HttpResponse, Error> {
    let cancelled = data.session.cancel_in_flight();
    Ok(HttpResponse::Ok().json(serde_json::json!({ "cancelled": cancelled })))
}

pub async fn get_session(data: web::Data<AppState>) -> Result<HttpResponse, Error> {
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "image": data.session.current_image(),
        "lastResultUrl": data.session.last_result_url(),
    })))
}

pub async fn get_styles() -> Result<HttpResponse, Error> {
    Ok(HttpResponse::Ok().json(STYLE_OPTIONS))
}

pub async fn get_history(data: web::Data<AppState>) -> Result<HttpResponse, Error> {
    Ok(HttpResponse::Ok().json(data.history.items()))
}

pub async fn restore_history(
    path: web::Path<Uuid>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let id = path.into_inner();

    let item = data
        .history
        .find(id)
        .ok_or_else(|| actix_web::error::ErrorNotFound("History item not found"))?;

    let selection = HistoryStore::restore(&item);
    data.session.set_current_image(Some(selection.image.clone()));
    data.session
        .set_last_result(Some(selection.result_image_url.clone()));

    data.notifier.notify(
        Notification::normal("History Restored").with_description("Loaded a previous generation."),
    );

    Ok(HttpResponse::Ok().json(&selection))
}

pub async fn clear_history(data: web::Data<AppState>) -> Result<HttpResponse, Error> {
    data.history.clear().await;
    data.notifier.notify(Notification::normal("History Cleared"));
    Ok(HttpResponse::Ok().json(serde_json::json!({ "cleared": true })))
}
