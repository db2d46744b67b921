// src/errors.rs
use actix_web::{HttpResponse, ResponseError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StudioError {
    #[error("Invalid file type: {0}. Please upload a PNG or JPG image")]
    InvalidType(String),

    #[error("File too large: {0} bytes exceeds the {1}MB limit")]
    TooLarge(usize, usize),

    #[error("Please upload an image first")]
    MissingImage,

    #[error("Please enter a prompt")]
    MissingPrompt,

    #[error("Unknown style: {0}")]
    InvalidStyle(String),

    #[error("Image processing error: {0}")]
    ImageProcessing(String),

    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl ResponseError for StudioError {
    fn error_response(&self) -> HttpResponse {
        match self {
            StudioError::InvalidType(_)
            | StudioError::TooLarge(_, _)
            | StudioError::InvalidStyle(_)
            | StudioError::ImageProcessing(_) => {
                HttpResponse::BadRequest().json(serde_json::json!({
                    "error": "Validation error",
                    "message": self.to_string()
                }))
            }
            StudioError::MissingImage | StudioError::MissingPrompt => {
                HttpResponse::BadRequest().json(serde_json::json!({
                    "error": "Missing input",
                    "message": self.to_string()
                }))
            }
            StudioError::Generation(_) => {
                HttpResponse::ServiceUnavailable().json(serde_json::json!({
                    "error": "Generation service error",
                    "message": self.to_string()
                }))
            }
            StudioError::Storage(_) => HttpResponse::InternalServerError().json(
                serde_json::json!({
                    "error": "Storage error",
                    "message": self.to_string()
                }),
            ),
            StudioError::Serialization(_) => HttpResponse::InternalServerError().json(
                serde_json::json!({
                    "error": "Data processing error",
                    "message": self.to_string()
                }),
            ),
        }
    }
}
