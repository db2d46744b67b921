// src/models.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::StudioError;

pub const MAX_FILE_SIZE_MB: usize = 10;
pub const MAX_DIMENSION_PX: u32 = 1920;
pub const MAX_HISTORY_ITEMS: usize = 5;
pub const RETRY_ATTEMPTS: u32 = 3;

pub const STYLE_OPTIONS: [Style; 5] = [
    Style::Editorial,
    Style::Streetwear,
    Style::Vintage,
    Style::Cyberpunk,
    Style::Fantasy,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Style {
    Editorial,
    Streetwear,
    Vintage,
    Cyberpunk,
    Fantasy,
}

impl Style {
    pub fn as_str(&self) -> &'static str {
        match self {
            Style::Editorial => "Editorial",
            Style::Streetwear => "Streetwear",
            Style::Vintage => "Vintage",
            Style::Cyberpunk => "Cyberpunk",
            Style::Fantasy => "Fantasy",
        }
    }
}

impl std::fmt::Display for Style {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Style {
    type Err = StudioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        STYLE_OPTIONS
            .iter()
            .copied()
            .find(|style| style.as_str() == s)
            .ok_or_else(|| StudioError::InvalidStyle(s.to_string()))
    }
}

/// Raw upload as it arrives from the multipart field, before any validation.
#[derive(Debug, Clone)]
pub struct UploadedImage {
    pub content_type: String,
    pub data: Vec<u8>,
}

/// Decoded, bounded and re-encoded image, carried as a JPEG data URL.
/// Both dimensions are guaranteed to be <= MAX_DIMENSION_PX.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedImage {
    pub width: u32,
    pub height: u32,
    pub data_url: String,
}

/// Inputs as the controller hands them to the workflow; the image may be
/// absent when the user never uploaded one.
#[derive(Debug, Clone)]
pub struct GenerationInput {
    pub image: Option<NormalizedImage>,
    pub prompt: String,
    pub style: Style,
}

/// Validated request parameters, immutable for the whole attempt sequence.
#[derive(Debug, Clone)]
pub struct GenerationRequestParams {
    pub image: NormalizedImage,
    pub prompt: String,
    pub style: Style,
}

/// Success payload of the external generation capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedImage {
    pub image_url: String,
}

/// Terminal result of one workflow invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum GenerationOutcome {
    #[serde(rename_all = "camelCase")]
    Success { result_image_url: String },
    Cancelled,
    #[serde(rename_all = "camelCase")]
    Failed { reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryItem {
    pub id: Uuid,
    pub source_image: NormalizedImage,
    pub prompt: String,
    pub style: Style,
    pub timestamp: DateTime<Utc>,
    pub result_image_url: String,
}

/// Projection of a history item back into the input state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoredSelection {
    pub image: NormalizedImage,
    pub prompt: String,
    pub style: Style,
    pub result_image_url: String,
}
