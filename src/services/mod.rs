// src/services/mod.rs
pub mod generation;
pub mod history;
pub mod image_normalizer;
pub mod notifier;

pub use generation::{GenerateApi, GenerationWorkflow, HttpGenerateApi, MockGenerateApi};
pub use history::{HistoryStore, HistoryStorage, MemoryStorage, RedisStorage};
pub use image_normalizer::ImageNormalizer;
pub use notifier::{LogNotifier, Notification, Notifier};
