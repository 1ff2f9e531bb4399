//! API routes.

pub mod chat;
pub mod health;
pub mod models;

pub use chat::{chat_completions_handler, forward_handler};
pub use health::health_routes;
pub use models::{ModelInfo, ModelList, models_handler};
