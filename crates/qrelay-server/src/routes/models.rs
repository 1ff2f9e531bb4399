//! Model catalog.

use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};

use crate::state::AppState;

/// Creation timestamp reported for every catalog entry.
const CATALOG_CREATED: i64 = 1_732_711_466;

const OWNER: &str = "qwen";

const CODER_MODEL: (&str, &str) = ("coder-model", "Qwen3-Coder-Plus");

const VISION_MODEL_NAME: &str = "Qwen3-VL-Max";

/// One entry of `GET /v1/models`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub owned_by: String,
    pub name: String,
}

/// `GET /v1/models` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelList {
    pub object: String,
    pub data: Vec<ModelInfo>,
}

impl ModelInfo {
    fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            object: "model".to_string(),
            created: CATALOG_CREATED,
            owned_by: OWNER.to_string(),
            name: name.to_string(),
        }
    }
}

impl ModelList {
    /// The coder model plus `vision_model`, the target image requests are
    /// rerouted to.
    pub fn catalog(vision_model: &str) -> Self {
        let (coder_id, coder_name) = CODER_MODEL;
        Self {
            object: "list".to_string(),
            data: vec![
                ModelInfo::new(coder_id, coder_name),
                ModelInfo::new(vision_model, VISION_MODEL_NAME),
            ],
        }
    }
}

/// List available models.
pub async fn models_handler(State(state): State<AppState>) -> Json<ModelList> {
    Json(ModelList::catalog(&state.config().vision_model))
}
