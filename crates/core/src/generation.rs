//! Generation request validation and estimation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Minimum prompt length in characters (after trimming).
pub const MIN_PROMPT_LEN: usize = 10;

/// Maximum prompt length in characters (after trimming).
pub const MAX_PROMPT_LEN: usize = 1000;

/// Maximum number of images a single task may request.
pub const MAX_TOTAL_IMAGES: u32 = 100;

/// Maximum number of images per model within one task.
pub const MAX_IMAGES_PER_MODEL: u32 = 50;

/// Default output width passed to providers.
pub const DEFAULT_WIDTH: u32 = 1024;

/// Default output height passed to providers.
pub const DEFAULT_HEIGHT: u32 = 1024;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A single `(model, count)` entry of a normalized request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSelection {
    pub model_id: String,
    pub count: u32,
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a prompt and return it trimmed.
pub fn validate_prompt(prompt: &str) -> Result<String, CoreError> {
    let trimmed = prompt.trim();
    let len = trimmed.chars().count();
    if len < MIN_PROMPT_LEN {
        return Err(CoreError::Validation(format!(
            "prompt must be at least {MIN_PROMPT_LEN} characters (got {len})"
        )));
    }
    if len > MAX_PROMPT_LEN {
        return Err(CoreError::Validation(format!(
            "prompt must not exceed {MAX_PROMPT_LEN} characters (got {len})"
        )));
    }
    Ok(trimmed.to_string())
}

/// Validate the `model_id -> count` map and flatten it.
///
/// Zero counts are dropped. The result is ordered by model id so that job
/// fan-out is deterministic.
pub fn normalize_selection(
    selected: &BTreeMap<String, u32>,
) -> Result<Vec<ModelSelection>, CoreError> {
    let mut out = Vec::with_capacity(selected.len());
    let mut total: u32 = 0;

    for (model_id, &count) in selected {
        if count == 0 {
            continue;
        }
        if model_id.trim().is_empty() {
            return Err(CoreError::Validation(
                "model id must not be empty".to_string(),
            ));
        }
        if count > MAX_IMAGES_PER_MODEL {
            return Err(CoreError::Validation(format!(
                "model '{model_id}' requests {count} images, at most {MAX_IMAGES_PER_MODEL} per model allowed"
            )));
        }
        total = total.saturating_add(count);
        out.push(ModelSelection {
            model_id: model_id.clone(),
            count,
        });
    }

    if total == 0 {
        return Err(CoreError::Validation(
            "at least one image must be requested".to_string(),
        ));
    }
    if total > MAX_TOTAL_IMAGES {
        return Err(CoreError::Validation(format!(
            "{total} images requested, at most {MAX_TOTAL_IMAGES} per task allowed"
        )));
    }

    Ok(out)
}

/// Rough wall-clock estimate for a task: `ceil(total_images * per_image_secs)`.
pub fn estimate_time_secs(total_images: u32, per_image_secs: f64) -> u64 {
    (f64::from(total_images) * per_image_secs.max(0.0)).ceil() as u64
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
