//! Per-model point pricing.
//!
//! Every generation model is priced per image. Model ids that are not in the
//! table are charged the mid-tier fallback rate instead of being rejected;
//! callers should log when [`ModelRate::is_fallback`] is set so unexpected ids
//! stay visible.

use std::collections::HashMap;

use serde::Serialize;

use crate::generation::ModelSelection;
use crate::types::Points;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Price applied to model ids missing from the rate table.
pub const FALLBACK_POINTS_PER_IMAGE: Points = 10;

/// Built-in rate table: `(model_id, provider, points_per_image)`.
const DEFAULT_RATES: &[(&str, &str, Points)] = &[
    ("flux-schnell", "replicate", 5),
    ("sdxl", "stability", 5),
    ("flux-dev", "replicate", 10),
    ("imagen-3", "google", 10),
    ("ideogram-v2", "ideogram", 15),
    ("flux-pro", "replicate", 20),
    ("dall-e-3", "openai", 20),
    ("midjourney-v6", "midjourney", 25),
];

// ---------------------------------------------------------------------------
// Rate table
// ---------------------------------------------------------------------------

/// Resolved price for one model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelRate {
    pub points_per_image: Points,
    /// `true` when the model id was unknown and the fallback tier was used.
    pub is_fallback: bool,
}

/// Lookup table from model id to per-image price.
#[derive(Debug, Clone)]
pub struct RateTable {
    rates: HashMap<String, Points>,
    fallback: Points,
}

impl RateTable {
    /// Empty table where every model is charged `fallback`.
    pub fn with_fallback(fallback: Points) -> Self {
        Self {
            rates: HashMap::new(),
            fallback,
        }
    }

    /// Add or replace the price of a model.
    pub fn with_rate(mut self, model_id: impl Into<String>, points_per_image: Points) -> Self {
        self.rates.insert(model_id.into(), points_per_image);
        self
    }

    pub fn rate(&self, model_id: &str) -> ModelRate {
        match self.rates.get(model_id) {
            Some(&points_per_image) => ModelRate {
                points_per_image,
                is_fallback: false,
            },
            None => ModelRate {
                points_per_image: self.fallback,
                is_fallback: true,
            },
        }
    }

    /// Price a normalized model selection.
    pub fn quote(&self, selection: &[ModelSelection]) -> Quote {
        let lines: Vec<QuoteLine> = selection
            .iter()
            .map(|s| {
                let rate = self.rate(&s.model_id);
                QuoteLine {
                    model_id: s.model_id.clone(),
                    requested_count: s.count,
                    points_per_unit: rate.points_per_image,
                    is_fallback: rate.is_fallback,
                }
            })
            .collect();

        let total_images = lines.iter().map(|l| l.requested_count).sum();
        let total_points = lines.iter().map(QuoteLine::subtotal).sum();

        Quote {
            lines,
            total_images,
            total_points,
        }
    }
}

impl Default for RateTable {
    fn default() -> Self {
        DEFAULT_RATES
            .iter()
            .fold(Self::with_fallback(FALLBACK_POINTS_PER_IMAGE), |t, (id, _, pts)| {
                t.with_rate(*id, *pts)
            })
    }
}

/// Provider name for a known model id, used to route generation calls.
pub fn provider_for_model(model_id: &str) -> Option<&'static str> {
    DEFAULT_RATES
        .iter()
        .find(|(id, _, _)| *id == model_id)
        .map(|(_, provider, _)| *provider)
}

/// Distinct provider names in the rate table, in table order.
pub fn known_providers() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = Vec::new();
    for (_, provider, _) in DEFAULT_RATES {
        if !names.contains(provider) {
            names.push(*provider);
        }
    }
    names
}

// ---------------------------------------------------------------------------
// Quote
// ---------------------------------------------------------------------------

/// One priced `(model, count)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuoteLine {
    pub model_id: String,
    pub requested_count: u32,
    pub points_per_unit: Points,
    pub is_fallback: bool,
}

impl QuoteLine {
    pub fn subtotal(&self) -> Points {
        self.points_per_unit * Points::from(self.requested_count)
    }
}

/// Full price of a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Quote {
    pub lines: Vec<QuoteLine>,
    pub total_images: u32,
    pub total_points: Points,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sel(model_id: &str, count: u32) -> ModelSelection {
        ModelSelection {
            model_id: model_id.to_string(),
            count,
        }
    }

    #[test]
    fn known_model_uses_table_rate() {
        let table = RateTable::default();
        let rate = table.rate("flux-pro");
        assert_eq!(rate.points_per_image, 20);
        assert!(!rate.is_fallback);
    }

    #[test]
    fn unknown_model_falls_back_to_mid_tier() {
        let table = RateTable::default();
        let rate = table.rate("totally-new-model");
        assert_eq!(rate.points_per_image, FALLBACK_POINTS_PER_IMAGE);
        assert!(rate.is_fallback);
    }

    #[test]
    fn quote_sums_points_and_images() {
        let table = RateTable::with_fallback(1)
            .with_rate("a", 10)
            .with_rate("b", 3);
        let quote = table.quote(&[sel("a", 2), sel("b", 5), sel("c", 4)]);

        assert_eq!(quote.total_images, 11);
        assert_eq!(quote.total_points, 2 * 10 + 5 * 3 + 4);
        assert!(quote.lines[2].is_fallback);
    }

    #[test]
    fn provider_lookup() {
        assert_eq!(provider_for_model("dall-e-3"), Some("openai"));
        assert_eq!(provider_for_model("unknown"), None);
    }

    #[test]
    fn known_providers_are_distinct() {
        let names = known_providers();
        assert_eq!(names[0], "replicate");
        assert!(names.contains(&"openai"));
        assert_eq!(names.iter().filter(|n| **n == "replicate").count(), 1);
    }
}
