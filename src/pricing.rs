//! Cost calculation for gateway requests.
//!
//! Models with a configured price are charged per million prompt and
//! completion tokens. Everything else falls back to a flat rate per thousand
//! total tokens, rounded to six decimals.

use std::collections::HashMap;

use tracing::debug;

use crate::config::{ModelPriceConfig, PricingConfig};

/// Calculator for gateway request costs, in USD.
#[derive(Debug, Clone)]
pub struct CostCalculator {
    per_model: HashMap<String, ModelPriceConfig>,
    flat_per_1k: f64,
}

impl CostCalculator {
    pub fn from_config(config: &PricingConfig) -> Self {
        Self {
            per_model: config
                .models
                .iter()
                .map(|p| (p.model.clone(), p.clone()))
                .collect(),
            flat_per_1k: config.default_per_1k_tokens,
        }
    }

    /// Cost of one request.
    pub fn calculate_cost(&self, model: &str, prompt_tokens: u32, completion_tokens: u32) -> f64 {
        let cost = match self.per_model.get(model) {
            Some(price) => {
                (f64::from(prompt_tokens) / 1_000_000.0) * price.input_per_million
                    + (f64::from(completion_tokens) / 1_000_000.0) * price.output_per_million
            }
            None => {
                let total = u64::from(prompt_tokens) + u64::from(completion_tokens);
                round6(total as f64 / 1000.0 * self.flat_per_1k)
            }
        };

        debug!(
            model = %model,
            prompt_tokens,
            completion_tokens,
            cost_usd = %format!("${cost:.6}"),
            "Calculated request cost"
        );
        cost
    }
}

impl Default for CostCalculator {
    fn default() -> Self {
        Self::from_config(&PricingConfig::default())
    }
}

fn round6(value: f64) -> f64 {
    (value * 1_000_000.0).round() / 1_000_000.0
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
