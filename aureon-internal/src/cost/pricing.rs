use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorDetails};

/// How calls to one model are priced
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum ModelPricing {
    /// USD per 1000 input and output tokens
    PerToken {
        input_per_1k: f64,
        output_per_1k: f64,
    },
    /// USD per generated unit (e.g. one image). The unit count travels in `tokens_input`.
    PerUnit { unit_cost: f64 },
}

impl ModelPricing {
    pub const fn per_1k(input_per_1k: f64, output_per_1k: f64) -> Self {
        ModelPricing::PerToken {
            input_per_1k,
            output_per_1k,
        }
    }

    pub const fn per_unit(unit_cost: f64) -> Self {
        ModelPricing::PerUnit { unit_cost }
    }

    pub fn cost(&self, tokens_input: u64, tokens_output: u64) -> f64 {
        match self {
            ModelPricing::PerToken {
                input_per_1k,
                output_per_1k,
            } => {
                (tokens_input as f64 / 1000.0) * input_per_1k
                    + (tokens_output as f64 / 1000.0) * output_per_1k
            }
            ModelPricing::PerUnit { unit_cost } => tokens_input as f64 * unit_cost,
        }
    }

    pub fn verify(&self, path: &str) -> Result<(), Error> {
        let rates: &[(&str, f64)] = match self {
            ModelPricing::PerToken {
                input_per_1k,
                output_per_1k,
            } => &[("input_per_1k", *input_per_1k), ("output_per_1k", *output_per_1k)],
            ModelPricing::PerUnit { unit_cost } => &[("unit_cost", *unit_cost)],
        };
        for (field, rate) in rates {
            if !rate.is_finite() || *rate < 0.0 {
                return Err(Error::new(ErrorDetails::Config {
                    message: format!("`{path}.{field}` must be a non-negative number"),
                }));
            }
        }
        Ok(())
    }
}

/// Built-in prices for the models the planner calls
pub fn default_model_prices() -> HashMap<String, ModelPricing> {
    [
        ("gpt-4-turbo-preview", ModelPricing::per_1k(0.01, 0.03)),
        ("gpt-4-turbo", ModelPricing::per_1k(0.01, 0.03)),
        ("gpt-4", ModelPricing::per_1k(0.03, 0.06)),
        ("gpt-4o", ModelPricing::per_1k(0.005, 0.015)),
        ("gpt-4o-mini", ModelPricing::per_1k(0.00015, 0.0006)),
        ("gpt-3.5-turbo", ModelPricing::per_1k(0.0005, 0.0015)),
        ("dall-e-3", ModelPricing::per_unit(0.04)),
        ("dall-e-2", ModelPricing::per_unit(0.02)),
    ]
    .into_iter()
    .map(|(model, pricing)| (model.to_string(), pricing))
    .collect()
}

/// Price lookup: built-in prices, overridden per model by configuration
#[derive(Debug, Clone)]
pub struct PriceTable {
    models: HashMap<String, ModelPricing>,
    fallback: ModelPricing,
}

impl PriceTable {
    pub fn new(overrides: &HashMap<String, ModelPricing>, fallback: ModelPricing) -> Self {
        let mut models = default_model_prices();
        models.extend(overrides.iter().map(|(model, pricing)| (model.clone(), *pricing)));
        Self { models, fallback }
    }

    pub fn get(&self, model: &str) -> Option<&ModelPricing> {
        self.models.get(model)
    }

    /// USD cost of one call. Unknown models are charged the fallback rate.
    pub fn cost(&self, model: &str, tokens_input: u64, tokens_output: u64) -> f64 {
        match self.models.get(model) {
            Some(pricing) => pricing.cost(tokens_input, tokens_output),
            None => {
                tracing::warn!(model, "No pricing for model, using fallback rate");
                self.fallback.cost(tokens_input, tokens_output)
            }
        }
    }
}
