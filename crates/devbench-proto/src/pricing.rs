//! Per-million-token pricing and the character-based token heuristic.

use serde::{Deserialize, Serialize};

/// Price of a model, in USD per million tokens.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pricing {
    pub input_per_m_token: f64,
    pub output_per_m_token: f64,
}

impl Pricing {
    pub fn new(input_per_m_token: f64, output_per_m_token: f64) -> Self {
        Self {
            input_per_m_token,
            output_per_m_token,
        }
    }

    /// Cost in USD of the given token totals.
    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        (input_tokens as f64 / 1_000_000.0) * self.input_per_m_token
            + (output_tokens as f64 / 1_000_000.0) * self.output_per_m_token
    }
}

/// Estimates a token count as one token per four characters, rounded up.
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64).div_ceil(4)
}
