//! Reduce token states to one vector per input.

use candle_core::Tensor;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PoolingStrategy {
    /// Average of non-padding tokens
    #[default]
    Mean,

    /// First ([CLS]) token
    Cls,
}

impl PoolingStrategy {
    /// `hidden`: (batch, seq_len, dim), `mask`: (batch, seq_len) as f32.
    /// Returns (batch, dim).
    pub fn apply(&self, hidden: &Tensor, mask: &Tensor) -> candle_core::Result<Tensor> {
        match self {
            PoolingStrategy::Mean => masked_mean(hidden, mask),
            PoolingStrategy::Cls => hidden.narrow(1, 0, 1)?.squeeze(1),
        }
    }
}

fn masked_mean(hidden: &Tensor, mask: &Tensor) -> candle_core::Result<Tensor> {
    let weights = mask.unsqueeze(2)?;
    let summed = hidden.broadcast_mul(&weights)?.sum(1)?;
    let counts = weights.sum(1)?.clamp(1e-9f32, f32::MAX)?;
    summed.broadcast_div(&counts)
}

/// Row-wise L2 normalization of a (batch, dim) tensor.
pub fn l2_normalize(rows: &Tensor) -> candle_core::Result<Tensor> {
    let norms = rows.sqr()?.sum_keepdim(1)?.sqrt()?.clamp(1e-9f32, f32::MAX)?;
    rows.broadcast_div(&norms)
}
