//! Combines per-chunk vectors into one vector per source text.

use serde::{Deserialize, Serialize};

use crate::vector::Vector;

/// Policy for reducing several chunk vectors to one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolingMode {
    /// Element-wise arithmetic mean.
    #[default]
    Mean,
    /// Only the first chunk counts.
    First,
    /// Element-wise maximum.
    Max,
}

/// Pool `vectors` into a single vector.
///
/// Returns `None` for an empty slice. A single vector is returned unchanged
/// whatever the mode. Inputs are expected to share one dimensionality; the
/// output always takes the length of the first vector.
pub fn pool(vectors: &[Vector], mode: PoolingMode) -> Option<Vector> {
    match vectors {
        [] => None,
        [only] => Some(only.clone()),
        [first, ..] => Some(match mode {
            PoolingMode::First => first.clone(),
            PoolingMode::Max => pool_max(vectors),
            PoolingMode::Mean => pool_mean(vectors),
        }),
    }
}

fn pool_mean(vectors: &[Vector]) -> Vector {
    let dims = vectors[0].len();
    // f64 sums keep the mean stable no matter how many chunks are pooled.
    let mut sums = vec![0f64; dims];
    for vector in vectors {
        for (sum, &value) in sums.iter_mut().zip(vector) {
            *sum += f64::from(value);
        }
    }
    let count = vectors.len() as f64;
    sums.into_iter().map(|sum| (sum / count) as f32).collect()
}

fn pool_max(vectors: &[Vector]) -> Vector {
    let mut result = vectors[0].clone();
    for vector in &vectors[1..] {
        for (best, &value) in result.iter_mut().zip(vector) {
            if value > *best {
                *best = value;
            }
        }
    }
    result
}
