//! Vector values, distance metrics and score conversion.

use serde::{Deserialize, Serialize};

/// Distance metric of a remote index, fixed at creation time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Metric {
    Euclidean,
    Cosine,
    InnerProduct,
}

impl Metric {
    /// Name of the metric on the remote service's wire protocol.
    #[must_use]
    pub fn remote_name(&self) -> &'static str {
        match self {
            Metric::Euclidean => "euclidean",
            Metric::Cosine => "cosine",
            Metric::InnerProduct => "dotproduct",
        }
    }

    /// Persisted discriminant (static meta page).
    #[must_use]
    pub fn to_u32(self) -> u32 {
        match self {
            Metric::Euclidean => 1,
            Metric::Cosine => 2,
            Metric::InnerProduct => 3,
        }
    }

    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(Metric::Euclidean),
            2 => Some(Metric::Cosine),
            3 => Some(Metric::InnerProduct),
            _ => None,
        }
    }

    /// Exact distance between two vectors under this metric.
    ///
    /// Euclidean distances are kept squared, the same quantity the remote
    /// service scores with, so local and remote results sort together.
    #[must_use]
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f64 {
        debug_assert_eq!(a.len(), b.len());
        match self {
            Metric::Euclidean => a
                .iter()
                .zip(b)
                .map(|(x, y)| {
                    let d = f64::from(x - y);
                    d * d
                })
                .sum(),
            Metric::Cosine => {
                let (mut dot, mut na, mut nb) = (0f64, 0f64, 0f64);
                for (x, y) in a.iter().zip(b) {
                    dot += f64::from(*x) * f64::from(*y);
                    na += f64::from(*x) * f64::from(*x);
                    nb += f64::from(*y) * f64::from(*y);
                }
                1.0 - dot / (na.sqrt() * nb.sqrt())
            }
            Metric::InnerProduct => {
                -a.iter()
                    .zip(b)
                    .map(|(x, y)| f64::from(*x) * f64::from(*y))
                    .sum::<f64>()
            }
        }
    }

    /// Convert a remote match score into a distance comparable with
    /// [`Metric::distance`].
    ///
    /// The service returns squared euclidean distance directly, cosine
    /// similarity for `Cosine`, and the dot product for `InnerProduct`.
    #[must_use]
    pub fn distance_from_score(&self, score: f64) -> f64 {
        match self {
            Metric::Euclidean => score,
            Metric::Cosine => 1.0 - score,
            Metric::InnerProduct => -score,
        }
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.remote_name())
    }
}

/// Returns `true` when every component is zero. The remote service
/// rejects all-zero dense vectors regardless of metric.
#[must_use]
pub fn is_zero_vector(values: &[f32]) -> bool {
    values.iter().all(|v| *v == 0.0)
}
