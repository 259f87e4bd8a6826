use rand::Rng;

use crate::plan::PlanError;

/// Cumulative weight table for weighted selection.
///
/// Weights need not sum to 100; only their ratio to the total matters.
#[derive(Debug, Clone)]
pub struct WeightedTable {
    cumulative: Vec<f64>,
    total: f64,
}

impl WeightedTable {
    pub fn new(weights: impl IntoIterator<Item = f64>) -> Result<Self, PlanError> {
        let mut cumulative = Vec::new();
        let mut total = 0.0f64;
        for w in weights {
            if !w.is_finite() || w < 0.0 {
                return Err(PlanError::InvalidWeight(w));
            }
            total += w;
            cumulative.push(total);
        }
        if cumulative.is_empty() || total <= 0.0 {
            return Err(PlanError::NoPositiveWeight);
        }
        Ok(Self { cumulative, total })
    }

    pub fn len(&self) -> usize {
        self.cumulative.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cumulative.is_empty()
    }

    pub fn total(&self) -> f64 {
        self.total
    }

    /// Index of the first candidate whose cumulative weight exceeds `draw`.
    /// A draw past every boundary yields the last candidate.
    pub fn pick(&self, draw: f64) -> usize {
        self.cumulative
            .iter()
            .position(|c| *c > draw)
            .unwrap_or(self.cumulative.len().saturating_sub(1))
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        if self.cumulative.len() == 1 {
            return 0;
        }
        self.pick(rng.gen_range(0.0..self.total))
    }
}
