/// Weighted choice engine: weight normalization, seeded sampling and set
/// forks that draw without replacement.
use rand::Rng;
use thiserror::Error;
use tracing::debug;

use crate::schema::ast::{ChoiceFork, Span, Weighted, WeightedChoice};

/// Total probability mass of one fork.
pub const TOTAL_WEIGHT: f64 = 100.0;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ChoiceError {
    #[error("no possible choice: every weight is zero")]
    NoPossibleChoice,
    #[error("explicit weights sum to {0}, which exceeds 100")]
    WeightsExceedTotal(f64),
}

/// Give every unweighted entry an equal share of the mass left over by the
/// weighted ones. Returns a new list; `items` is left untouched.
pub fn normalize_weights<T: Clone>(items: &[Weighted<T>]) -> Vec<Weighted<T>> {
    let explicit: f64 = items.iter().filter_map(|w| w.weight).sum();
    let null_count = items.iter().filter(|w| w.weight.is_none()).count();
    let share = if null_count > 0 {
        (TOTAL_WEIGHT - explicit) / null_count as f64
    } else {
        0.0
    };
    items
        .iter()
        .map(|w| Weighted::new(w.value.clone(), Some(w.weight.unwrap_or(share))))
        .collect()
}

/// Draw one entry in proportion to its weight.
///
/// A draw landing exactly on a boundary resolves to the earlier entry.
pub fn weighted_choose<'a, T, R: Rng + ?Sized>(
    items: &'a [Weighted<T>],
    rng: &mut R,
) -> Result<(usize, &'a T), ChoiceError> {
    let sum: f64 = items.iter().map(|w| w.effective_weight()).sum();
    if sum <= 0.0 {
        return Err(ChoiceError::NoPossibleChoice);
    }
    let draw = rng.gen_range(0.0..sum);
    pick_at(items, draw)
}

/// Walk `items` until the running total reaches `draw`.
fn pick_at<T>(items: &[Weighted<T>], draw: f64) -> Result<(usize, &T), ChoiceError> {
    let mut running = 0.0;
    let mut last = None;
    for (index, item) in items.iter().enumerate() {
        let weight = item.effective_weight();
        if weight <= 0.0 {
            continue;
        }
        running += weight;
        last = Some((index, &item.value));
        if running >= draw {
            return Ok((index, &item.value));
        }
    }
    // Rounding can leave the running total a hair under the draw.
    last.ok_or(ChoiceError::NoPossibleChoice)
}

/// Outcome of [`ChoiceFork::call`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Draw {
    pub index: usize,
    /// True when an exhausted set fork was refilled before drawing.
    pub reset: bool,
}

impl ChoiceFork {
    /// Build a fork, normalizing its weights once.
    pub fn new(
        identifier: Option<String>,
        is_silent: bool,
        is_set: bool,
        choices: Vec<WeightedChoice>,
        span: Span,
    ) -> Result<Self, ChoiceError> {
        let explicit: f64 = choices.iter().filter_map(|w| w.weight).sum();
        if explicit > TOTAL_WEIGHT + f64::EPSILON * TOTAL_WEIGHT {
            return Err(ChoiceError::WeightsExceedTotal(explicit));
        }
        let weights = normalize_weights(&choices);
        let initial = weights.iter().map(|w| w.effective_weight()).collect();
        Ok(Self {
            identifier,
            is_silent,
            is_set,
            weights,
            initial,
            span,
        })
    }

    /// Sample the fork. Set forks zero the drawn entry and refill once all
    /// entries are used up.
    pub fn call<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<Draw, ChoiceError> {
        let first = weighted_choose(&self.weights, rng).map(|(index, _)| index);
        let (index, reset) = match first {
            Ok(index) => (index, false),
            Err(ChoiceError::NoPossibleChoice) if self.is_set => {
                debug!(
                    fork = self.identifier.as_deref().unwrap_or("<anonymous>"),
                    "set fork exhausted, resetting"
                );
                self.reset();
                let (index, _) = weighted_choose(&self.weights, rng)?;
                (index, true)
            }
            Err(e) => return Err(e),
        };
        if self.is_set {
            self.weights[index].weight = Some(0.0);
        }
        Ok(Draw { index, reset })
    }

    /// Restore the weights captured at construction.
    pub fn reset(&mut self) {
        for (live, initial) in self.weights.iter_mut().zip(&self.initial) {
            live.weight = Some(*initial);
        }
    }

    /// Number of branches.
    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }
}
