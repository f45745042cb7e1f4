//! Deterministic variant selection.
//!
//! Resolution order, first match wins: an explicit forced override from the query
//! string, a previously recorded assignment from the [`AssignmentStore`], then a
//! weighted random draw over the configured traffic splits.

use std::collections::HashMap;
use std::sync::Mutex;

use rand::Rng;

use crate::Slug;

/// Infer missing percentage splits.
///
/// Variants with an explicit split keep it; the others share the remainder equally,
/// rounded to two decimal places. An over-subscribed configuration (explicit splits
/// summing past 1) produces zero or negative shares rather than an error; validating
/// splits is the author's responsibility.
pub fn infer_splits(explicit: &[Option<f64>]) -> Vec<f64> {
    let allocated: f64 = explicit.iter().flatten().sum();
    let unset = explicit.iter().filter(|split| split.is_none()).count();
    let share = if unset == 0 {
        0.0
    } else {
        round2((1.0 - allocated) / unset as f64)
    };
    explicit.iter().map(|split| split.unwrap_or(share)).collect()
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// One outcome of a [`DecisionPolicy`].
#[derive(Debug, Clone)]
pub struct WeightedVariant {
    pub id: Slug,
    /// Traffic weight, percentage split × 100.
    pub weight: f64,
}

/// A transient weighted decision node.
///
/// Built fresh from a configuration's variants for each resolution and never
/// persisted. The draw is uniform over the cumulative weight ranges; without a
/// recorded assignment, re-evaluation on navigation may redraw.
#[derive(Debug, Clone)]
pub struct DecisionPolicy {
    variants: Vec<WeightedVariant>,
    total_weight: f64,
}

impl DecisionPolicy {
    pub fn new(variants: Vec<WeightedVariant>) -> DecisionPolicy {
        let total_weight = variants.iter().map(|v| v.weight.max(0.0)).sum();
        DecisionPolicy {
            variants,
            total_weight,
        }
    }

    /// Draw one outcome. Returns `None` only for an empty policy; a policy whose
    /// weights are all zero falls back to its first variant.
    pub fn decide<R: Rng>(&self, rng: &mut R) -> Option<&Slug> {
        if self.total_weight <= 0.0 {
            return self.variants.first().map(|v| &v.id);
        }
        let draw = rng.gen_range(0.0..self.total_weight);
        let mut cumulative = 0.0;
        for variant in &self.variants {
            cumulative += variant.weight.max(0.0);
            if draw < cumulative {
                return Some(&variant.id);
            }
        }
        self.variants.last().map(|v| &v.id)
    }
}

/// Extract a forced variant from the experiment query parameter values.
///
/// Values may concatenate several comma-separated tokens. A qualified token of the
/// form `<experimentId>/<variantId>` wins over a bare variant id; in both forms the
/// variant must be declared.
pub fn forced_variant(values: &[String], experiment_id: &Slug, declared: &[Slug]) -> Option<Slug> {
    let tokens: Vec<&str> = values
        .iter()
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .collect();

    for token in &tokens {
        if let Some((experiment, variant)) = token.split_once('/') {
            let variant = Slug::new(variant);
            if Slug::new(experiment) == *experiment_id && declared.contains(&variant) {
                return Some(variant);
            }
        }
    }
    for token in &tokens {
        if token.contains('/') {
            continue;
        }
        let variant = Slug::new(token);
        if declared.contains(&variant) {
            return Some(variant);
        }
    }
    None
}

/// Storage for variant assignments.
///
/// The engine consults the store between the forced override and a fresh draw, and
/// records fresh draws back into it. The default in-memory store keeps one page run
/// self-consistent; callers wanting assignments sticky across requests can back this
/// with a first-party cookie keyed by experiment id.
pub trait AssignmentStore: Send + Sync {
    /// A previously recorded assignment for `experiment`, if any.
    fn recorded(&self, experiment: &Slug) -> Option<Slug>;
    /// Record an assignment.
    fn record(&self, experiment: &Slug, variant: &Slug);
}

/// An [`AssignmentStore`] that remembers nothing: every resolution redraws.
pub struct NoopAssignmentStore;

impl AssignmentStore for NoopAssignmentStore {
    fn recorded(&self, _experiment: &Slug) -> Option<Slug> {
        None
    }

    fn record(&self, _experiment: &Slug, _variant: &Slug) {}
}

/// An in-memory [`AssignmentStore`], scoped to the engine that owns it.
#[derive(Default)]
pub struct InMemoryAssignmentStore {
    assignments: Mutex<HashMap<Slug, Slug>>,
}

impl AssignmentStore for InMemoryAssignmentStore {
    fn recorded(&self, experiment: &Slug) -> Option<Slug> {
        let assignments = self
            .assignments
            .lock()
            .expect("thread holding assignment lock should not panic");
        assignments.get(experiment).cloned()
    }

    fn record(&self, experiment: &Slug, variant: &Slug) {
        let mut assignments = self
            .assignments
            .lock()
            .expect("thread holding assignment lock should not panic");
        assignments.insert(experiment.clone(), variant.clone());
    }
}
