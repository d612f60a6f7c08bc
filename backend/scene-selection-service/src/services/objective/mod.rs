// ============================================
// Objective Builder
// ============================================
//
// Composes one binary minimization objective over x_i ∈ {0,1}:
//
//   Cold start:
//     E = Σ x_i * fit(i; 2.0) + λ_len * (Σ x_i * len_i - T)^2
//
//   Adaptive:
//     E = -λ_pref * Σ x_i * pred_i + Σ x_i * fit(i; 1.0) + λ_len * (Σ x_i * len_i - T)^2
//
//   fit(i; w) = Σ_k (attr_ik - target_k)^2 - w * relevance_i   (keys of i's kind only)
//
// An attribute the scorer never filled in counts as 0.5 in fit(), not 0.0.
//
// The length term expands (x_i^2 = x_i) into
//   λ_len * [ Σ (len_i^2 - 2T len_i) x_i + 2 Σ_{i<j} len_i len_j x_i x_j + T^2 ]
// which is where the pairwise couplings come from.

use crate::error::{Result, SelectionError};
use crate::models::{CandidateItem, TargetProfile, UNSCORED_ATTRIBUTE};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Which objective was built
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectiveMode {
    ColdStart,
    Adaptive,
}

impl ObjectiveMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectiveMode::ColdStart => "cold_start",
            ObjectiveMode::Adaptive => "adaptive",
        }
    }
}

/// Fixed term weights
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveWeights {
    pub preference: f64,
    pub cold_start_relevance: f64,
    pub adaptive_relevance: f64,
    pub length_penalty: f64,
}

impl Default for ObjectiveWeights {
    fn default() -> Self {
        Self {
            preference: 10.0,
            cold_start_relevance: 2.0,
            adaptive_relevance: 1.0,
            length_penalty: 0.001,
        }
    }
}

/// Pairwise coupling `weight * x_i * x_j`, always `i < j`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuadraticTerm {
    pub i: usize,
    pub j: usize,
    pub weight: f64,
}

/// Quadratic binary objective: `offset + Σ linear_i x_i + Σ w_ij x_i x_j`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuboObjective {
    pub mode: ObjectiveMode,
    /// Candidate id bound to each variable index
    pub variable_ids: Vec<i64>,
    pub linear: Vec<f64>,
    pub quadratic: Vec<QuadraticTerm>,
    pub offset: f64,
}

impl QuboObjective {
    pub fn num_variables(&self) -> usize {
        self.variable_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variable_ids.is_empty()
    }

    /// Evaluate the objective at a full assignment.
    pub fn energy(&self, x: &[bool]) -> f64 {
        let mut e = self.offset;
        for (i, &on) in x.iter().enumerate() {
            if on {
                e += self.linear[i];
            }
        }
        for term in &self.quadratic {
            if x[term.i] && x[term.j] {
                e += term.weight;
            }
        }
        e
    }

    /// Symmetric dense coupling matrix (diagonal zero), row-major.
    pub fn dense_couplings(&self) -> Vec<Vec<f64>> {
        let n = self.num_variables();
        let mut q = vec![vec![0.0; n]; n];
        for term in &self.quadratic {
            q[term.i][term.j] += term.weight;
            q[term.j][term.i] += term.weight;
        }
        q
    }
}

pub struct ObjectiveBuilder {
    weights: ObjectiveWeights,
}

impl Default for ObjectiveBuilder {
    fn default() -> Self {
        Self::new(ObjectiveWeights::default())
    }
}

impl ObjectiveBuilder {
    pub fn new(weights: ObjectiveWeights) -> Self {
        Self { weights }
    }

    /// Squared distance to the matching-kind targets minus the relevance bonus.
    pub fn fit_cost(
        &self,
        candidate: &CandidateItem,
        profile: &TargetProfile,
        relevance_weight: f64,
    ) -> f64 {
        let targets = profile.targets_for(candidate.attributes.kind());
        let squared_diff: f64 = candidate
            .attributes
            .entries()
            .into_iter()
            .zip(targets)
            .enumerate()
            .map(|(i, ((_, v), t))| {
                let v = if candidate.presence.contains(i) {
                    v
                } else {
                    UNSCORED_ATTRIBUTE
                };
                (v - t).powi(2)
            })
            .sum();

        squared_diff - relevance_weight * candidate.relevance
    }

    /// `λ_len * (total - target)^2`
    pub fn length_penalty(&self, total_length: usize, target_length: u32) -> f64 {
        let diff = total_length as f64 - f64::from(target_length);
        self.weights.length_penalty * diff * diff
    }

    pub fn build_cold_start(
        &self,
        candidates: &[CandidateItem],
        profile: &TargetProfile,
    ) -> Result<QuboObjective> {
        self.build(
            ObjectiveMode::ColdStart,
            candidates,
            profile,
            self.weights.cold_start_relevance,
            None,
        )
    }

    /// `predicted_ratings[i]` must belong to `candidates[i]`.
    pub fn build_adaptive(
        &self,
        candidates: &[CandidateItem],
        profile: &TargetProfile,
        predicted_ratings: &[f64],
    ) -> Result<QuboObjective> {
        if predicted_ratings.len() != candidates.len() {
            return Err(SelectionError::MalformedInput(format!(
                "expected {} predictions, got {}",
                candidates.len(),
                predicted_ratings.len()
            )));
        }
        if predicted_ratings.iter().any(|p| !p.is_finite()) {
            return Err(SelectionError::MalformedInput(
                "predicted ratings must be finite".to_string(),
            ));
        }

        self.build(
            ObjectiveMode::Adaptive,
            candidates,
            profile,
            self.weights.adaptive_relevance,
            Some(predicted_ratings),
        )
    }

    fn build(
        &self,
        mode: ObjectiveMode,
        candidates: &[CandidateItem],
        profile: &TargetProfile,
        relevance_weight: f64,
        predicted_ratings: Option<&[f64]>,
    ) -> Result<QuboObjective> {
        profile.validate()?;

        let n = candidates.len();
        let target = f64::from(profile.target_length);
        let lambda = self.weights.length_penalty;
        let lengths: Vec<f64> = candidates.iter().map(|c| c.char_len() as f64).collect();

        let mut linear = Vec::with_capacity(n);
        for (i, candidate) in candidates.iter().enumerate() {
            let mut coeff = self.fit_cost(candidate, profile, relevance_weight);
            if let Some(predictions) = predicted_ratings {
                coeff -= self.weights.preference * predictions[i];
            }
            coeff += lambda * (lengths[i] * lengths[i] - 2.0 * target * lengths[i]);
            linear.push(coeff);
        }

        let mut quadratic = Vec::with_capacity(n.saturating_sub(1) * n / 2);
        for i in 0..n {
            for j in (i + 1)..n {
                let weight = 2.0 * lambda * lengths[i] * lengths[j];
                if weight != 0.0 {
                    quadratic.push(QuadraticTerm { i, j, weight });
                }
            }
        }

        debug!(
            mode = mode.as_str(),
            variables = n,
            couplings = quadratic.len(),
            target_length = profile.target_length,
            "Objective built"
        );

        Ok(QuboObjective {
            mode,
            variable_ids: candidates.iter().map(|c| c.id).collect(),
            linear,
            quadratic,
            offset: lambda * target * target,
        })
    }
}
