/// Preference Surrogate Module
///
/// Ridge regression over the shared 12-slot feature layout, trained from the
/// accumulated rating history.
///
/// # Behaviour
/// - **Untrained**: no history yet, every prediction is the neutral rating 3.0
/// - **Trained**: `rating ≈ intercept + coefficients · x`
///
/// Each adaptive optimization refits from scratch; nothing carries over
/// between calls except the history passed in.
use crate::error::{Result, SelectionError};
use crate::services::features::{feature_matrix, FeatureVector, FEATURE_VECTOR_SIZE};
use ndarray::{Array1, Array2, Axis};
use tracing::debug;

/// Midpoint of the 1–5 rating scale, used before any rating exists
pub const NEUTRAL_RATING: f64 = 3.0;

/// Default L2 regularization strength
pub const DEFAULT_RIDGE_ALPHA: f64 = 1.0;

#[derive(Debug, Clone, Default, PartialEq)]
pub enum PreferenceModel {
    #[default]
    Untrained,
    Trained {
        coefficients: Array1<f64>,
        intercept: f64,
        samples: usize,
    },
}

impl PreferenceModel {
    /// Fit with the default regularization strength.
    pub fn fit(training_pairs: &[(FeatureVector, f64)]) -> Result<Self> {
        Self::fit_ridge(training_pairs, DEFAULT_RIDGE_ALPHA)
    }

    /// Fit a ridge model with an unpenalized intercept.
    ///
    /// Solves `(XcᵀXc + αI) w = Xcᵀyc` on mean-centered data, then
    /// `intercept = ȳ - x̄ · w`. An empty training set yields `Untrained`.
    pub fn fit_ridge(training_pairs: &[(FeatureVector, f64)], alpha: f64) -> Result<Self> {
        if !alpha.is_finite() || alpha <= 0.0 {
            return Err(SelectionError::MalformedInput(format!(
                "ridge alpha must be positive, got {}",
                alpha
            )));
        }

        if training_pairs.is_empty() {
            debug!("No rating history, preference model stays untrained");
            return Ok(PreferenceModel::Untrained);
        }

        let vectors: Vec<FeatureVector> = training_pairs.iter().map(|(v, _)| *v).collect();
        let x = feature_matrix(&vectors);
        let y = Array1::from_iter(training_pairs.iter().map(|(_, r)| *r));

        if y.iter().any(|r| !r.is_finite()) || x.iter().any(|v| !v.is_finite()) {
            return Err(SelectionError::MalformedInput(
                "training data contains non-finite values".to_string(),
            ));
        }

        let x_mean = x
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(FEATURE_VECTOR_SIZE));
        let y_mean = y.mean().unwrap_or(NEUTRAL_RATING);

        let xc = &x - &x_mean;
        let yc = &y - y_mean;

        let mut gram = xc.t().dot(&xc);
        for i in 0..FEATURE_VECTOR_SIZE {
            gram[[i, i]] += alpha;
        }
        let rhs = xc.t().dot(&yc);

        let coefficients = solve_spd(&gram, &rhs)?;
        let intercept = y_mean - x_mean.dot(&coefficients);

        debug!(
            samples = training_pairs.len(),
            alpha = alpha,
            intercept = intercept,
            "Preference model fitted"
        );

        Ok(PreferenceModel::Trained {
            coefficients,
            intercept,
            samples: training_pairs.len(),
        })
    }

    pub fn is_trained(&self) -> bool {
        matches!(self, PreferenceModel::Trained { .. })
    }

    /// Expected rating per vector; constant 3.0 while untrained.
    pub fn predict(&self, vectors: &[FeatureVector]) -> Vec<f64> {
        match self {
            PreferenceModel::Untrained => vec![NEUTRAL_RATING; vectors.len()],
            PreferenceModel::Trained {
                coefficients,
                intercept,
                ..
            } => {
                if vectors.is_empty() {
                    return Vec::new();
                }
                let x = feature_matrix(vectors);
                (x.dot(coefficients) + *intercept).to_vec()
            }
        }
    }
}

/// Cholesky solve for a symmetric positive definite system.
fn solve_spd(a: &Array2<f64>, b: &Array1<f64>) -> Result<Array1<f64>> {
    let n = b.len();
    let mut l = Array2::<f64>::zeros((n, n));

    for i in 0..n {
        for j in 0..=i {
            let mut sum = a[[i, j]];
            for k in 0..j {
                sum -= l[[i, k]] * l[[j, k]];
            }
            if i == j {
                if sum <= 0.0 {
                    return Err(SelectionError::MalformedInput(
                        "regression system is not positive definite".to_string(),
                    ));
                }
                l[[i, i]] = sum.sqrt();
            } else {
                l[[i, j]] = sum / l[[j, j]];
            }
        }
    }

    // L z = b
    let mut z = Array1::<f64>::zeros(n);
    for i in 0..n {
        let mut sum = b[i];
        for k in 0..i {
            sum -= l[[i, k]] * z[k];
        }
        z[i] = sum / l[[i, i]];
    }

    // Lᵀ w = z
    let mut w = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let mut sum = z[i];
        for k in (i + 1)..n {
            sum -= l[[k, i]] * w[k];
        }
        w[i] = sum / l[[i, i]];
    }

    Ok(w)
}
