// ============================================
// Local Annealer
// ============================================
//
// In-process replacement for the external annealing service.
//
// - n <= exact_limit: exhaustive Gray-code enumeration, one bit flip per
//   step with O(n) local-field updates. Equal energies resolve to the
//   assignment that selects the lowest-indexed candidate first.
// - n >  exact_limit: seeded simulated annealing (single-flip Metropolis,
//   geometric cooling, several restarts) followed by a greedy descent.
//
// Credentials are accepted and ignored.

use super::{Assignment, SolverCredentials, SolverError, SolverGateway};
use crate::services::objective::QuboObjective;
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Energies closer than this (relative) are treated as ties
const ENERGY_TOLERANCE: f64 = 1e-9;

/// How often the enumeration checks its deadline
const DEADLINE_CHECK_INTERVAL: u64 = 4096;

#[derive(Debug, Clone)]
pub struct LocalSolverConfig {
    /// Largest problem solved exactly
    pub exact_limit: usize,
    /// Annealing sweeps per restart
    pub sweeps: usize,
    pub restarts: usize,
    pub seed: u64,
}

impl Default for LocalSolverConfig {
    fn default() -> Self {
        Self {
            exact_limit: 20,
            sweeps: 4000,
            restarts: 4,
            seed: 42,
        }
    }
}

pub struct LocalAnnealer {
    config: LocalSolverConfig,
}

impl Default for LocalAnnealer {
    fn default() -> Self {
        Self::new(LocalSolverConfig::default())
    }
}

impl LocalAnnealer {
    pub fn new(mut config: LocalSolverConfig) -> Self {
        // 2^n enumeration must stay addressable
        config.exact_limit = config.exact_limit.min(30);
        Self { config }
    }

    /// Blocking solve; `None` when the deadline passes first.
    pub fn solve_blocking(&self, objective: &QuboObjective, deadline: Instant) -> Option<Vec<bool>> {
        let n = objective.num_variables();
        if n == 0 {
            return Some(Vec::new());
        }

        let couplings = objective.dense_couplings();
        if n <= self.config.exact_limit {
            enumerate_exact(objective, &couplings, deadline)
        } else {
            anneal(objective, &couplings, &self.config, deadline)
        }
    }
}

#[async_trait]
impl SolverGateway for LocalAnnealer {
    async fn solve(
        &self,
        objective: &QuboObjective,
        _credentials: &SolverCredentials,
        timeout: Duration,
    ) -> Result<Assignment, SolverError> {
        let started = Instant::now();
        let deadline = started + timeout;
        let solver = LocalAnnealer::new(self.config.clone());
        let problem = objective.clone();

        let handle = tokio::task::spawn_blocking(move || solver.solve_blocking(&problem, deadline));

        let bits = match tokio::time::timeout(timeout, handle).await {
            Err(_) => return Err(SolverError::Timeout(timeout)),
            Ok(Err(join_err)) => {
                return Err(SolverError::NoResult(format!(
                    "local solver task failed: {}",
                    join_err
                )))
            }
            Ok(Ok(None)) => return Err(SolverError::Timeout(timeout)),
            Ok(Ok(Some(bits))) => bits,
        };

        if bits.len() != objective.num_variables() {
            return Err(SolverError::NoResult(format!(
                "expected {} bits, got {}",
                objective.num_variables(),
                bits.len()
            )));
        }

        info!(
            variables = objective.num_variables(),
            energy = objective.energy(&bits),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Local solve completed"
        );

        Ok(Assignment::from_bits(&objective.variable_ids, &bits))
    }

    fn name(&self) -> &'static str {
        "local-annealer"
    }
}

/// True when `candidate` beats `incumbent` on a tie: first differing bit selected.
fn prefers(candidate: &[bool], incumbent: &[bool]) -> bool {
    candidate
        .iter()
        .zip(incumbent)
        .find(|(a, b)| a != b)
        .map(|(a, _)| *a)
        .unwrap_or(false)
}

fn is_better(energy: f64, bits: &[bool], best_energy: f64, best_bits: &[bool]) -> bool {
    let tolerance = ENERGY_TOLERANCE * best_energy.abs().max(1.0);
    if energy < best_energy - tolerance {
        true
    } else if (energy - best_energy).abs() <= tolerance {
        prefers(bits, best_bits)
    } else {
        false
    }
}

/// Flip bit `k`, updating energy and local fields in place.
fn flip(k: usize, x: &mut [bool], field: &mut [f64], couplings: &[Vec<f64>], energy: &mut f64) {
    let sign = if x[k] { -1.0 } else { 1.0 };
    *energy += sign * field[k];
    x[k] = !x[k];
    for (j, f) in field.iter_mut().enumerate() {
        *f += sign * couplings[j][k];
    }
}

fn enumerate_exact(
    objective: &QuboObjective,
    couplings: &[Vec<f64>],
    deadline: Instant,
) -> Option<Vec<bool>> {
    let n = objective.num_variables();
    let mut x = vec![false; n];
    let mut field = objective.linear.clone();
    let mut energy = objective.offset;

    let mut best = x.clone();
    let mut best_energy = energy;

    let total: u64 = 1u64 << n;
    for step in 1..total {
        if step % DEADLINE_CHECK_INTERVAL == 0 && Instant::now() >= deadline {
            debug!(step = step, "Exact enumeration hit deadline");
            return None;
        }

        let k = step.trailing_zeros() as usize;
        flip(k, &mut x, &mut field, couplings, &mut energy);

        if is_better(energy, &x, best_energy, &best) {
            best.copy_from_slice(&x);
            best_energy = energy;
        }
    }

    debug!(variables = n, energy = best_energy, "Exact enumeration finished");
    Some(best)
}

fn anneal(
    objective: &QuboObjective,
    couplings: &[Vec<f64>],
    config: &LocalSolverConfig,
    deadline: Instant,
) -> Option<Vec<bool>> {
    let n = objective.num_variables();
    let mut rng = StdRng::seed_from_u64(config.seed);
    let sweeps = config.sweeps.max(1);

    // 初始溫度取最大單點翻轉幅度
    let t_start = objective
        .linear
        .iter()
        .zip(couplings)
        .map(|(l, row)| l.abs() + row.iter().map(|w| w.abs()).sum::<f64>())
        .fold(1.0_f64, f64::max);
    let t_end = (t_start * 1e-4).max(1e-6);
    let cooling = (t_end / t_start).powf(1.0 / sweeps as f64);

    let mut best: Option<(Vec<bool>, f64)> = None;

    for restart in 0..config.restarts.max(1) {
        let mut x: Vec<bool> = (0..n).map(|_| rng.gen_bool(0.5)).collect();
        let mut field = local_fields(objective, couplings, &x);
        let mut energy = objective.energy(&x);
        let mut temperature = t_start;

        let mut run_best = x.clone();
        let mut run_best_energy = energy;

        for _ in 0..sweeps {
            if Instant::now() >= deadline {
                debug!(restart = restart, "Annealing hit deadline");
                return None;
            }

            for k in 0..n {
                let delta = if x[k] { -field[k] } else { field[k] };
                if delta <= 0.0 || rng.gen::<f64>() < (-delta / temperature).exp() {
                    flip(k, &mut x, &mut field, couplings, &mut energy);
                    if is_better(energy, &x, run_best_energy, &run_best) {
                        run_best.copy_from_slice(&x);
                        run_best_energy = energy;
                    }
                }
            }
            temperature *= cooling;
        }

        let (polished, polished_energy) = descend(objective, couplings, run_best);

        let replace = match &best {
            None => true,
            Some((bits, e)) => is_better(polished_energy, &polished, *e, bits),
        };
        if replace {
            best = Some((polished, polished_energy));
        }
    }

    best.map(|(bits, energy)| {
        debug!(variables = n, energy = energy, "Annealing finished");
        bits
    })
}

/// Greedy single-flip descent to a local minimum.
fn descend(objective: &QuboObjective, couplings: &[Vec<f64>], mut x: Vec<bool>) -> (Vec<bool>, f64) {
    let mut field = local_fields(objective, couplings, &x);
    let mut energy = objective.energy(&x);

    loop {
        let mut improved = false;
        for k in 0..x.len() {
            let delta = if x[k] { -field[k] } else { field[k] };
            if delta < -ENERGY_TOLERANCE {
                flip(k, &mut x, &mut field, couplings, &mut energy);
                improved = true;
            }
        }
        if !improved {
            break;
        }
    }

    let energy = objective.energy(&x);
    (x, energy)
}

fn local_fields(objective: &QuboObjective, couplings: &[Vec<f64>], x: &[bool]) -> Vec<f64> {
    objective
        .linear
        .iter()
        .enumerate()
        .map(|(k, l)| {
            l + couplings[k]
                .iter()
                .zip(x)
                .filter(|(_, on)| **on)
                .map(|(w, _)| *w)
                .sum::<f64>()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::objective::{ObjectiveMode, QuadraticTerm};

    fn objective(linear: Vec<f64>, quadratic: Vec<QuadraticTerm>, offset: f64) -> QuboObjective {
        QuboObjective {
            mode: ObjectiveMode::ColdStart,
            variable_ids: (0..linear.len() as i64).collect(),
            linear,
            quadratic,
            offset,
        }
    }

    fn brute_force_min(obj: &QuboObjective) -> f64 {
        let n = obj.num_variables();
        (0u64..(1 << n))
            .map(|mask| {
                let x: Vec<bool> = (0..n).map(|i| mask & (1 << i) != 0).collect();
                obj.energy(&x)
            })
            .fold(f64::INFINITY, f64::min)
    }

    #[test]
    fn test_exact_finds_minimum() {
        let obj = objective(
            vec![-3.0, 2.0, -1.0, -2.5],
            vec![
                QuadraticTerm { i: 0, j: 1, weight: 1.0 },
                QuadraticTerm { i: 0, j: 3, weight: 4.0 },
                QuadraticTerm { i: 2, j: 3, weight: -1.5 },
            ],
            0.0,
        );
        let far_future = Instant::now() + Duration::from_secs(5);
        let bits = LocalAnnealer::default()
            .solve_blocking(&obj, far_future)
            .unwrap();

        assert!((obj.energy(&bits) - brute_force_min(&obj)).abs() < 1e-9);
    }

    #[test]
    fn test_tie_prefers_lowest_index() {
        // x0 與 x1 對稱、互斥
        let obj = objective(
            vec![-1.0, -1.0],
            vec![QuadraticTerm { i: 0, j: 1, weight: 5.0 }],
            0.0,
        );
        let bits = LocalAnnealer::default()
            .solve_blocking(&obj, Instant::now() + Duration::from_secs(5))
            .unwrap();

        assert_eq!(bits, vec![true, false]);
    }

    #[test]
    fn test_annealing_matches_exact_on_small_problem() {
        let linear: Vec<f64> = (0..12).map(|i| ((i * 7 % 5) as f64) - 2.5).collect();
        let mut quadratic = Vec::new();
        for i in 0..12 {
            for j in (i + 1)..12 {
                if (i + j) % 3 == 0 {
                    quadratic.push(QuadraticTerm {
                        i,
                        j,
                        weight: ((i * j) % 4) as f64 - 1.0,
                    });
                }
            }
        }
        let obj = objective(linear, quadratic, 0.0);

        let annealer = LocalAnnealer::new(LocalSolverConfig {
            exact_limit: 0,
            sweeps: 2000,
            restarts: 16,
            seed: 7,
        });
        let bits = annealer
            .solve_blocking(&obj, Instant::now() + Duration::from_secs(30))
            .unwrap();

        assert!((obj.energy(&bits) - brute_force_min(&obj)).abs() < 1e-9);
    }

    #[test]
    fn test_expired_deadline_times_out() {
        let obj = objective(vec![-1.0; 25], vec![], 0.0);
        let annealer = LocalAnnealer::new(LocalSolverConfig {
            exact_limit: 0,
            ..LocalSolverConfig::default()
        });

        assert!(annealer.solve_blocking(&obj, Instant::now()).is_none());
    }

    #[tokio::test]
    async fn test_gateway_returns_full_assignment() {
        let obj = QuboObjective {
            mode: ObjectiveMode::ColdStart,
            variable_ids: vec![42, 7],
            linear: vec![-1.0, 1.0],
            quadratic: vec![],
            offset: 0.0,
        };

        let assignment = LocalAnnealer::default()
            .solve(&obj, &SolverCredentials::default(), Duration::from_secs(3))
            .await
            .unwrap();

        assert_eq!(assignment.get(42), Some(true));
        assert_eq!(assignment.get(7), Some(false));
    }

    #[test]
    fn test_prefers_first_differing_selected_bit() {
        assert!(prefers(&[true, false], &[false, true]));
        assert!(!prefers(&[false, true], &[true, false]));
        assert!(!prefers(&[true, true], &[true, true]));
    }
}
