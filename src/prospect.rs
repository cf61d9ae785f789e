//! # Prospect-Theory Secondary Objectives
//!
//! After the CCR pass fixes every evaluator's self-efficiency, each
//! sampled evaluator re-derives its weights under a *behavioral* objective:
//! the cohort's efficiencies are measured against a reference target and
//! passed through the Kahneman-Tversky value function, which is concave
//! for gains and steeper (by the loss-aversion factor `LAMBDA`) for
//! losses. The evaluator maximizes the aggregate value subject to keeping
//! its own CCR standing:
//!
//! ```text
//! max  sum_j V(theta_j(u, v) - target)        (AllDeviations)
//!  or  sum over j with theta_j > target only  (GainsOnly)
//! s.t. v . x_k = 1
//!      u . y_k = theta_kk
//!      v . X - u . Y >= 0 elementwise
//!      u, v >= WEIGHT_FLOOR
//! ```
//!
//! This is a non-convex program and the solve is best-effort local, not a
//! global-optimum guarantee. The constraints enter through an escalating
//! quadratic penalty and the smooth penalized objective is minimized with
//! the `wolfe_bfgs` optimizer over log-space variables (which makes the
//! positivity bounds structural). A candidate is accepted only if its
//! final constraint violation is below [`CONSTRAINT_TOL`]; otherwise the
//! evaluator is dropped for that objective and the panel simply shrinks.

use crate::ccr::WEIGHT_FLOOR;
use ndarray::{s, Array1, ArrayView2};
use wolfe_bfgs::{Bfgs, BfgsSolution};

/// Gain-side curvature of the value function (Kahneman-Tversky).
pub const ALPHA: f64 = 0.88;
/// Loss-side curvature.
pub const BETA: f64 = 0.88;
/// Loss-aversion multiplier.
pub const LAMBDA: f64 = 2.25;

/// Iteration cap for each inner BFGS solve.
const MAX_ITERATIONS: usize = 50;
/// Initial quadratic penalty weight.
const PENALTY_START: f64 = 1e3;
/// Multiplier applied to the penalty weight per outer round.
const PENALTY_GROWTH: f64 = 10.0;
/// Number of outer penalty rounds.
const PENALTY_ROUNDS: usize = 3;
/// Maximum admissible constraint violation for an accepted solve.
const CONSTRAINT_TOL: f64 = 1e-4;
/// Relative step for central-difference gradients.
const FD_STEP: f64 = 1e-6;
/// Guard against a vanishing weighted-input denominator.
const DENOMINATOR_GUARD: f64 = 1e-9;

/// How cohort deviations from the target enter the objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectiveMode {
    /// Credit every unit's deviation, gains and losses alike. Used for the
    /// organizational and management objectives.
    AllDeviations,
    /// Credit only units strictly above the target: the personal
    /// objective rewards realized gains and ignores shortfalls.
    GainsOnly,
}

/// An accepted evaluator weight pair.
#[derive(Debug, Clone)]
pub struct SecondarySolve {
    pub u: Array1<f64>,
    pub v: Array1<f64>,
}

/// The reference-dependent value function V.
///
/// `V(0) = 0`; gains are concave, losses are convex and scaled by
/// `LAMBDA`, so a loss outweighs an equal-sized gain.
pub fn value(delta: f64) -> f64 {
    if delta >= 0.0 {
        delta.powf(ALPHA)
    } else {
        -LAMBDA * (-delta).powf(BETA)
    }
}

/// Best-effort local solve of evaluator `k`'s secondary objective.
///
/// Returns `None` when the optimizer diverges or the result violates the
/// constraint set; the caller drops that evaluator for this objective.
pub fn solve_secondary(
    k: usize,
    x: ArrayView2<'_, f64>,
    y: ArrayView2<'_, f64>,
    theta_kk: f64,
    target: f64,
    mode: ObjectiveMode,
) -> Option<SecondarySolve> {
    let (m, _) = x.dim();
    let (s, _) = y.dim();
    let dims = s + m;

    // Uniform initial guess of 0.5 for every weight, expressed in the
    // log-space variables the optimizer actually walks.
    let mut point = Array1::from_elem(dims, 0.5f64.ln());

    let mut penalty = PENALTY_START;
    for _ in 0..PENALTY_ROUNDS {
        let cost_at =
            move |t: &Array1<f64>| penalized_cost(t, x, y, k, theta_kk, target, mode, penalty);
        let cost_and_grad =
            move |t: &Array1<f64>| (cost_at(t), numerical_gradient(&cost_at, t));

        match Bfgs::new(point.clone(), cost_and_grad)
            .with_tolerance(1e-6)
            .with_max_iterations(MAX_ITERATIONS)
            .run()
        {
            Ok(BfgsSolution { final_point, .. }) => point = final_point,
            // Keep the last iterate; the next, stiffer round may still
            // recover, and the final violation check gates acceptance.
            Err(error) => {
                log::debug!("Secondary solve round stalled for evaluator {k}: {error:?}");
            }
        }
        penalty *= PENALTY_GROWTH;
    }

    let (u, v) = weights_from(&point, s);
    let violation = constraint_violation(&u, &v, x, y, k, theta_kk);
    if violation > CONSTRAINT_TOL {
        log::debug!(
            "Secondary solve for evaluator {k} rejected: constraint violation {violation:.3e}"
        );
        return None;
    }
    Some(SecondarySolve { u, v })
}

/// Maps log-space variables back to the bounded weight pair.
fn weights_from(point: &Array1<f64>, s: usize) -> (Array1<f64>, Array1<f64>) {
    let weights = point.mapv(|t| t.exp().max(WEIGHT_FLOOR));
    (
        weights.slice(s![..s]).to_owned(),
        weights.slice(s![s..]).to_owned(),
    )
}

/// The negated behavioral objective plus quadratic constraint penalties.
#[allow(clippy::too_many_arguments)]
fn penalized_cost(
    point: &Array1<f64>,
    x: ArrayView2<'_, f64>,
    y: ArrayView2<'_, f64>,
    k: usize,
    theta_kk: f64,
    target: f64,
    mode: ObjectiveMode,
    penalty: f64,
) -> f64 {
    let (s, n) = y.dim();
    let (u, v) = weights_from(point, s);
    let weighted_outputs = u.dot(&y);
    let weighted_inputs = v.dot(&x);

    let mut total_value = 0.0;
    for j in 0..n {
        let theta = weighted_outputs[j] / (weighted_inputs[j] + DENOMINATOR_GUARD);
        let gain = value(theta - target);
        total_value += match mode {
            ObjectiveMode::AllDeviations => gain,
            ObjectiveMode::GainsOnly if theta > target => gain,
            ObjectiveMode::GainsOnly => 0.0,
        };
    }

    let mut cost = -total_value;

    // Equality penalties: normalization and the evaluator's own standing.
    let normalization = v.dot(&x.column(k)) - 1.0;
    let own_standing = u.dot(&y.column(k)) - theta_kk;
    cost += penalty * (normalization * normalization + own_standing * own_standing);

    // One-sided penalty for any unit pushed above full efficiency.
    for j in 0..n {
        let slack = weighted_outputs[j] - weighted_inputs[j];
        if slack > 0.0 {
            cost += penalty * slack * slack;
        }
    }
    cost
}

/// Central-difference gradient of `f` at `point`.
fn numerical_gradient<F>(f: &F, point: &Array1<f64>) -> Array1<f64>
where
    F: Fn(&Array1<f64>) -> f64,
{
    let mut gradient = Array1::zeros(point.len());
    let mut probe = point.clone();
    for i in 0..point.len() {
        let step = FD_STEP * (1.0 + point[i].abs());
        let original = probe[i];
        probe[i] = original + step;
        let forward = f(&probe);
        probe[i] = original - step;
        let backward = f(&probe);
        probe[i] = original;
        gradient[i] = (forward - backward) / (2.0 * step);
    }
    gradient
}

/// Worst violation across the full constraint set, for accept/reject.
fn constraint_violation(
    u: &Array1<f64>,
    v: &Array1<f64>,
    x: ArrayView2<'_, f64>,
    y: ArrayView2<'_, f64>,
    k: usize,
    theta_kk: f64,
) -> f64 {
    let weighted_outputs = u.dot(&y);
    let weighted_inputs = v.dot(&x);
    let mut worst = (v.dot(&x.column(k)) - 1.0).abs();
    worst = worst.max((u.dot(&y.column(k)) - theta_kk).abs());
    for (out, inp) in weighted_outputs.iter().zip(weighted_inputs.iter()) {
        worst = worst.max(out - inp);
    }
    worst
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ccr::{CcrOutcome, CcrProblem};
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn value_function_is_zero_at_reference() {
        assert_eq!(value(0.0), 0.0);
    }

    #[test]
    fn value_function_gains_are_concave_powers() {
        assert_abs_diff_eq!(value(0.5), 0.5f64.powf(ALPHA), epsilon = 1e-12);
        assert!(value(0.5) > 0.5); // concave above the diagonal for small gains
    }

    #[test]
    fn losses_loom_larger_than_gains() {
        let gain = value(0.3);
        let loss = value(-0.3);
        assert!(loss < 0.0);
        assert_abs_diff_eq!(-loss / gain, LAMBDA, epsilon = 1e-12);
    }

    #[test]
    fn accepted_solve_respects_constraint_set() {
        let x = array![[1.0, 2.0, 1.0]];
        let y = array![[1.0, 1.0, 2.0]];
        let problem = CcrProblem::new(x.view(), y.view());
        let theta_kk = match problem.solve_unit(2) {
            CcrOutcome::Solved { efficiency, .. } => efficiency,
            CcrOutcome::Failed => panic!("feasible LP reported failure"),
        };

        let solve = solve_secondary(
            2,
            x.view(),
            y.view(),
            theta_kk,
            0.8,
            ObjectiveMode::AllDeviations,
        )
        .expect("well-conditioned cohort should admit a secondary solve");

        assert!(solve.u.iter().all(|&w| w >= WEIGHT_FLOOR));
        assert!(solve.v.iter().all(|&w| w >= WEIGHT_FLOOR));
        assert_abs_diff_eq!(solve.v.dot(&x.column(2)), 1.0, epsilon = 1e-3);
        assert_abs_diff_eq!(solve.u.dot(&y.column(2)), theta_kk, epsilon = 1e-3);

        // No unit may score above full efficiency under accepted weights.
        let weighted_outputs = solve.u.dot(&y);
        let weighted_inputs = solve.v.dot(&x);
        for j in 0..3 {
            let theta = weighted_outputs[j] / weighted_inputs[j];
            assert!(theta <= 1.0 + 1e-3, "theta_{j} = {theta}");
        }
    }

    #[test]
    fn gains_only_mode_is_solvable_at_unreachable_target() {
        // With target 1.0 nothing scores strictly above it, so the
        // objective is flat and only the constraints drive the solve.
        let x = array![[1.0, 2.0, 1.0]];
        let y = array![[1.0, 1.0, 2.0]];
        let solve = solve_secondary(2, x.view(), y.view(), 1.0, 1.0, ObjectiveMode::GainsOnly);
        if let Some(solve) = solve {
            assert_abs_diff_eq!(solve.v.dot(&x.column(2)), 1.0, epsilon = 1e-3);
        }
    }

    #[test]
    fn rejected_candidates_never_leak_weights() {
        // A wildly infeasible self-standing (above full efficiency) cannot
        // be met under the theta_j <= 1 constraint row for j = k.
        let x = array![[1.0, 2.0, 1.0]];
        let y = array![[1.0, 1.0, 2.0]];
        let solve = solve_secondary(1, x.view(), y.view(), 5.0, 0.8, ObjectiveMode::AllDeviations);
        assert!(solve.is_none());
    }
}
