//! # CCR Self-Efficiency Solver
//!
//! Solves the output-maximizing, input-normalized CCR (Charnes-Cooper-
//! Rhodes) model once per unit. The efficiency ratio is linearized via the
//! Charnes-Cooper transform: fixing `v . x_k = 1` turns
//! `max (u . y_k) / (v . x_k)` into a plain linear program
//!
//! ```text
//! max  u . y_k
//! s.t. v . x_k = 1
//!      u . y_j - v . x_j <= 0   for every unit j
//!      u, v >= WEIGHT_FLOOR
//! ```
//!
//! The inequality block is identical for every unit, so [`CcrProblem`]
//! precomputes it once and reuses it across all `n` solves; only the
//! objective and the normalization row change per unit.

use minilp::{ComparisonOp, OptimizationDirection, Problem};
use ndarray::{Array1, Array2, ArrayView2};

/// Lower bound on every weight component. Keeps the LP away from the
/// degenerate all-zero weight vector.
pub const WEIGHT_FLOOR: f64 = 1e-6;

/// The tagged outcome of one unit's CCR solve. A failed solve is not the
/// same thing as a true zero efficiency; callers that need a plain number
/// use [`CcrOutcome::efficiency`], which maps failure to 0.0.
#[derive(Debug, Clone)]
pub enum CcrOutcome {
    Solved {
        efficiency: f64,
        u: Array1<f64>,
        v: Array1<f64>,
    },
    Failed,
}

impl CcrOutcome {
    /// The reported self-efficiency; 0.0 for a failed solve.
    pub fn efficiency(&self) -> f64 {
        match self {
            CcrOutcome::Solved { efficiency, .. } => *efficiency,
            CcrOutcome::Failed => 0.0,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, CcrOutcome::Failed)
    }
}

/// One cohort's CCR problem family: the shared inequality rows plus views
/// of X and Y. Build once per run, then call [`solve_unit`] for each k.
///
/// [`solve_unit`]: CcrProblem::solve_unit
pub struct CcrProblem<'a> {
    x: ArrayView2<'a, f64>,
    y: ArrayView2<'a, f64>,
    /// Shape `[n, s + m]`; row j holds `[y_j | -x_j]`.
    ineq_rows: Array2<f64>,
}

impl<'a> CcrProblem<'a> {
    pub fn new(x: ArrayView2<'a, f64>, y: ArrayView2<'a, f64>) -> Self {
        let (m, n) = x.dim();
        let (s, _) = y.dim();
        let mut ineq_rows = Array2::zeros((n, s + m));
        for j in 0..n {
            for r in 0..s {
                ineq_rows[[j, r]] = y[[r, j]];
            }
            for r in 0..m {
                ineq_rows[[j, s + r]] = -x[[r, j]];
            }
        }
        Self { x, y, ineq_rows }
    }

    /// Solves unit `k`'s LP. Infeasibility or numerical failure yields
    /// [`CcrOutcome::Failed`]; the rest of the cohort is unaffected.
    pub fn solve_unit(&self, k: usize) -> CcrOutcome {
        let (m, n) = self.x.dim();
        let (s, _) = self.y.dim();

        let mut problem = Problem::new(OptimizationDirection::Maximize);
        let u_vars: Vec<_> = (0..s)
            .map(|r| problem.add_var(self.y[[r, k]], (WEIGHT_FLOOR, f64::INFINITY)))
            .collect();
        let v_vars: Vec<_> = (0..m)
            .map(|_| problem.add_var(0.0, (WEIGHT_FLOOR, f64::INFINITY)))
            .collect();

        // Charnes-Cooper normalization: v . x_k = 1.
        let normalization: Vec<_> = v_vars
            .iter()
            .copied()
            .zip(self.x.column(k).iter().copied())
            .collect();
        problem.add_constraint(&normalization[..], ComparisonOp::Eq, 1.0);

        let all_vars: Vec<_> = u_vars.iter().chain(v_vars.iter()).copied().collect();
        for j in 0..n {
            let row: Vec<_> = all_vars
                .iter()
                .copied()
                .zip(self.ineq_rows.row(j).iter().copied())
                .collect();
            problem.add_constraint(&row[..], ComparisonOp::Le, 0.0);
        }

        match problem.solve() {
            Ok(solution) => {
                let u = Array1::from_iter(u_vars.iter().map(|&var| solution[var]));
                let v = Array1::from_iter(v_vars.iter().map(|&var| solution[var]));
                CcrOutcome::Solved {
                    efficiency: solution.objective(),
                    u,
                    v,
                }
            }
            Err(error) => {
                log::warn!("CCR solve failed for unit {k}: {error}");
                CcrOutcome::Failed
            }
        }
    }
}
