//! Shared result types and evaluation parameters.
//!
//! Everything the engine reports to callers lives here: the per-unit
//! [`ResultRecord`], the run-level [`EvaluationReport`] with its solve
//! statistics, the dashboard [`Summary`], and the [`EvaluateOptions`]
//! bundle that parameterizes a run.

use serde::{Deserialize, Serialize};

/// Default reference efficiency for the organizational objective.
pub const DEFAULT_ORGANIZATIONAL_OBJECTIVE: f64 = 0.8;
/// Default reference efficiency for the personal objective.
pub const DEFAULT_PERSONAL_OBJECTIVE: f64 = 1.0;
/// Default reference efficiency for the management objective.
pub const DEFAULT_MANAGEMENT_OBJECTIVE: f64 = 0.8;
/// Default requested evaluator panel size (clamped to the cohort size).
pub const DEFAULT_PANEL_SIZE: usize = 50;

/// Parameters for a single evaluation run.
///
/// `input_cols`/`output_cols` of `None` reuse the engine's last-used
/// column selection. `seed` of `None` samples the evaluator panel from
/// entropy; fixing it makes runs reproducible.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluateOptions {
    pub input_cols: Option<Vec<String>>,
    pub output_cols: Option<Vec<String>>,
    pub organizational_objective: f64,
    pub personal_objective: f64,
    pub management_objective: f64,
    pub panel_size: usize,
    pub seed: Option<u64>,
}

impl Default for EvaluateOptions {
    fn default() -> Self {
        Self {
            input_cols: None,
            output_cols: None,
            organizational_objective: DEFAULT_ORGANIZATIONAL_OBJECTIVE,
            personal_objective: DEFAULT_PERSONAL_OBJECTIVE,
            management_objective: DEFAULT_MANAGEMENT_OBJECTIVE,
            panel_size: DEFAULT_PANEL_SIZE,
            seed: None,
        }
    }
}

/// One unit's scores for a completed run. Immutable once produced.
///
/// `cross_efficiency` duplicates `prospect_organizational`; the original
/// API exposed both names and downstream consumers read either.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub employee_id: String,
    pub ccr_efficiency: f64,
    pub cross_efficiency: f64,
    pub prospect_organizational: f64,
    pub prospect_personal: f64,
    pub prospect_management: f64,
    pub composite_score: f64,
}

/// Counts of absorbed solver failures, surfaced for observability.
///
/// A non-zero `ccr_failures` means that many units report a fallback 0.0
/// efficiency; a non-zero `*_dropped` means that many panel evaluators
/// contributed no weight vector for that objective.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SolveStats {
    pub ccr_failures: usize,
    pub organizational_dropped: usize,
    pub personal_dropped: usize,
    pub management_dropped: usize,
    /// Effective panel size after clamping to the cohort size.
    pub panel_size: usize,
}

/// The full outcome of one evaluation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub records: Vec<ResultRecord>,
    pub stats: SolveStats,
}

/// Aggregate metrics for dashboard consumption.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub average_ccr_efficiency: f64,
    pub average_cross_efficiency: f64,
    /// Top 5 records by composite score, descending.
    pub top_performers: Vec<ResultRecord>,
    pub total_evaluated: usize,
}

/// Rounds a reported score to the fixed 4-decimal output precision.
pub fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round4_truncates_to_four_places() {
        assert_eq!(round4(0.123_456_78), 0.1235);
        assert_eq!(round4(1.0), 1.0);
        assert_eq!(round4(0.999_96), 1.0);
    }

    #[test]
    fn default_options_match_documented_targets() {
        let options = EvaluateOptions::default();
        assert_eq!(options.organizational_objective, 0.8);
        assert_eq!(options.personal_objective, 1.0);
        assert_eq!(options.management_objective, 0.8);
        assert_eq!(options.panel_size, 50);
        assert!(options.seed.is_none());
        assert!(options.input_cols.is_none());
    }
}
