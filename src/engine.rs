//! # Evaluation Engine
//!
//! Orchestrates one evaluation run end to end:
//!
//! 1. Load the dataset (once, cached) and build the X/Y matrices for the
//!    selected columns.
//! 2. Solve every unit's CCR self-efficiency LP against the shared
//!    constraint block.
//! 3. Sample an evaluator panel and solve the three prospect-theory
//!    secondary objectives per evaluator, seeded by the CCR results.
//! 4. Average the cross-efficiency matrix per objective and fold the
//!    three averages into one composite score per unit.
//!
//! Every solver failure along the way is absorbed per the module-level
//! policies (zero-efficiency fallback for CCR, dropped evaluators for the
//! secondary solves, self-efficiency fallback for an objective whose
//! whole panel failed) and counted in [`SolveStats`]. The run claims the
//! shared [`RunTracker`] up front and the RAII guard releases it on every
//! exit path, so a failed run never wedges the status endpoint.

use crate::ccr::{CcrOutcome, CcrProblem};
use crate::cross::cross_efficiency_matrix;
use crate::data::{
    self, build_matrices, DataError, DatasetProvider, Matrices, DEFAULT_INPUT_COLUMNS,
    DEFAULT_OUTPUT_COLUMNS,
};
use crate::progress::{RunGuard, RunInProgress, RunStatus, RunTracker};
use crate::prospect::{solve_secondary, ObjectiveMode, SecondarySolve};
use crate::types::{
    round4, EvaluateOptions, EvaluationReport, ResultRecord, SolveStats, Summary,
};
use itertools::Itertools;
use ndarray::{Array1, Array2, ArrayView2, Axis};
use polars::prelude::DataFrame;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can escape [`Evaluator::evaluate`].
#[derive(Debug, Error)]
pub enum EvalError {
    #[error(transparent)]
    Data(#[from] DataError),

    #[error(transparent)]
    Busy(#[from] RunInProgress),
}

/// The evaluation engine. Owns the dataset cache, the last-used column
/// selection, and a handle to the shared run tracker.
pub struct Evaluator<P> {
    provider: P,
    tracker: Arc<RunTracker>,
    dataset: Option<DataFrame>,
    input_cols: Vec<String>,
    output_cols: Vec<String>,
}

impl<P: DatasetProvider> Evaluator<P> {
    pub fn new(provider: P) -> Self {
        Self::with_tracker(provider, Arc::new(RunTracker::new()))
    }

    /// Builds an evaluator sharing an externally owned tracker, so a
    /// status endpoint can poll progress without holding the engine.
    pub fn with_tracker(provider: P, tracker: Arc<RunTracker>) -> Self {
        Self {
            provider,
            tracker,
            dataset: None,
            input_cols: DEFAULT_INPUT_COLUMNS.iter().map(|s| s.to_string()).collect(),
            output_cols: DEFAULT_OUTPUT_COLUMNS.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn tracker(&self) -> Arc<RunTracker> {
        Arc::clone(&self.tracker)
    }

    /// Current run progress and running flag.
    pub fn status(&self) -> RunStatus {
        self.tracker.snapshot()
    }

    /// Columns eligible for input/output selection (numeric only).
    pub fn available_columns(&mut self) -> Result<Vec<String>, EvalError> {
        let df = self.dataset()?;
        Ok(data::numeric_columns(df))
    }

    /// Runs a full evaluation and returns one record per unit.
    ///
    /// Fails fast with [`EvalError::Busy`] if a run is already active and
    /// with a data error for an unknown column selection; solver-level
    /// trouble is absorbed and reported through [`SolveStats`] instead.
    pub fn evaluate(&mut self, options: &EvaluateOptions) -> Result<EvaluationReport, EvalError> {
        let tracker = Arc::clone(&self.tracker);
        let guard = tracker.begin()?;

        if let Some(cols) = &options.input_cols {
            self.input_cols = cols.clone();
        }
        if let Some(cols) = &options.output_cols {
            self.output_cols = cols.clone();
        }
        let input_cols = self.input_cols.clone();
        let output_cols = self.output_cols.clone();

        let df = self.dataset()?;
        let matrices = build_matrices(df, &input_cols, &output_cols)?;

        if matrices.ids.is_empty() {
            log::info!("Evaluation requested on an empty cohort; returning empty report.");
            return Ok(EvaluationReport {
                records: Vec::new(),
                stats: SolveStats::default(),
            });
        }

        log::info!(
            "Starting efficiency evaluation: {} units, {} inputs, {} outputs.",
            matrices.ids.len(),
            input_cols.len(),
            output_cols.len()
        );
        Ok(run_evaluation(&matrices, options, &guard))
    }

    /// Aggregate dashboard metrics for a (freshly computed) evaluation.
    pub fn summary(&mut self, options: &EvaluateOptions) -> Result<Summary, EvalError> {
        let report = self.evaluate(options)?;
        Ok(summarize(&report))
    }

    fn dataset(&mut self) -> Result<&DataFrame, EvalError> {
        if self.dataset.is_none() {
            self.dataset = Some(self.provider.load()?);
        }
        // Populated just above when missing.
        Ok(self.dataset.as_ref().expect("dataset cache populated"))
    }
}

/// Target fraction of the progress bar consumed by the CCR pass.
const CCR_PROGRESS_SHARE: f64 = 0.3;
/// Fraction consumed by the secondary-objective pass.
const PANEL_PROGRESS_SHARE: f64 = 0.6;

fn run_evaluation(
    matrices: &Matrices,
    options: &EvaluateOptions,
    guard: &RunGuard<'_>,
) -> EvaluationReport {
    let x = matrices.x.view();
    let y = matrices.y.view();
    let n = matrices.ids.len();

    // CCR pass: one LP per unit against the shared inequality block.
    let problem = CcrProblem::new(x, y);
    let mut outcomes = Vec::with_capacity(n);
    for k in 0..n {
        outcomes.push(problem.solve_unit(k));
        if k % 100 == 0 {
            guard.advance_to(k as f64 / n as f64 * CCR_PROGRESS_SHARE);
        }
    }
    let self_efficiencies: Array1<f64> =
        outcomes.iter().map(CcrOutcome::efficiency).collect();
    let ccr_failures = outcomes.iter().filter(|o| o.is_failed()).count();
    if ccr_failures > 0 {
        log::warn!(
            "{ccr_failures} of {n} CCR solves failed; affected units report zero efficiency."
        );
    }
    guard.advance_to(CCR_PROGRESS_SHARE);

    // Evaluator panel, sampled without replacement and clamped to n.
    let panel_size = options.panel_size.min(n);
    let mut rng = match options.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let panel = rand::seq::index::sample(&mut rng, n, panel_size).into_vec();
    log::info!("Sampled an evaluator panel of {panel_size} units.");

    let objectives = [
        (ObjectiveMode::AllDeviations, options.organizational_objective),
        (ObjectiveMode::GainsOnly, options.personal_objective),
        (ObjectiveMode::AllDeviations, options.management_objective),
    ];
    let mut panels: [Vec<SecondarySolve>; 3] = [Vec::new(), Vec::new(), Vec::new()];
    let mut dropped = [0usize; 3];
    for (i, &k) in panel.iter().enumerate() {
        let theta_kk = self_efficiencies[k];
        for (slot, &(mode, target)) in objectives.iter().enumerate() {
            match solve_secondary(k, x, y, theta_kk, target, mode) {
                Some(solve) => panels[slot].push(solve),
                None => dropped[slot] += 1,
            }
        }
        guard.advance_to(
            CCR_PROGRESS_SHARE + (i + 1) as f64 / panel_size as f64 * PANEL_PROGRESS_SHARE,
        );
    }

    let averages: Vec<Array1<f64>> = panels
        .iter()
        .map(|panel| average_cross_efficiency(panel, x, y, &self_efficiencies))
        .collect();

    let mut records = Vec::with_capacity(n);
    for (j, id) in matrices.ids.iter().enumerate() {
        let organizational = averages[0][j];
        let personal = averages[1][j];
        let management = averages[2][j];
        let composite = (organizational + personal + management) / 3.0;
        records.push(ResultRecord {
            employee_id: id.clone(),
            ccr_efficiency: round4(self_efficiencies[j]),
            cross_efficiency: round4(organizational),
            prospect_organizational: round4(organizational),
            prospect_personal: round4(personal),
            prospect_management: round4(management),
            composite_score: round4(composite),
        });
    }

    log::info!(
        "Evaluation complete: {n} records, dropped evaluators per objective: {dropped:?}."
    );
    EvaluationReport {
        records,
        stats: SolveStats {
            ccr_failures,
            organizational_dropped: dropped[0],
            personal_dropped: dropped[1],
            management_dropped: dropped[2],
            panel_size,
        },
    }
}

/// Panel average of the cross-efficiency matrix for one objective.
///
/// An objective whose entire panel failed to converge falls back to each
/// unit's own CCR self-efficiency, a degraded but defined default.
pub(crate) fn average_cross_efficiency(
    panel: &[SecondarySolve],
    x: ArrayView2<'_, f64>,
    y: ArrayView2<'_, f64>,
    self_efficiencies: &Array1<f64>,
) -> Array1<f64> {
    if panel.is_empty() {
        log::warn!("No surviving evaluators for an objective; falling back to self-efficiency.");
        return self_efficiencies.clone();
    }
    let s = y.nrows();
    let m = x.nrows();
    let mut u_rows = Array2::zeros((panel.len(), s));
    let mut v_rows = Array2::zeros((panel.len(), m));
    for (i, solve) in panel.iter().enumerate() {
        u_rows.row_mut(i).assign(&solve.u);
        v_rows.row_mut(i).assign(&solve.v);
    }
    let matrix = cross_efficiency_matrix(&u_rows, &v_rows, x, y);
    matrix
        .mean_axis(Axis(0))
        .expect("panel verified non-empty above")
}

/// Folds a report into the dashboard summary.
pub fn summarize(report: &EvaluationReport) -> Summary {
    let total = report.records.len();
    if total == 0 {
        return Summary {
            average_ccr_efficiency: 0.0,
            average_cross_efficiency: 0.0,
            top_performers: Vec::new(),
            total_evaluated: 0,
        };
    }
    let average_ccr =
        report.records.iter().map(|r| r.ccr_efficiency).sum::<f64>() / total as f64;
    let average_cross =
        report.records.iter().map(|r| r.cross_efficiency).sum::<f64>() / total as f64;
    let top_performers = report
        .records
        .iter()
        .cloned()
        .sorted_by(|a, b| {
            b.composite_score
                .partial_cmp(&a.composite_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .take(5)
        .collect();
    Summary {
        average_ccr_efficiency: round4(average_ccr),
        average_cross_efficiency: round4(average_cross),
        top_performers,
        total_evaluated: total,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use polars::prelude::*;

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    /// In-memory provider used throughout the engine tests.
    struct FrameProvider(DataFrame);

    impl DatasetProvider for FrameProvider {
        fn load(&self) -> Result<DataFrame, DataError> {
            Ok(self.0.clone())
        }
    }

    fn three_unit_frame() -> DataFrame {
        DataFrame::new(vec![
            Series::new("id".into(), vec!["e1", "e2", "e3"]).into(),
            Series::new("hours".into(), vec![1.0, 2.0, 1.0]).into(),
            Series::new("tickets".into(), vec![1.0, 1.0, 2.0]).into(),
        ])
        .unwrap()
    }

    fn three_unit_options() -> EvaluateOptions {
        EvaluateOptions {
            input_cols: Some(vec!["hours".to_string()]),
            output_cols: Some(vec!["tickets".to_string()]),
            seed: Some(7),
            ..EvaluateOptions::default()
        }
    }

    #[test]
    fn best_ratio_unit_leads_the_cohort() {
        init_logging();
        let mut evaluator = Evaluator::new(FrameProvider(three_unit_frame()));
        let report = evaluator.evaluate(&three_unit_options()).unwrap();
        assert_eq!(report.records.len(), 3);

        let by_id = |id: &str| {
            report
                .records
                .iter()
                .find(|r| r.employee_id == id)
                .unwrap()
                .clone()
        };
        assert_abs_diff_eq!(by_id("e3").ccr_efficiency, 1.0, epsilon = 1e-3);
        assert!(by_id("e2").ccr_efficiency < by_id("e1").ccr_efficiency);
        assert!(by_id("e2").ccr_efficiency < by_id("e3").ccr_efficiency);
    }

    #[test]
    fn panel_larger_than_cohort_is_clamped() {
        init_logging();
        let mut evaluator = Evaluator::new(FrameProvider(three_unit_frame()));
        let options = EvaluateOptions {
            panel_size: 50,
            ..three_unit_options()
        };
        let report = evaluator.evaluate(&options).unwrap();
        assert_eq!(report.stats.panel_size, 3);
    }

    #[test]
    fn composite_is_the_mean_of_the_three_averages() {
        init_logging();
        let mut evaluator = Evaluator::new(FrameProvider(three_unit_frame()));
        let report = evaluator.evaluate(&three_unit_options()).unwrap();
        for record in &report.records {
            let mean = (record.prospect_organizational
                + record.prospect_personal
                + record.prospect_management)
                / 3.0;
            // Fields are rounded individually, so allow rounding slack.
            assert_abs_diff_eq!(record.composite_score, mean, epsilon = 2e-4);
        }
    }

    #[test]
    fn scores_stay_in_the_unit_interval() {
        init_logging();
        let mut evaluator = Evaluator::new(FrameProvider(three_unit_frame()));
        let report = evaluator.evaluate(&three_unit_options()).unwrap();
        for record in &report.records {
            for score in [
                record.ccr_efficiency,
                record.cross_efficiency,
                record.prospect_organizational,
                record.prospect_personal,
                record.prospect_management,
                record.composite_score,
            ] {
                assert!(score >= 0.0, "negative score in {record:?}");
                assert!(score <= 1.0 + 1e-2, "score above 1 in {record:?}");
            }
        }
    }

    #[test]
    fn fixed_seed_makes_runs_identical() {
        init_logging();
        let mut evaluator = Evaluator::new(FrameProvider(three_unit_frame()));
        let options = three_unit_options();
        let first = evaluator.evaluate(&options).unwrap();
        let second = evaluator.evaluate(&options).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn empty_objective_panel_falls_back_to_self_efficiency() {
        // Every secondary solve for one objective failed: the averaged
        // column must equal the self-efficiency vector exactly, unit by
        // unit.
        let x = array![[1.0, 2.0, 1.0]];
        let y = array![[1.0, 1.0, 2.0]];
        let self_efficiencies = array![0.5, 0.25, 1.0];
        let averaged =
            average_cross_efficiency(&[], x.view(), y.view(), &self_efficiencies);
        for j in 0..3 {
            assert_eq!(averaged[j], self_efficiencies[j]);
        }
    }

    #[test]
    fn empty_dataset_short_circuits() {
        init_logging();
        let df = DataFrame::new(vec![
            Series::new("id".into(), Vec::<String>::new()).into(),
            Series::new("hours".into(), Vec::<f64>::new()).into(),
            Series::new("tickets".into(), Vec::<f64>::new()).into(),
        ])
        .unwrap();
        let mut evaluator = Evaluator::new(FrameProvider(df));
        let report = evaluator.evaluate(&three_unit_options()).unwrap();
        assert!(report.records.is_empty());
        assert_eq!(report.stats, SolveStats::default());

        // The guard must have released the tracker on the short-circuit.
        let status = evaluator.status();
        assert!(!status.is_running);
        assert_eq!(status.progress, 1.0);
    }

    #[test]
    fn busy_tracker_rejects_a_second_run() {
        init_logging();
        let mut evaluator = Evaluator::new(FrameProvider(three_unit_frame()));
        let tracker = evaluator.tracker();
        let _guard = tracker.begin().unwrap();
        let err = evaluator.evaluate(&three_unit_options()).unwrap_err();
        assert!(matches!(err, EvalError::Busy(_)));
    }

    #[test]
    fn unknown_column_releases_the_tracker() {
        init_logging();
        let mut evaluator = Evaluator::new(FrameProvider(three_unit_frame()));
        let options = EvaluateOptions {
            input_cols: Some(vec!["bogus".to_string()]),
            ..three_unit_options()
        };
        let err = evaluator.evaluate(&options).unwrap_err();
        assert!(matches!(err, EvalError::Data(DataError::UnknownColumn(_))));
        assert!(!evaluator.status().is_running);
    }

    #[test]
    fn available_columns_are_numeric_only() {
        init_logging();
        let df = DataFrame::new(vec![
            Series::new("id".into(), vec!["e1"]).into(),
            Series::new("team".into(), vec!["ops"]).into(),
            Series::new("hours".into(), vec![1.0]).into(),
        ])
        .unwrap();
        let mut evaluator = Evaluator::new(FrameProvider(df));
        let columns = evaluator.available_columns().unwrap();
        assert_eq!(columns, vec!["hours".to_string()]);
    }

    #[test]
    fn summary_ranks_top_performers_by_composite() {
        init_logging();
        let mut evaluator = Evaluator::new(FrameProvider(three_unit_frame()));
        let summary = evaluator.summary(&three_unit_options()).unwrap();
        assert_eq!(summary.total_evaluated, 3);
        assert!(summary.top_performers.len() <= 5);
        for pair in summary.top_performers.windows(2) {
            assert!(pair[0].composite_score >= pair[1].composite_score);
        }
        assert!(summary.average_ccr_efficiency > 0.0);
    }

    #[test]
    fn failure_counts_are_surfaced_in_stats() {
        init_logging();
        let mut evaluator = Evaluator::new(FrameProvider(three_unit_frame()));
        let report = evaluator.evaluate(&three_unit_options()).unwrap();
        // Whatever the panel outcome, the bookkeeping must be consistent:
        // drops never exceed the panel size and CCR failures the cohort.
        assert!(report.stats.organizational_dropped <= report.stats.panel_size);
        assert!(report.stats.personal_dropped <= report.stats.panel_size);
        assert!(report.stats.management_dropped <= report.stats.panel_size);
        assert!(report.stats.ccr_failures <= report.records.len());
    }
}
