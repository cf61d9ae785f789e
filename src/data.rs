//! # Dataset Loading and Matrix Construction
//!
//! This module is the exclusive entry point for unit data. It reads a
//! tabular dataset through a [`DatasetProvider`], exposes the catalog of
//! numeric columns available for selection, and reshapes a chosen set of
//! input/output columns into the dense `ndarray` matrices the solvers
//! operate on.
//!
//! - Lenient Values: DEA ratios are undefined for non-positive entries, so
//!   values are coerced to `f64` with invalid or missing entries treated
//!   as zero, then floored at [`DATA_FLOOR`]. Bad cells degrade a unit's
//!   numbers; they never abort a run.
//! - Strict Columns: a requested column that does not exist, or exists but
//!   is not numeric, is a caller error and fails fast with
//!   [`DataError::UnknownColumn`] before any solve starts.

use ndarray::Array2;
use polars::prelude::*;
use std::collections::HashSet;
use std::fs::File;
use std::path::PathBuf;
use thiserror::Error;

/// Floor applied to every matrix entry before use.
pub const DATA_FLOOR: f64 = 1e-3;

/// Input columns used when the caller does not select any.
pub const DEFAULT_INPUT_COLUMNS: &[&str] = &[
    "B10_Tenure_in_month",
    "B11_salary_today_brl",
    "b1_PDI_rate",
];

/// Output columns used when the caller does not select any.
pub const DEFAULT_OUTPUT_COLUMNS: &[&str] = &[
    "c1_overall_employee_satisfaction",
    "M_eNPS",
    "B9_salary_increase_last_year",
];

/// A comprehensive error type for dataset access and matrix construction.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    Polars(#[from] PolarsError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(
        "The requested column '{0}' does not exist in the dataset or is not numeric. \
         Use the column catalog to list valid selections."
    )]
    UnknownColumn(String),
}

/// Source of the tabular unit dataset. The engine never touches storage
/// directly; the surrounding application decides where units come from.
pub trait DatasetProvider {
    fn load(&self) -> Result<DataFrame, DataError>;
}

/// Loads units from a headered CSV file on disk.
pub struct CsvDatasetProvider {
    path: PathBuf,
}

impl CsvDatasetProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl DatasetProvider for CsvDatasetProvider {
    fn load(&self) -> Result<DataFrame, DataError> {
        log::info!("Loading unit dataset from '{}'", self.path.display());
        let mut df = CsvReader::new(File::open(&self.path)?)
            .with_options(CsvReadOptions::default().with_has_header(true))
            .finish()?;
        ensure_id_column(&mut df)?;
        log::info!("Loaded {} units with {} columns.", df.height(), df.width());
        Ok(df)
    }
}

/// Guarantees a stable `id` column, synthesizing `EMP00000`-style
/// identifiers from the row index when the dataset has none.
pub fn ensure_id_column(df: &mut DataFrame) -> Result<(), DataError> {
    if df.get_column_names().iter().any(|name| name.as_str() == "id") {
        return Ok(());
    }
    let ids: Vec<String> = (0..df.height()).map(|i| format!("EMP{i:05}")).collect();
    df.with_column(Series::new("id".into(), ids))?;
    Ok(())
}

/// The catalog of columns eligible for input/output selection.
pub fn numeric_columns(df: &DataFrame) -> Vec<String> {
    df.get_columns()
        .iter()
        .filter(|column| is_numeric_dtype(column.dtype()))
        .map(|column| column.name().to_string())
        .collect()
}

fn is_numeric_dtype(dtype: &DataType) -> bool {
    matches!(
        dtype,
        DataType::Float64
            | DataType::Float32
            | DataType::Int64
            | DataType::Int32
            | DataType::Int16
            | DataType::Int8
            | DataType::UInt64
            | DataType::UInt32
            | DataType::UInt16
            | DataType::UInt8
    )
}

/// The validated, solver-ready view of one cohort.
#[derive(Debug, Clone)]
pub struct Matrices {
    /// Input matrix, shape `[m, n]`: one row per input, one column per unit.
    pub x: Array2<f64>,
    /// Output matrix, shape `[s, n]`.
    pub y: Array2<f64>,
    /// Unit identifiers, column-aligned with `x` and `y`.
    pub ids: Vec<String>,
}

/// Extracts X, Y and the unit id list for the selected columns.
///
/// Pure transform: the frame itself is never mutated. All requested
/// columns are validated against the numeric catalog up front.
pub fn build_matrices(
    df: &DataFrame,
    input_cols: &[String],
    output_cols: &[String],
) -> Result<Matrices, DataError> {
    let catalog: HashSet<String> = numeric_columns(df).into_iter().collect();
    for name in input_cols.iter().chain(output_cols.iter()) {
        if !catalog.contains(name) {
            return Err(DataError::UnknownColumn(name.clone()));
        }
    }

    let n = df.height();
    let x = stack_columns(df, input_cols, n)?;
    let y = stack_columns(df, output_cols, n)?;
    let ids = unit_ids(df)?;
    Ok(Matrices { x, y, ids })
}

fn stack_columns(df: &DataFrame, names: &[String], n: usize) -> Result<Array2<f64>, DataError> {
    let mut matrix = Array2::zeros((names.len(), n));
    for (row, name) in names.iter().enumerate() {
        let values = coerce_numeric(df, name)?;
        for (col, value) in values.into_iter().enumerate() {
            matrix[[row, col]] = value;
        }
    }
    Ok(matrix)
}

/// Casts a column to `f64`, mapping nulls and unparseable entries to 0.0
/// and flooring everything at [`DATA_FLOOR`].
fn coerce_numeric(df: &DataFrame, name: &str) -> Result<Vec<f64>, DataError> {
    let column = df.column(name)?;
    let casted = column.cast(&DataType::Float64)?;
    let values = casted.f64()?;
    Ok(values
        .into_iter()
        .map(|entry| entry.unwrap_or(0.0).max(DATA_FLOOR))
        .collect())
}

fn unit_ids(df: &DataFrame) -> Result<Vec<String>, DataError> {
    let column = df.column("id")?;
    let mut ids = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let value = column.get(i)?;
        ids.push(match value {
            AnyValue::String(text) => text.to_string(),
            AnyValue::StringOwned(text) => text.to_string(),
            AnyValue::Null => format!("EMP{i:05}"),
            other => other.to_string(),
        });
    }
    Ok(ids)
}
