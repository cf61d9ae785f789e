//! # Saved Evaluation Presets
//!
//! Operators save column selections and objective targets they come back
//! to. The store is deliberately dumb: a JSON array on disk, appended to
//! on save and capped at the most recent [`MAX_SAVED_PRESETS`] entries.
//! A missing or unreadable file reads as an empty list.

use crate::types::{
    DEFAULT_MANAGEMENT_OBJECTIVE, DEFAULT_ORGANIZATIONAL_OBJECTIVE, DEFAULT_PERSONAL_OBJECTIVE,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use thiserror::Error;

/// Number of presets retained on disk.
pub const MAX_SAVED_PRESETS: usize = 10;

#[derive(Debug, Error)]
pub enum PresetError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("preset serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// One saved customization of an evaluation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationPreset {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub input_cols: Vec<String>,
    #[serde(default)]
    pub output_cols: Vec<String>,
    #[serde(default = "default_organizational")]
    pub organizational_objective: f64,
    #[serde(default = "default_personal")]
    pub personal_objective: f64,
    #[serde(default = "default_management")]
    pub management_objective: f64,
}

fn default_organizational() -> f64 {
    DEFAULT_ORGANIZATIONAL_OBJECTIVE
}

fn default_personal() -> f64 {
    DEFAULT_PERSONAL_OBJECTIVE
}

fn default_management() -> f64 {
    DEFAULT_MANAGEMENT_OBJECTIVE
}

/// File-backed preset store.
pub struct PresetStore {
    path: PathBuf,
}

impl PresetStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Reads all saved presets, oldest first. Missing or corrupt files
    /// read as empty rather than erroring.
    pub fn load(&self) -> Vec<EvaluationPreset> {
        match fs::read_to_string(&self.path) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_default(),
            Err(_) => Vec::new(),
        }
    }

    /// Appends a preset, retaining only the most recent
    /// [`MAX_SAVED_PRESETS`] entries.
    pub fn save(&self, preset: EvaluationPreset) -> Result<(), PresetError> {
        let mut presets = self.load();
        presets.push(preset);
        if presets.len() > MAX_SAVED_PRESETS {
            let excess = presets.len() - MAX_SAVED_PRESETS;
            presets.drain(..excess);
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(&presets)?)?;
        Ok(())
    }
}
