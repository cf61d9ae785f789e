pub mod ccr;
pub mod cross;
pub mod data;
pub mod engine;
pub mod presets;
pub mod progress;
pub mod prospect;
pub mod types;
