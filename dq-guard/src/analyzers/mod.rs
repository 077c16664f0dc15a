//! Statistical analyzers used by validators.
//!
//! - [`outlier`]: two-pass z-score and IQR outlier detection

pub mod outlier;

pub use outlier::{
    Bounds, Detection, Direction, OutlierAnalyzer, OutlierMethod, OutlierOutcome, Statistics,
};
