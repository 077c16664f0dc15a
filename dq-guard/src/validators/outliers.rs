//! Statistical outlier rules.

use super::sql::Params;
use super::{Evaluation, Validator};
use crate::analyzers::{Direction, OutlierAnalyzer, OutlierMethod, OutlierOutcome};
use crate::core::RuleSpec;
use crate::error::Result;
use crate::sources::DataSource;
use async_trait::async_trait;
use tracing::instrument;

/// Runs the two-pass [`OutlierAnalyzer`] for one column.
///
/// `threshold` is the z-score cutoff. For `iqr`, `multiplier` sets the fence
/// width and `threshold` is accepted in its place when no multiplier is
/// given.
#[derive(Debug, Clone)]
pub struct OutliersValidator {
    analyzer: OutlierAnalyzer,
}

impl OutliersValidator {
    pub fn from_rule(rule: &RuleSpec) -> Result<Self> {
        let params = Params::new(rule);
        let p = &rule.params;
        let table = rule.table.as_deref().unwrap_or_default();
        // checks presence and quoting with rule-scoped errors
        params.table()?;
        let column = params.column()?;

        let method_name = p.method.as_deref().unwrap_or("zscore");
        let parameter = match method_name.trim().to_ascii_lowercase().as_str() {
            "iqr" => p.multiplier.or(p.threshold),
            _ => p.threshold,
        };
        let method =
            OutlierMethod::parse(method_name, parameter).map_err(|e| params.error(e.to_string()))?;
        let direction = match p.direction.as_deref() {
            Some(direction) => direction
                .parse::<Direction>()
                .map_err(|e| params.error(e.to_string()))?,
            None => Direction::default(),
        };

        let analyzer = OutlierAnalyzer::new(table, column, method, direction)
            .map_err(|e| params.error(e.to_string()))?;
        Ok(Self { analyzer })
    }
}

#[async_trait]
impl Validator for OutliersValidator {
    fn rule_type(&self) -> &str {
        "outliers"
    }

    #[instrument(skip(self, source))]
    async fn evaluate(&self, source: &dyn DataSource, sample_size: usize) -> Result<Evaluation> {
        let outcome = self.analyzer.run(source, sample_size).await?;
        let metadata = outcome.metadata(self.analyzer.method(), self.analyzer.direction());

        let evaluation = match outcome {
            OutlierOutcome::InsufficientData { query, .. } => Evaluation::insufficient_data(query),
            OutlierOutcome::Detected(detection) => {
                Evaluation::new(detection.violation_count, detection.query)
                    .with_samples(detection.samples)
            }
        };
        Ok(evaluation.with_metadata_map(metadata))
    }
}
