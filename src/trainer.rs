use std::collections::BTreeSet;

use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::bundle::{BundleManifest, ModelBundle};
use crate::dataset::StudentRecord;
use crate::error::{PipelineError, Result};
use crate::evaluation::{self, EvaluationReport};
use crate::forest::{ForestParams, RandomForest};
use crate::preprocess;

/// Fewer labeled rows than this cannot be split and evaluated meaningfully.
pub const MIN_TRAINING_ROWS: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainerConfig {
    /// Share of rows held out for evaluation, rounded up.
    pub test_fraction: f64,
    /// Seed for the train/test shuffle.
    pub split_seed: u64,
    pub min_rows: usize,
    pub forest: ForestParams,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            test_fraction: 0.2,
            split_seed: 42,
            min_rows: MIN_TRAINING_ROWS,
            forest: ForestParams::default(),
        }
    }
}

/// Shuffle `items` with a fixed seed and split into (train, test).
/// The test side gets `ceil(len * test_fraction)` items.
pub fn split_train_test<T>(mut items: Vec<T>, test_fraction: f64, seed: u64) -> (Vec<T>, Vec<T>) {
    let mut rng = StdRng::seed_from_u64(seed);
    items.shuffle(&mut rng);

    let total = items.len();
    let test_len = ((total as f64) * test_fraction.clamp(0.0, 1.0)).ceil() as usize;
    let test = items.split_off(total - test_len.min(total));

    tracing::debug!("Dataset split: {} training, {} test", items.len(), test.len());
    (items, test)
}

pub struct Trainer {
    config: TrainerConfig,
}

impl Trainer {
    pub fn new(config: TrainerConfig) -> Self {
        Self { config }
    }

    /// Fit transformers and a forest on `records` and evaluate on a held-out split.
    pub fn train(&self, records: &[StudentRecord]) -> Result<ModelBundle> {
        let cfg = &self.config;

        if records.len() < cfg.min_rows {
            return Err(PipelineError::Training(format!(
                "{} labeled rows, need at least {}",
                records.len(),
                cfg.min_rows
            )));
        }

        let classes: Vec<String> = records
            .iter()
            .map(|r| r.grade.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if classes.len() < 2 {
            return Err(PipelineError::Training(format!(
                "need at least two grade classes, found {}",
                classes.len()
            )));
        }

        let (matrix, transformers) = preprocess::fit_transform(records)?;
        let labels: Vec<usize> = records
            .iter()
            .map(|r| classes.binary_search(&r.grade).unwrap_or_default())
            .collect();
        tracing::info!(
            "Preprocessed {} rows into {} features across {} classes",
            matrix.len(),
            transformers.feature_count(),
            classes.len()
        );

        let (train_idx, test_idx) =
            split_train_test((0..records.len()).collect(), cfg.test_fraction, cfg.split_seed);
        if train_idx.is_empty() || test_idx.is_empty() {
            return Err(PipelineError::Training(format!(
                "test fraction {} leaves an empty split",
                cfg.test_fraction
            )));
        }

        if train_idx.len() < classes.len() {
            return Err(PipelineError::Training(format!(
                "fewer training rows ({}) than grade classes ({})",
                train_idx.len(),
                classes.len()
            )));
        }

        let train_classes: BTreeSet<usize> = train_idx.iter().map(|&i| labels[i]).collect();
        if train_classes.len() < 2 {
            return Err(PipelineError::Training(
                "training split holds a single grade class".to_string(),
            ));
        }

        let train_x: Vec<Vec<f64>> = train_idx.iter().map(|&i| matrix[i].clone()).collect();
        let train_y: Vec<usize> = train_idx.iter().map(|&i| labels[i]).collect();
        let classifier = RandomForest::fit(&train_x, &train_y, classes.clone(), &cfg.forest)?;

        let actual: Vec<usize> = test_idx.iter().map(|&i| labels[i]).collect();
        let predicted: Vec<usize> = test_idx
            .iter()
            .map(|&i| classifier.predict(&matrix[i]))
            .collect();
        let evaluation = evaluation::evaluate(&classes, &actual, &predicted, train_idx.len());
        log_evaluation(&evaluation);

        Ok(ModelBundle {
            manifest: BundleManifest::new(classes, records.len()),
            classifier,
            transformers,
            evaluation,
        })
    }
}

fn log_evaluation(report: &EvaluationReport) {
    tracing::info!(
        "Model accuracy {:.2} on {} held-out rows",
        report.accuracy,
        report.test_rows
    );
    for m in &report.per_class {
        tracing::info!(
            "  {:<6} precision {:.2} recall {:.2} f1 {:.2} support {}",
            m.label,
            m.precision,
            m.recall,
            m.f1,
            m.support
        );
    }
}
