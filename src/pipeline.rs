//! Entry point used by the outer layers: training, restore, readiness and
//! inference all go through [`Pipeline`].

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde::Serialize;

use crate::bundle::{ArtifactStore, GradePrediction, ModelBundle};
use crate::catalog::CourseCatalog;
use crate::dataset::{self, StudentRecord};
use crate::error::{PipelineError, Result};
use crate::evaluation::EvaluationReport;
use crate::recommend::{CourseSuggestion, Recommendation, Recommender, DEFAULT_TOP_N};
use crate::trainer::{Trainer, TrainerConfig};

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub dataset_path: PathBuf,
    pub artifacts_dir: PathBuf,
    pub trainer: TrainerConfig,
    pub top_n: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dataset_path: PathBuf::from("data/students_performance.csv"),
            artifacts_dir: PathBuf::from("artifacts"),
            trainer: TrainerConfig::default(),
            top_n: DEFAULT_TOP_N,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrainOutcome {
    pub accuracy: f64,
    pub success: bool,
}

/// How [`Pipeline::ensure_ready`] reached the ready state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReadySource {
    Restored,
    Trained(TrainOutcome),
}

pub struct Pipeline {
    config: PipelineConfig,
    store: ArtifactStore,
    recommender: Recommender,
    // Readers clone the Arc and drop the lock; retraining swaps in a new bundle.
    live: RwLock<Option<Arc<ModelBundle>>>,
    // Held across persist and swap so the store and `live` agree on the newest bundle.
    publish: Mutex<()>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, catalog: CourseCatalog) -> Self {
        let store = ArtifactStore::new(&config.artifacts_dir);
        let recommender = Recommender::new(catalog, config.top_n);
        Self {
            config,
            store,
            recommender,
            live: RwLock::new(None),
            publish: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn is_ready(&self) -> bool {
        self.live
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// The live bundle, or `ModelNotReady`.
    pub fn bundle(&self) -> Result<Arc<ModelBundle>> {
        self.live
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(PipelineError::ModelNotReady)
    }

    fn swap(&self, bundle: ModelBundle) {
        let mut live = self.live.write().unwrap_or_else(PoisonError::into_inner);
        *live = Some(Arc::new(bundle));
    }

    /// Restore the persisted bundle. Returns false when none exists or it is
    /// unusable; the caller must then train before serving inference.
    pub fn restore(&self) -> bool {
        match self.store.load() {
            Ok(Some(bundle)) => {
                self.swap(bundle);
                true
            }
            Ok(None) => {
                tracing::warn!(
                    "No model bundle under '{}'; training required",
                    self.store.root().display()
                );
                false
            }
            Err(err) => {
                tracing::warn!("Ignoring stored model bundle: {err}");
                false
            }
        }
    }

    /// Load the configured dataset, train, persist, and go live.
    pub fn train(&self) -> Result<TrainOutcome> {
        let records = dataset::load_dataset(&self.config.dataset_path)?;
        self.train_on(&records)
    }

    /// Train on `records`. The new bundle goes live only after it is persisted.
    pub fn train_on(&self, records: &[StudentRecord]) -> Result<TrainOutcome> {
        let bundle = Trainer::new(self.config.trainer.clone()).train(records)?;
        let accuracy = bundle.evaluation.accuracy;

        let _publishing = self.publish.lock().unwrap_or_else(PoisonError::into_inner);
        self.store.persist(&bundle)?;
        self.swap(bundle);
        Ok(TrainOutcome {
            accuracy,
            success: true,
        })
    }

    /// Startup path: restore if possible, otherwise train from the dataset.
    pub fn ensure_ready(&self) -> Result<ReadySource> {
        if self.restore() {
            tracing::info!("Model restored from '{}'", self.store.root().display());
            return Ok(ReadySource::Restored);
        }
        tracing::info!("Training a new model from '{}'", self.config.dataset_path.display());
        let outcome = self.train()?;
        Ok(ReadySource::Trained(outcome))
    }

    pub fn predict(&self, record: &StudentRecord) -> Result<GradePrediction> {
        self.bundle()?.predict(record)
    }

    /// Course suggestions for one student. Requires the ready state; the
    /// suggestions themselves come from the catalog alone.
    pub fn recommend(
        &self,
        student_id: &str,
        department: &str,
        top_n: Option<usize>,
    ) -> Result<Recommendation> {
        self.bundle()?;
        let top_n = top_n.unwrap_or(self.recommender.default_top_n());
        Ok(self.recommender.recommend_for(student_id, department, top_n))
    }

    pub fn predict_or_recommend(&self, student_category: &str) -> Result<Vec<CourseSuggestion>> {
        self.bundle()?;
        Ok(self
            .recommender
            .recommend(student_category, self.recommender.default_top_n()))
    }

    pub fn evaluation(&self) -> Result<EvaluationReport> {
        Ok(self.bundle()?.evaluation.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forest::ForestParams;
    use crate::test_support::{synthetic_records, write_csv};

    fn config_in(dir: &std::path::Path, n_trees: usize) -> PipelineConfig {
        PipelineConfig {
            dataset_path: dir.join("students.csv"),
            artifacts_dir: dir.join("artifacts"),
            trainer: TrainerConfig {
                forest: ForestParams {
                    n_trees,
                    ..ForestParams::default()
                },
                ..TrainerConfig::default()
            },
            top_n: DEFAULT_TOP_N,
        }
    }

    fn pipeline_in(dir: &std::path::Path, n_trees: usize) -> Pipeline {
        Pipeline::new(config_in(dir, n_trees), CourseCatalog::builtin().unwrap())
    }

    #[test]
    fn end_to_end_cs_and_business() {
        let dir = tempfile::tempdir().unwrap();
        let records = synthetic_records(&[("CS", 50), ("Business", 50)], 42);
        write_csv(&dir.path().join("students.csv"), &records);
        let pipeline = pipeline_in(dir.path(), 100);

        assert!(!pipeline.is_ready());
        let outcome = pipeline.train().unwrap();
        assert!(outcome.success);
        assert!((0.0..=1.0).contains(&outcome.accuracy));
        assert!(pipeline.is_ready());

        let report = pipeline.evaluation().unwrap();
        assert_eq!(report.confusion_matrix.len(), 5);
        assert!(report.confusion_matrix.iter().all(|row| row.len() == 5));

        let recommendation = pipeline.recommend("S0001", "CS", Some(3)).unwrap();
        let names: Vec<&str> = recommendation
            .courses
            .iter()
            .map(|c| c.course_name.as_str())
            .collect();
        assert_eq!(names, vec!["Data Structures", "Algorithms", "Machine Learning"]);
    }

    #[test]
    fn inference_before_ready_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline_in(dir.path(), 5);
        let record = synthetic_records(&[("CS", 1)], 1).remove(0);

        assert!(matches!(pipeline.predict(&record), Err(PipelineError::ModelNotReady)));
        assert!(matches!(
            pipeline.recommend("S0001", "CS", None),
            Err(PipelineError::ModelNotReady)
        ));
        assert!(matches!(
            pipeline.predict_or_recommend("CS"),
            Err(PipelineError::ModelNotReady)
        ));
    }

    #[test]
    fn restored_bundle_predicts_like_the_original() {
        let dir = tempfile::tempdir().unwrap();
        let records = synthetic_records(&[("CS", 25), ("Business", 25)], 8);
        let trained = pipeline_in(dir.path(), 20);
        trained.train_on(&records).unwrap();

        let restored = pipeline_in(dir.path(), 20);
        assert!(restored.restore());
        for record in &records {
            assert_eq!(
                trained.predict(record).unwrap(),
                restored.predict(record).unwrap()
            );
        }
    }

    #[test]
    fn corrupt_bundle_means_not_ready() {
        let dir = tempfile::tempdir().unwrap();
        let records = synthetic_records(&[("CS", 25)], 8);
        let trained = pipeline_in(dir.path(), 5);
        trained.train_on(&records).unwrap();

        let bundle_dir = std::fs::read_dir(dir.path().join("artifacts"))
            .unwrap()
            .flatten()
            .map(|e| e.path())
            .find(|p| p.is_dir())
            .unwrap();
        std::fs::write(bundle_dir.join("encoders.json"), "[]").unwrap();

        let restored = pipeline_in(dir.path(), 5);
        assert!(!restored.restore());
        assert!(!restored.is_ready());
    }

    #[test]
    fn ensure_ready_trains_once_then_restores() {
        let dir = tempfile::tempdir().unwrap();
        write_csv(
            &dir.path().join("students.csv"),
            &synthetic_records(&[("CS", 15), ("Business", 15)], 3),
        );

        let first = pipeline_in(dir.path(), 5);
        assert!(matches!(first.ensure_ready().unwrap(), ReadySource::Trained(_)));

        let second = pipeline_in(dir.path(), 5);
        assert_eq!(second.ensure_ready().unwrap(), ReadySource::Restored);
        assert_eq!(
            first.bundle().unwrap().manifest.bundle_id,
            second.bundle().unwrap().manifest.bundle_id
        );
    }

    #[test]
    fn ensure_ready_surfaces_a_missing_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline_in(dir.path(), 5);
        let err = pipeline.ensure_ready().unwrap_err();
        assert!(matches!(err, PipelineError::DataSource { .. }));
        assert!(!pipeline.is_ready());
    }

    #[test]
    fn failed_retrain_keeps_the_live_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline_in(dir.path(), 5);
        pipeline
            .train_on(&synthetic_records(&[("CS", 20)], 2))
            .unwrap();
        let before = pipeline.bundle().unwrap();

        let err = pipeline.train_on(&synthetic_records(&[("CS", 3)], 2)).unwrap_err();
        assert!(matches!(err, PipelineError::Training(_)));
        assert!(Arc::ptr_eq(&before, &pipeline.bundle().unwrap()));
    }

    #[test]
    fn retrain_swaps_without_touching_held_bundles() {
        let dir = tempfile::tempdir().unwrap();
        let records = synthetic_records(&[("CS", 20), ("Business", 20)], 6);
        let pipeline = pipeline_in(dir.path(), 5);
        pipeline.train_on(&records).unwrap();

        let held = pipeline.bundle().unwrap();
        let snapshot = (*held).clone();
        pipeline.train_on(&records).unwrap();

        assert_eq!(*held, snapshot);
        assert_ne!(
            held.manifest.bundle_id,
            pipeline.bundle().unwrap().manifest.bundle_id
        );
    }

    #[test]
    fn concurrent_retrains_leave_a_restorable_live_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let records = synthetic_records(&[("CS", 15), ("Business", 15)], 9);
        let pipeline = pipeline_in(dir.path(), 3);

        for _ in 0..5 {
            std::thread::scope(|scope| {
                for _ in 0..4 {
                    scope.spawn(|| pipeline.train_on(&records).unwrap());
                }
            });

            let fresh = pipeline_in(dir.path(), 3);
            assert!(fresh.restore());
            assert_eq!(
                fresh.bundle().unwrap().manifest.bundle_id,
                pipeline.bundle().unwrap().manifest.bundle_id
            );
        }
    }

    #[test]
    fn unwritable_store_keeps_the_pipeline_not_ready() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("artifacts"), b"not a directory").unwrap();
        let pipeline = pipeline_in(dir.path(), 3);

        let err = pipeline
            .train_on(&synthetic_records(&[("CS", 15), ("Business", 15)], 9))
            .unwrap_err();
        assert!(matches!(err, PipelineError::Io(_)));
        assert!(!pipeline.is_ready());
    }

    #[test]
    fn concurrent_readers_share_the_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let records = synthetic_records(&[("CS", 20), ("Business", 20)], 6);
        let pipeline = pipeline_in(dir.path(), 5);
        pipeline.train_on(&records).unwrap();

        std::thread::scope(|scope| {
            for record in records.iter().take(4) {
                let pipeline = &pipeline;
                scope.spawn(move || {
                    pipeline.predict(record).unwrap();
                    pipeline.predict_or_recommend(&record.department).unwrap();
                });
            }
        });
    }
}
