//! The trained model bundle and its on-disk artifact store.
//!
//! A bundle is written as one directory:
//!
//! ```text
//! artifacts/
//!   CURRENT              name of the live bundle directory
//!   bundle-<uuid>/
//!     manifest.json
//!     classifier.json
//!     encoders.json
//!     scaler.json
//!     evaluation.json
//! ```
//!
//! Files are written into a staging directory that is renamed into place,
//! then `CURRENT` is replaced through a temp file and rename. A reader
//! therefore sees either the previous bundle or the complete new one.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dataset::{feature_names, StudentRecord};
use crate::error::{PipelineError, Result};
use crate::evaluation::EvaluationReport;
use crate::forest::RandomForest;
use crate::preprocess::{CategoryEncoder, FittedTransformers, StandardScaler};

/// Bumped whenever the feature layout or file format changes.
pub const FORMAT_VERSION: u32 = 1;

const POINTER_FILE: &str = "CURRENT";
const BUNDLE_PREFIX: &str = "bundle-";
const MANIFEST_FILE: &str = "manifest.json";
const CLASSIFIER_FILE: &str = "classifier.json";
const ENCODERS_FILE: &str = "encoders.json";
const SCALER_FILE: &str = "scaler.json";
const EVALUATION_FILE: &str = "evaluation.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleManifest {
    pub format_version: u32,
    pub bundle_id: Uuid,
    pub trained_at: DateTime<Utc>,
    pub feature_columns: Vec<String>,
    pub classes: Vec<String>,
    pub dataset_rows: usize,
}

impl BundleManifest {
    pub fn new(classes: Vec<String>, dataset_rows: usize) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            bundle_id: Uuid::new_v4(),
            trained_at: Utc::now(),
            feature_columns: feature_names(),
            classes,
            dataset_rows,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GradePrediction {
    pub student_id: String,
    pub grade: String,
    /// `(label, probability)` in class order.
    pub probabilities: Vec<(String, f64)>,
}

/// Classifier, transformers and evaluation from one training run.
/// Never mutated after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelBundle {
    pub manifest: BundleManifest,
    pub classifier: RandomForest,
    pub transformers: FittedTransformers,
    pub evaluation: EvaluationReport,
}

impl ModelBundle {
    pub fn predict(&self, record: &StudentRecord) -> Result<GradePrediction> {
        let features = self.transformers.transform(record)?;
        let probabilities = self.classifier.predict_proba(&features);
        let best = crate::forest::argmax(&probabilities);
        Ok(GradePrediction {
            student_id: record.student_id.clone(),
            grade: self.classifier.classes[best].clone(),
            probabilities: self
                .classifier
                .classes
                .iter()
                .cloned()
                .zip(probabilities)
                .collect(),
        })
    }

    /// Check that every part agrees with the manifest and with the
    /// feature layout of this build.
    pub fn validate(&self) -> std::result::Result<(), String> {
        let m = &self.manifest;
        if m.format_version != FORMAT_VERSION {
            return Err(format!(
                "format version {} (expected {FORMAT_VERSION})",
                m.format_version
            ));
        }
        if m.feature_columns != feature_names() {
            return Err("feature columns differ from the current layout".to_string());
        }
        if !self.transformers.matches_schema() {
            return Err("encoders or scaler do not cover the feature columns".to_string());
        }
        if self.classifier.n_features != m.feature_columns.len() {
            return Err(format!(
                "classifier expects {} features, manifest lists {}",
                self.classifier.n_features,
                m.feature_columns.len()
            ));
        }
        if self.classifier.classes != m.classes {
            return Err("classifier classes differ from manifest".to_string());
        }
        if !self.classifier.is_well_formed() {
            return Err("classifier trees are malformed".to_string());
        }
        Ok(())
    }
}

/// Reads and writes bundles under one root directory.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write all parts of `bundle` and make it the live bundle.
    /// On error the previous bundle stays live and `CURRENT` is untouched.
    ///
    /// Callers must not persist concurrently into the same root: pruning
    /// removes every bundle except the one just written.
    pub fn persist(&self, bundle: &ModelBundle) -> Result<PathBuf> {
        fs::create_dir_all(&self.root)?;

        let name = format!("{BUNDLE_PREFIX}{}", bundle.manifest.bundle_id);
        let staging = self.root.join(format!(".staging-{name}"));
        let target = self.root.join(&name);

        if let Err(err) = write_parts(&staging, bundle) {
            let _ = fs::remove_dir_all(&staging);
            return Err(err);
        }
        if let Err(err) = fs::rename(&staging, &target) {
            let _ = fs::remove_dir_all(&staging);
            return Err(err.into());
        }

        let pointer_tmp = self
            .root
            .join(format!(".{POINTER_FILE}.{}.tmp", bundle.manifest.bundle_id));
        if let Err(err) = fs::write(&pointer_tmp, &name)
            .and_then(|()| fs::rename(&pointer_tmp, self.root.join(POINTER_FILE)))
        {
            let _ = fs::remove_file(&pointer_tmp);
            let _ = fs::remove_dir_all(&target);
            return Err(err.into());
        }

        self.prune(&name);
        tracing::info!("Persisted model bundle to '{}'", target.display());
        Ok(target)
    }

    /// Load the live bundle. `Ok(None)` means nothing was ever persisted.
    pub fn load(&self) -> Result<Option<ModelBundle>> {
        let pointer = self.root.join(POINTER_FILE);
        let name = match fs::read_to_string(&pointer) {
            Ok(name) => name.trim().to_string(),
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(PipelineError::corrupt(&pointer, err.to_string())),
        };
        if !name.starts_with(BUNDLE_PREFIX) || name.contains(['/', '\\']) || name.contains("..") {
            return Err(PipelineError::corrupt(
                &pointer,
                format!("unexpected bundle name '{name}'"),
            ));
        }

        let dir = self.root.join(&name);
        let bundle = ModelBundle {
            manifest: read_json(&dir.join(MANIFEST_FILE))?,
            classifier: read_json(&dir.join(CLASSIFIER_FILE))?,
            transformers: FittedTransformers {
                encoders: read_json::<Vec<CategoryEncoder>>(&dir.join(ENCODERS_FILE))?,
                scaler: read_json::<StandardScaler>(&dir.join(SCALER_FILE))?,
            },
            evaluation: read_json(&dir.join(EVALUATION_FILE))?,
        };
        bundle
            .validate()
            .map_err(|reason| PipelineError::corrupt(&dir, reason))?;

        tracing::info!(
            "Loaded model bundle {} trained at {}",
            bundle.manifest.bundle_id,
            bundle.manifest.trained_at
        );
        Ok(Some(bundle))
    }

    /// Remove bundle directories other than `keep`. Failures only log.
    fn prune(&self, keep: &str) {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!("Cannot list '{}' for pruning: {err}", self.root.display());
                return;
            }
        };
        for entry in entries.flatten() {
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            if name.starts_with(BUNDLE_PREFIX) && name != keep {
                if let Err(err) = fs::remove_dir_all(entry.path()) {
                    tracing::warn!("Cannot remove stale bundle '{name}': {err}");
                }
            }
        }
    }
}

fn write_parts(dir: &Path, bundle: &ModelBundle) -> Result<()> {
    fs::create_dir_all(dir)?;
    write_json(&dir.join(CLASSIFIER_FILE), &bundle.classifier)?;
    write_json(&dir.join(ENCODERS_FILE), &bundle.transformers.encoders)?;
    write_json(&dir.join(SCALER_FILE), &bundle.transformers.scaler)?;
    write_json(&dir.join(EVALUATION_FILE), &bundle.evaluation)?;
    // manifest last: a directory without one is never complete
    write_json(&dir.join(MANIFEST_FILE), &bundle.manifest)?;
    Ok(())
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec(value)?;
    fs::write(path, json)?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = fs::read(path).map_err(|e| PipelineError::corrupt(path, e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| PipelineError::corrupt(path, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forest::ForestParams;
    use crate::test_support::synthetic_records;
    use crate::trainer::{Trainer, TrainerConfig};

    fn trained_bundle() -> ModelBundle {
        let records = synthetic_records(&[("CS", 20), ("Business", 20)], 5);
        let config = TrainerConfig {
            forest: ForestParams {
                n_trees: 10,
                ..ForestParams::default()
            },
            ..TrainerConfig::default()
        };
        Trainer::new(config).train(&records).unwrap()
    }

    #[test]
    fn empty_store_loads_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().join("artifacts"));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn persisted_bundle_restores_identically() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let bundle = trained_bundle();

        store.persist(&bundle).unwrap();
        let restored = store.load().unwrap().unwrap();
        assert_eq!(restored, bundle);
    }

    #[test]
    fn retraining_replaces_and_prunes_the_old_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let first = trained_bundle();
        let second = trained_bundle();

        let first_dir = store.persist(&first).unwrap();
        let second_dir = store.persist(&second).unwrap();

        assert!(!first_dir.exists());
        assert!(second_dir.exists());
        let live = store.load().unwrap().unwrap();
        assert_eq!(live.manifest.bundle_id, second.manifest.bundle_id);
    }

    #[test]
    fn failed_persist_leaves_the_previous_bundle_live() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let first = trained_bundle();
        let first_dir = store.persist(&first).unwrap();
        let pointer = fs::read_to_string(dir.path().join(POINTER_FILE)).unwrap();

        // a plain file where the staging directory must go
        let second = trained_bundle();
        let blocker = dir
            .path()
            .join(format!(".staging-{BUNDLE_PREFIX}{}", second.manifest.bundle_id));
        fs::write(&blocker, b"").unwrap();

        assert!(store.persist(&second).is_err());
        assert_eq!(
            fs::read_to_string(dir.path().join(POINTER_FILE)).unwrap(),
            pointer
        );
        assert!(first_dir.exists());
        let live = store.load().unwrap().unwrap();
        assert_eq!(live.manifest.bundle_id, first.manifest.bundle_id);
    }

    #[test]
    fn version_mismatch_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let mut bundle = trained_bundle();
        bundle.manifest.format_version = FORMAT_VERSION + 1;
        store.persist(&bundle).unwrap();

        let err = store.load().unwrap_err();
        assert!(matches!(err, PipelineError::ArtifactCorrupt { .. }));
        assert!(err.to_string().contains("format version"));
    }

    #[test]
    fn missing_part_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let target = store.persist(&trained_bundle()).unwrap();
        fs::remove_file(target.join(SCALER_FILE)).unwrap();

        let err = store.load().unwrap_err();
        assert!(matches!(err, PipelineError::ArtifactCorrupt { .. }));
    }

    #[test]
    fn garbage_classifier_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let target = store.persist(&trained_bundle()).unwrap();
        fs::write(target.join(CLASSIFIER_FILE), b"{not json").unwrap();

        assert!(matches!(
            store.load().unwrap_err(),
            PipelineError::ArtifactCorrupt { .. }
        ));
    }

    #[test]
    fn pointer_cannot_escape_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        fs::write(dir.path().join(POINTER_FILE), "../elsewhere").unwrap();
        assert!(matches!(
            store.load().unwrap_err(),
            PipelineError::ArtifactCorrupt { .. }
        ));
    }
}
