use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::dataset::{CategoricalColumn, NumericalColumn, StudentRecord};
use crate::error::{PipelineError, Result};

/// Category label used for empty categorical cells.
pub const MISSING_CATEGORY: &str = "<missing>";

/// Maps each observed category of one column to a dense code.
/// Codes follow sorted category order, so row order never changes them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryEncoder {
    pub column: String,
    pub categories: Vec<String>,
}

impl CategoryEncoder {
    pub fn fit<'a>(column: &str, values: impl IntoIterator<Item = Option<&'a str>>) -> Self {
        let categories: BTreeSet<String> = values
            .into_iter()
            .map(|v| v.unwrap_or(MISSING_CATEGORY).to_string())
            .collect();
        Self {
            column: column.to_string(),
            categories: categories.into_iter().collect(),
        }
    }

    pub fn encode(&self, value: Option<&str>) -> Option<usize> {
        let value = value.unwrap_or(MISSING_CATEGORY);
        self.categories
            .binary_search_by(|c| c.as_str().cmp(value))
            .ok()
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnStats {
    pub column: String,
    pub mean: f64,
    pub std: f64,
}

/// Per-column standardization fixed at fit time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    pub columns: Vec<ColumnStats>,
}

impl StandardScaler {
    /// Standardize one value of column `index`. Missing values and
    /// zero-variance columns map to 0.
    pub fn scale(&self, index: usize, value: Option<f64>) -> f64 {
        let stats = &self.columns[index];
        match value {
            Some(x) if stats.std > 0.0 => (x - stats.mean) / stats.std,
            _ => 0.0,
        }
    }
}

/// Encoders and scaler produced together from one training table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedTransformers {
    pub encoders: Vec<CategoryEncoder>,
    pub scaler: StandardScaler,
}

impl FittedTransformers {
    pub fn feature_count(&self) -> usize {
        self.scaler.columns.len() + self.encoders.len()
    }

    /// Encode one record with the fitted statistics.
    pub fn transform(&self, record: &StudentRecord) -> Result<Vec<f64>> {
        let mut features = Vec::with_capacity(self.feature_count());

        for (index, column) in NumericalColumn::ALL.iter().enumerate() {
            features.push(self.scaler.scale(index, column.value(record)));
        }

        for (encoder, column) in self.encoders.iter().zip(CategoricalColumn::ALL) {
            let value = column.value(record);
            let code = encoder.encode(value).ok_or_else(|| {
                PipelineError::InvalidInput(format!(
                    "unknown {} category '{}' for student {}",
                    column.header(),
                    value.unwrap_or(MISSING_CATEGORY),
                    record.student_id
                ))
            })?;
            features.push(code as f64);
        }

        Ok(features)
    }

    /// Check that these transformers cover exactly the current feature columns.
    pub fn matches_schema(&self) -> bool {
        self.scaler.columns.len() == NumericalColumn::ALL.len()
            && self
                .scaler
                .columns
                .iter()
                .zip(NumericalColumn::ALL)
                .all(|(stats, column)| stats.column == column.header())
            && self.encoders.len() == CategoricalColumn::ALL.len()
            && self
                .encoders
                .iter()
                .zip(CategoricalColumn::ALL)
                .all(|(encoder, column)| encoder.column == column.header() && !encoder.is_empty())
    }
}

/// Fit encoders and scaler over the whole table.
///
/// Fails when a feature column has no values at all, or when its mean or
/// standard deviation is not finite.
pub fn fit(records: &[StudentRecord]) -> Result<FittedTransformers> {
    let mut stats = Vec::with_capacity(NumericalColumn::ALL.len());
    for column in NumericalColumn::ALL {
        let values: Vec<f64> = records.iter().filter_map(|r| column.value(r)).collect();
        if values.is_empty() {
            return Err(PipelineError::Training(format!(
                "feature column '{}' has no values",
                column.header()
            )));
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let std = (values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n).sqrt();
        if !(mean.is_finite() && std.is_finite()) {
            return Err(PipelineError::Training(format!(
                "feature column '{}' has non-finite statistics (mean {mean}, std {std})",
                column.header()
            )));
        }
        stats.push(ColumnStats {
            column: column.header().to_string(),
            mean,
            std,
        });
    }

    let mut encoders = Vec::with_capacity(CategoricalColumn::ALL.len());
    for column in CategoricalColumn::ALL {
        if records.iter().all(|r| column.value(r).is_none()) {
            return Err(PipelineError::Training(format!(
                "feature column '{}' has no values",
                column.header()
            )));
        }
        encoders.push(CategoryEncoder::fit(
            column.header(),
            records.iter().map(|r| column.value(r)),
        ));
    }

    let transformers = FittedTransformers {
        encoders,
        scaler: StandardScaler { columns: stats },
    };
    tracing::debug!(
        "Fitted transformers over {} rows, {} features",
        records.len(),
        transformers.feature_count()
    );
    Ok(transformers)
}

/// Fit on `records` and encode every row with the result.
pub fn fit_transform(records: &[StudentRecord]) -> Result<(Vec<Vec<f64>>, FittedTransformers)> {
    let transformers = fit(records)?;
    let matrix = records
        .iter()
        .map(|r| transformers.transform(r))
        .collect::<Result<Vec<_>>>()?;
    Ok((matrix, transformers))
}
