use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub label: String,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AverageMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

/// Held-out evaluation of a trained classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub accuracy: f64,
    pub classes: Vec<String>,
    pub per_class: Vec<ClassMetrics>,
    pub macro_avg: AverageMetrics,
    pub weighted_avg: AverageMetrics,
    /// Rows are actual classes, columns predicted classes.
    pub confusion_matrix: Vec<Vec<usize>>,
    pub train_rows: usize,
    pub test_rows: usize,
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

pub fn confusion_matrix(n_classes: usize, actual: &[usize], predicted: &[usize]) -> Vec<Vec<usize>> {
    let mut matrix = vec![vec![0; n_classes]; n_classes];
    for (&a, &p) in actual.iter().zip(predicted) {
        matrix[a][p] += 1;
    }
    matrix
}

/// Score `predicted` against `actual`; both hold indices into `classes`.
///
/// Precision or recall with a zero denominator count as 0.
pub fn evaluate(
    classes: &[String],
    actual: &[usize],
    predicted: &[usize],
    train_rows: usize,
) -> EvaluationReport {
    let matrix = confusion_matrix(classes.len(), actual, predicted);
    let total = actual.len();
    let correct: usize = (0..classes.len()).map(|k| matrix[k][k]).sum();

    let per_class: Vec<ClassMetrics> = classes
        .iter()
        .enumerate()
        .map(|(k, label)| {
            let true_positive = matrix[k][k];
            let support: usize = matrix[k].iter().sum();
            let predicted_k: usize = matrix.iter().map(|row| row[k]).sum();
            let precision = ratio(true_positive, predicted_k);
            let recall = ratio(true_positive, support);
            let f1 = if precision + recall > 0.0 {
                2.0 * precision * recall / (precision + recall)
            } else {
                0.0
            };
            ClassMetrics {
                label: label.clone(),
                precision,
                recall,
                f1,
                support,
            }
        })
        .collect();

    let n_classes = per_class.len().max(1) as f64;
    let macro_avg = AverageMetrics {
        precision: per_class.iter().map(|m| m.precision).sum::<f64>() / n_classes,
        recall: per_class.iter().map(|m| m.recall).sum::<f64>() / n_classes,
        f1: per_class.iter().map(|m| m.f1).sum::<f64>() / n_classes,
    };

    let weight = |m: &ClassMetrics| ratio(m.support, total);
    let weighted_avg = AverageMetrics {
        precision: per_class.iter().map(|m| m.precision * weight(m)).sum(),
        recall: per_class.iter().map(|m| m.recall * weight(m)).sum(),
        f1: per_class.iter().map(|m| m.f1 * weight(m)).sum(),
    };

    EvaluationReport {
        accuracy: ratio(correct, total),
        classes: classes.to_vec(),
        per_class,
        macro_avg,
        weighted_avg,
        confusion_matrix: matrix,
        train_rows,
        test_rows: total,
    }
}
