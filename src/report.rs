use std::fmt::Write;

use crate::bundle::ModelBundle;

/// Features ranked by importance, highest first.
pub fn ranked_features(bundle: &ModelBundle) -> Vec<(String, f64)> {
    let mut ranked: Vec<(String, f64)> = bundle
        .manifest
        .feature_columns
        .iter()
        .cloned()
        .zip(bundle.classifier.feature_importances.iter().copied())
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    ranked
}

pub fn build_report(bundle: &ModelBundle) -> String {
    let manifest = &bundle.manifest;
    let evaluation = &bundle.evaluation;
    let mut output = String::new();

    let _ = writeln!(output, "# Grade Classifier Report");
    let _ = writeln!(
        output,
        "Bundle {} trained at {} on {} rows ({} train / {} test)",
        manifest.bundle_id,
        manifest.trained_at.format("%Y-%m-%d %H:%M UTC"),
        manifest.dataset_rows,
        evaluation.train_rows,
        evaluation.test_rows
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "Accuracy: {:.2}", evaluation.accuracy);
    let _ = writeln!(output);

    let _ = writeln!(output, "## Classification Report");
    let _ = writeln!(output, "| class | precision | recall | f1 | support |");
    let _ = writeln!(output, "|---|---|---|---|---|");
    for m in &evaluation.per_class {
        let _ = writeln!(
            output,
            "| {} | {:.2} | {:.2} | {:.2} | {} |",
            m.label, m.precision, m.recall, m.f1, m.support
        );
    }
    for (name, avg) in [
        ("macro avg", &evaluation.macro_avg),
        ("weighted avg", &evaluation.weighted_avg),
    ] {
        let _ = writeln!(
            output,
            "| {} | {:.2} | {:.2} | {:.2} | {} |",
            name, avg.precision, avg.recall, avg.f1, evaluation.test_rows
        );
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Confusion Matrix");
    let _ = writeln!(output, "Rows are actual grades, columns predicted grades.");
    let _ = writeln!(output);
    let _ = writeln!(output, "| actual \\ predicted | {} |", evaluation.classes.join(" | "));
    let _ = writeln!(output, "|---|{}", "---|".repeat(evaluation.classes.len()));
    for (label, row) in evaluation.classes.iter().zip(&evaluation.confusion_matrix) {
        let cells: Vec<String> = row.iter().map(|c| c.to_string()).collect();
        let _ = writeln!(output, "| {} | {} |", label, cells.join(" | "));
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Feature Importance");
    for (name, importance) in ranked_features(bundle).iter().take(10) {
        let _ = writeln!(output, "- {}: {:.3}", name, importance);
    }

    output
}
